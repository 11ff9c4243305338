// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use std::fs::File;
use std::io::Read;

use tar::Archive;
use tbf_parser::parse::{parse_tbf_header, parse_tbf_header_lengths};
use tbf_parser::types::TbfHeader;

use crate::errors::{TabError, TockloaderError};
use crate::tabs::metadata::Metadata;

pub struct TbfFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// One TBF out of a TAB, parsed and ready to place.
pub struct TabTbf {
    pub filename: String,
    pub header: TbfHeader,
    pub data: Vec<u8>,
}

pub struct Tab {
    metadata: Metadata,
    tbf_files: Vec<TbfFile>,
}

impl Tab {
    pub fn open(path: String) -> Result<Self, TockloaderError> {
        let tab_file = File::open(path).map_err(TabError::IO)?;
        Self::from_reader(tab_file)
    }

    /// Read a TAB archive from memory. The test suite builds its TABs this
    /// way.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TockloaderError> {
        Self::from_reader(&bytes[..])
    }

    fn from_reader<R: Read>(reader: R) -> Result<Self, TockloaderError> {
        let mut metadata = None;
        let mut tbf_files = Vec::new();
        let mut archive = Archive::new(reader);

        for archive_entry in archive.entries().map_err(TabError::IO)? {
            let mut archive_file = archive_entry.map_err(TabError::IO)?;

            let path = archive_file.path().map_err(TabError::IO)?;
            let file_name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name.to_owned(),
                None => continue,
            };

            if file_name == "metadata.toml" {
                let mut buf = String::new();
                archive_file
                    .read_to_string(&mut buf)
                    .map_err(TabError::IO)?;
                metadata = Some(Metadata::new(buf)?);
            } else if file_name.ends_with(".tbf") {
                let mut data = Vec::new();

                archive_file.read_to_end(&mut data).map_err(TabError::IO)?;
                tbf_files.push(TbfFile {
                    filename: file_name.to_string(),
                    data,
                });
            }
        }

        match metadata {
            Some(metadata) => Ok(Tab {
                metadata,
                tbf_files,
            }),
            None => Err(TabError::MissingMetadata.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_compatible_with_board(&self, board: &str) -> bool {
        if let Some(boards) = &self.metadata.only_for_boards {
            boards.iter().any(|b| b == board)
        } else {
            true
        }
    }

    pub fn is_compatible_with_kernel_version(&self, kernel_version: u32) -> bool {
        // Boards with old bootloaders report a bogus version; only reject
        // when both sides are unambiguous.
        match self.metadata.minimum_kernel_major() {
            Some(minimum) if kernel_version > 1 => minimum <= kernel_version,
            _ => true,
        }
    }

    /// All TBFs built for `arch`, parsed. Fixed-address builds are named
    /// `<arch>.<flash>.<ram>.tbf` and position-independent ones
    /// `<arch>.tbf`; both match on the architecture prefix. The result is
    /// sorted by fixed flash address, position-independent variants first.
    pub fn tbfs_for_arch(&self, arch: &str) -> Result<Vec<TabTbf>, TockloaderError> {
        let mut tbfs = Vec::new();
        for file in &self.tbf_files {
            let base = match file.filename.strip_suffix(".tbf") {
                Some(base) => base,
                None => continue,
            };
            let matches_arch = base == arch
                || base
                    .strip_prefix(arch)
                    .is_some_and(|rest| rest.starts_with('.'));
            if !matches_arch {
                continue;
            }

            let (_, header_size, _) = match parse_tbf_header_lengths(
                file.data
                    .get(0..8)
                    .ok_or(TabError::MissingBinary(arch.to_owned()))?
                    .try_into()
                    .expect("Buffer length must be at least 8 bytes long."),
            ) {
                Ok(lengths) => lengths,
                Err(_) => {
                    return Err(TabError::Parsing(
                        tbf_parser::types::TbfParseError::NotEnoughFlash,
                    )
                    .into())
                }
            };
            let header = parse_tbf_header(&file.data[0..header_size as usize], 2)
                .map_err(TabError::Parsing)?;
            tbfs.push(TabTbf {
                filename: file.filename.clone(),
                header,
                data: file.data.clone(),
            });
        }

        tbfs.sort_by_key(|tbf| tbf.header.get_fixed_address_flash().unwrap_or(0));
        Ok(tbfs)
    }

    /// The raw bytes of the first TBF matching `arch`, the way a plain
    /// single-variant install consumes them.
    pub fn extract_binary(&self, arch: &str) -> Result<Vec<u8>, TockloaderError> {
        for file in &self.tbf_files {
            if file.filename.starts_with(arch) {
                return Ok(file.data.clone());
            }
        }

        Err(TabError::MissingBinary(arch.to_owned()).into())
    }
}
