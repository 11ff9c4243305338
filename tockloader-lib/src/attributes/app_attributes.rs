// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use tbf_parser::parse::{parse_tbf_footer, parse_tbf_header, parse_tbf_header_lengths};
use tbf_parser::types::{TbfFooterV2Credentials, TbfHeader};

use crate::board_interface::BoardInterface;
use crate::errors::TockloaderError;

/// This structure contains all relevant information about a tock
/// application installed on a board.
///
/// See also <https://book.tockos.org/doc/tock_binary_format>
#[derive(Debug)]
pub struct AppAttributes {
    pub address: u64,
    pub tbf_header: TbfHeader,
    pub tbf_footers: Vec<TbfFooter>,
}

/// This structure represents a footer of a Tock application. Currently,
/// footers only contain credentials, which are used to verify the integrity
/// of the application.
#[derive(Debug)]
pub struct TbfFooter {
    pub credentials: TbfFooterV2Credentials,
    pub size: u32,
}

impl TbfFooter {
    pub fn new(credentials: TbfFooterV2Credentials, size: u32) -> TbfFooter {
        TbfFooter { credentials, size }
    }
}

impl AppAttributes {
    pub(crate) fn new(
        address: u64,
        header_data: TbfHeader,
        footers_data: Vec<TbfFooter>,
    ) -> AppAttributes {
        AppAttributes {
            address,
            tbf_header: header_data,
            tbf_footers: footers_data,
        }
    }

    /// The name the tool uses for this app: the package name, or a
    /// synthesized `app_<addr>` when the header has none.
    pub fn display_name(&self) -> String {
        match self.tbf_header.get_package_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("app_{:#x}", self.address),
        }
    }

    /// Retrieve all application attributes by walking the TBF linked list
    /// from `addr`.
    ///
    /// Applications are laid out in flash sequentially. The walk ends at
    /// erased flash or the first header that fails to parse; a parse
    /// failure is logged rather than surfaced so a partially corrupted
    /// flash still yields the apps before the corruption.
    pub async fn read_apps(
        board: &mut (dyn BoardInterface + Send),
        addr: u64,
    ) -> Result<Vec<AppAttributes>, TockloaderError> {
        let mut appaddr: u64 = addr;
        let mut apps_details: Vec<AppAttributes> = Vec::new();

        loop {
            let translated = board.translate_address(appaddr);
            let appdata = board.read_range(translated, 8).await?;

            // The first 8 bytes of the application data contain the TBF
            // header lengths and version.
            let (tbf_version, header_size, total_size) = match parse_tbf_header_lengths(
                &appdata[0..8]
                    .try_into()
                    .expect("Buffer length must be at least 8 bytes long."),
            ) {
                Ok(lengths) => lengths,
                Err(_) => break,
            };

            log::debug!(
                "App #{}: TBF version {tbf_version}, header size {header_size}, total size {total_size}",
                apps_details.len(),
            );

            let header_data = board.read_range(translated, header_size as usize).await?;
            let header = match parse_tbf_header(&header_data, tbf_version) {
                Ok(header) => header,
                Err(e) => {
                    // A half-written or corrupted app ends the list; report
                    // what was walkable.
                    log::warn!("Giving up walking apps at {appaddr:#x}: {e:?}");
                    break;
                }
            };

            let footers = if header.supports_footers() {
                match Self::read_footers(board, appaddr, &header, total_size).await {
                    Ok(footers) => footers,
                    Err(e) => {
                        log::warn!("Could not parse footers at {appaddr:#x}: {e}");
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            apps_details.push(AppAttributes::new(appaddr, header, footers));
            appaddr += total_size as u64;
        }
        Ok(apps_details)
    }

    async fn read_footers(
        board: &mut (dyn BoardInterface + Send),
        appaddr: u64,
        header: &TbfHeader,
        total_size: u32,
    ) -> Result<Vec<TbfFooter>, TockloaderError> {
        let binary_end_offset = header.get_binary_end();
        let total_footers_size = total_size - binary_end_offset;
        let region = board
            .read_range(
                board.translate_address(appaddr + binary_end_offset as u64),
                total_footers_size as usize,
            )
            .await?;

        let mut footers: Vec<TbfFooter> = Vec::new();
        let mut offset = 0usize;
        while offset < region.len() {
            let (credentials, size) = parse_tbf_footer(&region[offset..]).map_err(|e| {
                crate::errors::TockError::InvalidAppTbfHeader {
                    addr: appaddr,
                    source: e,
                }
            })?;
            footers.push(TbfFooter::new(credentials, size));
            // 4 extra bytes for the type and length words of the TLV.
            offset += size as usize + 4;
        }
        Ok(footers)
    }
}
