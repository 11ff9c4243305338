// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Host-side model of the apps the layout engine moves around.

use tbf_parser::types::{TbfFooterV2Credentials, TbfHeader};

use crate::errors::{TabError, TockloaderError};
use crate::tabs::tab::{Tab, TabTbf};

/// An app discovered by walking the flash linked list. `bytes` holds the
/// whole TBF when it was read, which is required whenever the app may have
/// to move.
pub struct InstalledApp {
    pub address: u64,
    pub header: TbfHeader,
    pub bytes: Option<Vec<u8>>,
}

impl InstalledApp {
    pub fn name(&self) -> String {
        match self.header.get_package_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("app_{:#x}", self.address),
        }
    }

    pub fn is_padding(&self) -> bool {
        !self.header.is_app()
    }

    pub fn sticky(&self) -> bool {
        self.header.sticky()
    }

    pub fn enabled(&self) -> bool {
        self.header.enabled()
    }

    pub fn total_size(&self) -> u32 {
        self.header.total_size()
    }
}

/// An app out of a TAB file, reduced to the variants usable on one
/// architecture. Position-independent apps have exactly one variant;
/// fixed-address apps may carry one TBF per candidate flash address.
pub struct TabApp {
    pub name: String,
    pub variants: Vec<TabTbf>,
}

impl TabApp {
    /// Pick the TBFs of `tab` that run on `arch`. An empty selection means
    /// the TAB does not support this architecture.
    pub fn from_tab(tab: &Tab, arch: &str) -> Result<TabApp, TockloaderError> {
        let variants = tab.tbfs_for_arch(arch)?;
        if variants.is_empty() {
            return Err(TabError::MissingBinary(arch.to_owned()).into());
        }
        Ok(TabApp {
            name: tab.name().to_string(),
            variants,
        })
    }

    pub fn has_fixed_addresses(&self) -> bool {
        self.variants
            .iter()
            .any(|v| v.header.get_fixed_address_flash().is_some())
    }
}

/// Grow a whole TBF in place to `new_total` bytes.
///
/// `Program` apps grow through their footer: the pad becomes a Reserved
/// credentials TLV, so the footer region still parses. `Main` apps have no
/// footer; their pad is zero fill inside the binary region.
pub fn grow_tbf(
    header: &mut TbfHeader,
    bytes: &mut Vec<u8>,
    new_total: u32,
) -> Result<(), TockloaderError> {
    let old_total = header.total_size();
    if new_total == old_total {
        return Ok(());
    }
    if new_total < old_total {
        return Err(crate::errors::InternalError::MisconfiguredBoardSettings(format!(
            "cannot shrink app from {old_total} to {new_total} bytes"
        ))
        .into());
    }

    let pad = (new_total - old_total) as usize;
    if header.supports_footers() && pad >= 8 {
        let reserved = TbfFooterV2Credentials::Reserved(pad as u32 - 4);
        bytes.extend_from_slice(&reserved.generate());
    } else {
        bytes.resize(bytes.len() + pad, 0);
    }

    header.set_total_size(new_total);
    let header_bytes = header
        .generate()
        .map_err(crate::errors::TabError::Parsing)?;
    bytes[..header_bytes.len()].copy_from_slice(&header_bytes);
    Ok(())
}
