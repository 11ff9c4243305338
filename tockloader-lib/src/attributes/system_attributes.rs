// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use byteorder::{ByteOrder, LittleEndian};

use crate::board_interface::BoardInterface;
use crate::errors::{AttributeParseError, TockError, TockloaderError};

/// Everything the board reports about itself: the bootloader's attribute
/// table plus the kernel attributes block stored just below the apps region.
///
/// Note: not all system attributes are present on all boards. You cannot
/// assume any of these structure members are `Some(_)`.
#[derive(Debug, Default)]
pub struct SystemAttributes {
    pub board: Option<String>,
    pub arch: Option<String>,
    pub appaddr: Option<u64>,
    pub boothash: Option<String>,
    pub bootloader_version: Option<String>,
    pub pagesize: Option<u64>,
    pub sentinel: Option<String>,
    pub kernel_version: Option<u64>,
    pub app_mem_start: Option<u32>,
    pub app_mem_len: Option<u32>,
    pub kernel_bin_start: Option<u32>,
    pub kernel_bin_len: Option<u32>,
}

impl SystemAttributes {
    /// Read the system attributes through the board interface. A bootloader
    /// must be present on this board for this to work.
    pub async fn read(
        board: &mut (dyn BoardInterface + Send),
    ) -> Result<SystemAttributes, TockloaderError> {
        let mut result = SystemAttributes::default();

        for decoded in (board.get_all_attributes().await?).into_iter().flatten() {
            match decoded.key.as_str() {
                "board" => result.board = Some(decoded.value),
                "arch" => result.arch = Some(decoded.value),
                "appaddr" | "apps_start_address" => {
                    result.appaddr = Some(
                        u64::from_str_radix(decoded.value.trim_start_matches("0x"), 16).map_err(
                            |e| TockError::AttributeParsing(AttributeParseError::InvalidNumber(e)),
                        )?,
                    );
                }
                "boothash" => result.boothash = Some(decoded.value),
                "bootloader_version" => result.bootloader_version = Some(decoded.value),
                "pagesize" => {
                    result.pagesize = Some(decoded.value.parse::<u64>().map_err(|e| {
                        TockError::AttributeParsing(AttributeParseError::InvalidNumber(e))
                    })?);
                }
                other => {
                    log::debug!("Ignoring board-specific attribute '{other}'");
                }
            }
        }

        // The 100 bytes before the apps start address hold the kernel
        // attributes block, ending in the "TOCK" sentinel.
        if let Some(appaddr) = result.appaddr {
            if appaddr >= 100 {
                let addr = board.translate_address(appaddr - 100);
                let block = board.read_range(addr, 100).await?;

                let sentinel = String::from_utf8_lossy(&block[96..100]).to_string();
                if sentinel.starts_with("TOCK") {
                    result.sentinel = Some(sentinel);
                    result.kernel_version = Some(LittleEndian::read_uint(&block[95..96], 1));
                    result.app_mem_start = Some(LittleEndian::read_u32(&block[80..84]));
                    result.app_mem_len = Some(LittleEndian::read_u32(&block[84..88]));
                    result.kernel_bin_start = Some(LittleEndian::read_u32(&block[68..72]));
                    result.kernel_bin_len = Some(LittleEndian::read_u32(&block[72..76]));
                } else {
                    log::debug!("No kernel attributes sentinel below {appaddr:#x}");
                }
            }
        }

        Ok(result)
    }
}
