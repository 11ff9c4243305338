// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use tbf_parser::parse::parse_tbf_header_lengths;

use crate::app::InstalledApp;
use crate::attributes::app_attributes::AppAttributes;
use crate::board_interface::BoardInterface;
use crate::errors::TockloaderError;

/// Walk the apps region into [`InstalledApp`]s, optionally pulling every
/// app's full TBF bytes (required whenever an app may have to move).
pub async fn read_installed_apps(
    board: &mut (dyn BoardInterface + Send),
    start_address: u64,
    with_binaries: bool,
) -> Result<Vec<InstalledApp>, TockloaderError> {
    let details = AppAttributes::read_apps(board, start_address).await?;
    let mut apps = Vec::with_capacity(details.len());
    for detail in details {
        let bytes = if with_binaries {
            let total = detail.tbf_header.total_size() as usize;
            Some(
                board
                    .read_range(board.translate_address(detail.address), total)
                    .await?,
            )
        } else {
            None
        };
        apps.push(InstalledApp {
            address: detail.address,
            header: detail.tbf_header,
            bytes,
        });
    }
    Ok(apps)
}

/// Overlay `bytes` at `address` by reading the surrounding pages, patching
/// them, and writing them back page-aligned.
pub async fn read_modify_write(
    board: &mut (dyn BoardInterface + Send),
    address: u64,
    bytes: &[u8],
) -> Result<(), TockloaderError> {
    let page_size = board.get_page_size().max(1);
    let page_start = address - address % page_size;
    let end = address + bytes.len() as u64;
    let span = (end - page_start).div_ceil(page_size) * page_size;

    let mut pages = board
        .read_range(board.translate_address(page_start), span as usize)
        .await?;
    let offset = (address - page_start) as usize;
    pages[offset..offset + bytes.len()].copy_from_slice(bytes);
    board
        .flash_binary(board.translate_address(page_start), &pages)
        .await
}

/// Whether the 8 bytes at a region tail would still be taken for a TBF by a
/// kernel walking the list. `InvalidHeader` counts: its total length is
/// trusted for skipping.
pub fn tail_looks_like_tbf(tail: &[u8]) -> bool {
    match tail.get(0..8).map(|t| {
        parse_tbf_header_lengths(t.try_into().expect("tail slice is 8 bytes"))
    }) {
        Some(Ok(_)) => true,
        Some(Err(tbf_parser::types::InitialTbfParseError::InvalidHeader(_))) => true,
        _ => false,
    }
}
