// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use crate::board_interface::BoardInterface;
use crate::commands::helpers::read_modify_write;
use crate::errors::TockloaderError;

/// Read raw flash.
pub async fn read_flash(
    board: &mut (dyn BoardInterface + Send),
    address: u64,
    length: usize,
) -> Result<Vec<u8>, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = board
        .read_range(board.translate_address(address), length)
        .await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

/// Write raw bytes at an arbitrary address, preserving the rest of the
/// affected pages.
pub async fn write_flash(
    board: &mut (dyn BoardInterface + Send),
    address: u64,
    bytes: &[u8],
) -> Result<(), TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = read_modify_write(board, address, bytes).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

/// Flash a whole binary at a page-aligned address, padding the last page
/// with 0xFF. This is the `flash` subcommand used for raw images.
pub async fn flash_binary_at(
    board: &mut (dyn BoardInterface + Send),
    address: u64,
    bytes: &[u8],
) -> Result<(), TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = flash_inner(board, address, bytes).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

async fn flash_inner(
    board: &mut (dyn BoardInterface + Send),
    address: u64,
    bytes: &[u8],
) -> Result<(), TockloaderError> {
    let page_size = board.get_page_size().max(1);
    if address % page_size != 0 {
        return Err(TockloaderError::Usage(format!(
            "flash address {address:#x} is not {page_size}-byte page aligned"
        )));
    }
    let mut padded = bytes.to_vec();
    let span = (padded.len() as u64).div_ceil(page_size) * page_size;
    padded.resize(span as usize, 0xFF);
    board
        .flash_binary(board.translate_address(address), &padded)
        .await
}

/// One page of flash, for `dump-flash-page`.
pub async fn dump_flash_page(
    board: &mut (dyn BoardInterface + Send),
    page_number: u64,
) -> Result<Vec<u8>, TockloaderError> {
    let page_size = board.get_page_size().max(1);
    read_flash(board, page_number * page_size, page_size as usize).await
}
