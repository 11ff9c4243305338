// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use crate::attributes::decode::{empty_slot, encode_attribute, DecodedAttribute};
use crate::board_interface::{BoardInterface, ATTRIBUTE_SLOTS};
use crate::errors::{TockError, TockloaderError};

/// Every attribute slot with its decoded contents.
pub async fn list_attributes(
    board: &mut (dyn BoardInterface + Send),
) -> Result<Vec<(u8, Option<DecodedAttribute>)>, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = board.get_all_attributes().await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    Ok(result?
        .into_iter()
        .enumerate()
        .map(|(i, attribute)| (i as u8, attribute))
        .collect())
}

/// Store `key = value`, reusing the slot that already holds `key` or the
/// first empty one.
pub async fn set_attribute(
    board: &mut (dyn BoardInterface + Send),
    key: &str,
    value: &str,
) -> Result<u8, TockloaderError> {
    let slot_data = encode_attribute(key, value).ok_or_else(|| {
        TockloaderError::Usage(format!(
            "attribute '{key}' = '{value}' does not fit in a 64-byte slot"
        ))
    })?;

    board.enter_bootloader_mode().await?;
    let result = set_attribute_inner(board, key, &slot_data).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

async fn set_attribute_inner(
    board: &mut (dyn BoardInterface + Send),
    key: &str,
    slot_data: &[u8],
) -> Result<u8, TockloaderError> {
    let attributes = board.get_all_attributes().await?;

    let existing = attributes
        .iter()
        .position(|a| a.as_ref().is_some_and(|a| a.key == key));
    let target = match existing {
        Some(index) => index as u8,
        None => attributes
            .iter()
            .position(|a| a.is_none())
            .map(|index| index as u8)
            .ok_or_else(|| {
                TockloaderError::Usage(format!(
                    "all {ATTRIBUTE_SLOTS} attribute slots are in use"
                ))
            })?,
    };

    board.set_attribute(target, slot_data).await?;
    log::info!("Stored attribute '{key}' in slot {target}");
    Ok(target)
}

/// Clear the slot holding `key`.
pub async fn remove_attribute(
    board: &mut (dyn BoardInterface + Send),
    key: &str,
) -> Result<u8, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = remove_attribute_inner(board, key).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

async fn remove_attribute_inner(
    board: &mut (dyn BoardInterface + Send),
    key: &str,
) -> Result<u8, TockloaderError> {
    let attributes = board.get_all_attributes().await?;
    let index = attributes
        .iter()
        .position(|a| a.as_ref().is_some_and(|a| a.key == key))
        .ok_or_else(|| TockloaderError::Tock(TockError::MissingAttribute(key.to_string())))?
        as u8;

    board.set_attribute(index, &empty_slot()).await?;
    log::info!("Cleared attribute '{key}' from slot {index}");
    Ok(index)
}

/// Point the board at a new apps start address by rewriting the `appaddr`
/// attribute.
pub async fn set_start_address(
    board: &mut (dyn BoardInterface + Send),
    address: u64,
) -> Result<(), TockloaderError> {
    set_attribute(board, "appaddr", &format!("{address:#x}")).await?;
    Ok(())
}
