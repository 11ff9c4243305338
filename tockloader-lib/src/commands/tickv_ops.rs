// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! TicKV commands: read the database region off the board, edit it with the
//! codec, and write back only the pages that changed.

use tickv_parser::tock::TockStorageObject;
use tickv_parser::{ObjectInfo, TicKv};

pub use tickv_parser::ObjectInfo as DumpedObject;

use crate::board_interface::BoardInterface;
use crate::board_settings::BoardSettings;
use crate::errors::TockloaderError;
use crate::layout::plan_writes;

/// Where the TicKV database lives, from settings or CLI flags.
#[derive(Clone, Copy, Debug)]
pub struct TickvLocation {
    pub address: u64,
    pub total_size: u64,
    pub region_size: u64,
}

impl TickvLocation {
    pub fn from_settings(settings: &BoardSettings) -> Result<TickvLocation, TockloaderError> {
        let (address, total_size) = settings.tickv_region.ok_or_else(|| {
            TockloaderError::Usage(
                "this board has no TicKV region; pass the database address and size".to_string(),
            )
        })?;
        Ok(TickvLocation {
            address,
            total_size,
            region_size: settings.tickv_region_size,
        })
    }
}

async fn with_tickv<T>(
    board: &mut (dyn BoardInterface + Send),
    location: &TickvLocation,
    f: impl FnOnce(&mut TicKv) -> Result<T, TockloaderError>,
) -> Result<T, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = with_tickv_inner(board, location, f).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

async fn with_tickv_inner<T>(
    board: &mut (dyn BoardInterface + Send),
    location: &TickvLocation,
    f: impl FnOnce(&mut TicKv) -> Result<T, TockloaderError>,
) -> Result<T, TockloaderError> {
    let address = board.translate_address(location.address);
    let existing = board
        .read_range(address, location.total_size as usize)
        .await?;
    let mut kv = TicKv::new(existing.clone(), location.region_size as usize)?;

    let result = f(&mut kv)?;

    // Only pages the codec actually touched go back to the board.
    let page_size = board.get_page_size();
    let ops = plan_writes(&existing, kv.storage(), location.address, page_size, false);
    for op in &ops {
        board
            .flash_binary(board.translate_address(op.address), &op.data)
            .await?;
    }
    if !ops.is_empty() {
        log::info!("Rewrote {} TicKV page(s)", ops.len());
    }

    Ok(result)
}

/// `tickv get`: the raw value and, when it decodes, the Tock storage object
/// wrapped inside it.
pub async fn tickv_get(
    board: &mut (dyn BoardInterface + Send),
    location: &TickvLocation,
    key: &str,
) -> Result<(Vec<u8>, Option<TockStorageObject>), TockloaderError> {
    let key = key.to_string();
    with_tickv(board, location, move |kv| {
        let raw = kv.get(&key)?;
        let wrapped = TockStorageObject::decode(&raw).ok();
        Ok((raw, wrapped))
    })
    .await
}

/// `tickv append`: store a value under a key, wrapped as a Tock storage
/// object when a `write_id` is given.
pub async fn tickv_append(
    board: &mut (dyn BoardInterface + Send),
    location: &TickvLocation,
    key: &str,
    value: &[u8],
    write_id: Option<u32>,
) -> Result<(), TockloaderError> {
    let key = key.to_string();
    let payload = match write_id {
        Some(write_id) => TockStorageObject::new(write_id, value.to_vec()).encode(),
        None => value.to_vec(),
    };
    with_tickv(board, location, move |kv| {
        kv.append(&key, &payload)?;
        Ok(())
    })
    .await
}

/// `tickv invalidate`: clear the valid flag of a key's objects.
pub async fn tickv_invalidate(
    board: &mut (dyn BoardInterface + Send),
    location: &TickvLocation,
    key: &str,
) -> Result<(), TockloaderError> {
    let key = key.to_string();
    with_tickv(board, location, move |kv| {
        kv.invalidate(&key)?;
        Ok(())
    })
    .await
}

/// `tickv dump`: every object in the database.
pub async fn tickv_dump(
    board: &mut (dyn BoardInterface + Send),
    location: &TickvLocation,
) -> Result<Vec<ObjectInfo>, TockloaderError> {
    with_tickv(board, location, |kv| Ok(kv.dump()?)).await
}

/// `tickv cleanup`: compact every region.
pub async fn tickv_cleanup(
    board: &mut (dyn BoardInterface + Send),
    location: &TickvLocation,
) -> Result<(), TockloaderError> {
    with_tickv(board, location, |kv| Ok(kv.cleanup()?)).await
}

/// `tickv reset`: erase the database and write a fresh init object.
pub async fn tickv_reset(
    board: &mut (dyn BoardInterface + Send),
    location: &TickvLocation,
) -> Result<(), TockloaderError> {
    with_tickv(board, location, |kv| {
        kv.reset();
        Ok(())
    })
    .await
}
