// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use crate::attributes::app_attributes::AppAttributes;
use crate::attributes::general_attributes::GeneralAttributes;
use crate::attributes::system_attributes::SystemAttributes;
use crate::board_interface::BoardInterface;
use crate::board_settings::BoardSettings;
use crate::errors::TockloaderError;

/// Everything `tockloader info` shows: system attributes plus the apps.
pub async fn info(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
) -> Result<GeneralAttributes, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = info_inner(board, settings).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

async fn info_inner(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
) -> Result<GeneralAttributes, TockloaderError> {
    let system_attributes = SystemAttributes::read(board).await?;
    let start_address = system_attributes
        .appaddr
        .unwrap_or(settings.start_address);
    let app_attributes = AppAttributes::read_apps(board, start_address).await?;
    Ok(GeneralAttributes::new(system_attributes, app_attributes))
}
