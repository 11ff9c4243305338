// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use crate::attributes::app_attributes::AppAttributes;
use crate::board_interface::BoardInterface;
use crate::board_settings::BoardSettings;
use crate::errors::TockloaderError;

/// List the apps installed on the board.
pub async fn list(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
) -> Result<Vec<AppAttributes>, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let start_address = match board.get_apps_start_address().await {
        Ok(addr) => addr,
        Err(_) => settings.start_address,
    };
    let result = AppAttributes::read_apps(board, start_address).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}
