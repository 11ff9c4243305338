// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use tbf_parser::types::TbfHeader;

use crate::board_interface::BoardInterface;
use crate::board_settings::BoardSettings;
use crate::commands::helpers::{read_installed_apps, read_modify_write};
use crate::errors::{PlacementError, TockloaderError};

/// Remove an app by rewriting its header as a padding app of the same total
/// length: the linked list stays intact and no other app moves.
pub async fn uninstall_app(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
    name: &str,
    force: bool,
) -> Result<usize, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = uninstall_inner(board, settings, name, force).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

async fn uninstall_inner(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
    name: &str,
    force: bool,
) -> Result<usize, TockloaderError> {
    let start_address = match board.get_apps_start_address().await {
        Ok(addr) => addr,
        Err(_) => settings.start_address,
    };
    let apps = read_installed_apps(board, start_address, false).await?;

    let targets: Vec<_> = apps
        .iter()
        .filter(|app| !app.is_padding() && app.name() == name)
        .collect();
    if targets.is_empty() {
        return Err(PlacementError::NoSuchApp(name.to_string()).into());
    }

    for app in &targets {
        if app.sticky() && !force {
            return Err(PlacementError::StickyApp(name.to_string()).into());
        }
    }

    for app in &targets {
        let padding = TbfHeader::new_padding(app.total_size());
        let header_bytes = padding
            .generate()
            .map_err(crate::errors::TabError::Parsing)?;
        log::info!(
            "Replacing '{}' at {:#x} with {:#x} bytes of padding",
            name,
            app.address,
            app.total_size()
        );
        read_modify_write(board, app.address, &header_bytes).await?;
    }

    Ok(targets.len())
}
