// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use crate::board_interface::BoardInterface;
use crate::board_settings::BoardSettings;
use crate::commands::helpers::{read_installed_apps, read_modify_write};
use crate::errors::{PlacementError, TockloaderError};

/// The two flags apps carry in their TBF header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppFlag {
    /// Bit 0: the kernel starts this app at boot.
    Enabled,
    /// Bit 1: the app survives installs and erases unless forced out.
    Sticky,
}

/// Set or clear one flag on every installed app called `name`, rewriting
/// the affected header in place with a fresh checksum.
pub async fn set_app_flag(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
    name: &str,
    flag: AppFlag,
    value: bool,
) -> Result<usize, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = set_flag_inner(board, settings, name, flag, value).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

async fn set_flag_inner(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
    name: &str,
    flag: AppFlag,
    value: bool,
) -> Result<usize, TockloaderError> {
    let start_address = match board.get_apps_start_address().await {
        Ok(addr) => addr,
        Err(_) => settings.start_address,
    };
    let apps = read_installed_apps(board, start_address, false).await?;

    let mut changed = 0;
    for mut app in apps {
        if app.is_padding() || app.name() != name {
            continue;
        }
        match flag {
            AppFlag::Enabled => app.header.set_enabled(value),
            AppFlag::Sticky => app.header.set_sticky(value),
        }
        let header_bytes = app
            .header
            .generate()
            .map_err(crate::errors::TabError::Parsing)?;
        log::info!(
            "Setting {flag:?}={value} on '{name}' at {:#x}",
            app.address
        );
        read_modify_write(board, app.address, &header_bytes).await?;
        changed += 1;
    }

    if changed == 0 {
        return Err(PlacementError::NoSuchApp(name.to_string()).into());
    }
    Ok(changed)
}
