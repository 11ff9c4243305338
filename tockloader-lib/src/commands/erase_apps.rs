// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use crate::board_interface::BoardInterface;
use crate::board_settings::{BoardSettings, InstallOptions};
use crate::commands::install::install_apps;
use crate::errors::TockloaderError;

/// Delete every non-sticky app. With `force`, sticky apps go too.
///
/// This is an install run with no TABs and the erase policy set: survivors
/// (sticky apps) are re-placed from the start of the region and the tail is
/// cleared.
pub async fn erase_apps(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
    force: bool,
) -> Result<(), TockloaderError> {
    let options = InstallOptions {
        erase: true,
        force,
        ..Default::default()
    };
    let report = install_apps(board, settings, Vec::new(), &options).await?;
    log::info!(
        "Erased apps region ({} writes, end at {:#x})",
        report.writes_issued,
        report.end_address
    );
    Ok(())
}
