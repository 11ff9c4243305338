// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Install and update: merge new TAB apps with what is on the board,
//! compute a placement, and write the minimal set of pages.

use crate::app::{InstalledApp, TabApp};
use crate::attributes::system_attributes::SystemAttributes;
use crate::board_interface::BoardInterface;
use crate::board_settings::{BoardSettings, InstallOptions, ReplacePolicy};
use crate::commands::helpers::{read_installed_apps, tail_looks_like_tbf};
use crate::errors::{PlacementError, TockError, TockloaderError};
use crate::layout::{build_image, compute_placement, plan_writes, MpuPolicy, PlaceableApp};
use crate::tabs::tab::Tab;

/// What an install run did, for display and for tests.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub installed: Vec<String>,
    /// (app name, reason) pairs for TABs that were not installed.
    pub skipped: Vec<(String, String)>,
    pub writes_issued: usize,
    pub bytes_written: usize,
    pub end_address: u64,
}

/// Install `tabs` onto the board.
///
/// Drives the full sequence: enter bootloader, read attributes, extract the
/// installed apps, merge, place, write, clear the tail. The bootloader is
/// exited on a best-effort basis even when a step fails.
pub async fn install_apps(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
    tabs: Vec<Tab>,
    options: &InstallOptions,
) -> Result<InstallReport, TockloaderError> {
    board.enter_bootloader_mode().await?;
    let result = install_inner(board, settings, tabs, options).await;
    if let Err(e) = board.exit_bootloader_mode().await {
        log::warn!("Could not exit bootloader mode: {e}");
    }
    result
}

async fn install_inner(
    board: &mut (dyn BoardInterface + Send),
    settings: &BoardSettings,
    tabs: Vec<Tab>,
    options: &InstallOptions,
) -> Result<InstallReport, TockloaderError> {
    let mut report = InstallReport::default();

    let arch = match board.get_board_arch().await? {
        Some(arch) => arch,
        None => settings.arch.clone().ok_or_else(|| {
            crate::errors::InternalError::MisconfiguredBoardSettings(
                "No architecture found.".to_owned(),
            )
        })?,
    };
    let board_name = board.get_board_name().await?;
    let start_address = board.get_apps_start_address().await?;
    let page_size = board.get_page_size();

    // Board compatibility gate. --force downgrades a mismatch to a warning.
    let mut tab_apps: Vec<TabApp> = Vec::new();
    for tab in &tabs {
        if let Some(board_name) = &board_name {
            if !tab.is_compatible_with_board(board_name) {
                if options.force {
                    log::warn!(
                        "Tab '{}' is not built for board '{board_name}', installing anyway",
                        tab.name()
                    );
                } else {
                    return Err(TockError::BoardMismatch {
                        found: board_name.clone(),
                        expected: tab
                            .metadata()
                            .only_for_boards
                            .clone()
                            .unwrap_or_default(),
                    }
                    .into());
                }
            }
        }
        match TabApp::from_tab(tab, &arch) {
            Ok(app) => tab_apps.push(app),
            Err(_) => {
                let reason =
                    PlacementError::UnsupportedArch(tab.name().to_string(), arch.clone());
                log::warn!("Skipping tab: {reason}");
                report
                    .skipped
                    .push((tab.name().to_string(), reason.to_string()));
            }
        }
    }

    // Kernel compatibility is advisory; old bootloaders misreport their
    // version, so mismatches only warn.
    if let Ok(system) = SystemAttributes::read(board).await {
        if let Some(kernel_version) = system.kernel_version {
            for tab in &tabs {
                if !tab.is_compatible_with_kernel_version(kernel_version as u32) {
                    log::warn!(
                        "Tab '{}' wants a newer kernel than version {kernel_version}",
                        tab.name()
                    );
                }
            }
        }
    }

    let installed = read_installed_apps(board, start_address, true).await?;
    let merged = merge_apps(installed, tab_apps, options, &mut report)?;

    if merged.is_empty() && report.installed.is_empty() {
        log::info!("Nothing to install");
    }

    let policy = MpuPolicy::for_arch(Some(arch.as_str()));
    let placement = compute_placement(
        merged,
        start_address,
        page_size,
        policy,
        options.preserve_order,
    )?;
    let image = build_image(&placement);

    let existing = board
        .read_range(board.translate_address(start_address), image.len())
        .await?;
    let ops = plan_writes(&existing, &image, start_address, page_size, options.bundle_apps);

    // Ascending addresses, so an aborted run leaves a prefix-correct list.
    for op in &ops {
        log::info!(
            "Writing {:#x} bytes at {:#x}",
            op.data.len(),
            op.address
        );
        board
            .flash_binary(board.translate_address(op.address), &op.data)
            .await?;
        report.writes_issued += 1;
        report.bytes_written += op.data.len();
    }

    // Terminate the linked list: whatever follows the last app must not
    // parse as a TBF header.
    let tail = board
        .read_range(board.translate_address(placement.end_address), 8)
        .await?;
    if tail_looks_like_tbf(&tail) {
        log::debug!("Clearing stale header at {:#x}", placement.end_address);
        board
            .clear_bytes(board.translate_address(placement.end_address))
            .await?;
    }

    report.end_address = placement.end_address;
    Ok(report)
}

/// Apply the replace/erase/sticky policies and turn the surviving apps into
/// placement input.
fn merge_apps(
    installed: Vec<InstalledApp>,
    tab_apps: Vec<TabApp>,
    options: &InstallOptions,
    report: &mut InstallReport,
) -> Result<Vec<PlaceableApp>, TockloaderError> {
    // Padding apps are dropped here; the placement regenerates whatever
    // padding the new layout needs.
    let mut survivors: Vec<InstalledApp> = Vec::new();
    for app in installed.into_iter().filter(|app| !app.is_padding()) {
        if options.erase && !(app.sticky() && !options.force) {
            log::info!("Erasing installed app '{}'", app.name());
            continue;
        }
        survivors.push(app);
    }

    let mut placeables: Vec<PlaceableApp> = Vec::new();
    for app in &survivors {
        placeables.push(installed_to_placeable(app)?);
    }

    for tab_app in tab_apps {
        let name = tab_app.name.clone();
        let matches: Vec<usize> = placeables
            .iter()
            .enumerate()
            .filter(|(_, p)| p.name() == name)
            .map(|(i, _)| i)
            .collect();

        match options.replace {
            ReplacePolicy::ReplaceOnly if matches.is_empty() => {
                log::warn!("No matching installed app for '{name}'");
                report
                    .skipped
                    .push((name, "no matching installed app".to_string()));
                continue;
            }
            ReplacePolicy::Replace | ReplacePolicy::ReplaceOnly => {
                if let Some(&first) = matches.first() {
                    let replaced_sticky = survivors
                        .iter()
                        .any(|s| s.name() == name && s.sticky());
                    if replaced_sticky && !options.force {
                        return Err(PlacementError::StickyApp(name).into());
                    }
                    // Drop every installed copy, put the new app where the
                    // first one was.
                    for &index in matches.iter().rev() {
                        placeables.remove(index);
                    }
                    placeables.insert(first, tab_to_placeable(&tab_app));
                } else {
                    placeables.push(tab_to_placeable(&tab_app));
                }
            }
            ReplacePolicy::NoReplace => {
                placeables.push(tab_to_placeable(&tab_app));
            }
        }
        report.installed.push(tab_app.name);
    }

    check_fixed_conflicts(&placeables)?;
    Ok(placeables)
}

fn installed_to_placeable(app: &InstalledApp) -> Result<PlaceableApp, TockloaderError> {
    let bytes = app.bytes.clone().ok_or_else(|| {
        crate::errors::InternalError::MisconfiguredBoardSettings(format!(
            "app '{}' was walked without its binary",
            app.name()
        ))
    })?;
    Ok(if app.header.get_fixed_address_flash().is_some() {
        PlaceableApp::Fixed {
            name: app.name(),
            variants: vec![(app.header.clone(), bytes)],
        }
    } else {
        PlaceableApp::Movable {
            name: app.name(),
            header: app.header.clone(),
            bytes,
        }
    })
}

fn tab_to_placeable(app: &TabApp) -> PlaceableApp {
    if app.has_fixed_addresses() {
        PlaceableApp::Fixed {
            name: app.name.clone(),
            variants: app
                .variants
                .iter()
                .map(|v| (v.header.clone(), v.data.clone()))
                .collect(),
        }
    } else {
        let tbf = &app.variants[0];
        PlaceableApp::Movable {
            name: app.name.clone(),
            header: tbf.header.clone(),
            bytes: tbf.data.clone(),
        }
    }
}

/// Two apps pinned to the same single address can never both be placed.
fn check_fixed_conflicts(apps: &[PlaceableApp]) -> Result<(), TockloaderError> {
    let fixed: Vec<(&str, Vec<u64>)> = apps
        .iter()
        .filter_map(|app| match app {
            PlaceableApp::Fixed { name, variants } => Some((
                name.as_str(),
                variants
                    .iter()
                    .filter_map(|(h, _)| h.get_fixed_address_flash().map(u64::from))
                    .collect(),
            )),
            PlaceableApp::Movable { .. } => None,
        })
        .collect();

    for (i, (name_a, addrs_a)) in fixed.iter().enumerate() {
        for (name_b, addrs_b) in fixed.iter().skip(i + 1) {
            if addrs_a.len() == 1 && addrs_a == addrs_b {
                return Err(PlacementError::FixedAddressConflict(
                    name_a.to_string(),
                    name_b.to_string(),
                    addrs_a[0],
                )
                .into());
            }
        }
    }
    Ok(())
}
