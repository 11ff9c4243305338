// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! End-to-end layout engine tests against the in-memory board.

mod common;

use common::*;
use tbf_parser::parse::parse_tbf_header_lengths;
use tockloader_lib::attributes::app_attributes::AppAttributes;
use tockloader_lib::board_interface::{BoardInterface, FlashImage};
use tockloader_lib::board_settings::{BoardSettings, InstallOptions, ReplacePolicy};
use tockloader_lib::commands::install::install_apps;
use tockloader_lib::commands::uninstall::uninstall_app;
use tockloader_lib::tabs::tab::Tab;
use tockloader_lib::{erase_apps, set_app_flag, AppFlag};

fn board(page_size: u64) -> FlashImage {
    FlashImage::new(0x20000, 0x30000, page_size, 0x30000)
}

fn settings() -> BoardSettings {
    BoardSettings {
        arch: Some("cortex-m4".to_string()),
        start_address: 0x30000,
        ..Default::default()
    }
}

async fn walk(board: &mut FlashImage) -> Vec<AppAttributes> {
    AppAttributes::read_apps(board, 0x30000).await.unwrap()
}

/// Installing one TAB onto an empty region.
#[tokio::test]
async fn install_single_app() {
    let mut board = board(512);
    let tbf = build_app_tbf("blink", 0x4000, 1);
    let tab =
        Tab::from_bytes(build_tab("blink", &[("cortex-m4.tbf", tbf.clone())])).unwrap();

    let report = install_apps(
        &mut board,
        &settings(),
        vec![tab],
        &InstallOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.installed, vec!["blink".to_string()]);
    assert_eq!(report.end_address, 0x34000);

    // The TBF bytes are on flash, the byte after the app is erased.
    let memory = board.memory();
    assert_eq!(&memory[0..0x4000], &tbf[..]);
    assert_eq!(memory[0x4000], 0xFF);

    let apps = walk(&mut board).await;
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].display_name(), "blink");
    assert_eq!(apps[0].address, 0x30000);
}

/// A second identical install writes nothing.
#[tokio::test]
async fn install_is_idempotent() {
    let mut board = board(512);
    let tbf = build_app_tbf("blink", 0x4000, 1);
    let make_tab =
        || Tab::from_bytes(build_tab("blink", &[("cortex-m4.tbf", tbf.clone())])).unwrap();

    install_apps(
        &mut board,
        &settings(),
        vec![make_tab()],
        &InstallOptions::default(),
    )
    .await
    .unwrap();
    let writes_first = board.writes_issued();
    assert!(writes_first > 0);

    let report = install_apps(
        &mut board,
        &settings(),
        vec![make_tab()],
        &InstallOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(report.writes_issued, 0);
    assert_eq!(board.writes_issued(), writes_first);
}

/// The linked list stays walkable and ends cleanly.
#[tokio::test]
async fn install_two_apps_linked_list() {
    let mut board = board(512);
    let tab_a = Tab::from_bytes(build_tab(
        "alpha",
        &[("cortex-m4.tbf", build_app_tbf("alpha", 0x4000, 1))],
    ))
    .unwrap();
    let tab_b = Tab::from_bytes(build_tab(
        "beta",
        &[("cortex-m4.tbf", build_app_tbf("beta", 0x2000, 1))],
    ))
    .unwrap();

    install_apps(
        &mut board,
        &settings(),
        vec![tab_a, tab_b],
        &InstallOptions::default(),
    )
    .await
    .unwrap();

    let apps = walk(&mut board).await;
    let names: Vec<String> = apps.iter().map(|a| a.display_name()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    // Consecutive apps are end-to-end adjacent.
    let end_of_first = apps[0].address + apps[0].tbf_header.total_size() as u64;
    assert_eq!(apps[1].address, end_of_first);

    // The byte after the last app does not parse as a TBF header.
    let end = apps[1].address + apps[1].tbf_header.total_size() as u64;
    let tail = board.read_range(end, 8).await.unwrap();
    assert!(parse_tbf_header_lengths(&tail[0..8].try_into().unwrap()).is_err());
}

/// MPU-constrained placement grows apps to an aligned power of
/// two.
#[tokio::test]
async fn install_pads_to_mpu_alignment() {
    let mut board = board(512);
    // 0x3000 is not a power of two; the engine must grow it to 0x4000.
    let tab = Tab::from_bytes(build_tab(
        "odd",
        &[("cortex-m4.tbf", build_app_tbf("odd", 0x3000, 1))],
    ))
    .unwrap();

    install_apps(
        &mut board,
        &settings(),
        vec![tab],
        &InstallOptions::default(),
    )
    .await
    .unwrap();

    let apps = walk(&mut board).await;
    assert_eq!(apps.len(), 1);
    let size = apps[0].tbf_header.total_size() as u64;
    let addr = apps[0].address;
    assert_eq!(size, 0x4000);
    assert!(size.is_power_of_two());
    assert_eq!(addr % size, 0);
}

/// A fixed-address app pulls a padding app in front of it.
#[tokio::test]
async fn install_fixed_address_app() {
    let mut board = board(1024);
    let mut settings = settings();
    settings.page_size = 1024;

    // Header is 0x400 bytes so the binary lands at 0x38400.
    let tbf = build_fixed_tbf("c", 0x4000, 0x400, 0x38400, 0x2000_8000);
    let tab = Tab::from_bytes(build_tab(
        "c",
        &[("cortex-m4.0x38400.0x20008000.tbf", tbf)],
    ))
    .unwrap();

    let report = install_apps(&mut board, &settings, vec![tab], &InstallOptions::default())
        .await
        .unwrap();

    let apps = walk(&mut board).await;
    assert_eq!(apps.len(), 2);

    // First a 0x8000-byte padding app at the start of the region.
    assert!(!apps[0].tbf_header.is_app());
    assert_eq!(apps[0].address, 0x30000);
    assert_eq!(apps[0].tbf_header.total_size(), 0x8000);

    // Then the app, its binary exactly at the fixed address.
    assert_eq!(apps[1].address, 0x38000);
    assert_eq!(apps[1].display_name(), "c");
    assert_eq!(
        apps[1].tbf_header.get_fixed_address_flash(),
        Some(0x38400)
    );
    assert_eq!(report.end_address, 0x3C000);
}

/// Update with no matching installed app is a clean no-op.
#[tokio::test]
async fn update_without_installed_app() {
    let mut board = board(512);
    let tab = Tab::from_bytes(build_tab(
        "ghost",
        &[("cortex-m4.tbf", build_app_tbf("ghost", 0x1000, 1))],
    ))
    .unwrap();

    let options = InstallOptions {
        replace: ReplacePolicy::ReplaceOnly,
        ..Default::default()
    };
    let report = install_apps(&mut board, &settings(), vec![tab], &options)
        .await
        .unwrap();

    assert_eq!(report.writes_issued, 0);
    assert!(report.installed.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].1, "no matching installed app");
}

/// Replace swaps the app in place of the old copy.
#[tokio::test]
async fn replace_reuses_slot() {
    let mut board = board(512);
    let make_tab = |total: u32| {
        Tab::from_bytes(build_tab(
            "app",
            &[("cortex-m4.tbf", build_app_tbf("app", total, 1))],
        ))
        .unwrap()
    };

    install_apps(
        &mut board,
        &settings(),
        vec![make_tab(0x2000)],
        &InstallOptions::default(),
    )
    .await
    .unwrap();
    install_apps(
        &mut board,
        &settings(),
        vec![make_tab(0x4000)],
        &InstallOptions::default(),
    )
    .await
    .unwrap();

    let apps = walk(&mut board).await;
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].display_name(), "app");
    assert_eq!(apps[0].tbf_header.total_size(), 0x4000);
}

/// Uninstall rewrites the app as padding without touching neighbours.
#[tokio::test]
async fn uninstall_leaves_padding() {
    let mut board = board(512);
    let a = build_app_tbf("a", 0x4000, 1);
    let b = build_app_tbf("b", 0x4000, 1);
    board.preload(0x30000, &a);
    board.preload(0x34000, &b);

    uninstall_app(&mut board, &settings(), "b", false)
        .await
        .unwrap();

    let apps = walk(&mut board).await;
    assert_eq!(apps.len(), 2);
    assert_eq!(apps[0].display_name(), "a");
    assert!(!apps[1].tbf_header.is_app());
    assert_eq!(apps[1].address, 0x34000);
    assert_eq!(apps[1].tbf_header.total_size(), 0x4000);

    // "a" was not rewritten.
    assert_eq!(&board.memory()[0..0x4000], &a[..]);
}

#[tokio::test]
async fn uninstall_sticky_needs_force() {
    let mut board = board(512);
    // Flags: enabled | sticky.
    let app = build_app_tbf("pinned", 0x2000, 0x3);
    board.preload(0x30000, &app);

    let denied = uninstall_app(&mut board, &settings(), "pinned", false).await;
    assert!(denied.is_err());

    uninstall_app(&mut board, &settings(), "pinned", true)
        .await
        .unwrap();
    let apps = walk(&mut board).await;
    assert!(!apps[0].tbf_header.is_app());
}

#[tokio::test]
async fn erase_apps_keeps_sticky() {
    let mut board = board(512);
    board.preload(0x30000, &build_app_tbf("plain", 0x4000, 0x1));
    board.preload(0x34000, &build_app_tbf("pinned", 0x4000, 0x3));

    erase_apps(&mut board, &settings(), false).await.unwrap();

    let apps = walk(&mut board).await;
    let names: Vec<String> = apps
        .iter()
        .filter(|a| a.tbf_header.is_app())
        .map(|a| a.display_name())
        .collect();
    assert_eq!(names, vec!["pinned"]);

    erase_apps(&mut board, &settings(), true).await.unwrap();
    let apps = walk(&mut board).await;
    assert!(apps.iter().all(|a| !a.tbf_header.is_app()));
}

#[tokio::test]
async fn disable_and_stick_app() {
    let mut board = board(512);
    board.preload(0x30000, &build_app_tbf("app", 0x2000, 0x1));

    set_app_flag(&mut board, &settings(), "app", AppFlag::Enabled, false)
        .await
        .unwrap();
    let apps = walk(&mut board).await;
    assert!(!apps[0].tbf_header.enabled());

    set_app_flag(&mut board, &settings(), "app", AppFlag::Sticky, true)
        .await
        .unwrap();
    let apps = walk(&mut board).await;
    assert!(apps[0].tbf_header.sticky());
    // The checksum still verifies after two in-place rewrites, since the
    // walk would have failed otherwise.
    assert_eq!(apps[0].display_name(), "app");
}

/// Installing next to an existing app keeps the existing bytes when they do
/// not move.
#[tokio::test]
async fn install_preserves_unmoved_app() {
    let mut board = board(512);
    let a = build_app_tbf("a", 0x4000, 1);
    board.preload(0x30000, &a);

    let tab = Tab::from_bytes(build_tab(
        "b",
        &[("cortex-m4.tbf", build_app_tbf("b", 0x4000, 1))],
    ))
    .unwrap();
    install_apps(
        &mut board,
        &settings(),
        vec![tab],
        &InstallOptions::default(),
    )
    .await
    .unwrap();

    let apps = walk(&mut board).await;
    assert_eq!(apps.len(), 2);
    assert_eq!(&board.memory()[0..0x4000], &a[..]);
    // No write ever touched the first app's pages.
    assert!(board.write_log.iter().all(|&(addr, _)| addr >= 0x34000));
}
