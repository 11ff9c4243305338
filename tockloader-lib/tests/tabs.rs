// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

mod common;

use common::*;
use tockloader_lib::app::TabApp;
use tockloader_lib::tabs::tab::Tab;

#[test]
fn open_tab_and_extract() {
    let tbf = build_app_tbf("blink", 0x1000, 1);
    let tab = Tab::from_bytes(build_tab(
        "blink",
        &[
            ("cortex-m4.tbf", tbf.clone()),
            ("rv32imc.tbf", build_app_tbf("blink", 0x1000, 1)),
        ],
    ))
    .unwrap();

    assert_eq!(tab.name(), "blink");
    assert_eq!(tab.extract_binary("cortex-m4").unwrap(), tbf);
    assert!(tab.extract_binary("cortex-m7").is_err());
}

#[test]
fn variants_sorted_by_fixed_address() {
    let low = build_fixed_tbf("rust-app", 0x2000, 0x400, 0x38400, 0x2000_8000);
    let high = build_fixed_tbf("rust-app", 0x2000, 0x400, 0x48400, 0x2000_8000);
    let tab = Tab::from_bytes(build_tab(
        "rust-app",
        &[
            ("cortex-m4.0x48400.0x20008000.tbf", high),
            ("cortex-m4.0x38400.0x20008000.tbf", low),
        ],
    ))
    .unwrap();

    let app = TabApp::from_tab(&tab, "cortex-m4").unwrap();
    assert!(app.has_fixed_addresses());
    assert_eq!(app.variants.len(), 2);
    assert_eq!(
        app.variants[0].header.get_fixed_address_flash(),
        Some(0x38400)
    );
    assert_eq!(
        app.variants[1].header.get_fixed_address_flash(),
        Some(0x48400)
    );
}

#[test]
fn arch_prefix_does_not_cross_match() {
    // "cortex-m4" must not match a "cortex-m" TBF nor vice versa.
    let tab = Tab::from_bytes(build_tab(
        "app",
        &[("cortex-m4.tbf", build_app_tbf("app", 0x1000, 1))],
    ))
    .unwrap();

    assert!(TabApp::from_tab(&tab, "cortex-m").is_err());
    assert!(TabApp::from_tab(&tab, "cortex-m4").is_ok());
}

#[test]
fn missing_arch_is_an_error() {
    let tab = Tab::from_bytes(build_tab(
        "app",
        &[("rv32imc.tbf", build_app_tbf("app", 0x1000, 1))],
    ))
    .unwrap();
    assert!(TabApp::from_tab(&tab, "cortex-m4").is_err());
}

#[test]
fn open_tab_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blink.tab");
    std::fs::write(
        &path,
        build_tab("blink", &[("cortex-m4.tbf", build_app_tbf("blink", 0x1000, 1))]),
    )
    .unwrap();

    let tab = Tab::open(path.to_string_lossy().into_owned()).unwrap();
    assert_eq!(tab.name(), "blink");

    assert!(Tab::open(dir.path().join("missing.tab").to_string_lossy().into_owned()).is_err());
}

#[test]
fn board_compatibility() {
    let metadata = "tab-version = 1\nname = \"app\"\nonly-for-boards = \"hail, imix\"\n";
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(metadata.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "metadata.toml", metadata.as_bytes())
        .unwrap();
    let tbf = build_app_tbf("app", 0x1000, 1);
    let mut header = tar::Header::new_gnu();
    header.set_size(tbf.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "cortex-m4.tbf", &tbf[..])
        .unwrap();

    let tab = Tab::from_bytes(builder.into_inner().unwrap()).unwrap();
    assert!(tab.is_compatible_with_board("hail"));
    assert!(tab.is_compatible_with_board("imix"));
    assert!(!tab.is_compatible_with_board("microbit_v2"));
}
