// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Boards this tool knows the geometry of out of the box. `--board` picks
//! one; every value can still be overridden by individual flags or by the
//! attributes the board itself reports.

use crate::board_settings::BoardSettings;
use crate::connection::SerialTargetInfo;

pub trait KnownBoard {
    fn name(&self) -> &'static str;
    fn serial_target_info(&self) -> SerialTargetInfo;
    fn get_settings(&self) -> BoardSettings;
}

/// Every board in the registry, for `list-known-boards`.
pub fn all() -> Vec<Box<dyn KnownBoard>> {
    vec![
        Box::new(Hail),
        Box::new(Imix),
        Box::new(MicrobitV2),
        Box::new(NucleoF429zi),
    ]
}

pub fn by_name(name: &str) -> Option<Box<dyn KnownBoard>> {
    all().into_iter().find(|board| board.name() == name)
}

pub struct Hail;

impl KnownBoard for Hail {
    fn name(&self) -> &'static str {
        "hail"
    }

    fn serial_target_info(&self) -> SerialTargetInfo {
        SerialTargetInfo::default()
    }

    fn get_settings(&self) -> BoardSettings {
        BoardSettings {
            board: Some("hail".to_string()),
            arch: Some("cortex-m4".to_string()),
            start_address: 0x30000,
            page_size: 512,
            ..Default::default()
        }
    }
}

pub struct Imix;

impl KnownBoard for Imix {
    fn name(&self) -> &'static str {
        "imix"
    }

    fn serial_target_info(&self) -> SerialTargetInfo {
        SerialTargetInfo::default()
    }

    fn get_settings(&self) -> BoardSettings {
        BoardSettings {
            board: Some("imix".to_string()),
            arch: Some("cortex-m4".to_string()),
            start_address: 0x40000,
            page_size: 512,
            ..Default::default()
        }
    }
}

pub struct MicrobitV2;

impl KnownBoard for MicrobitV2 {
    fn name(&self) -> &'static str {
        "microbit_v2"
    }

    fn serial_target_info(&self) -> SerialTargetInfo {
        SerialTargetInfo {
            // The DAPLink bridge resets on baud changes; stay at the
            // opening rate.
            negotiate_baud: None,
            ..Default::default()
        }
    }

    fn get_settings(&self) -> BoardSettings {
        BoardSettings {
            board: Some("microbit_v2".to_string()),
            arch: Some("cortex-m4".to_string()),
            start_address: 0x40000,
            page_size: 4096,
            ..Default::default()
        }
    }
}

pub struct NucleoF429zi;

impl KnownBoard for NucleoF429zi {
    fn name(&self) -> &'static str {
        "nucleo-f429zi"
    }

    fn serial_target_info(&self) -> SerialTargetInfo {
        SerialTargetInfo {
            negotiate_baud: None,
            ..Default::default()
        }
    }

    fn get_settings(&self) -> BoardSettings {
        BoardSettings {
            board: Some("nucleo-f429zi".to_string()),
            arch: Some("cortex-m4".to_string()),
            start_address: 0x0804_0000,
            page_size: 2048,
            ..Default::default()
        }
    }
}
