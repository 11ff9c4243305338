// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

/// Per-board settings the commands need before the board's own attributes
/// have been read. Attributes found on the board take precedence; these are
/// the fallbacks and CLI overrides.
#[derive(Clone, Debug)]
pub struct BoardSettings {
    pub board: Option<String>,
    pub arch: Option<String>,
    pub start_address: u64,
    pub page_size: u64,
    /// Address and total size of the TicKV region, when the board has one.
    pub tickv_region: Option<(u64, u64)>,
    /// Logical page size inside the TicKV region.
    pub tickv_region_size: u64,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            board: None,
            arch: None,
            start_address: 0x30000,
            page_size: 512,
            tickv_region: None,
            tickv_region_size: 4096,
        }
    }
}

/// Options driving an install/update run. These mirror the universal CLI
/// flags.
#[derive(Clone, Debug)]
pub struct InstallOptions {
    pub replace: ReplacePolicy,
    pub erase: bool,
    pub force: bool,
    pub bundle_apps: bool,
    pub preserve_order: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            replace: ReplacePolicy::Replace,
            erase: false,
            force: false,
            bundle_apps: false,
            preserve_order: false,
        }
    }
}

/// What to do when a new app's name collides with an installed one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplacePolicy {
    /// Remove the installed copy and install the new one.
    Replace,
    /// Keep both.
    NoReplace,
    /// Only install apps that are already installed (update semantics).
    ReplaceOnly,
}
