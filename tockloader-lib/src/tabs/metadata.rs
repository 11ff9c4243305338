// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use serde::{Deserialize, Deserializer};

use crate::errors::{TabError, TockloaderError};

/// `metadata.toml` from a TAB archive.
///
/// `only-for-boards` is stored as a comma-separated string by elf2tab, so
/// it is normalized into a list while deserializing.
#[derive(Debug, Deserialize)]
pub struct Metadata {
    #[serde(rename = "tab-version")]
    pub tab_version: Option<u32>,

    pub name: String,

    #[serde(
        rename = "only-for-boards",
        default,
        deserialize_with = "comma_separated"
    )]
    pub only_for_boards: Option<Vec<String>>,

    #[serde(rename = "build-date")]
    pub build_date: Option<toml::value::Datetime>,

    #[serde(rename = "minimum-tock-kernel-version")]
    pub minimum_tock_kernel_version: Option<String>,
}

fn comma_separated<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| {
        s.split(',')
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect()
    }))
}

impl Metadata {
    pub fn new(buf: String) -> Result<Self, TockloaderError> {
        let metadata: Metadata =
            toml::from_str(&buf).map_err(TabError::InvalidMetadata)?;
        Ok(metadata)
    }

    /// Major version of the minimum kernel this app wants, if declared.
    pub fn minimum_kernel_major(&self) -> Option<u32> {
        self.minimum_tock_kernel_version
            .as_ref()
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.parse().ok())
    }
}
