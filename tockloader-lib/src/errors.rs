// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use std::io;
use thiserror::Error;

use crate::bootloader_serial::Response;

// Rule of thumb: for public-facing functions or API use `TockloaderError`. For
// crate-public/private functions you can use more specific errors.

#[derive(Debug, Error)]
pub enum TockloaderError {
    #[error("Serial connection error: {0}")]
    Serial(#[from] SerialError),

    #[error("TAB file error: {0}")]
    Tab(#[from] TabError),

    #[error("Tock OS error: {0}")]
    Tock(#[from] TockError),

    #[error("App placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("TicKV error: {0}")]
    Tickv(#[from] tickv_parser::TickvError),

    #[error("Internal tockloader error: {0}")]
    Internal(#[from] InternalError),

    #[error("Usage error: {0}")]
    Usage(String),
}

impl TockloaderError {
    /// Stable process exit code for this error: 1 generic, 2 usage,
    /// 3 transport, 4 placement, 5 verify.
    pub fn exit_code(&self) -> i32 {
        match self {
            TockloaderError::Usage(_) => 2,
            TockloaderError::Serial(_) => 3,
            TockloaderError::Tock(TockError::Protocol(_)) => 3,
            TockloaderError::Tock(TockError::BootloaderTimeout) => 3,
            TockloaderError::Placement(_) => 4,
            TockloaderError::Tock(TockError::FlashVerifyFailed { .. }) => 5,
            TockloaderError::Tock(TockError::CredentialVerifyFailed(_)) => 5,
            _ => 1,
        }
    }

    /// Whether retrying the failed command can reasonably help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TockloaderError::Tock(TockError::BootloaderTimeout)
                | TockloaderError::Serial(SerialError::IO(_))
        )
    }
}

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Failed to interface in serial using tokio_serial: {0}")]
    TokioSerial(#[from] tokio_serial::Error),

    #[error("Failed to perform read/write operations on serial port: {0}")]
    IO(#[from] io::Error),

    #[error("Another tockloader process is already using {0}")]
    PortBusy(String),
}

#[derive(Debug, Error)]
pub enum TabError {
    #[error("Failed to use tab due to IO error: {0}")]
    IO(io::Error),

    #[error("Failed to parse metadata: {0}")]
    InvalidMetadata(toml::de::Error),

    #[error("No metadata.toml found inside the tab file.")]
    MissingMetadata,

    #[error("App data could not be parsed from tab file: {0:?}")]
    Parsing(tbf_parser::types::TbfParseError),

    #[error("No binary data found for {0} architecture")]
    MissingBinary(String),
}

#[derive(Debug, Error)]
pub enum TockError {
    #[error("Bootloader returned an invalid response header: {0:#x} {1:#x}")]
    BootloaderBadHeader(u8, u8),

    #[error("Bootloader command did not finish in time")]
    BootloaderTimeout,

    #[error("Bootloader error response: {0:?}")]
    Protocol(Response),

    #[error("Application data at {addr:#x} could not be parsed due to malformed header: {source:?}")]
    InvalidAppTbfHeader {
        addr: u64,
        source: tbf_parser::types::TbfParseError,
    },

    #[error("Flash contents failed CRC verification in {start:#x}..{end:#x}")]
    FlashVerifyFailed { start: u64, end: u64 },

    #[error("Credential did not verify: {0}")]
    CredentialVerifyFailed(String),

    #[error("Credential operation is not supported: {0}")]
    UnsupportedCredential(String),

    #[error("Board reports '{found}', tab is only for {expected:?}")]
    BoardMismatch { found: String, expected: Vec<String> },

    #[error("Failed to parse attribute: {0}")]
    AttributeParsing(#[from] AttributeParseError),

    #[error("Attribute does not exist: {0}")]
    MissingAttribute(String),
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("No TBF variant of '{0}' matches architecture '{1}'")]
    UnsupportedArch(String, String),

    #[error("Fixed-address app '{0}' has no candidate at or after {1:#x}")]
    NoCandidateAddress(String, u64),

    #[error("Apps '{0}' and '{1}' claim the same fixed address {2:#x}")]
    FixedAddressConflict(String, String, u64),

    #[error("Gap of {0} bytes at {1:#x} is too small for a padding header")]
    GapTooSmall(u64, u64),

    #[error("App '{0}' is sticky; use --force to remove it")]
    StickyApp(String),

    #[error("No installed app named '{0}'")]
    NoSuchApp(String),
}

#[derive(Debug, Error)]
pub enum AttributeParseError {
    #[error("Expected attribute to be a valid number. Inner: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Expected attribute to be a valid string. Inner: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum InternalError {
    #[error("Operation failed due to board not being open.")]
    ConnectionNotOpen,

    #[error("Operation failed due to board not being in bootloader mode or not having a bootloader present.")]
    BootloaderNotPresent,

    #[error("Missing or invalid board setting: {0}")]
    MisconfiguredBoardSettings(String),
}

impl From<tokio_serial::Error> for TockloaderError {
    fn from(value: tokio_serial::Error) -> Self {
        TockloaderError::Serial(value.into())
    }
}

impl From<io::Error> for TockloaderError {
    fn from(value: io::Error) -> Self {
        TockloaderError::Serial(SerialError::IO(value))
    }
}
