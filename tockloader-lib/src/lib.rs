// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Library behind the `tockloader` binary: installing, inspecting and
//! maintaining Tock apps and the board state they depend on.
//!
//! The pieces compose in layers. Transports implement the
//! [`board_interface::BoardInterface`] capability contract (the serial
//! bootloader in [`connection`], an in-memory image for tests). The
//! [`layout`] engine turns apps into placed byte images and minimal
//! page writes. The [`commands`] modules drive both to implement each CLI
//! operation.

pub mod app;
pub mod attributes;
pub mod board_interface;
pub mod board_settings;
pub mod bootloader_serial;
pub mod commands;
pub mod connection;
pub mod credentials;
pub mod errors;
pub mod known_boards;
pub mod layout;
pub mod port_lock;
pub mod tabs;

pub use commands::attributes::{
    list_attributes, remove_attribute, set_attribute, set_start_address,
};
pub use commands::erase_apps::erase_apps;
pub use commands::flags::{set_app_flag, AppFlag};
pub use commands::info::info;
pub use commands::install::{install_apps, InstallReport};
pub use commands::list::list;
pub use commands::read_write::{dump_flash_page, flash_binary_at, read_flash, write_flash};
pub use commands::uninstall::uninstall_app;
pub use connection::{list_serial_ports, SerialConnection, SerialTargetInfo};
pub use errors::TockloaderError;
