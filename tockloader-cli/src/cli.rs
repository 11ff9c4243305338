// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use clap::{arg, crate_version, Command};

/// Create the [command](clap::Command) object which will handle all of the
/// command line arguments.
pub fn make_cli() -> Command {
    Command::new("tockloader")
        .about("Install and maintain Tock apps over a board's bootloader")
        .version(crate_version!())
        .arg_required_else_help(true)
        .subcommands(get_subcommands())
        .args([
            arg!(--debug "Print additional debugging information").action(clap::ArgAction::SetTrue)
        ])
    // Note: arg_required_else_help will trigger the help command if no
    // argument/subcommand is given.
}

/// Generate all of the [subcommands](clap::Command) used by the program.
fn get_subcommands() -> Vec<Command> {
    vec![
        Command::new("listen").about("Open a terminal to receive UART data"),
        Command::new("list")
            .about("List the apps installed on the board")
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("info")
            .about("Show all properties of the attached board")
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("install")
            .about("Install apps from TAB files")
            .arg(arg!(<tab> ... "TAB files to install"))
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("update")
            .about("Update apps that are already installed")
            .arg(arg!(<tab> ... "TAB files to update"))
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("uninstall")
            .about("Remove an installed app")
            .arg(arg!(<name> "Name of the app to remove"))
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("enable-app")
            .about("Let the kernel start an app at boot")
            .arg(arg!(<name> "Name of the app"))
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("disable-app")
            .about("Keep the kernel from starting an app")
            .arg(arg!(<name> "Name of the app"))
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("sticky-app")
            .about("Mark an app as sticky (only force-removable)")
            .arg(arg!(<name> "Name of the app"))
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("unsticky-app")
            .about("Clear an app's sticky flag")
            .arg(arg!(<name> "Name of the app"))
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("flash")
            .about("Write a raw binary at a page-aligned address")
            .arg(arg!(<binary> "File to flash"))
            .arg(arg!(-a --address <ADDRESS> "Address to flash at").required(true))
            .args(get_channel_args()),
        Command::new("read")
            .about("Read a range of flash")
            .arg(arg!(<address> "Address to read from"))
            .arg(arg!(<length> "Number of bytes to read"))
            .args(get_channel_args()),
        Command::new("write")
            .about("Write raw bytes (hex string) at an address")
            .arg(arg!(<address> "Address to write at"))
            .arg(arg!(<bytes> "Bytes to write, as a hex string"))
            .args(get_channel_args()),
        Command::new("erase-apps")
            .about("Delete every non-sticky app")
            .args(get_channel_args())
            .args(get_app_args()),
        Command::new("list-attributes")
            .about("Show every attribute slot")
            .args(get_channel_args()),
        Command::new("set-attribute")
            .about("Store a key/value attribute on the board")
            .arg(arg!(<key> "Attribute key"))
            .arg(arg!(<value> "Attribute value"))
            .args(get_channel_args()),
        Command::new("remove-attribute")
            .about("Clear an attribute slot by key")
            .arg(arg!(<key> "Attribute key"))
            .args(get_channel_args()),
        Command::new("set-start-address")
            .about("Point the board at a new apps start address")
            .arg(arg!(<address> "New start address"))
            .args(get_channel_args()),
        Command::new("dump-flash-page")
            .about("Hex-dump one page of flash")
            .arg(arg!(<page> "Page number"))
            .args(get_channel_args()),
        Command::new("list-known-boards").about("List boards with built-in settings"),
        Command::new("inspect-tab")
            .about("Show the contents of TAB files")
            .arg(arg!(<tab> ... "TAB files to inspect")),
        Command::new("tbf")
            .about("Edit TBF files on disk")
            .arg_required_else_help(true)
            .subcommands([
                Command::new("tlv")
                    .arg_required_else_help(true)
                    .subcommands([
                        Command::new("add")
                            .about("Add a header TLV")
                            .arg(arg!(<tbf> "TBF file"))
                            .arg(arg!(<type> "TLV type name"))
                            .arg(arg!(<payload> "Payload as a hex string")),
                        Command::new("modify")
                            .about("Replace a header TLV")
                            .arg(arg!(<tbf> "TBF file"))
                            .arg(arg!(<type> "TLV type name"))
                            .arg(arg!(<payload> "Payload as a hex string")),
                        Command::new("delete")
                            .about("Delete a header TLV")
                            .arg(arg!(<tbf> "TBF file"))
                            .arg(arg!(<type> "TLV type name")),
                    ]),
                Command::new("credential")
                    .arg_required_else_help(true)
                    .subcommands([
                        Command::new("add")
                            .about("Compute and insert a footer credential")
                            .arg(arg!(<tbf> "TBF file"))
                            .arg(arg!(<kind> "Credential kind"))
                            .arg(arg!(--"hmac-key-file" <FILE> "Shared secret for HMAC kinds"))
                            .arg(arg!(--"ecdsa-key-file" <FILE> "PKCS#8 ECDSA-P256 private key"))
                            .arg(arg!(--"cleartext-id" <ID> "Value for the CleartextID kind")),
                        Command::new("delete")
                            .about("Replace a footer credential with padding")
                            .arg(arg!(<tbf> "TBF file"))
                            .arg(arg!(<kind> "Credential kind")),
                    ]),
            ]),
        Command::new("tickv")
            .about("Operate on the board's TicKV database")
            .arg_required_else_help(true)
            .subcommands([
                Command::new("get")
                    .about("Fetch the value stored under a key")
                    .arg(arg!(<key> "Key to look up"))
                    .args(get_tickv_args())
                    .args(get_channel_args()),
                Command::new("append")
                    .about("Store a value under a key")
                    .arg(arg!(<key> "Key to store under"))
                    .arg(arg!(<value> "Value to store"))
                    .arg(arg!(--"write-id" <ID> "Tock storage write_id"))
                    .args(get_tickv_args())
                    .args(get_channel_args()),
                Command::new("invalidate")
                    .about("Mark a key's objects invalid")
                    .arg(arg!(<key> "Key to invalidate"))
                    .args(get_tickv_args())
                    .args(get_channel_args()),
                Command::new("dump")
                    .about("Decode every object in the database")
                    .args(get_tickv_args())
                    .args(get_channel_args()),
                Command::new("cleanup")
                    .about("Compact the database regions")
                    .args(get_tickv_args())
                    .args(get_channel_args()),
                Command::new("reset")
                    .about("Erase the database and reinitialize it")
                    .args(get_tickv_args())
                    .args(get_channel_args()),
            ]),
    ]
}

/// Generate all of the [arguments](clap::Arg) that are required by
/// subcommands which work with apps.
fn get_app_args() -> Vec<clap::Arg> {
    vec![
        arg!(-a --"app-address" <ADDRESS> "Address where apps are located"),
        arg!(--force "Allow operations on sticky apps and mismatched boards")
            .action(clap::ArgAction::SetTrue),
        arg!(--erase "Remove all non-sticky apps before installing")
            .action(clap::ArgAction::SetTrue),
        arg!(--"no-replace" "Install even when a same-named app is already installed")
            .action(clap::ArgAction::SetTrue),
        arg!(--"bundle-apps" "Concatenate apps and flash the whole region in one write")
            .action(clap::ArgAction::SetTrue),
        arg!(--layout <MODE> "App ordering: 'sort' or 'preserve'").default_value("sort"),
    ]
}

/// Generate all of the [arguments](clap::Arg) that are required by
/// subcommands which talk to a board.
fn get_channel_args() -> Vec<clap::Arg> {
    vec![
        arg!(-p --port <PORT> "The serial port or device name to use"),
        arg!(--board <BOARD> "Explicitly specify the board that is being targeted"),
        arg!(--arch <ARCH> "Explicitly specify the architecture of the board"),
        arg!(--"page-size" <SIZE> "Explicitly specify how many bytes in a flash page"),
        arg!(--"baud-rate" <RATE> "If using serial, set the target baud rate")
            .default_value("115200"),
        arg!(--"no-bootloader-entry" "Assume the bootloader is already active")
            .action(clap::ArgAction::SetTrue),
        arg!(--"output-format" <FORMAT> "Output format; this build renders 'terminal' only")
            .default_value("terminal"),
        // Transports that shell out to external programmers share this
        // tool's board interface but are not part of this build.
        arg!(--jlink "Use JLinkExe to flash").action(clap::ArgAction::SetTrue),
        arg!(--openocd "Use OpenOCD to flash").action(clap::ArgAction::SetTrue),
        arg!(--stlink "Use stlink to flash").action(clap::ArgAction::SetTrue),
        arg!(--"flash-file" <FILE> "Operate on a binary flash file instead of a board"),
    ]
}

fn get_tickv_args() -> Vec<clap::Arg> {
    vec![
        arg!(--"tickv-address" <ADDRESS> "Flash address of the TicKV database"),
        arg!(--"tickv-size" <SIZE> "Total size of the TicKV database"),
        arg!(--"tickv-region-size" <SIZE> "Logical page size inside the database")
            .default_value("4096"),
    ]
}
