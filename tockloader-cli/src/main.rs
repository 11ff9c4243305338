// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

mod cli;
mod display;

use anyhow::{Context, Result};
use clap::ArgMatches;

use tockloader_lib::board_interface::BoardInterface;
use tockloader_lib::board_settings::{BoardSettings, InstallOptions, ReplacePolicy};
use tockloader_lib::commands::tbf_ops;
use tockloader_lib::commands::tickv_ops::{self, TickvLocation};
use tockloader_lib::credentials::CredentialKeys;
use tockloader_lib::known_boards;
use tockloader_lib::tabs::tab::Tab;
use tockloader_lib::{
    dump_flash_page, erase_apps, flash_binary_at, info, install_apps, list, list_attributes,
    list_serial_ports, read_flash, remove_attribute, set_app_flag, set_attribute,
    set_start_address, uninstall_app, write_flash, AppFlag, SerialConnection, SerialTargetInfo,
    TockloaderError,
};

fn parse_number(value: &str) -> Result<u64> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).context("invalid hex number")
    } else {
        value.parse::<u64>().context("invalid number")
    }
}

fn parse_hex_bytes(value: &str) -> Result<Vec<u8>> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
    anyhow::ensure!(cleaned.len() % 2 == 0, "hex string has an odd length");
    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&cleaned[i..i + 2], 16).context("invalid hex byte"))
        .collect()
}

fn get_board_settings(user_options: &ArgMatches) -> Result<BoardSettings> {
    let mut result = user_options
        .get_one::<String>("board")
        .and_then(|name| known_boards::by_name(name))
        .map(|board| board.get_settings())
        .unwrap_or_default();

    if let Some(board) = user_options.get_one::<String>("board") {
        result.board.get_or_insert_with(|| board.clone());
    }
    if let Some(arch) = user_options.get_one::<String>("arch") {
        result.arch = Some(arch.clone());
    }
    // Not every subcommand exposes --app-address.
    if let Ok(Some(address)) = user_options.try_get_one::<String>("app-address") {
        result.start_address = parse_number(address)?;
    }
    if let Some(page_size) = user_options.get_one::<String>("page-size") {
        result.page_size = parse_number(page_size)?;
    }
    Ok(result)
}

fn get_serial_target_info(user_options: &ArgMatches) -> Result<SerialTargetInfo> {
    let mut result = user_options
        .get_one::<String>("board")
        .and_then(|name| known_boards::by_name(name))
        .map(|board| board.serial_target_info())
        .unwrap_or_default();

    if let Some(baud_rate) = user_options.get_one::<String>("baud-rate") {
        result.baud_rate = parse_number(baud_rate)? as u32;
    }
    if user_options.get_flag("no-bootloader-entry") {
        result.no_bootloader_entry = true;
    }
    Ok(result)
}

fn get_install_options(user_options: &ArgMatches, replace: ReplacePolicy) -> InstallOptions {
    InstallOptions {
        replace: if user_options.get_flag("no-replace") {
            ReplacePolicy::NoReplace
        } else {
            replace
        },
        erase: user_options.get_flag("erase"),
        force: user_options.get_flag("force"),
        bundle_apps: user_options.get_flag("bundle-apps"),
        preserve_order: user_options
            .get_one::<String>("layout")
            .is_some_and(|mode| mode == "preserve"),
    }
}

async fn open_connection(user_options: &ArgMatches) -> Result<SerialConnection> {
    for unsupported in ["jlink", "openocd", "stlink"] {
        if user_options.get_flag(unsupported) {
            anyhow::bail!(TockloaderError::Usage(format!(
                "--{unsupported} uses an external programmer; this build only drives the serial bootloader"
            )));
        }
    }
    if user_options.get_one::<String>("flash-file").is_some() {
        anyhow::bail!(TockloaderError::Usage(
            "--flash-file is not part of this build; use the serial bootloader".to_string()
        ));
    }
    if let Some(format) = user_options.get_one::<String>("output-format") {
        if format != "terminal" {
            anyhow::bail!(TockloaderError::Usage(format!(
                "output format '{format}' is not supported; this build renders 'terminal' only"
            )));
        }
    }

    let path = if let Some(path) = user_options.get_one::<String>("port") {
        path.clone()
    } else {
        let serial_ports = list_serial_ports().context("Failed to list serial ports.")?;
        let port_names: Vec<_> = serial_ports.iter().map(|p| p.port_name.clone()).collect();
        inquire::Select::new("Which serial port do you want to use?", port_names)
            .prompt()
            .context("No device is connected.")?
    };

    let mut connection = SerialConnection::new(
        path,
        get_serial_target_info(user_options)?,
        get_board_settings(user_options)?,
    );
    connection
        .open()
        .await
        .context("Failed to open serial connection.")?;
    Ok(connection)
}

fn tickv_location(settings: &BoardSettings, user_options: &ArgMatches) -> Result<TickvLocation> {
    let region_size = parse_number(
        user_options
            .get_one::<String>("tickv-region-size")
            .expect("has a default value"),
    )?;
    match (
        user_options.get_one::<String>("tickv-address"),
        user_options.get_one::<String>("tickv-size"),
    ) {
        (Some(address), Some(size)) => Ok(TickvLocation {
            address: parse_number(address)?,
            total_size: parse_number(size)?,
            region_size,
        }),
        _ => {
            let mut location = TickvLocation::from_settings(settings)?;
            location.region_size = region_size;
            Ok(location)
        }
    }
}

fn credential_keys(user_options: &ArgMatches) -> Result<CredentialKeys> {
    let mut keys = CredentialKeys::default();
    if let Some(path) = user_options.get_one::<String>("hmac-key-file") {
        keys.hmac_key = Some(std::fs::read(path).context("Failed to read HMAC key file.")?);
    }
    if let Some(path) = user_options.get_one::<String>("ecdsa-key-file") {
        keys.ecdsa_pkcs8 = Some(std::fs::read(path).context("Failed to read ECDSA key file.")?);
    }
    if let Some(id) = user_options.get_one::<String>("cleartext-id") {
        keys.cleartext_id = Some(parse_number(id)?);
    }
    Ok(keys)
}

fn open_tabs(user_options: &ArgMatches) -> Result<Vec<Tab>> {
    user_options
        .get_many::<String>("tab")
        .expect("tab arguments are required")
        .map(|path| {
            Tab::open(path.to_string())
                .with_context(|| format!("Failed to use tab file '{path}'."))
        })
        .collect()
}

async fn run(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("listen", _)) => {
            println!(
                "The UART console lives in its own tool; run your process \
                 console of choice (e.g. tock-process-console) on the same port."
            );
        }
        Some(("list", sub_matches)) => {
            let settings = get_board_settings(sub_matches)?;
            let mut conn = open_connection(sub_matches).await?;
            let apps = list(&mut conn, &settings)
                .await
                .context("Failed to list apps.")?;
            display::print_list(&apps);
        }
        Some(("info", sub_matches)) => {
            let settings = get_board_settings(sub_matches)?;
            let mut conn = open_connection(sub_matches).await?;
            let attributes = info(&mut conn, &settings)
                .await
                .context("Failed to get data from the board.")?;
            display::print_info(&attributes.system, &attributes.apps);
        }
        Some(("install", sub_matches)) => {
            let tabs = open_tabs(sub_matches)?;
            let settings = get_board_settings(sub_matches)?;
            let options = get_install_options(sub_matches, ReplacePolicy::Replace);
            let mut conn = open_connection(sub_matches).await?;
            let report = install_apps(&mut conn, &settings, tabs, &options)
                .await
                .context("Failed to install apps.")?;
            for (name, reason) in &report.skipped {
                eprintln!("Skipped '{name}': {reason}");
            }
            println!(
                "Installed {} app(s) with {} write(s).",
                report.installed.len(),
                report.writes_issued
            );
        }
        Some(("update", sub_matches)) => {
            let tabs = open_tabs(sub_matches)?;
            let settings = get_board_settings(sub_matches)?;
            let options = get_install_options(sub_matches, ReplacePolicy::ReplaceOnly);
            let mut conn = open_connection(sub_matches).await?;
            let report = install_apps(&mut conn, &settings, tabs, &options)
                .await
                .context("Failed to update apps.")?;
            for (name, reason) in &report.skipped {
                eprintln!("Skipped '{name}': {reason}");
            }
            println!("Updated {} app(s).", report.installed.len());
        }
        Some(("uninstall", sub_matches)) => {
            let name = sub_matches.get_one::<String>("name").expect("required");
            let settings = get_board_settings(sub_matches)?;
            let mut conn = open_connection(sub_matches).await?;
            let removed = uninstall_app(&mut conn, &settings, name, sub_matches.get_flag("force"))
                .await
                .context("Failed to uninstall app.")?;
            println!("Removed {removed} app(s) named '{name}'.");
        }
        Some((command @ ("enable-app" | "disable-app" | "sticky-app" | "unsticky-app"), sub_matches)) =>
        {
            let name = sub_matches.get_one::<String>("name").expect("required");
            let settings = get_board_settings(sub_matches)?;
            let (flag, value) = match command {
                "enable-app" => (AppFlag::Enabled, true),
                "disable-app" => (AppFlag::Enabled, false),
                "sticky-app" => (AppFlag::Sticky, true),
                _ => (AppFlag::Sticky, false),
            };
            let mut conn = open_connection(sub_matches).await?;
            set_app_flag(&mut conn, &settings, name, flag, value)
                .await
                .context("Failed to change app flags.")?;
            println!("Updated '{name}'.");
        }
        Some(("flash", sub_matches)) => {
            let path = sub_matches.get_one::<String>("binary").expect("required");
            let address = parse_number(sub_matches.get_one::<String>("address").expect("required"))?;
            let binary = std::fs::read(path).context("Failed to read binary file.")?;
            let mut conn = open_connection(sub_matches).await?;
            flash_binary_at(&mut conn, address, &binary)
                .await
                .context("Failed to flash binary.")?;
            println!("Flashed {} bytes at {address:#x}.", binary.len());
        }
        Some(("read", sub_matches)) => {
            let address = parse_number(sub_matches.get_one::<String>("address").expect("required"))?;
            let length = parse_number(sub_matches.get_one::<String>("length").expect("required"))?;
            let mut conn = open_connection(sub_matches).await?;
            let data = read_flash(&mut conn, address, length as usize)
                .await
                .context("Failed to read flash.")?;
            display::print_hex_dump(address, &data);
        }
        Some(("write", sub_matches)) => {
            let address = parse_number(sub_matches.get_one::<String>("address").expect("required"))?;
            let bytes = parse_hex_bytes(sub_matches.get_one::<String>("bytes").expect("required"))?;
            let mut conn = open_connection(sub_matches).await?;
            write_flash(&mut conn, address, &bytes)
                .await
                .context("Failed to write flash.")?;
            println!("Wrote {} bytes at {address:#x}.", bytes.len());
        }
        Some(("erase-apps", sub_matches)) => {
            let settings = get_board_settings(sub_matches)?;
            let mut conn = open_connection(sub_matches).await?;
            erase_apps(&mut conn, &settings, sub_matches.get_flag("force"))
                .await
                .context("Failed to erase apps.")?;
            println!("Apps erased.");
        }
        Some(("list-attributes", sub_matches)) => {
            let mut conn = open_connection(sub_matches).await?;
            let attributes = list_attributes(&mut conn)
                .await
                .context("Failed to list attributes.")?;
            display::print_attributes(&attributes);
        }
        Some(("set-attribute", sub_matches)) => {
            let key = sub_matches.get_one::<String>("key").expect("required");
            let value = sub_matches.get_one::<String>("value").expect("required");
            let mut conn = open_connection(sub_matches).await?;
            let slot = set_attribute(&mut conn, key, value)
                .await
                .context("Failed to set attribute.")?;
            println!("Stored '{key}' in slot {slot}.");
        }
        Some(("remove-attribute", sub_matches)) => {
            let key = sub_matches.get_one::<String>("key").expect("required");
            let mut conn = open_connection(sub_matches).await?;
            let slot = remove_attribute(&mut conn, key)
                .await
                .context("Failed to remove attribute.")?;
            println!("Cleared '{key}' from slot {slot}.");
        }
        Some(("set-start-address", sub_matches)) => {
            let address = parse_number(sub_matches.get_one::<String>("address").expect("required"))?;
            let mut conn = open_connection(sub_matches).await?;
            set_start_address(&mut conn, address)
                .await
                .context("Failed to set start address.")?;
            println!("Apps start address set to {address:#x}.");
        }
        Some(("dump-flash-page", sub_matches)) => {
            let page = parse_number(sub_matches.get_one::<String>("page").expect("required"))?;
            let mut conn = open_connection(sub_matches).await?;
            let data = dump_flash_page(&mut conn, page)
                .await
                .context("Failed to dump flash page.")?;
            display::print_hex_dump(page * conn.get_page_size(), &data);
        }
        Some(("list-known-boards", _)) => {
            for board in known_boards::all() {
                let settings = board.get_settings();
                println!(
                    "  {:<16} arch {:<12} apps at {:#x}, {}-byte pages",
                    board.name(),
                    settings.arch.as_deref().unwrap_or("?"),
                    settings.start_address,
                    settings.page_size
                );
            }
        }
        Some(("inspect-tab", sub_matches)) => {
            for path in sub_matches.get_many::<String>("tab").expect("required") {
                let tab = Tab::open(path.to_string())
                    .with_context(|| format!("Failed to use tab file '{path}'."))?;
                inspect_tab(path, &tab)?;
            }
        }
        Some(("tbf", sub_matches)) => run_tbf(sub_matches)?,
        Some(("tickv", sub_matches)) => run_tickv(sub_matches).await?,
        _ => {
            println!("Could not run the provided subcommand.");
            _ = cli::make_cli().print_help();
        }
    }
    Ok(())
}

fn inspect_tab(path: &str, tab: &Tab) -> Result<()> {
    println!("TAB: {path}");
    println!("  Name: {}", tab.name());
    if let Some(boards) = &tab.metadata().only_for_boards {
        println!("  Only for boards: {}", boards.join(", "));
    }
    if let Some(version) = &tab.metadata().minimum_tock_kernel_version {
        println!("  Minimum kernel version: {version}");
    }
    for arch in ["cortex-m0", "cortex-m4", "cortex-m7", "rv32imc", "rv32imac"] {
        let Ok(tbfs) = tab.tbfs_for_arch(arch) else {
            continue;
        };
        for tbf in tbfs {
            println!("  TBF: {}", tbf.filename);
            println!("    Total size: {} bytes", tbf.header.total_size());
            if let Some(addr) = tbf.header.get_fixed_address_flash() {
                println!("    Fixed flash address: {addr:#x}");
            }
            if let Some((major, minor)) = tbf.header.get_kernel_version() {
                println!("    Kernel version: ^{major}.{minor}");
            }
        }
    }
    Ok(())
}

fn run_tbf(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("tlv", tlv_matches)) => {
            let (action, sub_matches) = tlv_matches.subcommand().expect("required");
            let path = sub_matches.get_one::<String>("tbf").expect("required");
            let type_name = sub_matches.get_one::<String>("type").expect("required");
            let tipe: tbf_parser::types::TbfHeaderTypes = tbf_ops::tlv_type_by_name(type_name)
                .ok_or_else(|| {
                    TockloaderError::Usage(format!("unknown TLV type '{type_name}'"))
                })?;
            let tbf = std::fs::read(path).context("Failed to read TBF file.")?;

            let rewritten = match action {
                "add" | "modify" => {
                    let payload = parse_hex_bytes(
                        sub_matches.get_one::<String>("payload").expect("required"),
                    )?;
                    tbf_ops::modify_tlv(&tbf, tipe, &payload)?
                }
                _ => tbf_ops::delete_tlv(&tbf, tipe)?,
            };
            std::fs::write(path, rewritten).context("Failed to write TBF file.")?;
            println!("Rewrote {path}.");
        }
        Some(("credential", cred_matches)) => {
            let (action, sub_matches) = cred_matches.subcommand().expect("required");
            let path = sub_matches.get_one::<String>("tbf").expect("required");
            let kind_name = sub_matches.get_one::<String>("kind").expect("required");
            let kind = tbf_ops::credential_type_by_name(kind_name).ok_or_else(|| {
                TockloaderError::Usage(format!("unknown credential kind '{kind_name}'"))
            })?;
            let tbf = std::fs::read(path).context("Failed to read TBF file.")?;

            let rewritten = match action {
                "add" => {
                    let keys = credential_keys(sub_matches)?;
                    tbf_ops::add_credential(&tbf, kind, &keys)?
                }
                _ => tbf_ops::delete_credential(&tbf, kind)?,
            };
            std::fs::write(path, rewritten).context("Failed to write TBF file.")?;
            println!("Rewrote {path}.");
        }
        _ => unreachable!("clap enforces a tbf subcommand"),
    }
    Ok(())
}

async fn run_tickv(matches: &ArgMatches) -> Result<()> {
    let (action, sub_matches) = matches.subcommand().expect("required");
    let settings = get_board_settings(sub_matches)?;
    let location = tickv_location(&settings, sub_matches)?;
    let mut conn = open_connection(sub_matches).await?;

    match action {
        "get" => {
            let key = sub_matches.get_one::<String>("key").expect("required");
            let (raw, wrapped) = tickv_ops::tickv_get(&mut conn, &location, key)
                .await
                .context("Failed to read key.")?;
            match wrapped {
                Some(object) => println!(
                    "{key} = {:?} (write_id {})",
                    String::from_utf8_lossy(&object.value),
                    object.write_id
                ),
                None => println!("{key} = {} raw bytes", raw.len()),
            }
        }
        "append" => {
            let key = sub_matches.get_one::<String>("key").expect("required");
            let value = sub_matches.get_one::<String>("value").expect("required");
            let write_id = sub_matches
                .get_one::<String>("write-id")
                .map(|id| parse_number(id))
                .transpose()?
                .map(|id| id as u32);
            tickv_ops::tickv_append(&mut conn, &location, key, value.as_bytes(), write_id)
                .await
                .context("Failed to append key.")?;
            println!("Stored '{key}'.");
        }
        "invalidate" => {
            let key = sub_matches.get_one::<String>("key").expect("required");
            tickv_ops::tickv_invalidate(&mut conn, &location, key)
                .await
                .context("Failed to invalidate key.")?;
            println!("Invalidated '{key}'.");
        }
        "dump" => {
            let objects = tickv_ops::tickv_dump(&mut conn, &location)
                .await
                .context("Failed to dump database.")?;
            display::print_tickv_dump(&objects);
        }
        "cleanup" => {
            tickv_ops::tickv_cleanup(&mut conn, &location)
                .await
                .context("Failed to clean up database.")?;
            println!("Database compacted.");
        }
        "reset" => {
            tickv_ops::tickv_reset(&mut conn, &location)
                .await
                .context("Failed to reset database.")?;
            println!("Database reset.");
        }
        _ => unreachable!("clap enforces a tickv subcommand"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let mut cmd = cli::make_cli();
    let matches = cmd.get_matches_mut();

    let default_filter = if matches.get_flag("debug") {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(error) = run(&matches).await {
        eprintln!("Error: {error:#}");
        // Stable exit codes: 2 usage, 3 transport, 4 placement, 5 verify,
        // 1 anything else.
        let code = error
            .downcast_ref::<TockloaderError>()
            .map(TockloaderError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
