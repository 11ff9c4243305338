// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use tockloader_lib::attributes::app_attributes::AppAttributes;
use tockloader_lib::attributes::decode::DecodedAttribute;
use tockloader_lib::attributes::system_attributes::SystemAttributes;

// ANSI escape codes for colors
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const BOLD_YELLOW: &str = "\x1b[1;33m";

pub fn print_list(app_details: &[AppAttributes]) {
    if app_details.is_empty() {
        println!("No apps installed.");
        return;
    }
    for (i, details) in app_details.iter().enumerate() {
        println!("\n{BOLD}[App {i}]{RESET}");
        println!("  {BOLD_GREEN}Name:{RESET}        {}", details.display_name());
        println!(
            "  {BOLD_GREEN}Address:{RESET}     {:#x}",
            details.address
        );
        if !details.tbf_header.is_app() {
            println!("  {BOLD_GREEN}Type:{RESET}        padding");
        } else {
            println!(
                "  {BOLD_GREEN}Version:{RESET}     {}",
                details.tbf_header.get_binary_version()
            );
            println!(
                "  {BOLD_GREEN}Enabled:{RESET}     {}",
                details.tbf_header.enabled()
            );
            println!(
                "  {BOLD_GREEN}Sticky:{RESET}      {}",
                details.tbf_header.sticky()
            );
        }
        println!(
            "  {BOLD_GREEN}Total size:{RESET}  {} bytes",
            details.tbf_header.total_size()
        );
        for footer in &details.tbf_footers {
            println!(
                "  {BOLD_YELLOW}Credential:{RESET}  {:?} ({} bytes)",
                footer.credentials.get_format(),
                footer.size
            );
        }
    }
    println!();
}

pub fn print_info(system: &SystemAttributes, apps: &[AppAttributes]) {
    println!("{BOLD}[Board]{RESET}");
    print_optional("Board", &system.board);
    print_optional("Architecture", &system.arch);
    if let Some(appaddr) = system.appaddr {
        println!("  {BOLD_GREEN}Apps start at:{RESET}       {appaddr:#x}");
    }
    if let Some(pagesize) = system.pagesize {
        println!("  {BOLD_GREEN}Page size:{RESET}           {pagesize}");
    }
    print_optional("Bootloader version", &system.bootloader_version);
    print_optional("Boot hash", &system.boothash);
    print_optional("Kernel sentinel", &system.sentinel);
    if let Some(version) = system.kernel_version {
        println!("  {BOLD_GREEN}Kernel version:{RESET}      {version}");
    }
    if let (Some(start), Some(len)) = (system.app_mem_start, system.app_mem_len) {
        println!(
            "  {BOLD_GREEN}App memory:{RESET}          {start:#x}..{:#x}",
            start as u64 + len as u64
        );
    }
    if let (Some(start), Some(len)) = (system.kernel_bin_start, system.kernel_bin_len) {
        println!(
            "  {BOLD_GREEN}Kernel binary:{RESET}       {start:#x}..{:#x}",
            start as u64 + len as u64
        );
    }

    print_list(apps);
}

fn print_optional(label: &str, value: &Option<String>) {
    if let Some(value) = value {
        println!("  {BOLD_GREEN}{label}:{RESET} {value}");
    }
}

pub fn print_attributes(attributes: &[(u8, Option<DecodedAttribute>)]) {
    println!("{BOLD}[Attributes]{RESET}");
    for (index, attribute) in attributes {
        match attribute {
            Some(attribute) => {
                println!("  {index:>2}: {:<20} = {}", attribute.key, attribute.value)
            }
            None => println!("  {index:>2}: (empty)"),
        }
    }
}

/// Classic 16-bytes-per-row hex dump.
pub fn print_hex_dump(base_address: u64, data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        print!("{:08x}  ", base_address + row as u64 * 16);
        for (i, byte) in chunk.iter().enumerate() {
            print!("{byte:02x} ");
            if i == 7 {
                print!(" ");
            }
        }
        let pad = 16 - chunk.len();
        print!("{}", "   ".repeat(pad));
        if pad > 8 {
            print!(" ");
        }
        print!(" |");
        for byte in chunk {
            let c = *byte as char;
            print!("{}", if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        println!("|");
    }
}

pub fn print_tickv_dump(objects: &[tockloader_lib::commands::tickv_ops::DumpedObject]) {
    println!("{BOLD}[TicKV]{RESET}");
    for object in objects {
        println!(
            "  region {:>2} offset {:#06x}: key {:#018x} valid={} checksum_ok={} ({} value bytes)",
            object.region,
            object.offset,
            object.hashed_key,
            object.valid,
            object.checksum_ok,
            object.value.len()
        );
    }
}
