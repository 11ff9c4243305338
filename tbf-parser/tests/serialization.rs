// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

mod common;

use common::*;
use tbf_parser::parse::*;
use tbf_parser::types::{TbfHeader, TbfHeaderTypes};

fn simple_buffer() -> Vec<u8> {
    build_header(
        8192,
        0x0000_0001,
        &[
            main_tlv(41, 0, 4848),
            name_tlv("_heart"),
            kernel_version_tlv(2, 0),
        ],
    )
}

#[test]
fn roundtrip_identical_with_original() {
    let buffer = simple_buffer();
    let header = parse_tbf_header(&buffer, 2).unwrap();
    assert_eq!(header.generate().unwrap(), buffer);

    // The 16-byte base alone, for in-place flag patches.
    let serialized = header.serialize().unwrap();
    assert_eq!(&buffer[0..16], &serialized[..]);
}

#[test]
fn roundtrip_program_header() {
    let buffer = build_header(
        4096,
        1,
        &[
            program_tlv(41, 0, 4612, 1168, 7),
            name_tlv("c_hello"),
            kernel_version_tlv(2, 0),
        ],
    );
    let header = parse_tbf_header(&buffer, 2).unwrap();
    assert_eq!(header.get_binary_end(), 1168);
    assert_eq!(header.get_binary_version(), 7);
    assert_eq!(header.generate().unwrap(), buffer);
}

#[test]
fn flags_modifications() {
    let buffer = simple_buffer();
    let mut header = parse_tbf_header(&buffer, 2).unwrap();
    assert!(header.enabled());

    header.set_sticky(true);
    assert!(header.sticky());
    header.set_sticky(false);
    assert!(!header.sticky());

    header.set_enabled(false);
    let emitted = header.generate().unwrap();
    let reparsed = parse_tbf_header(&emitted, 2).unwrap();
    assert!(!reparsed.enabled());

    let mut header = reparsed;
    header.set_enabled(true);
    let emitted = header.generate().unwrap();
    let reparsed = parse_tbf_header(&emitted, 2).unwrap();
    assert!(reparsed.enabled());
}

#[test]
fn fields_preserved() {
    let buffer = simple_buffer();
    let mut header = parse_tbf_header(&buffer, 2).unwrap();

    let header_size = header.header_size();
    let total_size = header.total_size();

    header.set_flags(0x0000_0003);
    let serialized = header.generate().unwrap();

    assert_eq!(u16::from_le_bytes(serialized[0..2].try_into().unwrap()), 2);
    assert_eq!(
        u16::from_le_bytes(serialized[2..4].try_into().unwrap()),
        header_size
    );
    assert_eq!(
        u32::from_le_bytes(serialized[4..8].try_into().unwrap()),
        total_size
    );
}

#[test]
fn multiple_flags_set() {
    let buffer = simple_buffer();
    let mut header = parse_tbf_header(&buffer, 2).unwrap();

    for i in 1..21 {
        header.set_flags(i);
        assert_eq!(header.enabled(), i % 2 == 1);
        // The checksum must verify after every change.
        let emitted = header.generate().unwrap();
        assert!(parse_tbf_header(&emitted, 2).is_ok(), "flags {i}");
    }
}

#[test]
fn padding_header_generate() {
    let header = TbfHeader::new_padding(0x8000);
    assert!(!header.is_app());
    assert_eq!(header.total_size(), 0x8000);

    let emitted = header.generate().unwrap();
    assert_eq!(emitted.len(), 16);

    let reparsed = parse_tbf_header(&emitted, 2).unwrap();
    assert!(!reparsed.is_app());
    assert_eq!(reparsed.total_size(), 0x8000);

    let (_, header_len, whole_len) =
        parse_tbf_header_lengths(&emitted[0..8].try_into().unwrap())
            .ok()
            .unwrap();
    assert_eq!(header_len, 16);
    assert_eq!(whole_len, 0x8000);
}

#[test]
fn set_total_size_keeps_binary_end() {
    let buffer = build_header(4096, 1, &[program_tlv(41, 0, 4612, 1168, 0)]);
    let mut header = parse_tbf_header(&buffer, 2).unwrap();

    header.set_total_size(8192);
    assert_eq!(header.total_size(), 8192);
    assert_eq!(header.get_binary_end(), 1168);

    let emitted = header.generate().unwrap();
    assert!(parse_tbf_header(&emitted, 2).is_ok());
}

#[test]
fn set_minimum_size_only_grows() {
    let buffer = simple_buffer();
    let mut header = parse_tbf_header(&buffer, 2).unwrap();

    header.set_minimum_size(4096);
    assert_eq!(header.total_size(), 8192);

    header.set_minimum_size(0x4000);
    assert_eq!(header.total_size(), 0x4000);
}

#[test]
fn adjust_starting_address() {
    let buffer = build_header(
        0x4000,
        1,
        &[main_tlv(41, 0, 4848), fixed_addresses_tlv(0x2000_8000, 0x0004_0400)],
    );
    let mut header = parse_tbf_header(&buffer, 2).unwrap();

    assert!(header.adjust_starting_address(0x0003_8400));
    assert_eq!(header.get_fixed_address_flash(), Some(0x0003_8400));

    let emitted = header.generate().unwrap();
    let reparsed = parse_tbf_header(&emitted, 2).unwrap();
    assert_eq!(reparsed.get_fixed_address_flash(), Some(0x0003_8400));

    // No FixedAddresses TLV: nothing to adjust.
    let mut plain = parse_tbf_header(&simple_buffer(), 2).unwrap();
    assert!(!plain.adjust_starting_address(0x0003_8400));
}

#[test]
fn delete_tlv_shrinks_header() {
    let buffer = simple_buffer();
    let mut header = parse_tbf_header(&buffer, 2).unwrap();
    let before = header.header_size();

    header.delete_tlv(TbfHeaderTypes::KernelVersion).unwrap();
    assert_eq!(header.get_kernel_version(), None);
    assert_eq!(header.header_size(), before - 8);
    assert_eq!(header.header_size() % 4, 0);
    // Total size shifts with the header so the binary is untouched.
    assert_eq!(header.total_size(), 8192 - 8);

    let emitted = header.generate().unwrap();
    assert!(parse_tbf_header(&emitted, 2).is_ok());

    // Deleting the binary descriptor is refused.
    assert!(header.delete_tlv(TbfHeaderTypes::Main).is_err());
    // Deleting a TLV that is not there is an error.
    assert!(header.delete_tlv(TbfHeaderTypes::FixedAddresses).is_err());
}

#[test]
fn modify_tlv_reparses_payload() {
    let buffer = simple_buffer();
    let mut header = parse_tbf_header(&buffer, 2).unwrap();

    let mut payload = Vec::new();
    payload.extend_from_slice(&3u16.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes());
    header
        .modify_tlv(TbfHeaderTypes::KernelVersion, &payload)
        .unwrap();
    assert_eq!(header.get_kernel_version(), Some((3, 1)));

    // Adding a TLV that was absent grows the header, 4-byte aligned.
    let before = header.header_size();
    let mut fixed = Vec::new();
    fixed.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    fixed.extend_from_slice(&0x0004_0000u32.to_le_bytes());
    header
        .modify_tlv(TbfHeaderTypes::FixedAddresses, &fixed)
        .unwrap();
    assert_eq!(header.header_size(), before + 12);
    assert_eq!(header.header_size() % 4, 0);
    assert_eq!(header.get_fixed_address_flash(), Some(0x0004_0000));

    let emitted = header.generate().unwrap();
    let reparsed = parse_tbf_header(&emitted, 2).unwrap();
    assert_eq!(reparsed.get_kernel_version(), Some((3, 1)));
    assert_eq!(reparsed.get_fixed_address_flash(), Some(0x0004_0000));

    // A malformed payload is rejected and leaves the header valid.
    assert!(header
        .modify_tlv(TbfHeaderTypes::KernelVersion, &[1, 2, 3])
        .is_err());
    assert!(parse_tbf_header(&header.generate().unwrap(), 2).is_ok());
}
