// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

mod common;

use common::*;
use tbf_parser::parse::*;
use tbf_parser::types::{
    TbfFooterV2Credentials, TbfFooterV2CredentialsType, TbfParseError,
};

#[test]
fn simple_tbf() {
    let buffer = build_header(
        8192,
        0x0000_0001,
        &[
            main_tlv(41, 0, 4848),
            name_tlv("_heart"),
            kernel_version_tlv(2, 0),
        ],
    );

    let (ver, header_len, whole_len) = parse_tbf_header_lengths(&buffer[0..8].try_into().unwrap())
        .ok()
        .unwrap();
    assert_eq!(ver, 2);
    assert_eq!(header_len, 52);
    assert_eq!(whole_len, 8192);

    let header = parse_tbf_header(&buffer[0..header_len as usize], 2).unwrap();
    assert!(header.is_app());
    assert!(header.enabled());
    assert!(!header.sticky());
    assert_eq!(header.get_minimum_app_ram_size(), 4848);
    assert_eq!(header.get_init_function_offset(), 41);
    assert_eq!(header.get_protected_trailer_size(), 0);
    assert_eq!(header.get_application_flags(), 1);
    assert_eq!(header.get_package_name().unwrap(), "_heart");
    assert_eq!(header.get_kernel_version().unwrap(), (2, 0));
    // A Main app's binary runs to the end of the TBF.
    assert_eq!(header.get_binary_end(), 8192);
}

#[test]
fn padding_header() {
    let buffer = build_header(0x4000, 0, &[]);
    let (_, header_len, whole_len) = parse_tbf_header_lengths(&buffer[0..8].try_into().unwrap())
        .ok()
        .unwrap();
    assert_eq!(header_len, 16);
    assert_eq!(whole_len, 0x4000);

    let header = parse_tbf_header(&buffer, 2).unwrap();
    assert!(!header.is_app());
    assert!(!header.enabled());
    assert_eq!(header.total_size(), 0x4000);
}

#[test]
fn erased_flash_ends_walk() {
    let erased = [0xFFu8; 8];
    assert!(parse_tbf_header_lengths(&erased).is_err());

    let zeroed = [0u8; 8];
    assert!(parse_tbf_header_lengths(&zeroed).is_err());
}

#[test]
fn wrong_version_ends_walk() {
    let buffer = build_header(1024, 1, &[main_tlv(41, 0, 1024)]);
    let mut bad = buffer.clone();
    bad[0] = 3;
    assert!(parse_tbf_header_lengths(&bad[0..8].try_into().unwrap()).is_err());
}

#[test]
fn corrupt_checksum() {
    let mut buffer = build_header(8192, 1, &[main_tlv(41, 0, 4848), name_tlv("_heart")]);
    buffer[12] ^= 0x6D;

    let result = parse_tbf_header(&buffer, 2);
    assert!(matches!(
        result,
        Err(TbfParseError::ChecksumMismatch(_, _))
    ));
}

#[test]
fn duplicate_tlv_is_corruption() {
    let buffer = build_header(
        8192,
        1,
        &[main_tlv(41, 0, 4848), name_tlv("a"), name_tlv("b")],
    );
    let result = parse_tbf_header(&buffer, 2);
    assert!(matches!(
        result,
        Err(TbfParseError::DuplicateTlvEntry(3))
    ));
}

#[test]
fn main_and_program_are_exclusive() {
    let buffer = build_header(
        8192,
        1,
        &[main_tlv(41, 0, 4848), program_tlv(41, 0, 4848, 4096, 0)],
    );
    let result = parse_tbf_header(&buffer, 2);
    assert!(matches!(result, Err(TbfParseError::DuplicateTlvEntry(_))));
}

#[test]
fn tlv_crossing_header_end() {
    // Declare a name TLV longer than the remaining header bytes.
    let mut tlvs = vec![main_tlv(41, 0, 4848)];
    let mut broken = Vec::new();
    broken.extend_from_slice(&3u16.to_le_bytes());
    broken.extend_from_slice(&200u16.to_le_bytes());
    broken.extend_from_slice(b"oops");
    tlvs.push(broken);
    let buffer = build_header(8192, 1, &tlvs);

    let result = parse_tbf_header(&buffer, 2);
    assert!(matches!(result, Err(TbfParseError::BadTlvEntry(3))));
}

#[test]
fn unknown_tlv_preserved() {
    let buffer = build_header(
        8192,
        1,
        &[main_tlv(41, 0, 4848), tlv(0x77, &[1, 2, 3, 4, 5, 6])],
    );
    let header = parse_tbf_header(&buffer, 2).unwrap();
    assert!(header.is_app());

    // The raw entry must survive re-emission byte for byte.
    let emitted = header.generate().unwrap();
    assert_eq!(emitted, buffer);
}

#[test]
fn shortid_valid() {
    let buffer = build_header(
        0x90,
        0,
        &[name_tlv("_test"), tlv(10, &1234u32.to_le_bytes())],
    );
    let header = parse_tbf_header(&buffer, 2).unwrap();

    let expected_short_id = core::num::NonZeroU32::new(1234);
    assert_eq!(header.get_fixed_short_id(), expected_short_id);
}

#[test]
fn shortid_nonexistent() {
    let buffer = build_header(8192, 1, &[main_tlv(41, 0, 4848)]);
    let header = parse_tbf_header(&buffer, 2).unwrap();
    assert_eq!(header.get_fixed_short_id(), None);
}

#[test]
fn fixed_addresses() {
    let buffer = build_header(
        0x4000,
        1,
        &[
            main_tlv(41, 0, 4848),
            fixed_addresses_tlv(0x2000_8000, 0x0004_0400),
        ],
    );
    let header = parse_tbf_header(&buffer, 2).unwrap();
    assert_eq!(header.get_fixed_address_ram(), Some(0x2000_8000));
    assert_eq!(header.get_fixed_address_flash(), Some(0x0004_0400));

    // 0xFFFFFFFF encodes "unused".
    let buffer = build_header(
        0x4000,
        1,
        &[main_tlv(41, 0, 4848), fixed_addresses_tlv(0xFFFF_FFFF, 0x0004_0400)],
    );
    let header = parse_tbf_header(&buffer, 2).unwrap();
    assert_eq!(header.get_fixed_address_ram(), None);
    assert_eq!(header.get_fixed_address_flash(), Some(0x0004_0400));
}

#[test]
fn footer_sha256() {
    let header = build_header(
        8192,
        1,
        &[
            program_tlv(41, 0, 4848, 5836, 0),
            name_tlv("_heart"),
            kernel_version_tlv(2, 0),
        ],
    );
    let header_len = header.len();
    let binary = vec![0xAAu8; 5836 - header_len];

    let digest = [0x5Au8; 32];
    let mut footer = credentials_tlv(TbfFooterV2CredentialsType::SHA256 as u32, &digest);
    // Reserved padding fills the rest of the footer region.
    let reserved_len = 8192 - 5836 - footer.len() - 4;
    footer.extend_from_slice(&credentials_tlv(0, &vec![0u8; reserved_len - 4]));

    let buffer = build_tbf(header, &binary, &footer);
    assert_eq!(buffer.len(), 8192);

    let parsed = parse_tbf_header(&buffer[0..header_len], 2).unwrap();
    let binary_offset = parsed.get_binary_end() as usize;
    assert_eq!(binary_offset, 5836);

    let (footer, footer_size) = parse_tbf_footer(&buffer[binary_offset..]).unwrap();
    assert_eq!(footer_size, 36);
    if let TbfFooterV2Credentials::SHA256(creds) = footer {
        assert_eq!(creds.hash, digest);
    } else {
        panic!("Footer is not of type SHA256!");
    }

    let second_footer_offset = binary_offset + footer_size as usize + 4;
    let (footer, footer_size) = parse_tbf_footer(&buffer[second_footer_offset..]).unwrap();
    assert_eq!(footer_size as usize, reserved_len);
    assert!(matches!(footer, TbfFooterV2Credentials::Reserved(_)));

    // And the whole region parses as exactly two entries.
    let footers = parse_tbf_footers(&buffer[binary_offset..]).unwrap();
    assert_eq!(footers.len(), 2);
}

#[test]
fn ecdsa_nist_p256_smoke_test() {
    let signature_r = [0xAA; 32];
    let signature_s = [0xBB; 32];
    let mut body = Vec::new();
    body.extend_from_slice(&signature_r);
    body.extend_from_slice(&signature_s);

    let buffer = credentials_tlv(TbfFooterV2CredentialsType::EcdsaNistP256 as u32, &body);
    assert_eq!(buffer.len(), 4 + 68);

    let (footer, returned_footer_size) = parse_tbf_footer(&buffer).unwrap();
    assert_eq!(returned_footer_size, 68);
    if let TbfFooterV2Credentials::EcdsaNistP256(ecdsa) = footer {
        assert_eq!(ecdsa.get_signature_r(), &signature_r);
        assert_eq!(ecdsa.get_signature_s(), &signature_s);
    } else {
        panic!("Footer is not of type EcdsaNistP256!");
    }
}

#[test]
fn footer_unknown_credential() {
    let buffer = credentials_tlv(0x1234, &[0u8; 16]);
    let result = parse_tbf_footer(&buffer);
    assert!(matches!(
        result,
        Err(TbfParseError::UnknownCredential(0x1234))
    ));
}

#[test]
fn footer_overlapping_header_rejected() {
    // Program whose binary_end_offset points inside the header itself.
    let buffer = build_header(8192, 1, &[program_tlv(41, 0, 4848, 8, 0)]);
    let result = parse_tbf_header(&buffer, 2);
    assert!(matches!(result, Err(TbfParseError::BadTlvEntry(9))));
}
