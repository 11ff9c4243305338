// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

mod common;

use common::*;
use tbf_parser::parse::parse_tbf_header_lengths;
use tbf_parser::types::TbfFooterV2CredentialsType;
use tockloader_lib::credentials::{
    add_credential, delete_credential, generate_ecdsa_keypair, verify_credentials,
    CredentialCheck, CredentialKeys,
};

fn program_app() -> Vec<u8> {
    // 0x2000 total, 0x800 of binary, the rest Reserved footer.
    build_program_tbf("signed", 0x2000, 0x800)
}

fn total_size(tbf: &[u8]) -> u32 {
    parse_tbf_header_lengths(&tbf[0..8].try_into().unwrap())
        .ok()
        .unwrap()
        .2
}

#[test]
fn sha256_add_then_verify() {
    let tbf = program_app();
    let keys = CredentialKeys::default();

    let signed = add_credential(&tbf, TbfFooterV2CredentialsType::SHA256, &keys).unwrap();
    assert_eq!(total_size(&signed), total_size(&tbf));

    let results = verify_credentials(&signed, &keys).unwrap();
    assert_eq!(
        results,
        vec![(TbfFooterV2CredentialsType::SHA256, CredentialCheck::Pass)]
    );
}

#[test]
fn sha512_detects_tamper() {
    let tbf = program_app();
    let keys = CredentialKeys::default();
    let mut signed = add_credential(&tbf, TbfFooterV2CredentialsType::SHA512, &keys).unwrap();

    // Flip one binary byte inside the integrity blob.
    let header_len = u16::from_le_bytes(signed[2..4].try_into().unwrap()) as usize;
    signed[header_len + 10] ^= 0xFF;

    let results = verify_credentials(&signed, &keys).unwrap();
    assert_eq!(results[0].1, CredentialCheck::Fail);
}

#[test]
fn hmac_requires_key() {
    let tbf = program_app();
    let signer = CredentialKeys {
        hmac_key: Some(b"super secret shared key".to_vec()),
        ..Default::default()
    };

    let signed = add_credential(&tbf, TbfFooterV2CredentialsType::HmacSha256, &signer).unwrap();

    // Without the key the check is skipped, with it the MAC verifies.
    let results = verify_credentials(&signed, &CredentialKeys::default()).unwrap();
    assert_eq!(results[0].1, CredentialCheck::SkippedNoKey);

    let results = verify_credentials(&signed, &signer).unwrap();
    assert_eq!(results[0].1, CredentialCheck::Pass);

    // Adding without a key at all is refused.
    assert!(add_credential(
        &tbf,
        TbfFooterV2CredentialsType::HmacSha384,
        &CredentialKeys::default()
    )
    .is_err());
}

#[test]
fn ecdsa_roundtrip() {
    let tbf = program_app();
    let (pkcs8, public) = generate_ecdsa_keypair().unwrap();
    let keys = CredentialKeys {
        ecdsa_pkcs8: Some(pkcs8),
        ecdsa_public: Some(public),
        ..Default::default()
    };

    let signed = add_credential(&tbf, TbfFooterV2CredentialsType::EcdsaNistP256, &keys).unwrap();
    let results = verify_credentials(&signed, &keys).unwrap();
    assert_eq!(
        results,
        vec![(
            TbfFooterV2CredentialsType::EcdsaNistP256,
            CredentialCheck::Pass
        )]
    );

    // A different keypair must not verify the same signature.
    let (_, other_public) = generate_ecdsa_keypair().unwrap();
    let other = CredentialKeys {
        ecdsa_public: Some(other_public),
        ..Default::default()
    };
    let results = verify_credentials(&signed, &other).unwrap();
    assert_eq!(results[0].1, CredentialCheck::Fail);
}

/// Delete preserves `total_length` and the other credentials.
#[test]
fn delete_preserves_other_credentials() {
    let tbf = program_app();
    let keys = CredentialKeys {
        hmac_key: Some(b"key".to_vec()),
        ..Default::default()
    };

    let signed = add_credential(&tbf, TbfFooterV2CredentialsType::SHA256, &keys).unwrap();
    let signed = add_credential(&signed, TbfFooterV2CredentialsType::HmacSha256, &keys).unwrap();

    let pruned = delete_credential(&signed, TbfFooterV2CredentialsType::SHA256).unwrap();
    assert_eq!(total_size(&pruned), total_size(&tbf));

    let results = verify_credentials(&pruned, &keys).unwrap();
    assert_eq!(
        results,
        vec![(
            TbfFooterV2CredentialsType::HmacSha256,
            CredentialCheck::Pass
        )]
    );

    // Deleting a credential that is not there fails.
    assert!(delete_credential(&pruned, TbfFooterV2CredentialsType::SHA384).is_err());
}

#[test]
fn insufficient_footer_is_rejected() {
    // Footer region of only 8 bytes: the minimal Reserved TLV, no room for
    // a SHA256 credential.
    let tbf = build_program_tbf("tiny", 0x438, 0x400);
    let keys = CredentialKeys::default();

    let result = add_credential(&tbf, TbfFooterV2CredentialsType::SHA256, &keys);
    assert!(result.is_err());
}

#[test]
fn main_app_cannot_carry_credentials() {
    let tbf = build_app_tbf("plain", 0x1000, 1);
    let result = add_credential(&tbf, TbfFooterV2CredentialsType::SHA256, &CredentialKeys::default());
    assert!(result.is_err());
}
