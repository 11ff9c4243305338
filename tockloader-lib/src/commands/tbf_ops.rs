// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Edits on TBF files on disk: TLV surgery and credential management. These
//! never touch a board; they rewrite the file bytes.

use tbf_parser::parse::{parse_tbf_header, parse_tbf_header_lengths};
use tbf_parser::types::{TbfFooterV2CredentialsType, TbfHeader, TbfHeaderTypes};

use crate::credentials::{self, CredentialKeys};
use crate::errors::{TabError, TockloaderError};

fn parse_header_and_tail(tbf: &[u8]) -> Result<(TbfHeader, &[u8]), TockloaderError> {
    let (version, header_size, total_size) = parse_tbf_header_lengths(
        tbf.get(0..8)
            .ok_or(TabError::Parsing(
                tbf_parser::types::TbfParseError::NotEnoughFlash,
            ))?
            .try_into()
            .expect("Buffer length must be at least 8 bytes long."),
    )
    .map_err(|_| TabError::Parsing(tbf_parser::types::TbfParseError::NotEnoughFlash))?;
    if tbf.len() < total_size as usize {
        return Err(TabError::Parsing(tbf_parser::types::TbfParseError::NotEnoughFlash).into());
    }

    let header =
        parse_tbf_header(&tbf[..header_size as usize], version).map_err(TabError::Parsing)?;
    Ok((header, &tbf[header_size as usize..total_size as usize]))
}

fn reassemble(header: &TbfHeader, tail: &[u8]) -> Result<Vec<u8>, TockloaderError> {
    let mut out = header.generate().map_err(TabError::Parsing)?;
    out.extend_from_slice(tail);
    debug_assert_eq!(out.len(), header.total_size() as usize);
    Ok(out)
}

/// Add or replace a header TLV from raw payload bytes. The binary and the
/// footer shift with the header; `total_length` and `binary_end_offset`
/// stay consistent.
pub fn modify_tlv(
    tbf: &[u8],
    tipe: TbfHeaderTypes,
    payload: &[u8],
) -> Result<Vec<u8>, TockloaderError> {
    let (mut header, tail) = parse_header_and_tail(tbf)?;
    header.modify_tlv(tipe, payload).map_err(TabError::Parsing)?;
    reassemble(&header, tail)
}

/// Delete a header TLV.
pub fn delete_tlv(tbf: &[u8], tipe: TbfHeaderTypes) -> Result<Vec<u8>, TockloaderError> {
    let (mut header, tail) = parse_header_and_tail(tbf)?;
    header.delete_tlv(tipe).map_err(TabError::Parsing)?;
    reassemble(&header, tail)
}

/// Compute and insert a credential into the footer.
pub fn add_credential(
    tbf: &[u8],
    kind: TbfFooterV2CredentialsType,
    keys: &CredentialKeys,
) -> Result<Vec<u8>, TockloaderError> {
    credentials::add_credential(tbf, kind, keys)
}

/// Replace a credential with Reserved padding of equal size.
pub fn delete_credential(
    tbf: &[u8],
    kind: TbfFooterV2CredentialsType,
) -> Result<Vec<u8>, TockloaderError> {
    credentials::delete_credential(tbf, kind)
}

/// Map a CLI TLV name to its type.
pub fn tlv_type_by_name(name: &str) -> Option<TbfHeaderTypes> {
    match name {
        "main" => Some(TbfHeaderTypes::Main),
        "program" => Some(TbfHeaderTypes::Program),
        "writeable-flash-regions" => Some(TbfHeaderTypes::WriteableFlashRegions),
        "package-name" => Some(TbfHeaderTypes::PackageName),
        "pic-option-1" => Some(TbfHeaderTypes::PicOption1),
        "fixed-addresses" => Some(TbfHeaderTypes::FixedAddresses),
        "permissions" => Some(TbfHeaderTypes::Permissions),
        "persistent-acl" => Some(TbfHeaderTypes::PersistentAcl),
        "kernel-version" => Some(TbfHeaderTypes::KernelVersion),
        "short-id" => Some(TbfHeaderTypes::ShortId),
        _ => None,
    }
}

/// Map a CLI credential name to its type.
pub fn credential_type_by_name(name: &str) -> Option<TbfFooterV2CredentialsType> {
    match name {
        "reserved" => Some(TbfFooterV2CredentialsType::Reserved),
        "rsa2048" => Some(TbfFooterV2CredentialsType::Rsa2048Key),
        "rsa4096" => Some(TbfFooterV2CredentialsType::Rsa4096Key),
        "sha256" => Some(TbfFooterV2CredentialsType::SHA256),
        "sha384" => Some(TbfFooterV2CredentialsType::SHA384),
        "sha512" => Some(TbfFooterV2CredentialsType::SHA512),
        "ecdsap256" => Some(TbfFooterV2CredentialsType::EcdsaNistP256),
        "cleartextid" => Some(TbfFooterV2CredentialsType::CleartextID),
        "hmac-sha256" => Some(TbfFooterV2CredentialsType::HmacSha256),
        "hmac-sha384" => Some(TbfFooterV2CredentialsType::HmacSha384),
        "hmac-sha512" => Some(TbfFooterV2CredentialsType::HmacSha512),
        _ => None,
    }
}
