// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Byte-level builders for test TBF objects.
#![allow(dead_code)]

/// One TLV entry padded out to 4-byte alignment.
pub fn tlv(tipe: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&tipe.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    buf
}

pub fn main_tlv(init_fn_offset: u32, protected_trailer: u32, minimum_ram: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&init_fn_offset.to_le_bytes());
    p.extend_from_slice(&protected_trailer.to_le_bytes());
    p.extend_from_slice(&minimum_ram.to_le_bytes());
    tlv(1, &p)
}

pub fn program_tlv(
    init_fn_offset: u32,
    protected_trailer: u32,
    minimum_ram: u32,
    binary_end: u32,
    version: u32,
) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&init_fn_offset.to_le_bytes());
    p.extend_from_slice(&protected_trailer.to_le_bytes());
    p.extend_from_slice(&minimum_ram.to_le_bytes());
    p.extend_from_slice(&binary_end.to_le_bytes());
    p.extend_from_slice(&version.to_le_bytes());
    tlv(9, &p)
}

pub fn name_tlv(name: &str) -> Vec<u8> {
    tlv(3, name.as_bytes())
}

pub fn kernel_version_tlv(major: u16, minor: u16) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&major.to_le_bytes());
    p.extend_from_slice(&minor.to_le_bytes());
    tlv(8, &p)
}

pub fn fixed_addresses_tlv(ram: u32, flash: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&ram.to_le_bytes());
    p.extend_from_slice(&flash.to_le_bytes());
    tlv(5, &p)
}

/// Assemble a v2 header from TLVs and inject the XOR checksum.
pub fn build_header(total_size: u32, flags: u32, tlvs: &[Vec<u8>]) -> Vec<u8> {
    let header_size = 16 + tlvs.iter().map(Vec::len).sum::<usize>();
    let mut buf = Vec::with_capacity(header_size);
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&(header_size as u16).to_le_bytes());
    buf.extend_from_slice(&total_size.to_le_bytes());
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    for t in tlvs {
        buf.extend_from_slice(t);
    }
    let mut checksum = 0u32;
    for chunk in buf.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        checksum ^= u32::from_le_bytes(word);
    }
    buf[12..16].copy_from_slice(&checksum.to_le_bytes());
    buf
}

/// A whole TBF: header, binary, optional raw footer bytes.
pub fn build_tbf(header: Vec<u8>, binary: &[u8], footer: &[u8]) -> Vec<u8> {
    let mut buf = header;
    buf.extend_from_slice(binary);
    buf.extend_from_slice(footer);
    buf
}

/// A credentials footer TLV with the given format word and body.
pub fn credentials_tlv(format: u32, body: &[u8]) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&format.to_le_bytes());
    p.extend_from_slice(body);
    tlv(128, &p)
}
