// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Builders for in-memory TBFs and TAB archives used across the
//! integration tests.
#![allow(dead_code)]

use tar::{Builder, Header};

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

pub fn program_tlv(binary_end: u32, version: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&41u32.to_le_bytes());
    p.extend_from_slice(&0u32.to_le_bytes());
    p.extend_from_slice(&4096u32.to_le_bytes());
    p.extend_from_slice(&binary_end.to_le_bytes());
    p.extend_from_slice(&version.to_le_bytes());
    tlv(9, &p)
}

pub fn name_tlv(name: &str) -> Vec<u8> {
    tlv(3, name.as_bytes())
}

pub fn fixed_addresses_tlv(ram: u32, flash: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&ram.to_le_bytes());
    p.extend_from_slice(&flash.to_le_bytes());
    tlv(5, &p)
}

/// Opaque filler TLV, for tests that need a specific header size.
pub fn filler_tlv(len: usize) -> Vec<u8> {
    tlv(4, &vec![0x5Au8; len])
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

/// A complete position-independent app TBF of exactly `total_size` bytes.
pub fn build_app_tbf(name: &str, total_size: u32, flags: u32) -> Vec<u8> {
    let header = build_header(
        total_size,
        flags,
        &[main_tlv(41, 0, 4096), name_tlv(name)],
    );
    let mut tbf = header;
    // Recognizable nonzero filler standing in for code.
    while tbf.len() < total_size as usize {
        tbf.push((tbf.len() % 251) as u8 + 1);
    }
    tbf
}

/// A `Program` TBF with a footer: binary, then a Reserved credentials TLV
/// filling the rest of `total_size`.
pub fn build_program_tbf(name: &str, total_size: u32, binary_len: u32) -> Vec<u8> {
    let header_probe = build_header(
        total_size,
        1,
        &[program_tlv(0, 1), name_tlv(name)],
    );
    let header_size = header_probe.len() as u32;
    let binary_end = header_size + binary_len;
    let header = build_header(
        total_size,
        1,
        &[program_tlv(binary_end, 1), name_tlv(name)],
    );

    let mut tbf = header;
    while tbf.len() < binary_end as usize {
        tbf.push((tbf.len() % 251) as u8 + 1);
    }
    // Reserved credentials TLV spanning the whole footer region.
    let footer_len = total_size - binary_end;
    assert!(footer_len >= 8, "footer region too small");
    let reserved_payload_len = footer_len - 4;
    tbf.extend_from_slice(&128u16.to_le_bytes());
    tbf.extend_from_slice(&(reserved_payload_len as u16).to_le_bytes());
    tbf.extend_from_slice(&0u32.to_le_bytes());
    tbf.resize(total_size as usize, 0);
    tbf
}

/// A fixed-address app whose header is padded to `header_size` so the
/// binary lands exactly at `flash_addr`.
pub fn build_fixed_tbf(
    name: &str,
    total_size: u32,
    header_size: usize,
    flash_addr: u32,
    ram_addr: u32,
) -> Vec<u8> {
    // 16 base + 16 main + name + fixed-addresses + filler == header_size.
    let name_len = tlv(3, name.as_bytes()).len();
    let fixed_len = 12;
    let filler_payload = header_size - 16 - 16 - name_len - fixed_len - 4;
    let header = build_header(
        total_size,
        1,
        &[
            main_tlv(41, 0, 4096),
            name_tlv(name),
            fixed_addresses_tlv(ram_addr, flash_addr),
            filler_tlv(filler_payload),
        ],
    );
    assert_eq!(header.len(), header_size);
    let mut tbf = header;
    while tbf.len() < total_size as usize {
        tbf.push((tbf.len() % 251) as u8 + 1);
    }
    tbf
}

/// A TAB archive holding `metadata.toml` and the given TBF files.
pub fn build_tab(name: &str, tbfs: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let metadata = format!("tab-version = 1\nname = \"{name}\"\n");
    let mut builder = Builder::new(Vec::new());

    let mut header = Header::new_gnu();
    header.set_size(metadata.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "metadata.toml", metadata.as_bytes())
        .unwrap();

    for (filename, data) in tbfs {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, filename, &data[..]).unwrap();
    }

    builder.into_inner().unwrap()
}
