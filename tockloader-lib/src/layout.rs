// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! The app-layout engine: deciding where every app lands in the apps region
//! and which pages actually have to be written.
//!
//! Everything in this module is synchronous and deterministic. The inputs
//! are apps (with their full TBF bytes) and board geometry; the outputs are
//! placed byte images and page-aligned write operations. All flash I/O
//! happens in the commands layer.

use tbf_parser::types::TbfHeader;

use crate::app::grow_tbf;
use crate::errors::{PlacementError, TockloaderError};

/// Fixed-address candidates are header starts rounded down to this.
pub const FIXED_ADDRESS_ALIGNMENT: u64 = 1024;

/// Smallest app size the Cortex-M MPU can describe.
pub const MPU_MIN_REGION_SIZE: u64 = 256;

/// How a board constrains app addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpuPolicy {
    /// ARMv7-M MPU: total size is a power of two >= 256 and the address is
    /// size-aligned.
    CortexM,
    /// No MPU alignment constraint; apps start on page boundaries.
    PageAligned,
}

impl MpuPolicy {
    /// The policy for a board architecture string. Cortex-M cores carry the
    /// MPU constraint; everything else (e.g. rv32i*) gets page alignment.
    pub fn for_arch(arch: Option<&str>) -> MpuPolicy {
        match arch {
            Some(arch) if arch.starts_with("cortex-m") => MpuPolicy::CortexM,
            _ => MpuPolicy::PageAligned,
        }
    }

    pub fn aligned_ok(&self, address: u64, size: u64, page_size: u64) -> bool {
        match self {
            MpuPolicy::CortexM => {
                size.is_power_of_two() && size >= MPU_MIN_REGION_SIZE && address % size == 0
            }
            MpuPolicy::PageAligned => page_size == 0 || address % page_size == 0,
        }
    }
}

/// One app the engine has to place.
pub enum PlaceableApp {
    /// Position-independent: the engine picks the address.
    Movable {
        name: String,
        header: TbfHeader,
        bytes: Vec<u8>,
    },
    /// Compiled for specific flash addresses: one variant per candidate,
    /// sorted ascending by fixed flash address.
    Fixed {
        name: String,
        variants: Vec<(TbfHeader, Vec<u8>)>,
    },
}

impl PlaceableApp {
    pub fn name(&self) -> &str {
        match self {
            PlaceableApp::Movable { name, .. } => name,
            PlaceableApp::Fixed { name, .. } => name,
        }
    }

    fn lowest_fixed_address(&self) -> Option<u64> {
        match self {
            PlaceableApp::Movable { .. } => None,
            PlaceableApp::Fixed { variants, .. } => variants
                .iter()
                .filter_map(|(h, _)| h.get_fixed_address_flash())
                .map(u64::from)
                .min(),
        }
    }
}

/// One placed item: a real app or generated padding, with the exact bytes
/// that belong at `address`.
pub struct PlacedItem {
    pub address: u64,
    pub bytes: Vec<u8>,
    pub name: String,
    pub is_padding: bool,
}

/// The full plan for the apps region.
pub struct Placement {
    pub items: Vec<PlacedItem>,
    pub start_address: u64,
    /// First byte after the last placed item.
    pub end_address: u64,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);
    value.div_ceil(alignment) * alignment
}

fn align_down(value: u64, alignment: u64) -> u64 {
    value - value % alignment
}

fn next_power_of_two_size(size: u64) -> u64 {
    size.max(MPU_MIN_REGION_SIZE).next_power_of_two()
}

/// Bytes of a padding app spanning `size` bytes: a bare TBF header followed
/// by erased-looking fill, so only the header page ever needs writing.
pub fn padding_bytes(size: u64) -> Vec<u8> {
    let header = TbfHeader::new_padding(size as u32);
    let mut bytes = header.generate().expect("padding headers always emit");
    bytes.resize(size as usize, 0xFF);
    bytes
}

/// Compute where every app goes.
///
/// Apps are placed in input order; unless `preserve_order` is set, the
/// fixed-address apps are first reordered among themselves by ascending
/// candidate address so their slots can actually be reached by the cursor.
pub fn compute_placement(
    mut apps: Vec<PlaceableApp>,
    start_address: u64,
    page_size: u64,
    policy: MpuPolicy,
    preserve_order: bool,
) -> Result<Placement, TockloaderError> {
    if !preserve_order {
        sort_fixed_apps(&mut apps);
    }

    let mut items: Vec<PlacedItem> = Vec::new();
    let mut cursor = start_address;

    for app in apps {
        match app {
            PlaceableApp::Movable {
                name,
                mut header,
                mut bytes,
            } => {
                let natural = header.total_size() as u64;
                let (alignment, size) = match policy {
                    MpuPolicy::CortexM => {
                        let size = next_power_of_two_size(natural);
                        (size, size)
                    }
                    MpuPolicy::PageAligned => (page_size.max(1), natural),
                };
                let mut address = align_up(cursor, alignment);
                // A gap smaller than a TBF header cannot hold a padding
                // app; skip to the next aligned slot instead.
                if address > cursor && address - cursor < tbf_parser::types::TBF_BASE_SIZE as u64 {
                    address += alignment;
                }
                debug_assert!(policy.aligned_ok(address, size, page_size));

                push_gap(&mut items, cursor, address)?;
                if size > natural {
                    grow_tbf(&mut header, &mut bytes, size as u32)?;
                }
                log::debug!("Placing '{name}' at {address:#x} ({size:#x} bytes)");
                cursor = address + size;
                items.push(PlacedItem {
                    address,
                    bytes,
                    name,
                    is_padding: false,
                });
            }
            PlaceableApp::Fixed { name, variants } => {
                let placed = place_fixed(&name, variants, cursor, &mut items)?;
                cursor = placed;
            }
        }
    }

    Ok(Placement {
        items,
        start_address,
        end_address: cursor,
    })
}

/// Reorder the fixed-address apps among themselves (ascending by candidate
/// address), leaving every movable app at its original index.
fn sort_fixed_apps(apps: &mut [PlaceableApp]) {
    let mut fixed_indices: Vec<usize> = Vec::new();
    let mut fixed_order: Vec<(u64, usize)> = Vec::new();
    for (index, app) in apps.iter().enumerate() {
        if let Some(addr) = app.lowest_fixed_address() {
            fixed_indices.push(index);
            fixed_order.push((addr, index));
        }
    }
    fixed_order.sort_by_key(|&(addr, index)| (addr, index));

    // Cycle-free reorder via take/replace of the affected slots.
    let mut taken: Vec<Option<PlaceableApp>> = Vec::with_capacity(fixed_order.len());
    for &(_, from) in &fixed_order {
        taken.push(Some(std::mem::replace(
            &mut apps[from],
            PlaceableApp::Fixed {
                name: String::new(),
                variants: Vec::new(),
            },
        )));
    }
    for (slot, app) in fixed_indices.iter().zip(taken.iter_mut()) {
        apps[*slot] = app.take().expect("each app is placed exactly once");
    }
}

fn place_fixed(
    name: &str,
    variants: Vec<(TbfHeader, Vec<u8>)>,
    cursor: u64,
    items: &mut Vec<PlacedItem>,
) -> Result<u64, TockloaderError> {
    // Candidate header start: the fixed binary address minus the header,
    // rounded down to 1 KiB. Pick the smallest candidate at or after the
    // cursor (leaving room for a padding header when there is a gap).
    let mut chosen: Option<(u64, TbfHeader, Vec<u8>)> = None;
    for (header, bytes) in variants {
        let fixed = match header.get_fixed_address_flash() {
            Some(addr) => addr as u64,
            None => continue,
        };
        let header_size = header.header_size() as u64;
        let start = align_down(fixed.saturating_sub(header_size), FIXED_ADDRESS_ALIGNMENT);
        if start < cursor {
            continue;
        }
        let gap = start - cursor;
        if gap > 0 && gap < tbf_parser::types::TBF_BASE_SIZE as u64 {
            continue;
        }
        if chosen.as_ref().map_or(true, |(best, _, _)| start < *best) {
            chosen = Some((start, header, bytes));
        }
    }

    let (start, mut header, mut bytes) = chosen.ok_or_else(|| {
        TockloaderError::Placement(PlacementError::NoCandidateAddress(
            name.to_string(),
            cursor,
        ))
    })?;

    push_gap(items, cursor, start)?;

    // The header may not land exactly header_size below the fixed address
    // after rounding; rewrite the fixed-address TLV to where the binary
    // actually begins.
    let binary_address = start + header.header_size() as u64;
    if header.adjust_starting_address(binary_address as u32) {
        let header_bytes = header
            .generate()
            .map_err(crate::errors::TabError::Parsing)?;
        bytes[..header_bytes.len()].copy_from_slice(&header_bytes);
    }

    let size = header.total_size() as u64;
    log::debug!("Placing fixed '{name}' at {start:#x} ({size:#x} bytes)");
    items.push(PlacedItem {
        address: start,
        bytes,
        name: name.to_string(),
        is_padding: false,
    });
    Ok(start + size)
}

/// Record the padding app covering `[cursor, address)`.
fn push_gap(
    items: &mut Vec<PlacedItem>,
    cursor: u64,
    address: u64,
) -> Result<(), TockloaderError> {
    if address == cursor {
        return Ok(());
    }
    let gap = address - cursor;
    if gap < tbf_parser::types::TBF_BASE_SIZE as u64 {
        return Err(PlacementError::GapTooSmall(gap, cursor).into());
    }
    log::debug!("Inserting {gap:#x} bytes of padding at {cursor:#x}");
    items.push(PlacedItem {
        address: cursor,
        bytes: padding_bytes(gap),
        name: "padding".to_string(),
        is_padding: true,
    });
    Ok(())
}

/// Render the placement into one contiguous image starting at
/// `start_address`. Bytes no item covers read as erased flash.
pub fn build_image(placement: &Placement) -> Vec<u8> {
    let len = (placement.end_address - placement.start_address) as usize;
    let mut image = vec![0xFF; len];
    for item in &placement.items {
        let offset = (item.address - placement.start_address) as usize;
        image[offset..offset + item.bytes.len()].copy_from_slice(&item.bytes);
    }
    image
}

/// A single page-aligned transport write.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteOp {
    pub address: u64,
    pub data: Vec<u8>,
}

/// Diff the new image against what is installed and produce the minimal
/// page-aligned writes, adjacent changed pages merged into runs. With
/// `bundle` set, any difference at all produces one write covering the
/// whole image.
pub fn plan_writes(
    existing: &[u8],
    image: &[u8],
    start_address: u64,
    page_size: u64,
    bundle: bool,
) -> Vec<WriteOp> {
    let page = page_size.max(1) as usize;
    let pages = image.len().div_ceil(page);

    let page_at = |source: &[u8], index: usize| -> Vec<u8> {
        let start = index * page;
        let end = ((index + 1) * page).min(source.len());
        let mut data = source.get(start..end).unwrap_or(&[]).to_vec();
        data.resize(page, 0xFF);
        data
    };

    let changed: Vec<usize> = (0..pages)
        .filter(|&i| page_at(existing, i) != page_at(image, i))
        .collect();

    if changed.is_empty() {
        return Vec::new();
    }

    if bundle {
        let mut data = image.to_vec();
        data.resize(pages * page, 0xFF);
        return vec![WriteOp {
            address: start_address,
            data,
        }];
    }

    let mut ops: Vec<WriteOp> = Vec::new();
    for index in changed {
        let data = page_at(image, index);
        match ops.last_mut() {
            Some(op) if op.address + op.data.len() as u64 == start_address + (index * page) as u64 =>
            {
                op.data.extend_from_slice(&data);
            }
            _ => ops.push(WriteOp {
                address: start_address + (index * page) as u64,
                data,
            }),
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        assert_eq!(align_up(0x30001, 0x200), 0x30200);
        assert_eq!(align_up(0x30000, 0x200), 0x30000);
        assert_eq!(align_down(0x38400 - 0x400, 1024), 0x38000);
        assert_eq!(next_power_of_two_size(0x4000), 0x4000);
        assert_eq!(next_power_of_two_size(0x4001), 0x8000);
        assert_eq!(next_power_of_two_size(100), 256);
    }

    #[test]
    fn mpu_policy() {
        assert_eq!(MpuPolicy::for_arch(Some("cortex-m4")), MpuPolicy::CortexM);
        assert_eq!(
            MpuPolicy::for_arch(Some("rv32imc")),
            MpuPolicy::PageAligned
        );
        assert_eq!(MpuPolicy::for_arch(None), MpuPolicy::PageAligned);

        assert!(MpuPolicy::CortexM.aligned_ok(0x30000, 0x4000, 512));
        assert!(!MpuPolicy::CortexM.aligned_ok(0x30200, 0x4000, 512));
        assert!(!MpuPolicy::CortexM.aligned_ok(0x30000, 0x3000, 512));
        assert!(MpuPolicy::PageAligned.aligned_ok(0x30200, 0x3000, 512));
    }

    #[test]
    fn padding_bytes_parse_as_padding() {
        let bytes = padding_bytes(0x8000);
        assert_eq!(bytes.len(), 0x8000);
        let (_, header_len, total_len) =
            tbf_parser::parse::parse_tbf_header_lengths(&bytes[0..8].try_into().unwrap())
                .ok()
                .unwrap();
        assert_eq!(header_len, 16);
        assert_eq!(total_len, 0x8000);
        let header = tbf_parser::parse::parse_tbf_header(&bytes[0..16], 2).unwrap();
        assert!(!header.is_app());
    }

    #[test]
    fn plan_writes_skips_identical_pages() {
        let existing = vec![0xAA; 2048];
        let mut image = existing.clone();
        image[1024] ^= 1;

        let ops = plan_writes(&existing, &image, 0x30000, 512, false);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].address, 0x30000 + 1024);
        assert_eq!(ops[0].data.len(), 512);
    }

    #[test]
    fn plan_writes_merges_adjacent_pages() {
        let existing = vec![0xAA; 2048];
        let mut image = existing.clone();
        image[0] ^= 1;
        image[600] ^= 1;
        image[1700] ^= 1;

        let ops = plan_writes(&existing, &image, 0x30000, 512, false);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].address, 0x30000);
        assert_eq!(ops[0].data.len(), 1024);
        assert_eq!(ops[1].address, 0x30000 + 1536);
    }

    #[test]
    fn plan_writes_bundle_is_one_op() {
        let existing = vec![0xAA; 2048];
        let mut image = existing.clone();
        image[1700] ^= 1;

        let ops = plan_writes(&existing, &image, 0x30000, 512, true);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].address, 0x30000);
        assert_eq!(ops[0].data.len(), 2048);
    }

    #[test]
    fn plan_writes_identical_images_write_nothing() {
        let existing = vec![0x5A; 4096];
        let ops = plan_writes(&existing, &existing.clone(), 0x30000, 512, false);
        assert!(ops.is_empty());
    }
}
