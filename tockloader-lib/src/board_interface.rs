// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! The capability contract every transport must implement.
//!
//! The layout engine and the commands only ever talk to a board through this
//! trait. The serial bootloader implements it fully; external-program
//! transports (JLinkExe, OpenOCD, stlink) implement the same surface by
//! shelling out, and the test suite uses [`FlashImage`], an in-memory
//! implementation.

use async_trait::async_trait;

use crate::attributes::decode::{decode_attribute, DecodedAttribute};
use crate::errors::TockloaderError;

/// Number of attribute slots maintained by the bootloader.
pub const ATTRIBUTE_SLOTS: u8 = 16;
/// Size of one attribute slot in bytes.
pub const ATTRIBUTE_SLOT_SIZE: usize = 64;

#[async_trait]
pub trait BoardInterface {
    /// Open the link to the board. Must be called before anything else.
    async fn open(&mut self) -> Result<(), TockloaderError>;

    /// Get the board into a state where flash can be read and written.
    async fn enter_bootloader_mode(&mut self) -> Result<(), TockloaderError>;

    /// Leave bootloader mode so the kernel boots again. Best-effort on
    /// aborted runs.
    async fn exit_bootloader_mode(&mut self) -> Result<(), TockloaderError>;

    /// Read `length` bytes starting at a (translated) address.
    async fn read_range(&mut self, address: u64, length: usize)
        -> Result<Vec<u8>, TockloaderError>;

    /// Write `data` starting at a (translated) address. Both the address and
    /// the length must be multiples of the page size.
    async fn flash_binary(&mut self, address: u64, data: &[u8]) -> Result<(), TockloaderError>;

    /// Erase the page containing `address` back to 0xFF.
    async fn erase_page(&mut self, address: u64) -> Result<(), TockloaderError>;

    /// Make sure whatever is stored at `address` no longer parses as a TBF
    /// header, so the linked list terminates there.
    async fn clear_bytes(&mut self, address: u64) -> Result<(), TockloaderError>;

    /// Read one raw 64-byte attribute slot.
    async fn get_attribute(&mut self, index: u8) -> Result<Vec<u8>, TockloaderError>;

    /// Write one raw 64-byte attribute slot.
    async fn set_attribute(&mut self, index: u8, raw: &[u8]) -> Result<(), TockloaderError>;

    /// Read and decode every attribute slot. Empty slots decode to `None`.
    async fn get_all_attributes(
        &mut self,
    ) -> Result<Vec<Option<DecodedAttribute>>, TockloaderError> {
        let mut attributes = Vec::with_capacity(ATTRIBUTE_SLOTS as usize);
        for index in 0..ATTRIBUTE_SLOTS {
            let raw = self.get_attribute(index).await?;
            attributes.push(decode_attribute(&raw));
        }
        Ok(attributes)
    }

    /// Board name, from attributes or settings.
    async fn get_board_name(&mut self) -> Result<Option<String>, TockloaderError>;

    /// Board architecture, from attributes or settings.
    async fn get_board_arch(&mut self) -> Result<Option<String>, TockloaderError>;

    /// Flash page size in bytes.
    fn get_page_size(&self) -> u64;

    /// Where the linked list of apps starts.
    async fn get_apps_start_address(&mut self) -> Result<u64, TockloaderError>;

    /// Map a kernel-visible address to the address this transport must use
    /// (memory-mapped QSPI and flash files shift the space).
    fn translate_address(&self, address: u64) -> u64;

    /// Whether a physical board appears to be attached.
    async fn attached_board_exists(&mut self) -> bool;

    /// Whether the board runs a tock bootloader. `None` when that cannot be
    /// determined without side effects.
    async fn bootloader_is_present(&mut self) -> Option<bool>;
}

/// An in-memory flash image implementing the full board contract.
///
/// Drives the layout engine in tests exactly like a board would, and doubles
/// as a reference for what each capability must do.
pub struct FlashImage {
    memory: Vec<u8>,
    base_address: u64,
    page_size: u64,
    apps_start_address: u64,
    board: Option<String>,
    arch: Option<String>,
    attributes: Vec<Vec<u8>>,
    /// Every (address, length) pair passed to `flash_binary`.
    pub write_log: Vec<(u64, usize)>,
}

impl FlashImage {
    pub fn new(size: usize, base_address: u64, page_size: u64, apps_start_address: u64) -> Self {
        FlashImage {
            memory: vec![0xFF; size],
            base_address,
            page_size,
            apps_start_address,
            board: None,
            arch: Some("cortex-m4".to_string()),
            attributes: vec![vec![0xFF; ATTRIBUTE_SLOT_SIZE]; ATTRIBUTE_SLOTS as usize],
            write_log: Vec::new(),
        }
    }

    pub fn set_arch(&mut self, arch: &str) {
        self.arch = Some(arch.to_string());
    }

    pub fn set_board(&mut self, board: &str) {
        self.board = Some(board.to_string());
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Place raw bytes without going through the write path (test setup).
    pub fn preload(&mut self, address: u64, data: &[u8]) {
        let offset = (address - self.base_address) as usize;
        self.memory[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn writes_issued(&self) -> usize {
        self.write_log.len()
    }

    fn offset_of(&self, address: u64) -> usize {
        (address - self.base_address) as usize
    }
}

#[async_trait]
impl BoardInterface for FlashImage {
    async fn open(&mut self) -> Result<(), TockloaderError> {
        Ok(())
    }

    async fn enter_bootloader_mode(&mut self) -> Result<(), TockloaderError> {
        Ok(())
    }

    async fn exit_bootloader_mode(&mut self) -> Result<(), TockloaderError> {
        Ok(())
    }

    async fn read_range(
        &mut self,
        address: u64,
        length: usize,
    ) -> Result<Vec<u8>, TockloaderError> {
        let offset = self.offset_of(address).min(self.memory.len());
        let end = (offset + length).min(self.memory.len());
        let mut data = self.memory[offset..end].to_vec();
        // Reads past the end of the image behave like erased flash.
        data.resize(length, 0xFF);
        Ok(data)
    }

    async fn flash_binary(&mut self, address: u64, data: &[u8]) -> Result<(), TockloaderError> {
        assert_eq!(address % self.page_size, 0, "unaligned write address");
        assert_eq!(
            data.len() as u64 % self.page_size,
            0,
            "unaligned write length"
        );
        let offset = self.offset_of(address);
        self.memory[offset..offset + data.len()].copy_from_slice(data);
        self.write_log.push((address, data.len()));
        Ok(())
    }

    async fn erase_page(&mut self, address: u64) -> Result<(), TockloaderError> {
        let page_start = address - address % self.page_size;
        let offset = self.offset_of(page_start);
        for b in &mut self.memory[offset..offset + self.page_size as usize] {
            *b = 0xFF;
        }
        Ok(())
    }

    async fn clear_bytes(&mut self, address: u64) -> Result<(), TockloaderError> {
        self.erase_page(address).await
    }

    async fn get_attribute(&mut self, index: u8) -> Result<Vec<u8>, TockloaderError> {
        Ok(self.attributes[index as usize].clone())
    }

    async fn set_attribute(&mut self, index: u8, raw: &[u8]) -> Result<(), TockloaderError> {
        let mut slot = raw.to_vec();
        slot.resize(ATTRIBUTE_SLOT_SIZE, 0xFF);
        self.attributes[index as usize] = slot;
        Ok(())
    }

    async fn get_board_name(&mut self) -> Result<Option<String>, TockloaderError> {
        Ok(self.board.clone())
    }

    async fn get_board_arch(&mut self) -> Result<Option<String>, TockloaderError> {
        Ok(self.arch.clone())
    }

    fn get_page_size(&self) -> u64 {
        self.page_size
    }

    async fn get_apps_start_address(&mut self) -> Result<u64, TockloaderError> {
        Ok(self.apps_start_address)
    }

    fn translate_address(&self, address: u64) -> u64 {
        address
    }

    async fn attached_board_exists(&mut self) -> bool {
        true
    }

    async fn bootloader_is_present(&mut self) -> Option<bool> {
        Some(false)
    }
}
