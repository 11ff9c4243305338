// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! The serial-bootloader transport: a [`BoardInterface`] over a UART.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::attributes::decode::decode_attribute;
use crate::board_interface::{BoardInterface, ATTRIBUTE_SLOTS, ATTRIBUTE_SLOT_SIZE};
use crate::board_settings::BoardSettings;
use crate::bootloader_serial::{
    self, change_baud_rate, frame_command, issue_command, ping_bootloader_and_wait_for_response,
    toggle_bootloader_entry_dtr_rts, Command, Response, ATTRIBUTE_RESPONSE_LEN, DEFAULT_TIMEOUT,
};
use crate::errors::{InternalError, TockError, TockloaderError};
use crate::port_lock::PortLock;

/// How many times a retryable command is attempted before giving up.
const COMMAND_RETRIES: u32 = 3;
/// How many times mismatching pages are rewritten before flash verification
/// fails for good.
const FLASH_RETRIES: u32 = 3;
/// Deadline for the serial device to reappear after the 1200-baud touch.
const REOPEN_DEADLINE: Duration = Duration::from_secs(10);

/// Serial-specific configuration.
#[derive(Clone, Debug)]
pub struct SerialTargetInfo {
    pub baud_rate: u32,
    /// Rate to negotiate after entry; `None` keeps the opening rate.
    pub negotiate_baud: Option<u32>,
    /// Assume the bootloader is already running instead of toggling the
    /// board into it.
    pub no_bootloader_entry: bool,
}

impl Default for SerialTargetInfo {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            negotiate_baud: Some(921600),
            no_bootloader_entry: false,
        }
    }
}

/// Run one bootloader command with capped exponential backoff on retryable
/// failures.
macro_rules! retry {
    ($conn:expr, |$stream:ident| $body:expr) => {{
        let mut delay = std::time::Duration::from_millis(100);
        let mut attempt = 0;
        loop {
            let $stream = $conn.stream()?;
            match $body {
                Ok(value) => break Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < COMMAND_RETRIES => {
                    log::debug!("Retrying after {e}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        }
    }};
}

pub struct SerialConnection {
    path: String,
    info: SerialTargetInfo,
    settings: BoardSettings,
    stream: Option<SerialStream>,
    _lock: Option<PortLock>,
    current_baud: u32,
    in_bootloader: bool,
    cached_attributes: Option<HashMap<String, String>>,
}

impl SerialConnection {
    pub fn new(path: String, info: SerialTargetInfo, settings: BoardSettings) -> Self {
        SerialConnection {
            path,
            info,
            settings,
            stream: None,
            _lock: None,
            current_baud: 0,
            in_bootloader: false,
            cached_attributes: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut SerialStream, TockloaderError> {
        self.stream
            .as_mut()
            .ok_or_else(|| InternalError::ConnectionNotOpen.into())
    }

    /// Hold the reset line through a 1200-baud open, then wait for the
    /// device node to come back at the nominal rate.
    async fn touch_1200_baud(&mut self) -> Result<(), TockloaderError> {
        log::debug!("Entry via 1200-baud touch on {}", self.path);
        self.stream = None;
        {
            let _touch = tokio_serial::new(&self.path, 1200).open_native_async()?;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let deadline = tokio::time::Instant::now() + REOPEN_DEADLINE;
        loop {
            match tokio_serial::new(&self.path, self.info.baud_rate).open_native_async() {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.current_baud = self.info.baud_rate;
                    return Ok(());
                }
                Err(e) if tokio::time::Instant::now() < deadline => {
                    log::trace!("Waiting for {} to reappear: {e}", self.path);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn load_attributes(&mut self) -> Result<(), TockloaderError> {
        if self.cached_attributes.is_some() {
            return Ok(());
        }
        let mut attributes = HashMap::new();
        for index in 0..ATTRIBUTE_SLOTS {
            let stream = self.stream()?;
            let (_, raw) = issue_command(
                stream,
                Command::GetAttribute,
                vec![index],
                ATTRIBUTE_RESPONSE_LEN,
                Response::GetAttribute,
                DEFAULT_TIMEOUT,
            )
            .await?;
            if let Some(decoded) = decode_attribute(&raw) {
                attributes.insert(decoded.key, decoded.value);
            }
        }

        if let Some(pagesize) = attributes.get("pagesize") {
            if let Ok(pagesize) = pagesize.parse::<u64>() {
                self.settings.page_size = pagesize;
            }
        }
        self.cached_attributes = Some(attributes);
        Ok(())
    }

    fn attribute(&self, key: &str) -> Option<String> {
        self.cached_attributes
            .as_ref()
            .and_then(|attrs| attrs.get(key).cloned())
    }

    /// Point the bootloader itself at a different kernel start address
    /// (the `SET_START_ADDRESS` bootloader command).
    pub async fn set_bootloader_start_address(
        &mut self,
        address: u32,
    ) -> Result<(), TockloaderError> {
        let stream = self.stream()?;
        issue_command(
            stream,
            Command::SetStartAddress,
            address.to_le_bytes().to_vec(),
            0,
            Response::OK,
            DEFAULT_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// The 192-byte bootloader info blob, with the embedded version string.
    pub async fn bootloader_info(&mut self) -> Result<Vec<u8>, TockloaderError> {
        let stream = self.stream()?;
        let (_, info) = issue_command(
            stream,
            Command::Info,
            Vec::new(),
            bootloader_serial::INFO_RESPONSE_LEN,
            Response::Info,
            DEFAULT_TIMEOUT,
        )
        .await?;
        Ok(info)
    }
}

#[async_trait]
impl BoardInterface for SerialConnection {
    async fn open(&mut self) -> Result<(), TockloaderError> {
        if self.stream.is_some() {
            return Ok(());
        }
        // The per-device gate comes first: never share a port between two
        // tockloader processes.
        self._lock = Some(PortLock::acquire(&self.path)?);
        let mut stream = tokio_serial::new(&self.path, self.info.baud_rate).open_native_async()?;
        #[cfg(unix)]
        stream.set_exclusive(false).ok();
        self.stream = Some(stream);
        self.current_baud = self.info.baud_rate;
        Ok(())
    }

    async fn enter_bootloader_mode(&mut self) -> Result<(), TockloaderError> {
        if self.in_bootloader {
            return Ok(());
        }
        let no_bootloader_entry = self.info.no_bootloader_entry;
        let stream = self.stream()?;

        if no_bootloader_entry {
            ping_bootloader_and_wait_for_response(stream).await?;
        } else if ping_bootloader_and_wait_for_response(stream).await.is_err() {
            // Strategy (a): pulse reset with the bootloader-select line held.
            toggle_bootloader_entry_dtr_rts(stream).await?;
            if ping_bootloader_and_wait_for_response(stream).await.is_err() {
                // Strategy (b): the 1200-baud touch, then ping again.
                self.touch_1200_baud().await?;
                let stream = self.stream()?;
                ping_bootloader_and_wait_for_response(stream).await?;
            }
        }

        if let Some(requested) = self.info.negotiate_baud {
            if requested != self.current_baud {
                let current = self.current_baud;
                let stream = self.stream()?;
                self.current_baud = change_baud_rate(stream, current, requested).await?;
            }
        }

        self.in_bootloader = true;
        self.load_attributes().await?;
        Ok(())
    }

    async fn exit_bootloader_mode(&mut self) -> Result<(), TockloaderError> {
        if !self.in_bootloader {
            return Ok(());
        }
        let frame = frame_command(Command::Exit, &[]);
        let stream = self.stream()?;
        use tokio::io::AsyncWriteExt;
        stream.write_all(&frame).await?;
        self.in_bootloader = false;
        Ok(())
    }

    async fn read_range(
        &mut self,
        address: u64,
        length: usize,
    ) -> Result<Vec<u8>, TockloaderError> {
        retry!(self, |stream| bootloader_serial::read_range(
            stream, address, length
        )
        .await)
    }

    async fn flash_binary(&mut self, address: u64, data: &[u8]) -> Result<(), TockloaderError> {
        let page_size = self.settings.page_size.max(1);
        if address % page_size != 0 || data.len() as u64 % page_size != 0 {
            return Err(TockloaderError::Usage(format!(
                "write of {} bytes at {address:#x} is not {page_size}-byte page aligned",
                data.len()
            )));
        }

        let local_crc = crc32fast::hash(data);
        for attempt in 0..FLASH_RETRIES {
            for (index, page) in data.chunks(page_size as usize).enumerate() {
                let page_address = address + index as u64 * page_size;
                retry!(self, |stream| bootloader_serial::write_page(
                    stream,
                    page_address,
                    page
                )
                .await)?;
            }

            // Verify the whole contiguous run in one CRC exchange.
            let stream = self.stream()?;
            let board_crc =
                bootloader_serial::crc_internal_flash(stream, address, data.len() as u64).await?;
            if board_crc == local_crc {
                return Ok(());
            }
            log::warn!(
                "CRC mismatch at {address:#x} (board {board_crc:#010x}, local {local_crc:#010x}), attempt {}",
                attempt + 1
            );
        }

        Err(TockError::FlashVerifyFailed {
            start: address,
            end: address + data.len() as u64,
        }
        .into())
    }

    async fn erase_page(&mut self, address: u64) -> Result<(), TockloaderError> {
        retry!(self, |stream| bootloader_serial::erase_page(stream, address).await)
    }

    async fn clear_bytes(&mut self, address: u64) -> Result<(), TockloaderError> {
        // Wipe from `address` to the end of its page, keeping whatever
        // precedes it on the same page.
        let page_size = self.settings.page_size.max(1);
        let page_start = address - address % page_size;
        let mut page = self.read_range(page_start, page_size as usize).await?;
        for b in &mut page[(address - page_start) as usize..] {
            *b = 0xFF;
        }
        self.flash_binary(page_start, &page).await
    }

    async fn get_attribute(&mut self, index: u8) -> Result<Vec<u8>, TockloaderError> {
        retry!(self, |stream| issue_command(
            stream,
            Command::GetAttribute,
            vec![index],
            ATTRIBUTE_RESPONSE_LEN,
            Response::GetAttribute,
            DEFAULT_TIMEOUT,
        )
        .await
        .map(|(_, raw)| raw))
    }

    async fn set_attribute(&mut self, index: u8, raw: &[u8]) -> Result<(), TockloaderError> {
        let mut slot = raw.to_vec();
        slot.resize(ATTRIBUTE_SLOT_SIZE, 0xFF);
        let mut payload = vec![index];
        payload.extend_from_slice(&slot);
        let stream = self.stream()?;
        issue_command(
            stream,
            Command::SetAttribute,
            payload,
            0,
            Response::OK,
            DEFAULT_TIMEOUT,
        )
        .await?;
        // The cache is stale now.
        self.cached_attributes = None;
        Ok(())
    }

    async fn get_board_name(&mut self) -> Result<Option<String>, TockloaderError> {
        self.load_attributes().await?;
        Ok(self
            .attribute("board")
            .or_else(|| self.settings.board.clone()))
    }

    async fn get_board_arch(&mut self) -> Result<Option<String>, TockloaderError> {
        self.load_attributes().await?;
        Ok(self
            .attribute("arch")
            .or_else(|| self.settings.arch.clone()))
    }

    fn get_page_size(&self) -> u64 {
        self.settings.page_size
    }

    async fn get_apps_start_address(&mut self) -> Result<u64, TockloaderError> {
        self.load_attributes().await?;
        for key in ["appaddr", "apps_start_address"] {
            if let Some(value) = self.attribute(key) {
                if let Ok(address) = u64::from_str_radix(value.trim_start_matches("0x"), 16) {
                    return Ok(address);
                }
                log::warn!("Attribute '{key}' = '{value}' is not a hex address");
            }
        }
        log::info!(
            "No apps start address on the board, using {:#x} from settings",
            self.settings.start_address
        );
        Ok(self.settings.start_address)
    }

    fn translate_address(&self, address: u64) -> u64 {
        // The bootloader sees the same address space as the kernel.
        address
    }

    async fn attached_board_exists(&mut self) -> bool {
        tokio_serial::available_ports()
            .map(|ports| ports.iter().any(|p| p.port_name == self.path))
            .unwrap_or_else(|_| std::path::Path::new(&self.path).exists())
    }

    async fn bootloader_is_present(&mut self) -> Option<bool> {
        if !self.is_open() {
            return None;
        }
        let stream = self.stream.as_mut()?;
        Some(
            issue_command(
                stream,
                Command::Ping,
                Vec::new(),
                0,
                Response::Pong,
                Duration::from_millis(300),
            )
            .await
            .is_ok(),
        )
    }
}

/// Enumerate the serial ports on this host.
pub fn list_serial_ports() -> Result<Vec<tokio_serial::SerialPortInfo>, TockloaderError> {
    tokio_serial::available_ports().map_err(|e| e.into())
}
