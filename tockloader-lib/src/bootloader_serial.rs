// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! The framed request/response protocol spoken to a tock bootloader over a
//! serial line.
//!
//! Commands go out as `ESC CMD payload` with every `ESC` byte in the payload
//! doubled. Responses come back as `ESC RSP_START RSP_CODE payload`, escaped
//! the same way. Each command has its own response-length and timeout
//! budget; framing never depends on inter-byte timing.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialStream};

use crate::errors::{InternalError, TockError, TockloaderError};

/// Escape byte starting every frame; doubled when it appears in a payload.
pub const ESCAPE_CHAR: u8 = 0x1B;

/// First byte after `ESCAPE_CHAR` in every response frame.
pub const RESPONSE_START: u8 = 0xFC;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Byte budget of the fixed-size response payloads.
pub const INFO_RESPONSE_LEN: usize = 192;
pub const ID_RESPONSE_LEN: usize = 8;
pub const ATTRIBUTE_RESPONSE_LEN: usize = 64;
pub const CRC_RESPONSE_LEN: usize = 4;

#[derive(Clone, Copy, Debug)]
pub enum Command {
    // Commands from this tool to the bootloader
    Ping = 0x01,
    Info = 0x03,
    Id = 0x04,
    ReadRange = 0x12,
    WritePage = 0x13,
    ErasePage = 0x14,
    CrcInternalFlash = 0x16,
    ChangeBaudRate = 0x21,
    GetAttribute = 0x22,
    SetAttribute = 0x23,
    SetStartAddress = 0x25,
    Exit = 0x28,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Response {
    // Responses from the bootloader
    Overflow = 0x10,
    Pong = 0x11,
    BadAddr = 0x12,
    IntError = 0x13,
    BadArgs = 0x14,
    OK = 0x15,
    Unknown = 0x16,
    ReadRange = 0x20,
    GetAttribute = 0x22,
    CrcInternalFlash = 0x23,
    Info = 0x25,
    ChangeBaudFail = 0x26,
    BadResp,
}

impl From<u8> for Response {
    fn from(value: u8) -> Self {
        match value {
            0x10 => Response::Overflow,
            0x11 => Response::Pong,
            0x12 => Response::BadAddr,
            0x13 => Response::IntError,
            0x14 => Response::BadArgs,
            0x15 => Response::OK,
            0x16 => Response::Unknown,
            0x20 => Response::ReadRange,
            0x22 => Response::GetAttribute,
            0x23 => Response::CrcInternalFlash,
            0x25 => Response::Info,
            0x26 => Response::ChangeBaudFail,
            _ => Response::BadResp,
        }
    }
}

/// Double every escape byte in `payload`.
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(payload.len());
    for &b in payload {
        escaped.push(b);
        if b == ESCAPE_CHAR {
            escaped.push(ESCAPE_CHAR);
        }
    }
    escaped
}

/// Build the on-wire frame for one command.
pub fn frame_command(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.push(ESCAPE_CHAR);
    frame.push(command as u8);
    frame.extend_from_slice(&escape(payload));
    frame
}

async fn read_bytes(
    port: &mut SerialStream,
    bytes_to_read: usize,
    timeout: Duration,
) -> Result<BytesMut, TockloaderError> {
    let mut ret = BytesMut::with_capacity(bytes_to_read);
    let mut read_bytes = 0;

    tokio::time::timeout(timeout, async {
        while read_bytes < bytes_to_read {
            read_bytes += port
                .read_buf(&mut ret)
                .await
                .map_err(|e| TockloaderError::Serial(e.into()))?;
        }
        Ok(ret)
    })
    .await
    .map_err(|_| TockError::BootloaderTimeout)?
}

async fn write_bytes(
    port: &mut SerialStream,
    bytes: &[u8],
    timeout: Duration,
) -> Result<(), TockloaderError> {
    let mut bytes_written = 0;

    tokio::time::timeout(timeout, async {
        while bytes_written != bytes.len() {
            bytes_written += port
                .write_buf(&mut &bytes[bytes_written..])
                .await
                .map_err(|e| TockloaderError::Serial(e.into()))?;
        }
        Ok(())
    })
    .await
    .map_err(|_| TockError::BootloaderTimeout)?
}

/// Discard stray bytes until an unescaped `ESC RSP_START` header arrives,
/// then return the response code.
async fn read_response_header(
    port: &mut SerialStream,
    timeout: Duration,
) -> Result<Response, TockloaderError> {
    loop {
        let b = read_bytes(port, 1, timeout).await?[0];
        if b != ESCAPE_CHAR {
            continue;
        }
        let next = read_bytes(port, 1, timeout).await?[0];
        if next == ESCAPE_CHAR {
            // A doubled escape is payload noise from a previous exchange.
            continue;
        }
        if next == RESPONSE_START {
            let code = read_bytes(port, 1, timeout).await?[0];
            return Ok(Response::from(code));
        }
        return Err(TockError::BootloaderBadHeader(b, next).into());
    }
}

/// Read `response_len` logical payload bytes, undoing the escape doubling.
async fn read_escaped_payload(
    port: &mut SerialStream,
    response_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>, TockloaderError> {
    let mut result = Vec::with_capacity(response_len);
    while result.len() < response_len {
        let b = read_bytes(port, 1, timeout).await?[0];
        if b == ESCAPE_CHAR {
            let next = read_bytes(port, 1, timeout).await?[0];
            if next != ESCAPE_CHAR {
                return Err(TockError::BootloaderBadHeader(b, next).into());
            }
        }
        result.push(b);
    }
    Ok(result)
}

/// Send one command and collect its response.
///
/// `response_len` is the expected payload length after the response code;
/// `response_code` is the code that means success for this command. Any
/// other code is surfaced as a protocol error.
pub async fn issue_command(
    port: &mut SerialStream,
    command: Command,
    payload: Vec<u8>,
    response_len: usize,
    response_code: Response,
    timeout: Duration,
) -> Result<(Response, Vec<u8>), TockloaderError> {
    let frame = frame_command(command, &payload);
    log::trace!(
        "-> {:?} ({} payload bytes, {} on wire)",
        command,
        payload.len(),
        frame.len()
    );
    write_bytes(port, &frame, timeout).await?;

    let code = read_response_header(port, timeout).await?;
    if code != response_code {
        log::debug!("{:?} answered {:?}", command, code);
        return Err(TockError::Protocol(code).into());
    }

    if response_len != 0 {
        let body = read_escaped_payload(port, response_len, timeout).await?;
        Ok((code, body))
    } else {
        Ok((code, Vec::new()))
    }
}

/// Pulse the reset and bootloader-select lines the way the hardware expects:
/// DTR high with RTS held low pulls the chip into its bootloader on the
/// reset that follows.
pub async fn toggle_bootloader_entry_dtr_rts(
    port: &mut SerialStream,
) -> Result<(), TockloaderError> {
    port.write_data_terminal_ready(true)?;
    port.write_request_to_send(true)?;

    tokio::time::sleep(Duration::from_millis(100)).await;

    port.write_data_terminal_ready(false)?;

    tokio::time::sleep(Duration::from_millis(500)).await;

    port.write_request_to_send(false)?;

    Ok(())
}

/// Ping until the bootloader answers, with a bounded number of retries.
pub async fn ping_bootloader_and_wait_for_response(
    port: &mut SerialStream,
) -> Result<(), TockloaderError> {
    for attempt in 0..30 {
        let result = issue_command(
            port,
            Command::Ping,
            Vec::new(),
            0,
            Response::Pong,
            Duration::from_millis(300),
        )
        .await;
        match result {
            Ok(_) => return Ok(()),
            Err(e) => {
                log::trace!("Ping attempt {attempt} failed: {e}");
            }
        }
    }

    Err(InternalError::BootloaderNotPresent.into())
}

/// Negotiate a faster line rate. Mode 0 requests the new rate, the port is
/// reconfigured locally, and mode 1 confirms it at the new speed. On any
/// failure the original rate is restored.
pub async fn change_baud_rate(
    port: &mut SerialStream,
    current: u32,
    requested: u32,
) -> Result<u32, TockloaderError> {
    let mut payload = vec![0u8];
    payload.extend_from_slice(&requested.to_le_bytes());
    if issue_command(
        port,
        Command::ChangeBaudRate,
        payload,
        0,
        Response::OK,
        DEFAULT_TIMEOUT,
    )
    .await
    .is_err()
    {
        return Ok(current);
    }

    port.set_baud_rate(requested)?;

    let mut confirm = vec![1u8];
    confirm.extend_from_slice(&requested.to_le_bytes());
    match issue_command(
        port,
        Command::ChangeBaudRate,
        confirm,
        0,
        Response::OK,
        DEFAULT_TIMEOUT,
    )
    .await
    {
        Ok(_) => {
            log::info!("Negotiated {requested} baud");
            Ok(requested)
        }
        Err(_) => {
            // The confirm never made it; fall back to the old rate.
            port.set_baud_rate(current)?;
            Ok(current)
        }
    }
}

/// Read a range of flash, chunked to the bootloader's buffer size.
pub async fn read_range(
    port: &mut SerialStream,
    address: u64,
    length: usize,
) -> Result<Vec<u8>, TockloaderError> {
    const CHUNK: usize = 512;
    let mut data = Vec::with_capacity(length);
    let mut offset = 0usize;
    while offset < length {
        let chunk_len = CHUNK.min(length - offset);
        let mut payload = ((address + offset as u64) as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(&(chunk_len as u16).to_le_bytes());
        let (_, chunk) = issue_command(
            port,
            Command::ReadRange,
            payload,
            chunk_len,
            Response::ReadRange,
            DEFAULT_TIMEOUT,
        )
        .await?;
        data.extend_from_slice(&chunk);
        offset += chunk_len;
    }
    Ok(data)
}

/// Write one page. The caller is responsible for page alignment.
pub async fn write_page(
    port: &mut SerialStream,
    address: u64,
    page: &[u8],
) -> Result<(), TockloaderError> {
    let mut payload = (address as u32).to_le_bytes().to_vec();
    payload.extend_from_slice(page);
    issue_command(
        port,
        Command::WritePage,
        payload,
        0,
        Response::OK,
        DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(())
}

pub async fn erase_page(port: &mut SerialStream, address: u64) -> Result<(), TockloaderError> {
    let payload = (address as u32).to_le_bytes().to_vec();
    issue_command(
        port,
        Command::ErasePage,
        payload,
        0,
        Response::OK,
        DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(())
}

/// Ask the bootloader for its CRC over a flash range.
pub async fn crc_internal_flash(
    port: &mut SerialStream,
    address: u64,
    length: u64,
) -> Result<u32, TockloaderError> {
    let mut payload = (address as u32).to_le_bytes().to_vec();
    payload.extend_from_slice(&(length as u32).to_le_bytes());
    let (_, data) = issue_command(
        port,
        Command::CrcInternalFlash,
        payload,
        CRC_RESPONSE_LEN,
        Response::CrcInternalFlash,
        DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(u32::from_le_bytes(data[0..4].try_into().map_err(|_| {
        TockloaderError::Tock(TockError::Protocol(Response::BadResp))
    })?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_doubles_escape_bytes() {
        assert_eq!(escape(&[1, 2, 3]), vec![1, 2, 3]);
        assert_eq!(
            escape(&[ESCAPE_CHAR, 2, ESCAPE_CHAR]),
            vec![ESCAPE_CHAR, ESCAPE_CHAR, 2, ESCAPE_CHAR, ESCAPE_CHAR]
        );
    }

    #[test]
    fn frame_starts_with_escape_and_command() {
        let frame = frame_command(Command::WritePage, &[0x00, ESCAPE_CHAR, 0x40]);
        assert_eq!(
            frame,
            vec![
                ESCAPE_CHAR,
                Command::WritePage as u8,
                0x00,
                ESCAPE_CHAR,
                ESCAPE_CHAR,
                0x40
            ]
        );
    }

    #[test]
    fn ping_frame_has_no_payload() {
        assert_eq!(
            frame_command(Command::Ping, &[]),
            vec![ESCAPE_CHAR, Command::Ping as u8]
        );
    }

    #[test]
    fn response_codes_roundtrip() {
        for code in [0x11u8, 0x12, 0x14, 0x15, 0x20, 0x23] {
            assert_ne!(Response::from(code), Response::BadResp);
        }
        assert_eq!(Response::from(0xEE), Response::BadResp);
    }
}
