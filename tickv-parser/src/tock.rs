// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! The Tock storage layer on top of raw TicKV values.
//!
//! The kernel's key-value capsule wraps every value with a small sub-header
//! carrying the writing app's `write_id`:
//!
//! ```text
//! version (1) | write_id (4, LE) | value_length (2, LE) | value
//! ```

use crate::TickvError;

/// Sub-header version emitted by the kernel.
pub const TOCK_OBJECT_VERSION: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TockStorageObject {
    pub version: u8,
    pub write_id: u32,
    pub value: Vec<u8>,
}

impl TockStorageObject {
    pub fn new(write_id: u32, value: Vec<u8>) -> TockStorageObject {
        TockStorageObject {
            version: TOCK_OBJECT_VERSION,
            write_id,
            value,
        }
    }

    /// Encode as a raw TicKV value.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(7 + self.value.len());
        buf.push(self.version);
        buf.extend_from_slice(&self.write_id.to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Decode from a raw TicKV value.
    pub fn decode(raw: &[u8]) -> Result<TockStorageObject, TickvError> {
        if raw.len() < 7 {
            return Err(TickvError::CorruptObject(
                0,
                0,
                "tock sub-header truncated".to_string(),
            ));
        }
        let version = raw[0];
        let write_id = u32::from_le_bytes(raw[1..5].try_into().unwrap());
        let value_length = u16::from_le_bytes(raw[5..7].try_into().unwrap()) as usize;
        if raw.len() < 7 + value_length {
            return Err(TickvError::CorruptObject(
                0,
                0,
                "tock value shorter than declared".to_string(),
            ));
        }
        Ok(TockStorageObject {
            version,
            write_id,
            value: raw[7..7 + value_length].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_roundtrip() {
        let obj = TockStorageObject::new(7, b"v".to_vec());
        let decoded = TockStorageObject::decode(&obj.encode()).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(decoded.write_id, 7);
        assert_eq!(decoded.value, b"v");
    }

    #[test]
    fn trailing_padding_ignored() {
        let mut raw = TockStorageObject::new(3, b"abc".to_vec()).encode();
        raw.extend_from_slice(&[0xFF; 5]);
        let decoded = TockStorageObject::decode(&raw).unwrap();
        assert_eq!(decoded.value, b"abc");
    }
}
