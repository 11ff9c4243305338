// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Types and data structures for TBF v2 objects.
//!
//! Unlike the kernel-side parser these types own their payloads, so a header
//! read from flash can be edited (flags, sizes, TLVs) and re-emitted with a
//! freshly computed checksum.

use core::fmt;
use core::num::NonZeroU32;

/// Minimum size of a TBF header: the fixed 16-byte base with no TLVs.
pub const TBF_BASE_SIZE: usize = 16;

/// Flag bit marking an app as runnable.
pub const FLAG_ENABLED: u32 = 0x0000_0001;
/// Flag bit marking an app as sticky (only force-removable).
pub const FLAG_STICKY: u32 = 0x0000_0002;

/// Error when parsing just the beginning of the TBF header. This is only used
/// when establishing the linked list structure of apps installed in flash.
pub enum InitialTbfParseError {
    /// We were unable to parse the beginning of the header. Either the flash
    /// is erased past the end of the last app, or the trusted fields are
    /// nonsense. Traversal of the linked list ends here.
    UnableToParse,

    /// Some length in the header is invalid, but the total length field is
    /// plausible. The value is the declared total length so a caller can
    /// skip over the broken object and keep walking.
    InvalidHeader(u32),
}

impl From<core::array::TryFromSliceError> for InitialTbfParseError {
    fn from(_error: core::array::TryFromSliceError) -> Self {
        InitialTbfParseError::UnableToParse
    }
}

/// Error when parsing an app's TBF header or footer.
pub enum TbfParseError {
    /// Not enough bytes in the buffer to parse the expected field.
    NotEnoughFlash,

    /// Unknown version of the TBF header.
    UnsupportedVersion(u16),

    /// Checksum calculation did not match what is stored in the TBF header.
    /// First value is the checksum provided, second value is the checksum we
    /// calculated.
    ChecksumMismatch(u32, u32),

    /// One of the TLV entries did not parse correctly. This could happen if
    /// the TLV length does not match the size of a fixed-length entry, or if
    /// a TLV extends past the declared header length. The `usize` is the
    /// value of the "tipe" field.
    BadTlvEntry(usize),

    /// A known TLV type appeared more than once, or both `Main` and
    /// `Program` are present. The header is considered corrupted.
    DuplicateTlvEntry(usize),

    /// The app name in the TBF header could not be successfully parsed as a
    /// UTF-8 string.
    BadProcessName,

    /// A footer TLV was not a Credentials entry, or its declared length
    /// disagrees with the credential format.
    InvalidFooter,

    /// A credentials TLV carried a format number this library does not know.
    UnknownCredential(u32),

    /// There is not enough Reserved footer space to insert a credential.
    InsufficientFooter,

    /// Internal error. This is a bug inside of this library: a slice was not
    /// sized properly for parsing a certain type, which is something
    /// completely controlled by this library.
    InternalError,
}

impl From<core::array::TryFromSliceError> for TbfParseError {
    fn from(_error: core::array::TryFromSliceError) -> Self {
        TbfParseError::InternalError
    }
}

impl fmt::Debug for TbfParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TbfParseError::NotEnoughFlash => write!(f, "Buffer too short to parse TBF header"),
            TbfParseError::UnsupportedVersion(version) => {
                write!(f, "TBF version {} unsupported", version)
            }
            TbfParseError::ChecksumMismatch(app, calc) => write!(
                f,
                "Checksum verification failed: app:{:#x}, calc:{:#x}",
                app, calc
            ),
            TbfParseError::BadTlvEntry(tipe) => write!(f, "TLV entry type {} is invalid", tipe),
            TbfParseError::DuplicateTlvEntry(tipe) => {
                write!(f, "TLV entry type {} appears more than once", tipe)
            }
            TbfParseError::BadProcessName => write!(f, "Process name not UTF-8"),
            TbfParseError::InvalidFooter => write!(f, "Footer TLV is not a credentials entry"),
            TbfParseError::UnknownCredential(format) => {
                write!(f, "Unknown credentials format {}", format)
            }
            TbfParseError::InsufficientFooter => {
                write!(f, "Not enough reserved footer space for credential")
            }
            TbfParseError::InternalError => write!(f, "Internal parser error. This is a bug."),
        }
    }
}

impl fmt::Display for TbfParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for TbfParseError {}

// TBF structure

/// TBF fields that must be present in all v2 headers.
#[derive(Clone, Copy, Debug)]
pub struct TbfHeaderV2Base {
    pub(crate) version: u16,
    pub(crate) header_size: u16,
    pub(crate) total_size: u32,
    pub(crate) flags: u32,
    pub(crate) checksum: u32,
}

/// Types in TLV structures for each optional block of the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TbfHeaderTypes {
    Main = 1,
    WriteableFlashRegions = 2,
    PackageName = 3,
    PicOption1 = 4,
    FixedAddresses = 5,
    Permissions = 6,
    PersistentAcl = 7,
    KernelVersion = 8,
    Program = 9,
    ShortId = 10,
    Credentials = 128,

    /// Some field in the header that we do not understand. The raw bytes are
    /// preserved so the header can be re-emitted without loss.
    Unknown,
}

impl From<u16> for TbfHeaderTypes {
    fn from(h: u16) -> TbfHeaderTypes {
        match h {
            1 => TbfHeaderTypes::Main,
            2 => TbfHeaderTypes::WriteableFlashRegions,
            3 => TbfHeaderTypes::PackageName,
            4 => TbfHeaderTypes::PicOption1,
            5 => TbfHeaderTypes::FixedAddresses,
            6 => TbfHeaderTypes::Permissions,
            7 => TbfHeaderTypes::PersistentAcl,
            8 => TbfHeaderTypes::KernelVersion,
            9 => TbfHeaderTypes::Program,
            10 => TbfHeaderTypes::ShortId,
            128 => TbfHeaderTypes::Credentials,
            _ => TbfHeaderTypes::Unknown,
        }
    }
}

/// The v2 Main Header for apps.
///
/// All apps must have either a Main Header or a Program Header. Without
/// either, the TBF object is considered padding. Main and Program Headers
/// differ in whether they specify the endpoint of the process binary; Main
/// Headers do not, while Program Headers do. A TBF with a Main Header cannot
/// have any Credentials Footers, while a TBF with a Program Header can.
#[derive(Clone, Copy, Debug)]
pub struct TbfHeaderV2Main {
    pub init_fn_offset: u32,
    pub protected_trailer_size: u32,
    pub minimum_ram_size: u32,
}

/// The v2 Program Header for apps.
///
/// A Program Header includes the binary end offset so that a verifier knows
/// where Credentials Footers start. The region between the end of the binary
/// and the end of the TBF is reserved for Credentials Footers.
#[derive(Clone, Copy, Debug)]
pub struct TbfHeaderV2Program {
    pub init_fn_offset: u32,
    pub protected_trailer_size: u32,
    pub minimum_ram_size: u32,
    pub binary_end_offset: u32,
    pub version: u32,
}

/// Writeable flash regions only need an offset and size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TbfHeaderV2WriteableFlashRegion {
    pub writeable_flash_region_offset: u32,
    pub writeable_flash_region_size: u32,
}

/// Optional fixed addresses for flash and RAM for this process.
///
/// If a process is compiled for a specific address this header entry lets
/// the loader know what those addresses are. An unused address is encoded as
/// 0xFFFFFFFF.
#[derive(Clone, Copy, Debug, Default)]
pub struct TbfHeaderV2FixedAddresses {
    /// The absolute address of the start of RAM that the process expects.
    pub start_process_ram: u32,
    /// The absolute address of the start of the process binary. This does
    /// _not_ include the TBF header. This is the address the process used
    /// for the start of flash with the linker.
    pub start_process_flash: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TbfHeaderDriverPermission {
    pub driver_number: u32,
    pub offset: u32,
    pub allowed_commands: u64,
}

/// A list of command permissions for this app.
#[derive(Clone, Debug)]
pub struct TbfHeaderV2Permissions {
    pub perms: Vec<TbfHeaderDriverPermission>,
}

/// A list of storage (read/modify) permissions for this app.
#[derive(Clone, Debug)]
pub struct TbfHeaderV2PersistentAcl {
    pub write_id: Option<NonZeroU32>,
    pub read_ids: Vec<u32>,
    pub modify_ids: Vec<u32>,
}

#[derive(Clone, Copy, Debug)]
pub struct TbfHeaderV2KernelVersion {
    pub major: u16,
    pub minor: u16,
}

/// Credential types that can appear in a TBF footer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TbfFooterV2CredentialsType {
    Reserved = 0,
    Rsa2048Key = 1,
    Rsa4096Key = 2,
    SHA256 = 3,
    SHA384 = 4,
    SHA512 = 5,
    EcdsaNistP256 = 6,
    CleartextID = 7,
    HmacSha256 = 8,
    HmacSha384 = 9,
    HmacSha512 = 10,
}

impl TbfFooterV2CredentialsType {
    /// Payload length of this credential's TLV, excluding the type/length
    /// words but including the 4-byte format word. `None` for Reserved,
    /// which is variable-length padding.
    pub fn payload_length(&self) -> Option<u32> {
        match self {
            TbfFooterV2CredentialsType::Reserved => None,
            TbfFooterV2CredentialsType::Rsa2048Key => Some(4 + 512),
            TbfFooterV2CredentialsType::Rsa4096Key => Some(4 + 1024),
            TbfFooterV2CredentialsType::SHA256 => Some(4 + 32),
            TbfFooterV2CredentialsType::SHA384 => Some(4 + 48),
            TbfFooterV2CredentialsType::SHA512 => Some(4 + 64),
            TbfFooterV2CredentialsType::EcdsaNistP256 => Some(4 + 64),
            TbfFooterV2CredentialsType::CleartextID => Some(4 + 8),
            TbfFooterV2CredentialsType::HmacSha256 => Some(4 + 32),
            TbfFooterV2CredentialsType::HmacSha384 => Some(4 + 48),
            TbfFooterV2CredentialsType::HmacSha512 => Some(4 + 64),
        }
    }
}

impl core::convert::TryFrom<u32> for TbfFooterV2CredentialsType {
    type Error = TbfParseError;

    fn try_from(v: u32) -> Result<TbfFooterV2CredentialsType, Self::Error> {
        match v {
            0 => Ok(TbfFooterV2CredentialsType::Reserved),
            1 => Ok(TbfFooterV2CredentialsType::Rsa2048Key),
            2 => Ok(TbfFooterV2CredentialsType::Rsa4096Key),
            3 => Ok(TbfFooterV2CredentialsType::SHA256),
            4 => Ok(TbfFooterV2CredentialsType::SHA384),
            5 => Ok(TbfFooterV2CredentialsType::SHA512),
            6 => Ok(TbfFooterV2CredentialsType::EcdsaNistP256),
            7 => Ok(TbfFooterV2CredentialsType::CleartextID),
            8 => Ok(TbfFooterV2CredentialsType::HmacSha256),
            9 => Ok(TbfFooterV2CredentialsType::HmacSha384),
            10 => Ok(TbfFooterV2CredentialsType::HmacSha512),
            _ => Err(TbfParseError::UnknownCredential(v)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TbfFooterV2SHA {
    pub hash: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TbfFooterV2HMAC {
    pub mac: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TbfFooterV2RSA {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TbfFooterV2Ecdsa {
    pub signature_r: [u8; 32],
    pub signature_s: [u8; 32],
}

impl TbfFooterV2Ecdsa {
    pub fn get_signature_r(&self) -> &[u8; 32] {
        &self.signature_r
    }

    pub fn get_signature_s(&self) -> &[u8; 32] {
        &self.signature_s
    }
}

/// One credentials entry from a TBF footer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TbfFooterV2Credentials {
    /// Reserved padding; the value is the TLV length in bytes.
    Reserved(u32),
    Rsa2048Key(TbfFooterV2RSA),
    Rsa4096Key(TbfFooterV2RSA),
    SHA256(TbfFooterV2SHA),
    SHA384(TbfFooterV2SHA),
    SHA512(TbfFooterV2SHA),
    EcdsaNistP256(TbfFooterV2Ecdsa),
    CleartextID(u64),
    HmacSha256(TbfFooterV2HMAC),
    HmacSha384(TbfFooterV2HMAC),
    HmacSha512(TbfFooterV2HMAC),
}

impl TbfFooterV2Credentials {
    pub fn get_format(&self) -> TbfFooterV2CredentialsType {
        match self {
            TbfFooterV2Credentials::Reserved(_) => TbfFooterV2CredentialsType::Reserved,
            TbfFooterV2Credentials::Rsa2048Key(_) => TbfFooterV2CredentialsType::Rsa2048Key,
            TbfFooterV2Credentials::Rsa4096Key(_) => TbfFooterV2CredentialsType::Rsa4096Key,
            TbfFooterV2Credentials::SHA256(_) => TbfFooterV2CredentialsType::SHA256,
            TbfFooterV2Credentials::SHA384(_) => TbfFooterV2CredentialsType::SHA384,
            TbfFooterV2Credentials::SHA512(_) => TbfFooterV2CredentialsType::SHA512,
            TbfFooterV2Credentials::EcdsaNistP256(_) => TbfFooterV2CredentialsType::EcdsaNistP256,
            TbfFooterV2Credentials::CleartextID(_) => TbfFooterV2CredentialsType::CleartextID,
            TbfFooterV2Credentials::HmacSha256(_) => TbfFooterV2CredentialsType::HmacSha256,
            TbfFooterV2Credentials::HmacSha384(_) => TbfFooterV2CredentialsType::HmacSha384,
            TbfFooterV2Credentials::HmacSha512(_) => TbfFooterV2CredentialsType::HmacSha512,
        }
    }

    /// TLV length (excluding the 4-byte type/length words) of this entry as
    /// emitted on flash.
    pub fn tlv_length(&self) -> u32 {
        match self {
            TbfFooterV2Credentials::Reserved(len) => *len,
            other => other
                .get_format()
                .payload_length()
                .expect("non-reserved credentials have a fixed length"),
        }
    }

    /// Emit this entry as a footer TLV (type, length, format word, data).
    pub fn generate(&self) -> Vec<u8> {
        let length = self.tlv_length();
        let mut buf = Vec::with_capacity(4 + length as usize);
        buf.extend_from_slice(&(TbfHeaderTypes::Credentials as u16).to_le_bytes());
        buf.extend_from_slice(&(length as u16).to_le_bytes());
        buf.extend_from_slice(&(self.get_format() as u32).to_le_bytes());
        match self {
            TbfFooterV2Credentials::Reserved(len) => {
                buf.resize(buf.len() + (*len as usize).saturating_sub(4), 0);
            }
            TbfFooterV2Credentials::Rsa2048Key(rsa) | TbfFooterV2Credentials::Rsa4096Key(rsa) => {
                buf.extend_from_slice(&rsa.public_key);
                buf.extend_from_slice(&rsa.signature);
            }
            TbfFooterV2Credentials::SHA256(sha)
            | TbfFooterV2Credentials::SHA384(sha)
            | TbfFooterV2Credentials::SHA512(sha) => {
                buf.extend_from_slice(&sha.hash);
            }
            TbfFooterV2Credentials::EcdsaNistP256(ecdsa) => {
                buf.extend_from_slice(&ecdsa.signature_r);
                buf.extend_from_slice(&ecdsa.signature_s);
            }
            TbfFooterV2Credentials::CleartextID(id) => {
                buf.extend_from_slice(&id.to_le_bytes());
            }
            TbfFooterV2Credentials::HmacSha256(hmac)
            | TbfFooterV2Credentials::HmacSha384(hmac)
            | TbfFooterV2Credentials::HmacSha512(hmac) => {
                buf.extend_from_slice(&hmac.mac);
            }
        }
        buf
    }
}

// Conversion functions from slices to the various TBF fields.

impl core::convert::TryFrom<&[u8]> for TbfHeaderV2Base {
    type Error = TbfParseError;

    fn try_from(b: &[u8]) -> Result<TbfHeaderV2Base, Self::Error> {
        if b.len() < TBF_BASE_SIZE {
            return Err(TbfParseError::NotEnoughFlash);
        }
        Ok(TbfHeaderV2Base {
            version: u16::from_le_bytes(b[0..2].try_into()?),
            header_size: u16::from_le_bytes(b[2..4].try_into()?),
            total_size: u32::from_le_bytes(b[4..8].try_into()?),
            flags: u32::from_le_bytes(b[8..12].try_into()?),
            checksum: u32::from_le_bytes(b[12..16].try_into()?),
        })
    }
}

impl core::convert::TryFrom<&[u8]> for TbfHeaderV2Main {
    type Error = TbfParseError;

    fn try_from(b: &[u8]) -> Result<TbfHeaderV2Main, Self::Error> {
        if b.len() != 12 {
            return Err(TbfParseError::BadTlvEntry(TbfHeaderTypes::Main as usize));
        }
        Ok(TbfHeaderV2Main {
            init_fn_offset: u32::from_le_bytes(b[0..4].try_into()?),
            protected_trailer_size: u32::from_le_bytes(b[4..8].try_into()?),
            minimum_ram_size: u32::from_le_bytes(b[8..12].try_into()?),
        })
    }
}

impl core::convert::TryFrom<&[u8]> for TbfHeaderV2Program {
    type Error = TbfParseError;

    fn try_from(b: &[u8]) -> Result<TbfHeaderV2Program, Self::Error> {
        if b.len() != 20 {
            return Err(TbfParseError::BadTlvEntry(TbfHeaderTypes::Program as usize));
        }
        Ok(TbfHeaderV2Program {
            init_fn_offset: u32::from_le_bytes(b[0..4].try_into()?),
            protected_trailer_size: u32::from_le_bytes(b[4..8].try_into()?),
            minimum_ram_size: u32::from_le_bytes(b[8..12].try_into()?),
            binary_end_offset: u32::from_le_bytes(b[12..16].try_into()?),
            version: u32::from_le_bytes(b[16..20].try_into()?),
        })
    }
}

impl core::convert::TryFrom<&[u8]> for TbfHeaderV2FixedAddresses {
    type Error = TbfParseError;

    fn try_from(b: &[u8]) -> Result<TbfHeaderV2FixedAddresses, Self::Error> {
        if b.len() != 8 {
            return Err(TbfParseError::BadTlvEntry(
                TbfHeaderTypes::FixedAddresses as usize,
            ));
        }
        Ok(TbfHeaderV2FixedAddresses {
            start_process_ram: u32::from_le_bytes(b[0..4].try_into()?),
            start_process_flash: u32::from_le_bytes(b[4..8].try_into()?),
        })
    }
}

impl core::convert::TryFrom<&[u8]> for TbfHeaderV2KernelVersion {
    type Error = TbfParseError;

    fn try_from(b: &[u8]) -> Result<TbfHeaderV2KernelVersion, Self::Error> {
        if b.len() != 4 {
            return Err(TbfParseError::BadTlvEntry(
                TbfHeaderTypes::KernelVersion as usize,
            ));
        }
        Ok(TbfHeaderV2KernelVersion {
            major: u16::from_le_bytes(b[0..2].try_into()?),
            minor: u16::from_le_bytes(b[2..4].try_into()?),
        })
    }
}

impl core::convert::TryFrom<&[u8]> for TbfHeaderV2Permissions {
    type Error = TbfParseError;

    fn try_from(b: &[u8]) -> Result<TbfHeaderV2Permissions, Self::Error> {
        let bad = || TbfParseError::BadTlvEntry(TbfHeaderTypes::Permissions as usize);
        let number_perms =
            u16::from_le_bytes(b.get(0..2).ok_or_else(bad)?.try_into()?) as usize;
        if b.len() != 2 + number_perms * 16 {
            return Err(bad());
        }
        let mut perms = Vec::with_capacity(number_perms);
        for i in 0..number_perms {
            let p = &b[2 + i * 16..2 + (i + 1) * 16];
            perms.push(TbfHeaderDriverPermission {
                driver_number: u32::from_le_bytes(p[0..4].try_into()?),
                offset: u32::from_le_bytes(p[4..8].try_into()?),
                allowed_commands: u64::from_le_bytes(p[8..16].try_into()?),
            });
        }
        Ok(TbfHeaderV2Permissions { perms })
    }
}

impl core::convert::TryFrom<&[u8]> for TbfHeaderV2PersistentAcl {
    type Error = TbfParseError;

    fn try_from(b: &[u8]) -> Result<TbfHeaderV2PersistentAcl, Self::Error> {
        let bad = || TbfParseError::BadTlvEntry(TbfHeaderTypes::PersistentAcl as usize);
        let write_id =
            NonZeroU32::new(u32::from_le_bytes(b.get(0..4).ok_or_else(bad)?.try_into()?));
        let read_length =
            u16::from_le_bytes(b.get(4..6).ok_or_else(bad)?.try_into()?) as usize;
        let mut offset = 6;
        let mut read_ids = Vec::with_capacity(read_length);
        for _ in 0..read_length {
            read_ids.push(u32::from_le_bytes(
                b.get(offset..offset + 4).ok_or_else(bad)?.try_into()?,
            ));
            offset += 4;
        }
        let modify_length =
            u16::from_le_bytes(b.get(offset..offset + 2).ok_or_else(bad)?.try_into()?) as usize;
        offset += 2;
        let mut modify_ids = Vec::with_capacity(modify_length);
        for _ in 0..modify_length {
            modify_ids.push(u32::from_le_bytes(
                b.get(offset..offset + 4).ok_or_else(bad)?.try_into()?,
            ));
            offset += 4;
        }
        if offset != b.len() {
            return Err(bad());
        }
        Ok(TbfHeaderV2PersistentAcl {
            write_id,
            read_ids,
            modify_ids,
        })
    }
}

/// Single header that can contain all parts of a v2 header.
#[derive(Clone, Debug)]
pub struct TbfHeaderV2 {
    pub(crate) base: TbfHeaderV2Base,
    pub(crate) main: Option<TbfHeaderV2Main>,
    pub(crate) program: Option<TbfHeaderV2Program>,
    pub(crate) package_name: Option<String>,
    pub(crate) writeable_regions: Vec<TbfHeaderV2WriteableFlashRegion>,
    pub(crate) pic_option1: Option<Vec<u8>>,
    pub(crate) fixed_addresses: Option<TbfHeaderV2FixedAddresses>,
    pub(crate) permissions: Option<TbfHeaderV2Permissions>,
    pub(crate) persistent_acl: Option<TbfHeaderV2PersistentAcl>,
    pub(crate) kernel_version: Option<TbfHeaderV2KernelVersion>,
    pub(crate) short_id: Option<Option<NonZeroU32>>,
    pub(crate) unknown: Vec<(u16, Vec<u8>)>,
}

/// Type that represents the fields of the Tock Binary Format header.
///
/// This specifies the locations of the different code and memory sections in
/// the tock binary, as well as other information about the application. A
/// header without a binary descriptor TLV (`Main` or `Program`) is padding
/// between apps.
#[derive(Clone, Debug)]
pub enum TbfHeader {
    TbfHeaderV2(TbfHeaderV2),
    Padding(TbfHeaderV2Base),
}

fn align4_up(v: usize) -> usize {
    (v + 3) & !3
}

impl TbfHeader {
    /// Build a padding header occupying `total_size` bytes of flash.
    pub fn new_padding(total_size: u32) -> TbfHeader {
        let mut base = TbfHeaderV2Base {
            version: 2,
            header_size: TBF_BASE_SIZE as u16,
            total_size,
            flags: 0,
            checksum: 0,
        };
        let mut buf = Vec::with_capacity(TBF_BASE_SIZE);
        base_bytes(&base, &mut buf);
        base.checksum = compute_checksum_words(&buf);
        TbfHeader::Padding(base)
    }

    /// Return the length of the header.
    pub fn length(&self) -> u16 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.header_size,
            TbfHeader::Padding(base) => base.header_size,
        }
    }

    /// Alias for [`TbfHeader::length`] used by callers that pair it with
    /// `total_size`.
    pub fn header_size(&self) -> u16 {
        self.length()
    }

    /// Return the total size of the TBF this header describes, including the
    /// header itself.
    pub fn total_size(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.total_size,
            TbfHeader::Padding(base) => base.total_size,
        }
    }

    /// Return the raw flags word.
    pub fn get_application_flags(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.flags,
            TbfHeader::Padding(base) => base.flags,
        }
    }

    /// Return whether this is an app or just padding between apps.
    pub fn is_app(&self) -> bool {
        matches!(self, TbfHeader::TbfHeaderV2(_))
    }

    /// Return whether the application is enabled or not. Disabled
    /// applications are not started by the kernel.
    pub fn enabled(&self) -> bool {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.flags & FLAG_ENABLED == FLAG_ENABLED,
            TbfHeader::Padding(_) => false,
        }
    }

    /// Return whether the application is sticky. Sticky apps survive install
    /// and erase operations unless they are forced out.
    pub fn sticky(&self) -> bool {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.flags & FLAG_STICKY == FLAG_STICKY,
            TbfHeader::Padding(_) => false,
        }
    }

    /// Replace the whole flags word and re-finalize the checksum.
    pub fn set_flags(&mut self, flags: u32) {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.flags = flags,
            TbfHeader::Padding(base) => base.flags = flags,
        }
        self.finalize_checksum();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        let flags = self.get_application_flags();
        self.set_flags(if enabled {
            flags | FLAG_ENABLED
        } else {
            flags & !FLAG_ENABLED
        });
    }

    pub fn set_sticky(&mut self, sticky: bool) {
        let flags = self.get_application_flags();
        self.set_flags(if sticky {
            flags | FLAG_STICKY
        } else {
            flags & !FLAG_STICKY
        });
    }

    /// Set the total size of the TBF. For `Program` apps the binary end
    /// offset is unchanged, so this grows or shrinks the footer.
    pub fn set_total_size(&mut self, total_size: u32) {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.total_size = total_size,
            TbfHeader::Padding(base) => base.total_size = total_size,
        }
        self.finalize_checksum();
    }

    /// Grow `total_size` to at least `minimum`, keeping the current size if
    /// it is already large enough.
    pub fn set_minimum_size(&mut self, minimum: u32) {
        if self.total_size() < minimum {
            self.set_total_size(minimum);
        }
    }

    /// Point the fixed flash address at `addr`, if this app carries a
    /// `FixedAddresses` TLV. Returns whether anything changed.
    pub fn adjust_starting_address(&mut self, addr: u32) -> bool {
        let changed = match self {
            TbfHeader::TbfHeaderV2(hd) => match hd.fixed_addresses.as_mut() {
                Some(fixed) if fixed.start_process_flash != addr => {
                    fixed.start_process_flash = addr;
                    true
                }
                _ => false,
            },
            TbfHeader::Padding(_) => false,
        };
        if changed {
            self.finalize_checksum();
        }
        changed
    }

    /// Add up all of the relevant fields in header version 1, or just use
    /// the app-provided value in version 2 to get the total amount of RAM
    /// that is needed for this app.
    pub fn get_minimum_app_ram_size(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => {
                if let Some(p) = hd.program {
                    p.minimum_ram_size
                } else if let Some(m) = hd.main {
                    m.minimum_ram_size
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Get the number of bytes from the start of the app's region in flash
    /// that is for kernel use only. The app cannot write this region.
    pub fn get_protected_size(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => {
                let trailer = if let Some(p) = hd.program {
                    p.protected_trailer_size
                } else if let Some(m) = hd.main {
                    m.protected_trailer_size
                } else {
                    return 0;
                };
                hd.base.header_size as u32 + trailer
            }
            _ => 0,
        }
    }

    pub fn get_protected_trailer_size(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => {
                if let Some(p) = hd.program {
                    p.protected_trailer_size
                } else if let Some(m) = hd.main {
                    m.protected_trailer_size
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Get the offset from the beginning of the app's flash region where the
    /// app should start executing.
    pub fn get_init_function_offset(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => {
                if let Some(p) = hd.program {
                    p.init_fn_offset
                } else if let Some(m) = hd.main {
                    m.init_fn_offset
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Get the name of the app.
    pub fn get_package_name(&self) -> Option<&str> {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.package_name.as_deref(),
            _ => None,
        }
    }

    /// Get the number of flash regions this app has specified in its header.
    pub fn number_writeable_flash_regions(&self) -> usize {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.writeable_regions.len(),
            _ => 0,
        }
    }

    /// Get the offset and size of a given flash region.
    pub fn get_writeable_flash_region(&self, index: usize) -> (u32, u32) {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.writeable_regions.get(index).map_or((0, 0), |wr| {
                (
                    wr.writeable_flash_region_offset,
                    wr.writeable_flash_region_size,
                )
            }),
            _ => (0, 0),
        }
    }

    /// Get the address in RAM this process was specifically compiled for. If
    /// the process is position independent, return `None`.
    pub fn get_fixed_address_ram(&self) -> Option<u32> {
        let hd = match self {
            TbfHeader::TbfHeaderV2(hd) => hd,
            _ => return None,
        };
        match hd.fixed_addresses.as_ref()?.start_process_ram {
            0xFFFFFFFF => None,
            start => Some(start),
        }
    }

    /// Get the address in flash this process was specifically compiled for.
    /// If the process is position independent, return `None`.
    pub fn get_fixed_address_flash(&self) -> Option<u32> {
        let hd = match self {
            TbfHeader::TbfHeaderV2(hd) => hd,
            _ => return None,
        };
        match hd.fixed_addresses.as_ref()?.start_process_flash {
            0xFFFFFFFF => None,
            start => Some(start),
        }
    }

    /// Get the fixed ShortId of the app, if one was assigned at build time.
    pub fn get_fixed_short_id(&self) -> Option<NonZeroU32> {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.short_id.flatten(),
            _ => None,
        }
    }

    /// Get the minimum compatible kernel version this process requires.
    /// Returns `None` if the kernel compatibility header is not included.
    pub fn get_kernel_version(&self) -> Option<(u16, u16)> {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.kernel_version.map(|kv| (kv.major, kv.minor)),
            _ => None,
        }
    }

    /// Return the offset where the binary ends in the TBF or 0 if there is
    /// no binary. If there is a Main header the end offset is the size of
    /// the TBF, while if there is a Program header it can be smaller.
    pub fn get_binary_end(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd
                .program
                .map_or(hd.base.total_size, |p| p.binary_end_offset),
            _ => 0,
        }
    }

    /// Return the version number of the Userspace Binary in this TBF, or 0
    /// if there is no binary or no version number.
    pub fn get_binary_version(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.program.map_or(0, |p| p.version),
            _ => 0,
        }
    }

    /// Whether this app can carry credential footers (i.e. has a `Program`
    /// header).
    pub fn supports_footers(&self) -> bool {
        matches!(self, TbfHeader::TbfHeaderV2(hd) if hd.program.is_some())
    }

    /// Move the binary end offset. Only meaningful for `Program` apps;
    /// returns whether anything changed.
    pub fn set_binary_end_offset(&mut self, offset: u32) -> bool {
        let changed = match self {
            TbfHeader::TbfHeaderV2(hd) => match hd.program.as_mut() {
                Some(p) => {
                    p.binary_end_offset = offset;
                    true
                }
                None => false,
            },
            TbfHeader::Padding(_) => false,
        };
        if changed {
            self.finalize_checksum();
        }
        changed
    }

    /// Remove a TLV from the header. Fails on the binary descriptor TLVs
    /// (`Main`/`Program`), which cannot be removed without destroying the
    /// app, and on types the header does not contain. The header length is
    /// re-derived and stays 4-byte aligned.
    pub fn delete_tlv(&mut self, tipe: TbfHeaderTypes) -> Result<(), TbfParseError> {
        let hd = match self {
            TbfHeader::TbfHeaderV2(hd) => hd,
            TbfHeader::Padding(_) => return Err(TbfParseError::BadTlvEntry(tipe as usize)),
        };
        let removed = match tipe {
            TbfHeaderTypes::Main | TbfHeaderTypes::Program | TbfHeaderTypes::Credentials => {
                return Err(TbfParseError::BadTlvEntry(tipe as usize))
            }
            TbfHeaderTypes::WriteableFlashRegions => {
                let had = !hd.writeable_regions.is_empty();
                hd.writeable_regions.clear();
                had
            }
            TbfHeaderTypes::PackageName => hd.package_name.take().is_some(),
            TbfHeaderTypes::PicOption1 => hd.pic_option1.take().is_some(),
            TbfHeaderTypes::FixedAddresses => hd.fixed_addresses.take().is_some(),
            TbfHeaderTypes::Permissions => hd.permissions.take().is_some(),
            TbfHeaderTypes::PersistentAcl => hd.persistent_acl.take().is_some(),
            TbfHeaderTypes::KernelVersion => hd.kernel_version.take().is_some(),
            TbfHeaderTypes::ShortId => hd.short_id.take().is_some(),
            TbfHeaderTypes::Unknown => {
                let had = !hd.unknown.is_empty();
                hd.unknown.clear();
                had
            }
        };
        if !removed {
            return Err(TbfParseError::BadTlvEntry(tipe as usize));
        }
        self.refit();
        Ok(())
    }

    /// Insert or replace a TLV from its raw payload bytes. The payload is
    /// parsed with the same rules as header parsing, so malformed entries
    /// are rejected. The header length is re-derived and stays 4-byte
    /// aligned.
    pub fn modify_tlv(&mut self, tipe: TbfHeaderTypes, payload: &[u8]) -> Result<(), TbfParseError> {
        let hd = match self {
            TbfHeader::TbfHeaderV2(hd) => hd,
            TbfHeader::Padding(_) => return Err(TbfParseError::BadTlvEntry(tipe as usize)),
        };
        match tipe {
            TbfHeaderTypes::Main => {
                if hd.program.is_some() {
                    return Err(TbfParseError::DuplicateTlvEntry(
                        TbfHeaderTypes::Program as usize,
                    ));
                }
                hd.main = Some(payload.try_into()?);
            }
            TbfHeaderTypes::Program => {
                if hd.main.is_some() {
                    return Err(TbfParseError::DuplicateTlvEntry(
                        TbfHeaderTypes::Main as usize,
                    ));
                }
                hd.program = Some(payload.try_into()?);
            }
            TbfHeaderTypes::WriteableFlashRegions => {
                if payload.len() % 8 != 0 {
                    return Err(TbfParseError::BadTlvEntry(tipe as usize));
                }
                hd.writeable_regions = payload
                    .chunks_exact(8)
                    .map(|c| {
                        Ok(TbfHeaderV2WriteableFlashRegion {
                            writeable_flash_region_offset: u32::from_le_bytes(
                                c[0..4].try_into()?,
                            ),
                            writeable_flash_region_size: u32::from_le_bytes(c[4..8].try_into()?),
                        })
                    })
                    .collect::<Result<_, TbfParseError>>()?;
            }
            TbfHeaderTypes::PackageName => {
                hd.package_name = Some(
                    core::str::from_utf8(payload)
                        .map_err(|_| TbfParseError::BadProcessName)?
                        .to_owned(),
                );
            }
            TbfHeaderTypes::PicOption1 => hd.pic_option1 = Some(payload.to_vec()),
            TbfHeaderTypes::FixedAddresses => hd.fixed_addresses = Some(payload.try_into()?),
            TbfHeaderTypes::Permissions => hd.permissions = Some(payload.try_into()?),
            TbfHeaderTypes::PersistentAcl => hd.persistent_acl = Some(payload.try_into()?),
            TbfHeaderTypes::KernelVersion => hd.kernel_version = Some(payload.try_into()?),
            TbfHeaderTypes::ShortId => {
                if payload.len() != 4 {
                    return Err(TbfParseError::BadTlvEntry(tipe as usize));
                }
                hd.short_id = Some(NonZeroU32::new(u32::from_le_bytes(
                    payload[0..4].try_into()?,
                )));
            }
            TbfHeaderTypes::Credentials | TbfHeaderTypes::Unknown => {
                return Err(TbfParseError::BadTlvEntry(tipe as usize))
            }
        }
        self.refit();
        Ok(())
    }

    /// Recompute `header_size` from the TLVs and shift `total_size` and the
    /// binary end offset by the difference.
    fn refit(&mut self) {
        let old = self.length() as i64;
        let new = self.emitted_header_size() as i64;
        let delta = new - old;
        match self {
            TbfHeader::TbfHeaderV2(hd) => {
                hd.base.header_size = new as u16;
                hd.base.total_size = (hd.base.total_size as i64 + delta) as u32;
                if let Some(p) = hd.program.as_mut() {
                    p.binary_end_offset = (p.binary_end_offset as i64 + delta) as u32;
                }
            }
            TbfHeader::Padding(base) => base.header_size = new as u16,
        }
        self.finalize_checksum();
    }

    /// Size of the header as `generate` would emit it.
    fn emitted_header_size(&self) -> usize {
        match self {
            TbfHeader::Padding(_) => TBF_BASE_SIZE,
            TbfHeader::TbfHeaderV2(hd) => {
                let mut size = TBF_BASE_SIZE;
                if hd.main.is_some() {
                    size += 4 + 12;
                }
                if hd.program.is_some() {
                    size += 4 + 20;
                }
                if !hd.writeable_regions.is_empty() {
                    size += 4 + 8 * hd.writeable_regions.len();
                }
                if let Some(name) = &hd.package_name {
                    size += align4_up(4 + name.len());
                }
                if hd.fixed_addresses.is_some() {
                    size += 4 + 8;
                }
                if hd.kernel_version.is_some() {
                    size += 4 + 4;
                }
                if let Some(pic) = &hd.pic_option1 {
                    size += align4_up(4 + pic.len());
                }
                if let Some(perms) = &hd.permissions {
                    size += align4_up(4 + 2 + perms.perms.len() * 16);
                }
                if let Some(acl) = &hd.persistent_acl {
                    size += align4_up(4 + 4 + 2 + acl.read_ids.len() * 4 + 2 + acl.modify_ids.len() * 4);
                }
                if hd.short_id.is_some() {
                    size += 4 + 4;
                }
                for (_, raw) in &hd.unknown {
                    size += align4_up(4 + raw.len());
                }
                size
            }
        }
    }

    /// Recompute the base checksum from the emitted header bytes.
    pub fn finalize_checksum(&mut self) {
        let buf = self.generate_without_checksum();
        let checksum = compute_checksum_words(&buf);
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.checksum = checksum,
            TbfHeader::Padding(base) => base.checksum = checksum,
        }
    }

    /// Stored checksum word.
    pub fn checksum(&self) -> u32 {
        match self {
            TbfHeader::TbfHeaderV2(hd) => hd.base.checksum,
            TbfHeader::Padding(base) => base.checksum,
        }
    }

    /// XOR-of-words checksum over a header buffer with the checksum word
    /// (bytes 12..16) treated as zero. A trailing partial word is
    /// zero-extended.
    pub fn compute_checksum(buffer: &[u8]) -> u32 {
        let mut checksum: u32 = 0;
        for (i, chunk) in buffer.chunks(4).enumerate() {
            if i == 3 {
                // Checksum word is defined as zero while checksumming.
                continue;
            }
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            checksum ^= u32::from_le_bytes(word);
        }
        checksum
    }

    fn generate_without_checksum(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.emitted_header_size());
        match self {
            TbfHeader::Padding(base) => {
                let mut b = *base;
                b.checksum = 0;
                base_bytes(&b, &mut buf);
            }
            TbfHeader::TbfHeaderV2(hd) => {
                let mut b = hd.base;
                b.checksum = 0;
                base_bytes(&b, &mut buf);

                // Binary descriptor first, then the common TLVs in canonical
                // order, unknown entries last.
                if let Some(m) = &hd.main {
                    push_tlv(&mut buf, TbfHeaderTypes::Main as u16, &{
                        let mut p = Vec::with_capacity(12);
                        p.extend_from_slice(&m.init_fn_offset.to_le_bytes());
                        p.extend_from_slice(&m.protected_trailer_size.to_le_bytes());
                        p.extend_from_slice(&m.minimum_ram_size.to_le_bytes());
                        p
                    });
                }
                if let Some(p) = &hd.program {
                    push_tlv(&mut buf, TbfHeaderTypes::Program as u16, &{
                        let mut pl = Vec::with_capacity(20);
                        pl.extend_from_slice(&p.init_fn_offset.to_le_bytes());
                        pl.extend_from_slice(&p.protected_trailer_size.to_le_bytes());
                        pl.extend_from_slice(&p.minimum_ram_size.to_le_bytes());
                        pl.extend_from_slice(&p.binary_end_offset.to_le_bytes());
                        pl.extend_from_slice(&p.version.to_le_bytes());
                        pl
                    });
                }
                if !hd.writeable_regions.is_empty() {
                    let mut p = Vec::with_capacity(8 * hd.writeable_regions.len());
                    for wr in &hd.writeable_regions {
                        p.extend_from_slice(&wr.writeable_flash_region_offset.to_le_bytes());
                        p.extend_from_slice(&wr.writeable_flash_region_size.to_le_bytes());
                    }
                    push_tlv(&mut buf, TbfHeaderTypes::WriteableFlashRegions as u16, &p);
                }
                if let Some(name) = &hd.package_name {
                    push_tlv(&mut buf, TbfHeaderTypes::PackageName as u16, name.as_bytes());
                }
                if let Some(fixed) = &hd.fixed_addresses {
                    let mut p = Vec::with_capacity(8);
                    p.extend_from_slice(&fixed.start_process_ram.to_le_bytes());
                    p.extend_from_slice(&fixed.start_process_flash.to_le_bytes());
                    push_tlv(&mut buf, TbfHeaderTypes::FixedAddresses as u16, &p);
                }
                if let Some(kv) = &hd.kernel_version {
                    let mut p = Vec::with_capacity(4);
                    p.extend_from_slice(&kv.major.to_le_bytes());
                    p.extend_from_slice(&kv.minor.to_le_bytes());
                    push_tlv(&mut buf, TbfHeaderTypes::KernelVersion as u16, &p);
                }
                if let Some(pic) = &hd.pic_option1 {
                    push_tlv(&mut buf, TbfHeaderTypes::PicOption1 as u16, pic);
                }
                if let Some(perms) = &hd.permissions {
                    let mut p = Vec::with_capacity(2 + perms.perms.len() * 16);
                    p.extend_from_slice(&(perms.perms.len() as u16).to_le_bytes());
                    for perm in &perms.perms {
                        p.extend_from_slice(&perm.driver_number.to_le_bytes());
                        p.extend_from_slice(&perm.offset.to_le_bytes());
                        p.extend_from_slice(&perm.allowed_commands.to_le_bytes());
                    }
                    push_tlv(&mut buf, TbfHeaderTypes::Permissions as u16, &p);
                }
                if let Some(acl) = &hd.persistent_acl {
                    let mut p = Vec::new();
                    p.extend_from_slice(&acl.write_id.map_or(0, NonZeroU32::get).to_le_bytes());
                    p.extend_from_slice(&(acl.read_ids.len() as u16).to_le_bytes());
                    for id in &acl.read_ids {
                        p.extend_from_slice(&id.to_le_bytes());
                    }
                    p.extend_from_slice(&(acl.modify_ids.len() as u16).to_le_bytes());
                    for id in &acl.modify_ids {
                        p.extend_from_slice(&id.to_le_bytes());
                    }
                    push_tlv(&mut buf, TbfHeaderTypes::PersistentAcl as u16, &p);
                }
                if let Some(short_id) = &hd.short_id {
                    let raw = short_id.map_or(0, NonZeroU32::get);
                    push_tlv(&mut buf, TbfHeaderTypes::ShortId as u16, &raw.to_le_bytes());
                }
                for (tipe, raw) in &hd.unknown {
                    push_tlv(&mut buf, *tipe, raw);
                }
            }
        }
        buf
    }

    /// Emit the header in binary form with a valid checksum. The result is
    /// `header_size` bytes, 4-byte aligned.
    pub fn generate(&self) -> Result<Vec<u8>, TbfParseError> {
        let mut buf = self.generate_without_checksum();
        if buf.len() != self.length() as usize {
            // header_size no longer matches the TLVs; the header was edited
            // without going through refit().
            return Err(TbfParseError::InternalError);
        }
        let checksum = compute_checksum_words(&buf);
        buf[12..16].copy_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    /// Emit just the 16-byte base with the current checksum, for callers
    /// that patch flags in place.
    pub fn serialize(&self) -> Result<Vec<u8>, TbfParseError> {
        let full = self.generate()?;
        Ok(full[..TBF_BASE_SIZE].to_vec())
    }
}

fn base_bytes(base: &TbfHeaderV2Base, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&base.version.to_le_bytes());
    buf.extend_from_slice(&base.header_size.to_le_bytes());
    buf.extend_from_slice(&base.total_size.to_le_bytes());
    buf.extend_from_slice(&base.flags.to_le_bytes());
    buf.extend_from_slice(&base.checksum.to_le_bytes());
}

fn push_tlv(buf: &mut Vec<u8>, tipe: u16, payload: &[u8]) {
    buf.extend_from_slice(&tipe.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    // TLVs start 4-byte aligned; pad the payload out with zeros.
    let pad = align4_up(payload.len()) - payload.len();
    buf.resize(buf.len() + pad, 0);
}

fn compute_checksum_words(buf: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    for chunk in buf.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        checksum ^= u32::from_le_bytes(word);
    }
    checksum
}
