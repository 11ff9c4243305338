// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Decoders for TBF headers and footers.

use core::convert::TryInto;
use core::num::NonZeroU32;

use crate::types::*;

/// Parse the TBF header length and the entire length of the TBF binary.
///
/// ## Return
///
/// If all parsing is successful:
/// - Ok((Version, TBF header length, Entire TBF length))
///
/// If we cannot parse the header because we have run out of flash, or the
/// values are entirely wrong we return `UnableToParse`. This means we have
/// reached the end of the linked list of apps.
///
/// Any other error, which means this header is invalid but a plausible total
/// length is available for skipping, returns `InvalidHeader(total_length)`.
pub fn parse_tbf_header_lengths(app: &[u8; 8]) -> Result<(u16, u16, u32), InitialTbfParseError> {
    // Erased flash is all ones, and a reasonable header always has version 2.
    if app.iter().all(|&b| b == 0xFF) {
        return Err(InitialTbfParseError::UnableToParse);
    }

    let version = u16::from_le_bytes(app[0..2].try_into()?);
    if version != 2 {
        return Err(InitialTbfParseError::UnableToParse);
    }

    let tbf_header_size = u16::from_le_bytes(app[2..4].try_into()?);
    let tbf_size = u32::from_le_bytes(app[4..8].try_into()?);

    if tbf_size == 0 {
        return Err(InitialTbfParseError::UnableToParse);
    }

    // The header must be at least the base size, the total length must cover
    // the header, and both must be 4-byte aligned for the checksum and the
    // linked list to make sense.
    if (tbf_header_size as u32) <= tbf_size
        && tbf_header_size as usize >= TBF_BASE_SIZE
        && tbf_size % 4 == 0
        && tbf_header_size % 4 == 0
    {
        Ok((version, tbf_header_size, tbf_size))
    } else {
        Err(InitialTbfParseError::InvalidHeader(tbf_size))
    }
}

/// Parse a TBF header stored in flash.
///
/// The `header` must be a slice of exactly the length of the header (as
/// returned by [`parse_tbf_header_lengths`]). The base checksum is verified
/// and each TLV is decoded; unknown TLV types are preserved as raw bytes,
/// while a duplicated known TLV or one whose length crosses the declared
/// header length is a parse error.
pub fn parse_tbf_header(header: &[u8], version: u16) -> Result<TbfHeader, TbfParseError> {
    if version != 2 {
        return Err(TbfParseError::UnsupportedVersion(version));
    }

    let base: TbfHeaderV2Base = header.try_into()?;
    if base.header_size as usize != header.len() {
        return Err(TbfParseError::NotEnoughFlash);
    }

    let checksum = TbfHeader::compute_checksum(header);
    if checksum != base.checksum {
        return Err(TbfParseError::ChecksumMismatch(base.checksum, checksum));
    }

    let mut main: Option<TbfHeaderV2Main> = None;
    let mut program: Option<TbfHeaderV2Program> = None;
    let mut package_name: Option<String> = None;
    let mut writeable_regions: Vec<TbfHeaderV2WriteableFlashRegion> = Vec::new();
    let mut seen_writeable_regions = false;
    let mut pic_option1: Option<Vec<u8>> = None;
    let mut fixed_addresses: Option<TbfHeaderV2FixedAddresses> = None;
    let mut permissions: Option<TbfHeaderV2Permissions> = None;
    let mut persistent_acl: Option<TbfHeaderV2PersistentAcl> = None;
    let mut kernel_version: Option<TbfHeaderV2KernelVersion> = None;
    let mut short_id: Option<Option<NonZeroU32>> = None;
    let mut unknown: Vec<(u16, Vec<u8>)> = Vec::new();

    let mut offset = TBF_BASE_SIZE;
    while offset < header.len() {
        // Each TLV starts 4-byte aligned: 2 bytes type, 2 bytes length.
        let raw_tipe = u16::from_le_bytes(
            header
                .get(offset..offset + 2)
                .ok_or(TbfParseError::NotEnoughFlash)?
                .try_into()?,
        );
        let length = u16::from_le_bytes(
            header
                .get(offset + 2..offset + 4)
                .ok_or(TbfParseError::NotEnoughFlash)?
                .try_into()?,
        ) as usize;

        let payload = header
            .get(offset + 4..offset + 4 + length)
            .ok_or(TbfParseError::BadTlvEntry(raw_tipe as usize))?;

        let tipe: TbfHeaderTypes = raw_tipe.into();
        let duplicate = |t: TbfHeaderTypes| TbfParseError::DuplicateTlvEntry(t as usize);
        match tipe {
            TbfHeaderTypes::Main => {
                if main.is_some() || program.is_some() {
                    return Err(duplicate(tipe));
                }
                main = Some(payload.try_into()?);
            }
            TbfHeaderTypes::Program => {
                if program.is_some() || main.is_some() {
                    return Err(duplicate(tipe));
                }
                let parsed: TbfHeaderV2Program = payload.try_into()?;
                // The footer region must start at or after the header end and
                // stay inside the TBF.
                if (parsed.binary_end_offset as usize) < header.len()
                    || parsed.binary_end_offset > base.total_size
                {
                    return Err(TbfParseError::BadTlvEntry(TbfHeaderTypes::Program as usize));
                }
                program = Some(parsed);
            }
            TbfHeaderTypes::WriteableFlashRegions => {
                if seen_writeable_regions {
                    return Err(duplicate(tipe));
                }
                seen_writeable_regions = true;
                if length % 8 != 0 {
                    return Err(TbfParseError::BadTlvEntry(raw_tipe as usize));
                }
                for chunk in payload.chunks_exact(8) {
                    writeable_regions.push(TbfHeaderV2WriteableFlashRegion {
                        writeable_flash_region_offset: u32::from_le_bytes(chunk[0..4].try_into()?),
                        writeable_flash_region_size: u32::from_le_bytes(chunk[4..8].try_into()?),
                    });
                }
            }
            TbfHeaderTypes::PackageName => {
                if package_name.is_some() {
                    return Err(duplicate(tipe));
                }
                package_name = Some(
                    core::str::from_utf8(payload)
                        .map_err(|_| TbfParseError::BadProcessName)?
                        .to_owned(),
                );
            }
            TbfHeaderTypes::PicOption1 => {
                if pic_option1.is_some() {
                    return Err(duplicate(tipe));
                }
                pic_option1 = Some(payload.to_vec());
            }
            TbfHeaderTypes::FixedAddresses => {
                if fixed_addresses.is_some() {
                    return Err(duplicate(tipe));
                }
                fixed_addresses = Some(payload.try_into()?);
            }
            TbfHeaderTypes::Permissions => {
                if permissions.is_some() {
                    return Err(duplicate(tipe));
                }
                permissions = Some(payload.try_into()?);
            }
            TbfHeaderTypes::PersistentAcl => {
                if persistent_acl.is_some() {
                    return Err(duplicate(tipe));
                }
                persistent_acl = Some(payload.try_into()?);
            }
            TbfHeaderTypes::KernelVersion => {
                if kernel_version.is_some() {
                    return Err(duplicate(tipe));
                }
                kernel_version = Some(payload.try_into()?);
            }
            TbfHeaderTypes::ShortId => {
                if short_id.is_some() {
                    return Err(duplicate(tipe));
                }
                if length != 4 {
                    return Err(TbfParseError::BadTlvEntry(raw_tipe as usize));
                }
                short_id = Some(NonZeroU32::new(u32::from_le_bytes(
                    payload[0..4].try_into()?,
                )));
            }
            TbfHeaderTypes::Credentials => {
                // Credentials belong in the footer, not the header.
                return Err(TbfParseError::BadTlvEntry(raw_tipe as usize));
            }
            TbfHeaderTypes::Unknown => {
                unknown.push((raw_tipe, payload.to_vec()));
            }
        }

        offset += 4 + length;
        // Skip inter-TLV alignment padding.
        offset = (offset + 3) & !3;
    }

    if main.is_none() && program.is_none() {
        // No binary descriptor: this object is padding between apps.
        log::debug!(
            "Parsed padding header occupying {:#x} bytes",
            base.total_size
        );
        return Ok(TbfHeader::Padding(base));
    }

    Ok(TbfHeader::TbfHeaderV2(TbfHeaderV2 {
        base,
        main,
        program,
        package_name,
        writeable_regions,
        pic_option1,
        fixed_addresses,
        permissions,
        persistent_acl,
        kernel_version,
        short_id,
        unknown,
    }))
}

/// Parse a single credentials TLV from a TBF footer region.
///
/// `data` starts at a footer TLV boundary. Returns the decoded credentials
/// and the TLV length (excluding the 4 type/length bytes), so the caller can
/// advance by `length + 4`.
pub fn parse_tbf_footer(data: &[u8]) -> Result<(TbfFooterV2Credentials, u32), TbfParseError> {
    let tipe = u16::from_le_bytes(
        data.get(0..2)
            .ok_or(TbfParseError::NotEnoughFlash)?
            .try_into()?,
    );
    let length = u16::from_le_bytes(
        data.get(2..4)
            .ok_or(TbfParseError::NotEnoughFlash)?
            .try_into()?,
    ) as usize;

    if TbfHeaderTypes::from(tipe) != TbfHeaderTypes::Credentials {
        return Err(TbfParseError::InvalidFooter);
    }

    let payload = data
        .get(4..4 + length)
        .ok_or(TbfParseError::NotEnoughFlash)?;
    let format = u32::from_le_bytes(
        payload
            .get(0..4)
            .ok_or(TbfParseError::InvalidFooter)?
            .try_into()?,
    );
    let ftype: TbfFooterV2CredentialsType = format.try_into()?;

    if let Some(expected) = ftype.payload_length() {
        if length as u32 != expected {
            return Err(TbfParseError::InvalidFooter);
        }
    }

    let body = &payload[4..];
    let credentials = match ftype {
        TbfFooterV2CredentialsType::Reserved => TbfFooterV2Credentials::Reserved(length as u32),
        TbfFooterV2CredentialsType::Rsa2048Key => {
            TbfFooterV2Credentials::Rsa2048Key(TbfFooterV2RSA {
                public_key: body[..256].to_vec(),
                signature: body[256..].to_vec(),
            })
        }
        TbfFooterV2CredentialsType::Rsa4096Key => {
            TbfFooterV2Credentials::Rsa4096Key(TbfFooterV2RSA {
                public_key: body[..512].to_vec(),
                signature: body[512..].to_vec(),
            })
        }
        TbfFooterV2CredentialsType::SHA256 => TbfFooterV2Credentials::SHA256(TbfFooterV2SHA {
            hash: body.to_vec(),
        }),
        TbfFooterV2CredentialsType::SHA384 => TbfFooterV2Credentials::SHA384(TbfFooterV2SHA {
            hash: body.to_vec(),
        }),
        TbfFooterV2CredentialsType::SHA512 => TbfFooterV2Credentials::SHA512(TbfFooterV2SHA {
            hash: body.to_vec(),
        }),
        TbfFooterV2CredentialsType::EcdsaNistP256 => {
            TbfFooterV2Credentials::EcdsaNistP256(TbfFooterV2Ecdsa {
                signature_r: body[..32].try_into()?,
                signature_s: body[32..64].try_into()?,
            })
        }
        TbfFooterV2CredentialsType::CleartextID => {
            TbfFooterV2Credentials::CleartextID(u64::from_le_bytes(body[..8].try_into()?))
        }
        TbfFooterV2CredentialsType::HmacSha256 => {
            TbfFooterV2Credentials::HmacSha256(TbfFooterV2HMAC { mac: body.to_vec() })
        }
        TbfFooterV2CredentialsType::HmacSha384 => {
            TbfFooterV2Credentials::HmacSha384(TbfFooterV2HMAC { mac: body.to_vec() })
        }
        TbfFooterV2CredentialsType::HmacSha512 => {
            TbfFooterV2Credentials::HmacSha512(TbfFooterV2HMAC { mac: body.to_vec() })
        }
    };

    Ok((credentials, length as u32))
}

/// Parse every credentials TLV between `binary_end_offset` and the end of
/// the TBF. The concatenation must fill the footer region exactly.
pub fn parse_tbf_footers(
    footer_region: &[u8],
) -> Result<Vec<(TbfFooterV2Credentials, u32)>, TbfParseError> {
    let mut footers = Vec::new();
    let mut offset = 0;
    while offset < footer_region.len() {
        let (credentials, length) = parse_tbf_footer(&footer_region[offset..])?;
        footers.push((credentials, length));
        offset += length as usize + 4;
    }
    if offset != footer_region.len() {
        return Err(TbfParseError::InvalidFooter);
    }
    Ok(footers)
}
