// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Computing and verifying TBF footer credentials.
//!
//! Every credential covers the integrity blob: the finalized header bytes
//! concatenated with the application binary up to `binary_end_offset`. Only
//! `Program` apps have a footer, so only they can carry credentials.

use hmac::{Hmac, Mac};
use ring::rand::SystemRandom;
use ring::signature::{self, KeyPair, UnparsedPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};

use tbf_parser::parse::{parse_tbf_footers, parse_tbf_header, parse_tbf_header_lengths};
use tbf_parser::types::{
    TbfFooterV2Credentials, TbfFooterV2CredentialsType, TbfFooterV2Ecdsa, TbfFooterV2HMAC,
    TbfFooterV2SHA,
};

use crate::errors::{TabError, TockError, TockloaderError};

/// Key material the credential operations may need. Everything is optional;
/// operations that lack their key are skipped or rejected, never guessed.
#[derive(Default)]
pub struct CredentialKeys {
    /// Shared secret for the HMAC-SHA2 credentials.
    pub hmac_key: Option<Vec<u8>>,
    /// PKCS#8 v1 ECDSA-P256 keypair, for signing.
    pub ecdsa_pkcs8: Option<Vec<u8>>,
    /// Uncompressed (0x04 || x || y) P-256 public key, for verifying.
    pub ecdsa_public: Option<Vec<u8>>,
    /// Value stored by a CleartextID credential.
    pub cleartext_id: Option<u64>,
}

/// Outcome of checking one credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialCheck {
    Pass,
    Fail,
    SkippedNoKey,
    Unsupported,
}

struct ParsedTbf {
    total_size: usize,
    binary_end: usize,
}

fn parse_whole(tbf: &[u8]) -> Result<ParsedTbf, TockloaderError> {
    let (version, header_size, total_size) = parse_tbf_header_lengths(
        tbf.get(0..8)
            .ok_or(TabError::Parsing(
                tbf_parser::types::TbfParseError::NotEnoughFlash,
            ))?
            .try_into()
            .expect("Buffer length must be at least 8 bytes long."),
    )
    .map_err(|_| {
        TabError::Parsing(tbf_parser::types::TbfParseError::NotEnoughFlash)
    })?;
    if tbf.len() < total_size as usize {
        return Err(TabError::Parsing(tbf_parser::types::TbfParseError::NotEnoughFlash).into());
    }

    let header =
        parse_tbf_header(&tbf[0..header_size as usize], version).map_err(TabError::Parsing)?;
    if !header.supports_footers() {
        return Err(TockError::UnsupportedCredential(
            "app has no Program header, so it cannot carry footers".to_string(),
        )
        .into());
    }
    let binary_end = header.get_binary_end() as usize;
    Ok(ParsedTbf {
        total_size: total_size as usize,
        binary_end,
    })
}

/// The bytes credentials are computed over.
pub fn integrity_blob(tbf: &[u8]) -> Result<&[u8], TockloaderError> {
    let parsed = parse_whole(tbf)?;
    Ok(&tbf[..parsed.binary_end])
}

macro_rules! hmac_fn {
    ($name:ident, $digest:ty) => {
        fn $name(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, TockloaderError> {
            let mut mac = <Hmac<$digest>>::new_from_slice(key).map_err(|_| {
                TockError::UnsupportedCredential("HMAC key has an invalid length".to_string())
            })?;
            mac.update(blob);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    };
}

hmac_fn!(hmac_sha256, Sha256);
hmac_fn!(hmac_sha384, Sha384);
hmac_fn!(hmac_sha512, Sha512);

fn compute_credential(
    kind: TbfFooterV2CredentialsType,
    blob: &[u8],
    keys: &CredentialKeys,
) -> Result<TbfFooterV2Credentials, TockloaderError> {
    let no_key = |what: &str| {
        TockloaderError::Tock(TockError::UnsupportedCredential(format!(
            "adding a {what} credential requires key material"
        )))
    };
    match kind {
        TbfFooterV2CredentialsType::SHA256 => Ok(TbfFooterV2Credentials::SHA256(TbfFooterV2SHA {
            hash: Sha256::digest(blob).to_vec(),
        })),
        TbfFooterV2CredentialsType::SHA384 => Ok(TbfFooterV2Credentials::SHA384(TbfFooterV2SHA {
            hash: Sha384::digest(blob).to_vec(),
        })),
        TbfFooterV2CredentialsType::SHA512 => Ok(TbfFooterV2Credentials::SHA512(TbfFooterV2SHA {
            hash: Sha512::digest(blob).to_vec(),
        })),
        TbfFooterV2CredentialsType::HmacSha256 => {
            let key = keys.hmac_key.as_ref().ok_or_else(|| no_key("HMAC"))?;
            Ok(TbfFooterV2Credentials::HmacSha256(TbfFooterV2HMAC {
                mac: hmac_sha256(key, blob)?,
            }))
        }
        TbfFooterV2CredentialsType::HmacSha384 => {
            let key = keys.hmac_key.as_ref().ok_or_else(|| no_key("HMAC"))?;
            Ok(TbfFooterV2Credentials::HmacSha384(TbfFooterV2HMAC {
                mac: hmac_sha384(key, blob)?,
            }))
        }
        TbfFooterV2CredentialsType::HmacSha512 => {
            let key = keys.hmac_key.as_ref().ok_or_else(|| no_key("HMAC"))?;
            Ok(TbfFooterV2Credentials::HmacSha512(TbfFooterV2HMAC {
                mac: hmac_sha512(key, blob)?,
            }))
        }
        TbfFooterV2CredentialsType::EcdsaNistP256 => {
            let pkcs8 = keys.ecdsa_pkcs8.as_ref().ok_or_else(|| no_key("ECDSA"))?;
            let rng = SystemRandom::new();
            let keypair = signature::EcdsaKeyPair::from_pkcs8(
                &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
                pkcs8,
                &rng,
            )
            .map_err(|_| {
                TockError::UnsupportedCredential("invalid ECDSA PKCS#8 key".to_string())
            })?;
            let sig = keypair.sign(&rng, blob).map_err(|_| {
                TockError::CredentialVerifyFailed("ECDSA signing failed".to_string())
            })?;
            let raw = sig.as_ref();
            Ok(TbfFooterV2Credentials::EcdsaNistP256(TbfFooterV2Ecdsa {
                signature_r: raw[..32].try_into().expect("fixed signatures are 64 bytes"),
                signature_s: raw[32..64].try_into().expect("fixed signatures are 64 bytes"),
            }))
        }
        TbfFooterV2CredentialsType::CleartextID => {
            let id = keys.cleartext_id.ok_or_else(|| no_key("CleartextID"))?;
            Ok(TbfFooterV2Credentials::CleartextID(id))
        }
        TbfFooterV2CredentialsType::Reserved => Err(TockError::UnsupportedCredential(
            "Reserved padding is managed automatically".to_string(),
        )
        .into()),
        TbfFooterV2CredentialsType::Rsa2048Key | TbfFooterV2CredentialsType::Rsa4096Key => {
            // RSA credentials verify against their embedded public key, but
            // producing one needs a private key format this tool does not
            // manage.
            Err(TockError::UnsupportedCredential(
                "RSA credentials can be verified and deleted but not added".to_string(),
            )
            .into())
        }
    }
}

/// Insert a freshly computed credential into the footer, carving the space
/// out of a Reserved padding TLV. `total_length` is unchanged; fails with
/// `InsufficientFooter` when no Reserved TLV can host the credential.
pub fn add_credential(
    tbf: &[u8],
    kind: TbfFooterV2CredentialsType,
    keys: &CredentialKeys,
) -> Result<Vec<u8>, TockloaderError> {
    let parsed = parse_whole(tbf)?;
    let blob = &tbf[..parsed.binary_end];
    let credential = compute_credential(kind, blob, keys)?;
    let needed = credential.generate().len();

    let footers =
        parse_tbf_footers(&tbf[parsed.binary_end..parsed.total_size]).map_err(TabError::Parsing)?;

    let mut rebuilt: Vec<u8> = Vec::with_capacity(parsed.total_size - parsed.binary_end);
    let mut inserted = false;
    for (entry, length) in &footers {
        let entry_total = *length as usize + 4;
        match entry {
            TbfFooterV2Credentials::Reserved(_) if !inserted && entry_total >= needed => {
                let leftover = entry_total - needed;
                // A shrunk Reserved TLV still needs its own 8-byte minimum.
                if leftover != 0 && leftover < 8 {
                    rebuilt.extend_from_slice(&entry.generate());
                    continue;
                }
                rebuilt.extend_from_slice(&credential.generate());
                if leftover != 0 {
                    rebuilt.extend_from_slice(
                        &TbfFooterV2Credentials::Reserved(leftover as u32 - 4).generate(),
                    );
                }
                inserted = true;
            }
            _ => rebuilt.extend_from_slice(&entry.generate()),
        }
    }

    if !inserted {
        return Err(TabError::Parsing(tbf_parser::types::TbfParseError::InsufficientFooter).into());
    }

    let mut out = tbf[..parsed.binary_end].to_vec();
    out.extend_from_slice(&rebuilt);
    debug_assert_eq!(out.len(), parsed.total_size);
    Ok(out)
}

/// Replace every credential of `kind` with Reserved padding of equal total
/// length, leaving `total_length` and the other credentials untouched.
pub fn delete_credential(
    tbf: &[u8],
    kind: TbfFooterV2CredentialsType,
) -> Result<Vec<u8>, TockloaderError> {
    let parsed = parse_whole(tbf)?;
    let footers =
        parse_tbf_footers(&tbf[parsed.binary_end..parsed.total_size]).map_err(TabError::Parsing)?;

    let mut rebuilt: Vec<u8> = Vec::with_capacity(parsed.total_size - parsed.binary_end);
    let mut deleted = 0;
    for (entry, length) in &footers {
        if entry.get_format() == kind {
            rebuilt.extend_from_slice(&TbfFooterV2Credentials::Reserved(*length).generate());
            deleted += 1;
        } else {
            rebuilt.extend_from_slice(&entry.generate());
        }
    }

    if deleted == 0 {
        return Err(TockError::UnsupportedCredential(format!(
            "no {kind:?} credential present"
        ))
        .into());
    }

    let mut out = tbf[..parsed.binary_end].to_vec();
    out.extend_from_slice(&rebuilt);
    debug_assert_eq!(out.len(), parsed.total_size);
    Ok(out)
}

/// Check every credential in the footer against the integrity blob.
pub fn verify_credentials(
    tbf: &[u8],
    keys: &CredentialKeys,
) -> Result<Vec<(TbfFooterV2CredentialsType, CredentialCheck)>, TockloaderError> {
    let parsed = parse_whole(tbf)?;
    let blob = &tbf[..parsed.binary_end];
    let footers =
        parse_tbf_footers(&tbf[parsed.binary_end..parsed.total_size]).map_err(TabError::Parsing)?;

    let mut results = Vec::new();
    for (entry, _) in &footers {
        let kind = entry.get_format();
        let check = match entry {
            TbfFooterV2Credentials::Reserved(_) => continue,
            TbfFooterV2Credentials::SHA256(sha) => {
                pass_if(Sha256::digest(blob).as_slice() == &sha.hash[..])
            }
            TbfFooterV2Credentials::SHA384(sha) => {
                pass_if(Sha384::digest(blob).as_slice() == &sha.hash[..])
            }
            TbfFooterV2Credentials::SHA512(sha) => {
                pass_if(Sha512::digest(blob).as_slice() == &sha.hash[..])
            }
            TbfFooterV2Credentials::HmacSha256(hmac) => match &keys.hmac_key {
                Some(key) => pass_if(hmac_sha256(key, blob)? == hmac.mac),
                None => CredentialCheck::SkippedNoKey,
            },
            TbfFooterV2Credentials::HmacSha384(hmac) => match &keys.hmac_key {
                Some(key) => pass_if(hmac_sha384(key, blob)? == hmac.mac),
                None => CredentialCheck::SkippedNoKey,
            },
            TbfFooterV2Credentials::HmacSha512(hmac) => match &keys.hmac_key {
                Some(key) => pass_if(hmac_sha512(key, blob)? == hmac.mac),
                None => CredentialCheck::SkippedNoKey,
            },
            TbfFooterV2Credentials::EcdsaNistP256(ecdsa) => match &keys.ecdsa_public {
                Some(public) => {
                    let mut sig = Vec::with_capacity(64);
                    sig.extend_from_slice(&ecdsa.signature_r);
                    sig.extend_from_slice(&ecdsa.signature_s);
                    let key =
                        UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_FIXED, public);
                    pass_if(key.verify(blob, &sig).is_ok())
                }
                None => CredentialCheck::SkippedNoKey,
            },
            TbfFooterV2Credentials::Rsa2048Key(rsa) | TbfFooterV2Credentials::Rsa4096Key(rsa) => {
                // The public key travels with the credential; e is the
                // customary 65537.
                let e = [0x01u8, 0x00, 0x01];
                let components = signature::RsaPublicKeyComponents {
                    n: rsa.public_key.as_slice(),
                    e: &e[..],
                };
                pass_if(
                    components
                        .verify(&signature::RSA_PKCS1_2048_8192_SHA256, blob, &rsa.signature)
                        .is_ok(),
                )
            }
            TbfFooterV2Credentials::CleartextID(_) => CredentialCheck::Unsupported,
        };
        results.push((kind, check));
    }
    Ok(results)
}

fn pass_if(ok: bool) -> CredentialCheck {
    if ok {
        CredentialCheck::Pass
    } else {
        CredentialCheck::Fail
    }
}

/// Generate a fresh ECDSA-P256 signing key in PKCS#8 form together with its
/// uncompressed public key. Used by the test suite and by callers that want
/// self-signed development credentials.
pub fn generate_ecdsa_keypair() -> Result<(Vec<u8>, Vec<u8>), TockloaderError> {
    let rng = SystemRandom::new();
    let pkcs8 =
        signature::EcdsaKeyPair::generate_pkcs8(&signature::ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| {
                TockError::UnsupportedCredential("ECDSA key generation failed".to_string())
            })?;
    let keypair = signature::EcdsaKeyPair::from_pkcs8(
        &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
        pkcs8.as_ref(),
        &rng,
    )
    .map_err(|_| TockError::UnsupportedCredential("ECDSA key generation failed".to_string()))?;
    Ok((
        pkcs8.as_ref().to_vec(),
        keypair.public_key().as_ref().to_vec(),
    ))
}
