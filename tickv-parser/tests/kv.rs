// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

use tickv_parser::tock::TockStorageObject;
use tickv_parser::{hash_key, TicKv, TickvError, MAIN_KEY};

fn fresh(regions: usize, region_size: usize) -> TicKv {
    let mut kv = TicKv::new(vec![0xFF; regions * region_size], region_size).unwrap();
    kv.reset();
    kv
}

#[test]
fn append_then_get() {
    let mut kv = fresh(4, 512);
    kv.append("k", b"v").unwrap();
    assert_eq!(kv.get("k").unwrap(), b"v");
}

#[test]
fn get_returns_last_appended() {
    let mut kv = fresh(4, 512);
    kv.append("k", b"one").unwrap();
    kv.append("k", b"two").unwrap();
    kv.append("k", b"three").unwrap();
    assert_eq!(kv.get("k").unwrap(), b"three");
}

#[test]
fn invalidate_clears_in_place() {
    let mut kv = fresh(4, 512);
    kv.append("k", b"v").unwrap();
    let before = kv.storage().to_vec();

    kv.invalidate("k").unwrap();
    assert!(matches!(kv.get("k"), Err(TickvError::KeyNotFound)));

    // Exactly one byte (the flags byte) differs: the clear happens in place.
    let after = kv.storage();
    let diffs: Vec<usize> = (0..before.len()).filter(|&i| before[i] != after[i]).collect();
    assert_eq!(diffs.len(), 1);
}

#[test]
fn invalidate_missing_key() {
    let mut kv = fresh(4, 512);
    assert!(matches!(
        kv.invalidate("nope"),
        Err(TickvError::KeyNotFound)
    ));
}

#[test]
fn cleanup_preserves_valid_keys() {
    let mut kv = fresh(4, 512);
    kv.append("a", b"alpha").unwrap();
    kv.append("b", b"beta").unwrap();
    kv.append("c", b"gamma").unwrap();
    kv.invalidate("b").unwrap();

    kv.cleanup().unwrap();

    assert_eq!(kv.get("a").unwrap(), b"alpha");
    assert_eq!(kv.get("c").unwrap(), b"gamma");
    assert!(matches!(kv.get("b"), Err(TickvError::KeyNotFound)));
    assert_eq!(kv.get(MAIN_KEY).unwrap(), b"");
}

#[test]
fn overflow_to_next_region() {
    // Region size 64: room for one ~40-byte object plus the init object's
    // 16 bytes in region 0, so repeated appends must spill over.
    let mut kv = fresh(4, 64);
    let value = vec![0x42u8; 24];
    let key = "spill";
    for _ in 0..4 {
        kv.append(key, &value).unwrap();
    }
    assert_eq!(kv.get(key).unwrap(), value);

    // All four regions hold data now; one more cannot fit.
    assert!(matches!(
        kv.append(key, &value),
        Err(TickvError::StorageFull)
    ));
}

#[test]
fn object_too_large() {
    let mut kv = fresh(2, 64);
    assert!(matches!(
        kv.append("k", &[0u8; 128]),
        Err(TickvError::ObjectTooLarge(128, 64))
    ));
}

#[test]
fn reset_then_tock_object_roundtrip() {
    let mut kv = fresh(2, 512);
    let wrapped = TockStorageObject::new(7, b"v".to_vec());
    kv.append("k", &wrapped.encode()).unwrap();

    let raw = kv.get("k").unwrap();
    let decoded = TockStorageObject::decode(&raw).unwrap();
    assert_eq!(decoded.write_id, 7);
    assert_eq!(decoded.value, b"v");
}

#[test]
fn init_object_lives_in_region_zero() {
    let kv = fresh(4, 512);
    let objects = kv.dump().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].region, 0);
    assert_eq!(objects[0].hashed_key, hash_key(MAIN_KEY));
    assert!(objects[0].valid);
    assert!(objects[0].checksum_ok);
}
