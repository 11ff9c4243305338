// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! The tickv commands exercised through the board interface.

use tockloader_lib::board_interface::FlashImage;
use tockloader_lib::commands::tickv_ops::{
    tickv_append, tickv_dump, tickv_get, tickv_invalidate, tickv_reset, TickvLocation,
};

fn board_with_db() -> (FlashImage, TickvLocation) {
    let board = FlashImage::new(0x10000, 0x60000, 512, 0x60000);
    let location = TickvLocation {
        address: 0x61000,
        total_size: 0x2000,
        region_size: 0x800,
    };
    (board, location)
}

#[tokio::test]
async fn reset_append_get() {
    let (mut board, location) = board_with_db();

    tickv_reset(&mut board, &location).await.unwrap();
    tickv_append(&mut board, &location, "k", b"v", Some(7))
        .await
        .unwrap();

    let (_, wrapped) = tickv_get(&mut board, &location, "k").await.unwrap();
    let wrapped = wrapped.expect("value carries a tock storage object");
    assert_eq!(wrapped.write_id, 7);
    assert_eq!(wrapped.value, b"v");
}

#[tokio::test]
async fn invalidate_then_get_fails() {
    let (mut board, location) = board_with_db();

    tickv_reset(&mut board, &location).await.unwrap();
    tickv_append(&mut board, &location, "k", b"v", None)
        .await
        .unwrap();
    tickv_invalidate(&mut board, &location, "k").await.unwrap();

    assert!(tickv_get(&mut board, &location, "k").await.is_err());
}

#[tokio::test]
async fn dump_sees_init_object() {
    let (mut board, location) = board_with_db();

    tickv_reset(&mut board, &location).await.unwrap();
    let objects = tickv_dump(&mut board, &location).await.unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].region, 0);
    assert!(objects[0].valid);
}
