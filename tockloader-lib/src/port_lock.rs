// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright OXIDOS AUTOMOTIVE 2024.

//! Inter-process mutual exclusion for a serial device.
//!
//! Two tockloader processes driving the same port interleave their frames
//! and corrupt each other's flash writes. The gate is a TCP listener on
//! 127.0.0.1 at a port derived from the device path: whoever binds first
//! owns the device, and a second process fails fast with `PortBusy`. The
//! listener accepts and immediately drops connections for the lifetime of
//! the owning value.

use std::hash::Hasher;
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use siphasher::sip::SipHasher;

use crate::errors::{SerialError, TockloaderError};

/// Port number derived deterministically from the absolute device path, so
/// every process computes the same one.
pub fn lock_port_for(device: &str) -> u16 {
    let absolute = Path::new(device)
        .canonicalize()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| device.to_string());
    let mut hasher = SipHasher::new();
    hasher.write(absolute.as_bytes());
    10000 + (hasher.finish() & 0x7FFF) as u16
}

/// Held for the life of the process that owns a serial device.
pub struct PortLock {
    device: String,
    stop: Arc<AtomicBool>,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl PortLock {
    /// Bind the per-device port. Fails with `PortBusy` when another
    /// tockloader instance already drives this device.
    pub fn acquire(device: &str) -> Result<PortLock, TockloaderError> {
        let port = lock_port_for(device);
        let listener = TcpListener::bind(("127.0.0.1", port)).map_err(|_| {
            TockloaderError::Serial(SerialError::PortBusy(device.to_string()))
        })?;
        listener
            .set_nonblocking(true)
            .map_err(SerialError::IO)?;
        log::debug!("Holding lock port {port} for {device}");

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let accept_thread = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                // Idle listener: connections are accepted and dropped.
                if let Ok((socket, _)) = listener.accept() {
                    drop(socket);
                }
                thread::sleep(Duration::from_millis(100));
            }
        });

        Ok(PortLock {
            device: device.to_string(),
            stop,
            accept_thread: Some(accept_thread),
        })
    }
}

impl Drop for PortLock {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        log::debug!("Released lock for {}", self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_deterministic_and_in_range() {
        let a = lock_port_for("/dev/ttyACM0");
        let b = lock_port_for("/dev/ttyACM0");
        assert_eq!(a, b);
        assert!(a >= 10000);

        let c = lock_port_for("/dev/ttyACM1");
        assert_ne!(a, c);
    }

    #[test]
    fn second_acquire_fails() {
        let device = "/tmp/tockloader-test-port-lock";
        let lock = PortLock::acquire(device).unwrap();
        let second = PortLock::acquire(device);
        assert!(matches!(
            second,
            Err(TockloaderError::Serial(SerialError::PortBusy(_)))
        ));
        drop(lock);

        // After release the port can be taken again.
        let third = PortLock::acquire(device);
        assert!(third.is_ok());
    }
}
