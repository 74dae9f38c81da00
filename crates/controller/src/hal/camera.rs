// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Camera frame source contract and the mock implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::error::HalError;

/// One captured frame: a BGR8 byte buffer plus its geometry.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self { data, width, height, channels: 3, captured_at: Instant::now() }
    }

    /// Content digest used for duplicate detection.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        let digest = hasher.finalize();
        // First 16 bytes are plenty for dedup keys.
        digest[..16].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Contract every camera driver must honour.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<Frame, HalError>;
    /// Idempotent.
    fn close(&self);
}

/// Mock camera producing timestamped noise frames.
pub struct MockCamera {
    width: u32,
    height: u32,
    fps: u32,
    counter: AtomicU64,
    closed: AtomicBool,
}

impl MockCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps, counter: AtomicU64::new(0), closed: AtomicBool::new(false) }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

impl FrameSource for MockCamera {
    fn capture(&self) -> Result<Frame, HalError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HalError::NotReady("camera closed".to_owned()));
        }
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut data = vec![0u8; (self.width * self.height * 3) as usize];
        rand::rng().fill_bytes(&mut data);
        // Stamp the sequence number into the first pixels so no two frames
        // hash identically.
        let stamp = seq.to_le_bytes();
        let n = stamp.len().min(data.len());
        data[..n].copy_from_slice(&stamp[..n]);
        Ok(Frame::new(data, self.width, self.height))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
