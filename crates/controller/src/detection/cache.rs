// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LRU dedup cache mapping frame hashes to finished analyses.

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::types::FrameAnalysis;

/// Default capacity.
pub const DEDUP_CAPACITY: usize = 100;

/// Bounded LRU keyed by frame content hash. Guarded independently of the
/// request queue.
pub struct DedupCache {
    inner: Mutex<IndexMap<String, FrameAnalysis>>,
    capacity: usize,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(IndexMap::with_capacity(capacity)),
            capacity,
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Look up an analysis, refreshing its recency on hit.
    pub fn get(&self, frame_hash: &str) -> Option<FrameAnalysis> {
        let mut inner = self.inner.lock();
        if let Some(analysis) = inner.shift_remove(frame_hash) {
            inner.insert(frame_hash.to_owned(), analysis.clone());
            self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Some(analysis)
        } else {
            self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            None
        }
    }

    /// Insert an analysis, evicting exactly the least-recently-used entry
    /// when over capacity.
    pub fn put(&self, frame_hash: String, analysis: FrameAnalysis) {
        let mut inner = self.inner.lock();
        inner.shift_remove(&frame_hash);
        if inner.len() >= self.capacity {
            inner.shift_remove_index(0);
        }
        inner.insert(frame_hash, analysis);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY)
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
