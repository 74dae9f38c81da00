// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded priority queue feeding the inference worker threads.
//!
//! Keyed by `(priority, enqueue sequence)`: lower priority value first,
//! oldest first within a priority. A full queue admits a HIGH/CRITICAL
//! request only by evicting a strictly lower-priority pending request.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::DetectionError;
use crate::hal::Frame;
use crate::types::{FrameAnalysis, ProcessingPriority};

/// A request waiting for a worker.
pub struct QueuedRequest {
    pub request_id: uuid::Uuid,
    pub frame: Frame,
    pub frame_hash: String,
    pub priority: ProcessingPriority,
    pub enqueued_at: Instant,
    pub deadline: Duration,
    pub reply: oneshot::Sender<Result<FrameAnalysis, DetectionError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: u8,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    map: BTreeMap<QueueKey, QueuedRequest>,
    seq: u64,
    closed: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// Queue full and the request could not evict anything.
    Full,
    /// The queue is shutting down.
    Closed,
}

pub struct RequestQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(Inner::default()), available: Condvar::new(), capacity }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a worker died mid-pop; the queue data
        // is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a request. When full, a HIGH/CRITICAL request evicts the
    /// lowest-priority pending request iff that request's priority value is
    /// strictly greater than the new one's.
    pub fn push(&self, request: QueuedRequest) -> Result<(), PushError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(PushError::Closed);
        }
        if inner.map.len() >= self.capacity {
            let victim_key = match inner.map.last_key_value() {
                Some((key, _))
                    if request.priority.may_evict()
                        && key.priority > request.priority.value() =>
                {
                    *key
                }
                _ => return Err(PushError::Full),
            };
            if let Some(victim) = inner.map.remove(&victim_key) {
                let _ = victim.reply.send(Err(DetectionError::Evicted));
            }
        }

        inner.seq += 1;
        let key = QueueKey { priority: request.priority.value(), seq: inner.seq };
        inner.map.insert(key, request);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Blocking pop for worker threads. Returns `None` on timeout or when
    /// the queue has closed and drained.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<QueuedRequest> {
        let mut inner = self.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((&key, _)) = inner.map.first_key_value() {
                return inner.map.remove(&key);
            }
            if inner.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self
                .available
                .wait_timeout(inner, remaining)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if result.timed_out() && inner.map.is_empty() {
                return None;
            }
        }
    }

    /// Close the queue, failing every pending request.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        let pending = std::mem::take(&mut inner.map);
        drop(inner);
        for (_, request) in pending {
            let _ = request.reply.send(Err(DetectionError::Cancelled));
        }
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
