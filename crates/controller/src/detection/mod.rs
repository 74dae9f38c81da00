// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detection service: a bounded pool of inference workers fronted by a
//! priority queue and a dedup cache.
//!
//! Workers are dedicated OS threads, each owning its model instance; the
//! model call is CPU-heavy and must not run on the cooperative scheduler.
//! Results correlate by request id, never by completion order.

pub mod cache;
pub mod model;
pub mod queue;
pub mod service;
pub mod worker;

pub use cache::DedupCache;
pub use model::{MockModel, ModelFactory, RawDetection, VisionModel};
pub use queue::{PushError, RequestQueue};
pub use service::{Detector, DetectionService, DetectorState, DetectorStatus};
