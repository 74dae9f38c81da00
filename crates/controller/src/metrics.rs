// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics store contract and the in-memory implementation.
//!
//! The persistent store is an external collaborator; the trait here is its
//! interface contract. The in-memory implementation backs tests, the status
//! snapshot, and installations without a database.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, FruitCategory};

/// Wall-clock milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub ts_ms: u64,
    pub category: FruitCategory,
    pub confidence: f64,
    pub processing_time_ms: f64,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingRecord {
    pub ts_ms: u64,
    pub labeler_id: usize,
    pub category: FruitCategory,
    pub duration_s: f64,
    pub success: bool,
    /// Group position at fire time.
    pub position: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub ts_ms: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: u64,
    pub ts_ms: u64,
    pub level: String,
    pub component: String,
    pub message: String,
    pub details: serde_json::Value,
    pub resolved: bool,
    pub resolution_ts_ms: Option<u64>,
    pub occurrence_count: u32,
}

/// Contract the persistent metrics store must honour. Storage format is
/// opaque to the core.
pub trait MetricsStore: Send + Sync {
    fn save_detection(&self, record: DetectionRecord);
    fn save_labeling(&self, record: LabelingRecord);
    fn save_metric(&self, record: MetricRecord);
    fn save_alert(&self, record: AlertRecord);
}

/// Bounded in-memory store.
pub struct MemoryMetricsStore {
    capacity: usize,
    detections: Mutex<VecDeque<DetectionRecord>>,
    labelings: Mutex<VecDeque<LabelingRecord>>,
    metrics: Mutex<VecDeque<MetricRecord>>,
    alerts: Mutex<VecDeque<AlertRecord>>,
    detection_counts: [AtomicU64; 3],
    labeling_count: AtomicU64,
}

impl MemoryMetricsStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            detections: Mutex::new(VecDeque::new()),
            labelings: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(VecDeque::new()),
            alerts: Mutex::new(VecDeque::new()),
            detection_counts: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            labeling_count: AtomicU64::new(0),
        }
    }

    /// Detections saved per actuated category, in group order.
    pub fn detection_counts(&self) -> [u64; 3] {
        [
            self.detection_counts[0].load(Ordering::Relaxed),
            self.detection_counts[1].load(Ordering::Relaxed),
            self.detection_counts[2].load(Ordering::Relaxed),
        ]
    }

    pub fn labeling_count(&self) -> u64 {
        self.labeling_count.load(Ordering::Relaxed)
    }

    pub fn recent_detections(&self, n: usize) -> Vec<DetectionRecord> {
        let ring = self.detections.lock();
        ring.iter().rev().take(n).cloned().collect()
    }

    pub fn recent_metrics(&self, n: usize) -> Vec<MetricRecord> {
        let ring = self.metrics.lock();
        ring.iter().rev().take(n).cloned().collect()
    }

    pub fn recent_labelings(&self, n: usize) -> Vec<LabelingRecord> {
        let ring = self.labelings.lock();
        ring.iter().rev().take(n).cloned().collect()
    }

    fn push_bounded<T>(&self, ring: &Mutex<VecDeque<T>>, item: T) {
        let mut ring = ring.lock();
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(item);
    }
}

impl Default for MemoryMetricsStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MetricsStore for MemoryMetricsStore {
    fn save_detection(&self, record: DetectionRecord) {
        if let Some(group) = record.category.group() {
            self.detection_counts[group as usize].fetch_add(1, Ordering::Relaxed);
        }
        self.push_bounded(&self.detections, record);
    }

    fn save_labeling(&self, record: LabelingRecord) {
        self.labeling_count.fetch_add(1, Ordering::Relaxed);
        self.push_bounded(&self.labelings, record);
    }

    fn save_metric(&self, record: MetricRecord) {
        self.push_bounded(&self.metrics, record);
    }

    fn save_alert(&self, record: AlertRecord) {
        self.push_bounded(&self.alerts, record);
    }
}
