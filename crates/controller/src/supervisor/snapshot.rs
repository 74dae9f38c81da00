// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status snapshot: explicit field copies taken under short locks.
//!
//! This is the one type the API serialises, so internal mutable state never
//! couples to the wire format.

use serde::Serialize;
use tokio::time::Instant;

use crate::belt::BeltSnapshot;
use crate::detection::{Detector, DetectorStatus};
use crate::diverter::FlapSnapshot;
use crate::positioner::PositionerSnapshot;
use crate::supervisor::alerts::Alert;
use crate::supervisor::state::{StateHandle, SystemState};
use crate::supervisor::Components;

/// How many alerts ride along in `/status`.
const SNAPSHOT_ALERTS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct LabelerSnapshot {
    pub id: usize,
    pub active: bool,
    pub last_fire_age_s: Option<f64>,
    pub activations: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub wear_pct: f64,
    pub total_runtime_s: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub processed: u64,
    pub noops: u64,
    pub cancelled: u64,
    pub backlog_len: usize,
    pub backlog_dropped: u64,
    pub triggers_accepted: u64,
    pub triggers_dropped: u64,
    pub trigger_fill_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SystemState,
    pub uptime_s: f64,
    pub active_group: Option<u8>,
    pub version: &'static str,
    pub belt: BeltSnapshot,
    pub positioner: PositionerSnapshot,
    pub detector: DetectorStatus,
    pub labelers: Vec<LabelerSnapshot>,
    pub diverters: Vec<FlapSnapshot>,
    pub pipeline: PipelineSnapshot,
    /// Detections saved per actuated category, in group order.
    pub category_counts: [u64; 3],
    pub alerts: Vec<Alert>,
}

/// Copy the live state of every component into one immutable record.
pub fn take(components: &Components, state: &StateHandle, started_at: Instant) -> StatusSnapshot {
    use std::sync::atomic::Ordering;

    let now = Instant::now();
    let stats = &components.orchestrator.stats;

    let labelers = components
        .labelers
        .snapshot()
        .into_iter()
        .enumerate()
        .map(|(id, (status, metrics))| LabelerSnapshot {
            id,
            active: status.active,
            last_fire_age_s: status.last_fire_ts.map(|ts| now.duration_since(ts).as_secs_f64()),
            activations: metrics.activations,
            failures: metrics.failures,
            success_rate: metrics.success_rate(),
            wear_pct: metrics.wear_pct(),
            total_runtime_s: metrics.total_runtime_s,
        })
        .collect();

    StatusSnapshot {
        state: state.current(),
        uptime_s: now.duration_since(started_at).as_secs_f64(),
        active_group: components.positioner.active_group(),
        version: env!("CARGO_PKG_VERSION"),
        belt: components.belt.snapshot(),
        positioner: components.positioner.snapshot(),
        detector: components.detector.status(),
        labelers,
        diverters: components.diverters.snapshot(),
        pipeline: PipelineSnapshot {
            processed: stats.processed.load(Ordering::Relaxed),
            noops: stats.noops.load(Ordering::Relaxed),
            cancelled: stats.cancelled.load(Ordering::Relaxed),
            backlog_len: stats.backlog_len.load(Ordering::Relaxed),
            backlog_dropped: stats.backlog_dropped.load(Ordering::Relaxed),
            triggers_accepted: components.triggers.accepted_count(),
            triggers_dropped: components.triggers.dropped_count(),
            trigger_fill_ratio: components.triggers.fill_ratio(),
        },
        category_counts: components.metrics.detection_counts(),
        alerts: components.alerts.recent(SNAPSHOT_ALERTS),
    }
}
