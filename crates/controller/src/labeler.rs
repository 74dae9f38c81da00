// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Labeler manager: six solenoid heads grouped two per category.
//!
//! A group fires in parallel with per-head retry; head failures become
//! `failed_ids` in the outcome rather than errors, and the caller decides
//! policy.

use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::actuator::{Actuator, ActuatorStatus, Solenoid};
use crate::error::ActuatorError;
use crate::types::{FruitCategory, LabelingCommand, NUM_LABELERS};

/// Retries after the initial attempt.
const MAX_RETRIES: u32 = 3;
/// Exponential backoff schedule, capped at 4 s.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(4);
/// Ceiling on the emergency-stop fan-out.
const ESTOP_CEILING: Duration = Duration::from_millis(500);

/// Rolling per-head counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HeadMetrics {
    pub activations: u64,
    pub failures: u64,
    pub cancelled: u64,
    pub total_runtime_s: f64,
    pub cycles: u64,
}

impl HeadMetrics {
    pub fn success_rate(&self) -> f64 {
        let attempts = self.activations + self.failures;
        if attempts == 0 {
            1.0
        } else {
            self.activations as f64 / attempts as f64
        }
    }

    /// Wear estimate in percent: one point per thousand cycles, capped.
    pub fn wear_pct(&self) -> f64 {
        (self.cycles as f64 / 1000.0).min(100.0)
    }
}

/// Result of one group fire.
#[derive(Debug, Clone, Default)]
pub struct GroupFireOutcome {
    pub success_count: usize,
    pub failed_ids: Vec<usize>,
    /// Heads whose hold was cut short by emergency-stop. Accounted
    /// separately from failures.
    pub cancelled_ids: Vec<usize>,
}

impl GroupFireOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed_ids.is_empty() && self.cancelled_ids.is_empty()
    }
}

pub struct LabelerManager {
    heads: Vec<Solenoid>,
    metrics: Vec<Mutex<HeadMetrics>>,
}

impl LabelerManager {
    pub fn new(heads: Vec<Solenoid>) -> Self {
        let metrics = heads.iter().map(|_| Mutex::new(HeadMetrics::default())).collect();
        Self { heads, metrics }
    }

    pub fn head_count(&self) -> usize {
        self.heads.len()
    }

    /// Wall-clock ceiling for one head fire: `max(1, min(duration+2, 30))`.
    pub fn head_timeout(duration: Duration) -> Duration {
        Duration::from_secs_f64((duration.as_secs_f64() + 2.0).clamp(1.0, 30.0))
    }

    /// Execute a labeling command, dropping it if its deadline has passed.
    pub async fn execute(&self, command: LabelingCommand) -> Option<GroupFireOutcome> {
        if command.is_stale(Instant::now()) {
            tracing::warn!(group = command.target_group, "stale labeling command dropped");
            return None;
        }
        Some(self.activate_group(command.target_group, command.duration).await)
    }

    /// Fire every head of `group` simultaneously for `duration`.
    ///
    /// Per-head failures are retried with exponential backoff; heads that
    /// still fail land in `failed_ids`. The manager never raises.
    pub async fn activate_group(&self, group: u8, duration: Duration) -> GroupFireOutcome {
        let Some(category) = FruitCategory::from_group(group) else {
            tracing::warn!(group, "fire requested for unknown group");
            return GroupFireOutcome::default();
        };

        let fires = category
            .labeler_ids()
            .iter()
            .filter(|&&id| id < self.heads.len())
            .map(|&id| async move { (id, self.fire_head(id, duration).await) });

        let mut outcome = GroupFireOutcome::default();
        for (id, result) in join_all(fires).await {
            match result {
                Ok(()) => outcome.success_count += 1,
                Err(ActuatorError::Cancelled) => outcome.cancelled_ids.push(id),
                Err(_) => outcome.failed_ids.push(id),
            }
        }
        outcome
    }

    /// One head: initial attempt plus up to three retries, each bounded by
    /// the per-head wall-clock timeout.
    async fn fire_head(&self, id: usize, duration: Duration) -> Result<(), ActuatorError> {
        let ceiling = Self::head_timeout(duration);
        let mut backoff = BACKOFF_BASE;

        for attempt in 0..=MAX_RETRIES {
            let result = match tokio::time::timeout(ceiling, self.heads[id].activate(duration, 100.0))
                .await
            {
                Ok(r) => r,
                // The dropped hold released via its guard; treat as a failure.
                Err(_) => Err(ActuatorError::Hal(crate::error::HalError::NotReady(
                    "head fire timed out".to_owned(),
                ))),
            };

            {
                let mut m = self.metrics[id].lock();
                m.cycles += 1;
                match &result {
                    Ok(()) => {
                        m.activations += 1;
                        m.total_runtime_s += duration.as_secs_f64();
                    }
                    Err(ActuatorError::Cancelled) => m.cancelled += 1,
                    Err(_) => m.failures += 1,
                }
            }

            match result {
                Ok(()) => return Ok(()),
                // A cut-short hold is final; it must not re-fire.
                Err(ActuatorError::Cancelled) => return Err(ActuatorError::Cancelled),
                Err(e) if attempt == MAX_RETRIES => return Err(e),
                Err(e) => {
                    tracing::debug!(head = id, attempt, err = %e, "head fire failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
        Err(ActuatorError::Busy)
    }

    /// Dispatch deactivate to every head concurrently; returns once all have
    /// released or the 500 ms ceiling elapses.
    pub async fn emergency_stop_all(&self) {
        let releases = self.heads.iter().map(|head| head.deactivate());
        if tokio::time::timeout(ESTOP_CEILING, join_all(releases)).await.is_err() {
            tracing::warn!("labeler emergency stop exceeded the release ceiling");
        }
    }

    pub fn head_status(&self, id: usize) -> Option<ActuatorStatus> {
        self.heads.get(id).map(|h| h.status())
    }

    pub fn head_metrics(&self, id: usize) -> Option<HeadMetrics> {
        self.metrics.get(id).map(|m| *m.lock())
    }

    /// Snapshot every head for the API.
    pub fn snapshot(&self) -> Vec<(ActuatorStatus, HeadMetrics)> {
        (0..self.heads.len())
            .map(|id| (self.heads[id].status(), *self.metrics[id].lock()))
            .collect()
    }

    /// Any head currently energised.
    pub fn any_active(&self) -> bool {
        self.heads.iter().any(|h| h.is_active())
    }
}

/// Build the full six-head bank from sequential pins.
pub fn build_heads(
    hal: &crate::hal::Hal,
    base_pin: u8,
) -> Result<Vec<Solenoid>, crate::error::HalError> {
    (0..NUM_LABELERS as u8)
        .map(|i| hal.digital_out(base_pin + i, true).map(Solenoid::new))
        .collect()
}

#[cfg(test)]
#[path = "labeler_tests.rs"]
mod tests;
