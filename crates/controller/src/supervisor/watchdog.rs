// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watchdog: periodic health checks over workers, queues and fire recency.
//! Two consecutive critical breaches demote a running system to `error`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::detection::Detector;
use crate::metrics::epoch_ms;
use crate::supervisor::alerts::AlertLevel;
use crate::supervisor::state::{StateHandle, SystemState};
use crate::supervisor::Components;

/// Check cadence.
const INTERVAL: Duration = Duration::from_secs(5);
/// A worker silent for this long has stalled.
const HEARTBEAT_STALL_MS: u64 = 15_000;
/// Trigger channel fill ratio worth warning about.
const FILL_WARN: f64 = 0.75;
/// Orchestrator backlog size worth warning about.
const BACKLOG_WARN: usize = 6;
/// Fire recency lag while running, milliseconds.
const FIRE_LAG_MS: u64 = 120_000;

/// One tick's findings.
#[derive(Debug, Default, PartialEq)]
pub struct Assessment {
    pub warnings: Vec<String>,
    pub critical: bool,
}

/// Pure check over the sampled values, kept separate from the loop so it is
/// independently testable.
pub fn assess(
    worker_heartbeats: &[(bool, u64)],
    trigger_fill_ratio: f64,
    backlog_len: usize,
    fire_age_ms: Option<u64>,
    accepting_triggers: bool,
) -> Assessment {
    let mut assessment = Assessment::default();

    for &(model_ready, age_ms) in worker_heartbeats {
        if model_ready && age_ms > HEARTBEAT_STALL_MS {
            assessment.warnings.push(format!("worker heartbeat stalled for {age_ms} ms"));
            assessment.critical = true;
        }
    }
    if trigger_fill_ratio > FILL_WARN {
        assessment
            .warnings
            .push(format!("trigger channel {:.0}% full", trigger_fill_ratio * 100.0));
    }
    if backlog_len >= BACKLOG_WARN {
        assessment.warnings.push(format!("orchestrator backlog at {backlog_len}"));
    }
    if accepting_triggers {
        if let Some(age) = fire_age_ms {
            if age > FIRE_LAG_MS {
                assessment.warnings.push(format!("no labeler fire for {age} ms"));
            }
        }
    }
    assessment
}

/// Spawn the periodic watchdog task.
pub fn spawn_watchdog(
    components: Arc<Components>,
    state: StateHandle,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut consecutive_critical = 0u32;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let detector_status = components.detector.status();
            let heartbeats: Vec<(bool, u64)> = detector_status
                .workers
                .iter()
                .map(|w| (w.model_ready, w.heartbeat_age_ms))
                .collect();
            let stats = &components.orchestrator.stats;
            let last_fire = stats.last_fire_ms.load(Ordering::Relaxed);
            let fire_age = (last_fire > 0).then(|| epoch_ms().saturating_sub(last_fire));
            let current = state.current();

            let assessment = assess(
                &heartbeats,
                components.triggers.fill_ratio(),
                stats.backlog_len.load(Ordering::Relaxed),
                fire_age,
                current.accepts_triggers(),
            );

            for warning in &assessment.warnings {
                components.alerts.raise(
                    AlertLevel::Warning,
                    "watchdog",
                    warning,
                    serde_json::Value::Null,
                );
            }

            if assessment.critical {
                consecutive_critical += 1;
            } else {
                consecutive_critical = 0;
            }

            if consecutive_critical >= 2 && current.accepts_triggers() {
                components.alerts.raise(
                    AlertLevel::Critical,
                    "watchdog",
                    "repeated critical breaches, demoting to error",
                    serde_json::Value::Null,
                );
                let _ = state.transition(SystemState::Error);
                consecutive_critical = 0;
            }
        }
    })
}
