// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delay arithmetic converting belt speed and station distances into fire
//! times. Pure functions, anchored on the trigger timestamp.

use std::time::Duration;

use tokio::time::Instant;

/// Base labeling hold time.
const LABELING_BASE: f64 = 2.0;
/// Extra hold per detected fruit.
const LABELING_PER_FRUIT: f64 = 0.3;
/// Hold ceiling.
const LABELING_CAP: f64 = 10.0;

/// Station distances and the preroll compensation, snapshotted from config.
#[derive(Debug, Clone, Copy)]
pub struct LineGeometry {
    pub distance_camera_to_labeler_m: f64,
    pub distance_labeler_to_diverter_m: f64,
    pub preroll: Duration,
}

/// The planned fire times for one trigger.
#[derive(Debug, Clone, Copy)]
pub struct FirePlan {
    /// When the labeler group fires.
    pub fire_at: Instant,
    /// When the diverter flap starts moving.
    pub divert_at: Instant,
    /// Labeler hold time.
    pub labeling_duration: Duration,
}

/// Belt travel time over `distance_m` at `speed_mps`.
pub fn belt_time(distance_m: f64, speed_mps: f64) -> Duration {
    if speed_mps <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(distance_m / speed_mps)
}

/// Hold time: `2.0 s + 0.3 s per fruit`, capped at 10 s.
pub fn labeling_duration(fruit_count: usize) -> Duration {
    Duration::from_secs_f64((LABELING_BASE + LABELING_PER_FRUIT * fruit_count as f64).min(LABELING_CAP))
}

/// Plan the fire times for a trigger at `t0`.
///
/// The labeler fires after the belt carries the fruit to the labeler
/// station, pushed out by any pending positioner move and the preroll
/// compensation; the diverter fires one more belt leg later. Belt speed is
/// snapshotted by the caller at scheduling time.
pub fn plan(
    t0: Instant,
    positioner_move: Duration,
    belt_speed_mps: f64,
    geometry: &LineGeometry,
    fruit_count: usize,
) -> FirePlan {
    let to_labeler = belt_time(geometry.distance_camera_to_labeler_m, belt_speed_mps);
    let to_diverter = belt_time(geometry.distance_labeler_to_diverter_m, belt_speed_mps);
    let fire_at = t0 + positioner_move + to_labeler + geometry.preroll;
    FirePlan {
        fire_at,
        divert_at: fire_at + to_diverter,
        labeling_duration: labeling_duration(fruit_count),
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
