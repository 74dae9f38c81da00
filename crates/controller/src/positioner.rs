// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Group positioner: the DC-motor lift that selects which labeler group is
//! engaged.
//!
//! Exactly one group is down whenever the positioner is calibrated; after
//! emergency-stop that invariant is deliberately relaxed and the carriage is
//! left where it is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::actuator::DcMotor;
use crate::error::ActuatorError;
use crate::types::NUM_LABELER_GROUPS;

/// Time to raise or lower one group.
const LIFT_TIME: Duration = Duration::from_millis(1500);
/// Lift duty cycle.
const LIFT_DUTY: f64 = 60.0;
/// Simulated self-calibration sweep.
const CALIBRATION_TIME: Duration = Duration::from_secs(2);
/// Hard ceiling on any single move.
const MOVE_CEILING: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPosition {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PositionerSnapshot {
    pub active_group: Option<u8>,
    pub moving: bool,
    pub calibrated: bool,
    pub group_positions: [GroupPosition; NUM_LABELER_GROUPS],
}

#[derive(Debug)]
struct State {
    active_group: Option<u8>,
    moving: bool,
    calibrated: bool,
}

pub struct Positioner {
    motor: DcMotor,
    state: Mutex<State>,
    /// Serialises moves so two callers cannot drive the motor at once.
    move_lock: tokio::sync::Mutex<()>,
    /// Set by emergency-stop; blocks new motor phases until recalibration.
    halted: AtomicBool,
}

impl Positioner {
    pub fn new(motor: DcMotor) -> Self {
        Self {
            motor,
            state: Mutex::new(State { active_group: None, moving: false, calibrated: false }),
            move_lock: tokio::sync::Mutex::new(()),
            halted: AtomicBool::new(false),
        }
    }

    /// Self-calibration sweep establishing the reference position. Leaves
    /// group 0 engaged.
    pub async fn calibrate(&self) -> Result<(), ActuatorError> {
        tracing::info!("positioner calibration sweep started");
        let _guard = self.move_lock.lock().await;
        tokio::time::sleep(CALIBRATION_TIME).await;
        self.halted.store(false, Ordering::Release);
        let mut state = self.state.lock();
        state.calibrated = true;
        state.active_group = Some(0);
        tracing::info!("positioner calibrated, group 0 engaged");
        Ok(())
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.lock().calibrated
    }

    pub fn is_moving(&self) -> bool {
        self.state.lock().moving
    }

    pub fn active_group(&self) -> Option<u8> {
        self.state.lock().active_group
    }

    /// Expected duration of a move to `target`, for scheduling. Zero when
    /// the group is already engaged.
    pub fn expected_move_time(&self, target: u8) -> Duration {
        let state = self.state.lock();
        if state.active_group == Some(target) {
            Duration::ZERO
        } else if state.active_group.is_some() {
            // Raise the engaged group, then lower the target.
            LIFT_TIME * 2
        } else {
            LIFT_TIME
        }
    }

    /// Engage `target`: raise the currently-engaged group, lower the target.
    ///
    /// Idempotent when the target is already engaged. Honours `cancel`
    /// between and during the two motor phases; a cancelled move leaves the
    /// carriage indeterminate (`active_group = None`).
    pub async fn activate_group(
        &self,
        target: u8,
        cancel: &CancellationToken,
    ) -> Result<(), ActuatorError> {
        if target as usize >= NUM_LABELER_GROUPS {
            return Err(ActuatorError::Hal(crate::error::HalError::NotReady(format!(
                "no labeler group {target}"
            ))));
        }
        if !self.is_calibrated() {
            return Err(ActuatorError::NotCalibrated);
        }

        let _guard = self.move_lock.lock().await;

        let raise_from = {
            let mut state = self.state.lock();
            if state.active_group == Some(target) {
                return Ok(());
            }
            state.moving = true;
            state.active_group
        };
        tracing::info!(target, from = ?raise_from, "positioner move started");

        let result = tokio::time::timeout(MOVE_CEILING, async {
            if raise_from.is_some() {
                self.run_phase(true, cancel).await?;
            }
            self.run_phase(false, cancel).await
        })
        .await
        .unwrap_or(Err(ActuatorError::Cancelled));

        let mut state = self.state.lock();
        state.moving = false;
        match result {
            Ok(()) => {
                state.active_group = Some(target);
                tracing::info!(target, "positioner move complete");
                Ok(())
            }
            Err(e) => {
                state.active_group = None;
                tracing::warn!(target, err = %e, "positioner move aborted");
                Err(e)
            }
        }
    }

    /// One motor phase: raise (forward) or lower (backward) for the lift
    /// time, stopping the motor on every exit path.
    async fn run_phase(&self, raise: bool, cancel: &CancellationToken) -> Result<(), ActuatorError> {
        if self.halted.load(Ordering::Acquire) {
            return Err(ActuatorError::Cancelled);
        }
        if raise {
            self.motor.forward(LIFT_DUTY)?;
        } else {
            self.motor.backward(LIFT_DUTY)?;
        }
        let outcome = tokio::select! {
            _ = tokio::time::sleep(LIFT_TIME) => Ok(()),
            _ = cancel.cancelled() => Err(ActuatorError::Cancelled),
        };
        self.motor.stop()?;
        outcome
    }

    /// Cut PWM, de-assert enable, clear `moving`. No attempt to park; an
    /// in-flight move will not restart the motor.
    pub fn emergency_stop(&self) -> Result<(), ActuatorError> {
        self.halted.store(true, Ordering::Release);
        self.motor.emergency_stop()?;
        let mut state = self.state.lock();
        state.moving = false;
        Ok(())
    }

    pub fn snapshot(&self) -> PositionerSnapshot {
        let state = self.state.lock();
        let mut group_positions = [GroupPosition::Up; NUM_LABELER_GROUPS];
        if let Some(active) = state.active_group {
            if (active as usize) < NUM_LABELER_GROUPS && state.calibrated {
                group_positions[active as usize] = GroupPosition::Down;
            }
        }
        PositionerSnapshot {
            active_group: state.active_group,
            moving: state.moving,
            calibrated: state.calibrated,
            group_positions,
        }
    }
}

#[cfg(test)]
#[path = "positioner_tests.rs"]
mod tests;
