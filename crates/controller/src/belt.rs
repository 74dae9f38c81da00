// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conveyor belt controller: two relay lines for direction, a commanded
//! speed read by the scheduler.
//!
//! The speed value is read-heavy; it sits behind a short lock and is
//! snapshotted atomically at scheduling time.

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::BeltSettings;
use crate::error::ActuatorError;
use crate::hal::{DigitalOut, Hal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeltDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BeltSnapshot {
    pub running: bool,
    pub direction: BeltDirection,
    pub speed_mps: f64,
}

#[derive(Debug)]
struct State {
    running: bool,
    direction: BeltDirection,
    speed_mps: f64,
}

pub struct Belt {
    forward_relay: DigitalOut,
    backward_relay: DigitalOut,
    state: RwLock<State>,
}

impl Belt {
    pub fn new(hal: &Hal, settings: &BeltSettings) -> Result<Self, crate::error::HalError> {
        let active_high = !settings.is_active_low;
        Ok(Self {
            forward_relay: hal.digital_out(settings.pin_forward_relay, active_high)?,
            backward_relay: hal.digital_out(settings.pin_backward_relay, active_high)?,
            state: RwLock::new(State {
                running: false,
                direction: BeltDirection::Forward,
                speed_mps: settings.belt_speed_mps,
            }),
        })
    }

    pub fn start_forward(&self) -> Result<(), ActuatorError> {
        self.backward_relay.write(false)?;
        self.forward_relay.write(true)?;
        let mut state = self.state.write();
        state.running = true;
        state.direction = BeltDirection::Forward;
        tracing::info!("belt started forward");
        Ok(())
    }

    pub fn start_backward(&self) -> Result<(), ActuatorError> {
        self.forward_relay.write(false)?;
        self.backward_relay.write(true)?;
        let mut state = self.state.write();
        state.running = true;
        state.direction = BeltDirection::Backward;
        tracing::info!("belt started backward");
        Ok(())
    }

    pub fn stop(&self) -> Result<(), ActuatorError> {
        self.forward_relay.write(false)?;
        self.backward_relay.write(false)?;
        self.state.write().running = false;
        tracing::info!("belt stopped");
        Ok(())
    }

    /// Emergency path; identical to stop for a relay-driven belt.
    pub fn emergency_brake(&self) -> Result<(), ActuatorError> {
        self.stop()
    }

    /// Update the commanded speed. Rejects non-positive values so the
    /// scheduler never divides by zero.
    pub fn set_speed(&self, speed_mps: f64) -> Result<(), ActuatorError> {
        if speed_mps <= 0.0 || !speed_mps.is_finite() {
            return Err(ActuatorError::Hal(crate::error::HalError::NotReady(format!(
                "invalid belt speed {speed_mps}"
            ))));
        }
        self.state.write().speed_mps = speed_mps;
        Ok(())
    }

    /// Commanded speed, snapshotted at scheduling time.
    pub fn speed_mps(&self) -> f64 {
        self.state.read().speed_mps
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    pub fn snapshot(&self) -> BeltSnapshot {
        let state = self.state.read();
        BeltSnapshot {
            running: state.running,
            direction: state.direction,
            speed_mps: state.speed_mps,
        }
    }
}

#[cfg(test)]
#[path = "belt_tests.rs"]
mod tests;
