// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actuator drivers with a uniform activate/deactivate contract.
//!
//! Every driver refuses `activate` while already active and guarantees
//! release on any exit path. Emergency-stop reaches every driver through
//! `deactivate`.

pub mod dc_motor;
pub mod servo;
pub mod solenoid;
pub mod stepper;

use std::time::Duration;

use tokio::time::Instant;

use crate::error::ActuatorError;

pub use dc_motor::DcMotor;
pub use servo::Servo;
pub use solenoid::Solenoid;
pub use stepper::Stepper;

/// Driver variant tag, surfaced in status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    Solenoid,
    Servo,
    Stepper,
    DcMotor,
}

/// Live status of one driver.
#[derive(Debug, Clone, Copy)]
pub struct ActuatorStatus {
    pub kind: ActuatorKind,
    pub active: bool,
    pub last_fire_ts: Option<Instant>,
}

/// The common driver contract.
pub trait Actuator {
    /// Run the actuator for `duration` at `intensity_pct`. Fails with
    /// [`ActuatorError::Busy`] while already active.
    fn activate(
        &self,
        duration: Duration,
        intensity_pct: f64,
    ) -> impl std::future::Future<Output = Result<(), ActuatorError>> + Send;

    /// Force the actuator off. Used by emergency-stop; must return quickly.
    fn deactivate(
        &self,
    ) -> impl std::future::Future<Output = Result<(), ActuatorError>> + Send;

    fn status(&self) -> ActuatorStatus;
}
