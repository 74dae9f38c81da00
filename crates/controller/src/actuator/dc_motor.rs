// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DC motor behind an H-bridge: two direction pins plus one PWM pin.
//!
//! Stop is duty 0 followed by both direction pins low; no hard brake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::actuator::{Actuator, ActuatorKind, ActuatorStatus};
use crate::error::ActuatorError;
use crate::hal::{DigitalOut, PwmOut};

pub struct DcMotor {
    pwm: PwmOut,
    dir_a: DigitalOut,
    dir_b: DigitalOut,
    enable: Option<DigitalOut>,
    active: AtomicBool,
    last_fire: Mutex<Option<Instant>>,
}

impl DcMotor {
    pub fn new(
        pwm: PwmOut,
        dir_a: DigitalOut,
        dir_b: DigitalOut,
        enable: Option<DigitalOut>,
    ) -> Self {
        Self {
            pwm,
            dir_a,
            dir_b,
            enable,
            active: AtomicBool::new(false),
            last_fire: Mutex::new(None),
        }
    }

    /// Run forward at `duty_pct`. Caller owns the stop.
    pub fn forward(&self, duty_pct: f64) -> Result<(), ActuatorError> {
        self.run(true, duty_pct)
    }

    /// Run backward at `duty_pct`. Caller owns the stop.
    pub fn backward(&self, duty_pct: f64) -> Result<(), ActuatorError> {
        self.run(false, duty_pct)
    }

    fn run(&self, forward: bool, duty_pct: f64) -> Result<(), ActuatorError> {
        if let Some(ref enable) = self.enable {
            enable.write(true)?;
        }
        self.dir_a.write(forward)?;
        self.dir_b.write(!forward)?;
        self.pwm.set_duty(duty_pct)?;
        self.active.store(true, Ordering::Release);
        *self.last_fire.lock() = Some(Instant::now());
        Ok(())
    }

    /// Duty to 0, then both direction pins low.
    pub fn stop(&self) -> Result<(), ActuatorError> {
        self.pwm.set_duty(0.0)?;
        self.dir_a.write(false)?;
        self.dir_b.write(false)?;
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    /// Emergency path: duty to 0 and enable de-asserted. The carriage is
    /// left where it is.
    pub fn emergency_stop(&self) -> Result<(), ActuatorError> {
        self.pwm.set_duty(0.0)?;
        if let Some(ref enable) = self.enable {
            enable.write(false)?;
        }
        self.active.store(false, Ordering::Release);
        Ok(())
    }
}

impl Actuator for DcMotor {
    /// Timed forward run at `intensity_pct` duty, stopping afterwards.
    async fn activate(&self, duration: Duration, intensity_pct: f64) -> Result<(), ActuatorError> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(ActuatorError::Busy);
        }
        if let Err(e) = self.forward(intensity_pct) {
            self.active.store(false, Ordering::Release);
            return Err(e);
        }
        tokio::time::sleep(duration).await;
        self.stop()
    }

    async fn deactivate(&self) -> Result<(), ActuatorError> {
        self.stop()
    }

    fn status(&self) -> ActuatorStatus {
        ActuatorStatus {
            kind: ActuatorKind::DcMotor,
            active: self.active.load(Ordering::Acquire),
            last_fire_ts: *self.last_fire.lock(),
        }
    }
}

#[cfg(test)]
#[path = "dc_motor_tests.rs"]
mod tests;
