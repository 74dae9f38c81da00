// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hobby-servo driver over 50 Hz PWM.
//!
//! Pulse width is `1.0ms + angle/180 * 1.0ms`; PWM is disabled after each
//! motion to cut holding jitter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::actuator::{ActuatorKind, ActuatorStatus};
use crate::error::ActuatorError;
use crate::hal::PwmOut;

/// PWM carrier frequency for hobby servos.
pub const SERVO_PWM_HZ: f64 = 50.0;

/// Degrees per second the horn is assumed to sweep (60° per 0.2 s).
const SWEEP_RATE_DEG_PER_S: f64 = 300.0;
/// Settling time added to every motion.
const SETTLE: Duration = Duration::from_millis(100);

pub struct Servo {
    pwm: PwmOut,
    current_angle: Mutex<f64>,
    moving: AtomicBool,
    last_fire: Mutex<Option<Instant>>,
}

impl Servo {
    pub fn new(pwm: PwmOut, initial_angle: f64) -> Self {
        Self {
            pwm,
            current_angle: Mutex::new(initial_angle),
            moving: AtomicBool::new(false),
            last_fire: Mutex::new(None),
        }
    }

    pub fn pin(&self) -> u8 {
        self.pwm.pin()
    }

    pub fn current_angle(&self) -> f64 {
        *self.current_angle.lock()
    }

    /// Duty cycle (percent) holding the horn at `angle` degrees.
    pub fn angle_to_duty(angle: f64) -> f64 {
        let angle = angle.clamp(0.0, 180.0);
        let pulse_ms = 1.0 + angle / 180.0;
        let period_ms = 1000.0 / SERVO_PWM_HZ;
        pulse_ms / period_ms * 100.0
    }

    /// Time budget for a sweep from `from` to `to` degrees.
    pub fn motion_time(from: f64, to: f64) -> Duration {
        Duration::from_secs_f64((to - from).abs() / SWEEP_RATE_DEG_PER_S) + SETTLE
    }

    /// Sweep the horn to `angle`, bounded by the motion-time budget, then
    /// cut PWM.
    pub async fn move_to(&self, angle: f64) -> Result<(), ActuatorError> {
        if self.moving.swap(true, Ordering::AcqRel) {
            return Err(ActuatorError::Busy);
        }
        let result = self.move_inner(angle).await;
        self.moving.store(false, Ordering::Release);
        result
    }

    async fn move_inner(&self, angle: f64) -> Result<(), ActuatorError> {
        let angle = angle.clamp(0.0, 180.0);
        let from = *self.current_angle.lock();
        self.pwm.set_duty(Self::angle_to_duty(angle))?;
        *self.last_fire.lock() = Some(Instant::now());

        tokio::time::sleep(Self::motion_time(from, angle)).await;

        *self.current_angle.lock() = angle;
        self.pwm.stop()?;
        Ok(())
    }

    /// Emergency path: cut PWM immediately, wherever the horn is.
    pub async fn deactivate(&self) -> Result<(), ActuatorError> {
        self.pwm.stop()?;
        self.moving.store(false, Ordering::Release);
        Ok(())
    }

    pub fn status(&self) -> ActuatorStatus {
        ActuatorStatus {
            kind: ActuatorKind::Servo,
            active: self.moving.load(Ordering::Acquire),
            last_fire_ts: *self.last_fire.lock(),
        }
    }
}

#[cfg(test)]
#[path = "servo_tests.rs"]
mod tests;
