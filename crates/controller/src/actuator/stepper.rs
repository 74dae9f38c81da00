// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DRV8825 stepper driver.
//!
//! Intensity translates to step rate; the enable line is asserted only for
//! the duration of the run. Pulse generation happens on a blocking thread;
//! the pulse loop is the one place allowed to busy-wait, and only for the
//! half-pulse width.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::actuator::{Actuator, ActuatorKind, ActuatorStatus};
use crate::error::ActuatorError;
use crate::hal::DigitalOut;

/// Minimum half-pulse width the DRV8825 accepts.
const HALF_PULSE: Duration = Duration::from_micros(1);

pub struct Stepper {
    step: Arc<DigitalOut>,
    dir: DigitalOut,
    enable: Option<DigitalOut>,
    active: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    last_fire: Mutex<Option<Instant>>,
}

impl Stepper {
    /// `enable` is the driver's active-low enable line, already wired with
    /// the right polarity so `write(true)` enables the chip.
    pub fn new(step: DigitalOut, dir: DigitalOut, enable: Option<DigitalOut>) -> Self {
        Self {
            step: Arc::new(step),
            dir,
            enable,
            active: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            last_fire: Mutex::new(None),
        }
    }

    /// Step rate law: `max(100, 3000 * intensity / 100)` steps per second.
    pub fn steps_per_sec(intensity_pct: f64) -> f64 {
        (3000.0 * intensity_pct / 100.0).max(100.0)
    }

    pub fn set_direction(&self, forward: bool) -> Result<(), ActuatorError> {
        self.dir.write(forward)?;
        Ok(())
    }
}

impl Actuator for Stepper {
    async fn activate(&self, duration: Duration, intensity_pct: f64) -> Result<(), ActuatorError> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(ActuatorError::Busy);
        }
        self.cancel.store(false, Ordering::Release);
        if let Some(ref enable) = self.enable {
            enable.write(true)?;
        }
        *self.last_fire.lock() = Some(Instant::now());

        let step = Arc::clone(&self.step);
        let cancel = Arc::clone(&self.cancel);
        let rate = Self::steps_per_sec(intensity_pct);
        let pulses = tokio::task::spawn_blocking(move || run_pulses(&step, rate, duration, &cancel))
            .await
            .map_err(|_| ActuatorError::Cancelled)
            .and_then(|r| r);

        if let Some(ref enable) = self.enable {
            enable.write(false)?;
        }
        self.active.store(false, Ordering::Release);
        pulses
    }

    async fn deactivate(&self) -> Result<(), ActuatorError> {
        self.cancel.store(true, Ordering::Release);
        if let Some(ref enable) = self.enable {
            enable.write(false)?;
        }
        self.step.write(false)?;
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    fn status(&self) -> ActuatorStatus {
        ActuatorStatus {
            kind: ActuatorKind::Stepper,
            active: self.active.load(Ordering::Acquire),
            last_fire_ts: *self.last_fire.lock(),
        }
    }
}

/// Square-pulse loop. Runs on a blocking thread; honours the cancel flag
/// between pulses.
fn run_pulses(
    step: &DigitalOut,
    steps_per_sec: f64,
    duration: Duration,
    cancel: &AtomicBool,
) -> Result<(), ActuatorError> {
    let interval = Duration::from_secs_f64(1.0 / steps_per_sec);
    let low_time = interval.saturating_sub(HALF_PULSE);
    let end = std::time::Instant::now() + duration;

    while std::time::Instant::now() < end {
        if cancel.load(Ordering::Acquire) {
            return Err(ActuatorError::Cancelled);
        }
        step.write(true)?;
        std::thread::sleep(HALF_PULSE);
        step.write(false)?;
        std::thread::sleep(low_time);
    }
    Ok(())
}

#[cfg(test)]
#[path = "stepper_tests.rs"]
mod tests;
