// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-solenoid driver: output high for the duration, then low.
//!
//! Release is guaranteed on every exit path, including cancellation of the
//! activate future mid-hold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::actuator::{Actuator, ActuatorKind, ActuatorStatus};
use crate::error::ActuatorError;
use crate::hal::DigitalOut;

pub struct Solenoid {
    line: DigitalOut,
    active: AtomicBool,
    last_fire: Mutex<Option<Instant>>,
}

impl Solenoid {
    pub fn new(line: DigitalOut) -> Self {
        Self { line, active: AtomicBool::new(false), last_fire: Mutex::new(None) }
    }

    pub fn pin(&self) -> u8 {
        self.line.pin()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Drives the line low when dropped, so a cancelled hold still releases.
struct ReleaseGuard<'a> {
    solenoid: &'a Solenoid,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        let _ = self.solenoid.line.write(false);
        self.solenoid.active.store(false, Ordering::Release);
    }
}

impl Actuator for Solenoid {
    /// Energise for `duration`. `intensity_pct` is ignored: a solenoid is
    /// binary.
    async fn activate(&self, duration: Duration, _intensity_pct: f64) -> Result<(), ActuatorError> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(ActuatorError::Busy);
        }
        let guard = ReleaseGuard { solenoid: self };
        self.line.write(true)?;
        *self.last_fire.lock() = Some(Instant::now());

        tokio::time::sleep(duration).await;

        // A concurrent deactivate (emergency-stop) already cleared the flag;
        // report the cut-short hold as cancelled.
        let cancelled = !self.active.load(Ordering::Acquire);
        drop(guard);
        if cancelled {
            Err(ActuatorError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn deactivate(&self) -> Result<(), ActuatorError> {
        self.line.write(false)?;
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    fn status(&self) -> ActuatorStatus {
        ActuatorStatus {
            kind: ActuatorKind::Solenoid,
            active: self.active.load(Ordering::Acquire),
            last_fire_ts: *self.last_fire.lock(),
        }
    }
}

#[cfg(test)]
#[path = "solenoid_tests.rs"]
mod tests;
