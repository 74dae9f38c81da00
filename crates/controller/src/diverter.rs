// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Diverter bank: three servo flaps, one per category.
//!
//! `classify` waits out the belt-time pre-delay, diverts, holds, and
//! returns the flap. Requests for a flap already mid-cycle are rejected;
//! different flaps operate in parallel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::actuator::Servo;
use crate::config::DiverterSettings;
use crate::error::ActuatorError;
use crate::hal::Hal;
use crate::types::{DiverterCommand, FruitCategory};

pub struct Flap {
    servo: Servo,
    category: FruitCategory,
    straight_angle: f64,
    diverted_angle: f64,
    busy: AtomicBool,
    activations: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlapSnapshot {
    pub category: FruitCategory,
    pub pin: u8,
    pub angle: f64,
    pub busy: bool,
    pub activations: u64,
}

pub struct DiverterBank {
    flaps: Vec<Flap>,
    hold: Duration,
    enabled: bool,
}

/// Clears the flap's busy flag when the cycle ends, on any exit path.
struct BusyGuard<'a> {
    flap: &'a Flap,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flap.busy.store(false, Ordering::Release);
    }
}

impl DiverterBank {
    pub fn new(hal: &Hal, settings: &DiverterSettings) -> Result<Self, crate::error::HalError> {
        let mut flaps = Vec::with_capacity(settings.diverters.len());
        for channel in &settings.diverters {
            let pwm = hal.pwm_out(channel.pin, crate::actuator::servo::SERVO_PWM_HZ)?;
            flaps.push(Flap {
                servo: Servo::new(pwm, channel.straight_angle),
                category: channel.category,
                straight_angle: channel.straight_angle,
                diverted_angle: channel.diverted_angle,
                busy: AtomicBool::new(false),
                activations: AtomicU64::new(0),
            });
        }
        Ok(Self { flaps, hold: settings.activation_duration(), enabled: settings.enabled })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configured hold time for one diversion cycle.
    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Run one full diversion cycle from a pipeline command.
    pub async fn dispatch(
        &self,
        command: DiverterCommand,
        cancel: &CancellationToken,
    ) -> Result<(), ActuatorError> {
        self.classify_with_hold(command.category, command.pre_delay, command.hold, cancel).await
    }

    /// Divert a fruit of `category` after `pre_delay` of belt travel, using
    /// the configured hold time.
    ///
    /// Unknown fruit passes through untouched. Returns `DiverterBusy` when
    /// the flap is already mid-cycle.
    pub async fn classify(
        &self,
        category: FruitCategory,
        pre_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ActuatorError> {
        self.classify_with_hold(category, pre_delay, self.hold, cancel).await
    }

    async fn classify_with_hold(
        &self,
        category: FruitCategory,
        pre_delay: Duration,
        hold: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ActuatorError> {
        if category == FruitCategory::Unknown {
            tracing::debug!("unknown fruit passes straight through");
            return Ok(());
        }
        if !self.enabled {
            return Ok(());
        }
        let flap = self
            .flaps
            .iter()
            .find(|f| f.category == category)
            .ok_or_else(|| {
                ActuatorError::Hal(crate::error::HalError::NotReady(format!(
                    "no diverter flap for {}",
                    category.label()
                )))
            })?;

        if flap.busy.swap(true, Ordering::AcqRel) {
            return Err(ActuatorError::DiverterBusy(category.label().to_owned()));
        }
        let _guard = BusyGuard { flap };

        tokio::select! {
            _ = tokio::time::sleep(pre_delay) => {}
            _ = cancel.cancelled() => return Err(ActuatorError::Cancelled),
        }

        flap.servo.move_to(flap.diverted_angle).await?;
        flap.activations.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            _ = tokio::time::sleep(hold) => {}
            _ = cancel.cancelled() => {
                // Return the flap before giving up so fruit cannot jam.
                flap.servo.move_to(flap.straight_angle).await?;
                return Err(ActuatorError::Cancelled);
            }
        }

        flap.servo.move_to(flap.straight_angle).await?;
        Ok(())
    }

    /// Cut PWM on every flap.
    pub async fn emergency_stop_all(&self) {
        for flap in &self.flaps {
            let _ = flap.servo.deactivate().await;
            flap.busy.store(false, Ordering::Release);
        }
    }

    pub fn snapshot(&self) -> Vec<FlapSnapshot> {
        self.flaps
            .iter()
            .map(|f| FlapSnapshot {
                category: f.category,
                pin: f.servo.pin(),
                angle: f.servo.current_angle(),
                busy: f.busy.load(Ordering::Acquire),
                activations: f.activations.load(Ordering::Relaxed),
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "diverter_tests.rs"]
mod tests;
