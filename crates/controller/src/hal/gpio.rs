// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GPIO backend contract and the typed output handles built on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::HalError;

/// A raw edge event from the driver's interrupt context.
///
/// Edges are marshalled through a channel; no work runs on the interrupt
/// thread itself.
#[derive(Debug, Clone, Copy)]
pub struct RawEdge {
    pub pin: u8,
    pub ts: Instant,
}

/// Contract every GPIO driver must honour. Each pin is exclusively owned by
/// one handle; concurrent writes are impossible by construction.
pub trait GpioBackend: Send + Sync {
    fn write(&self, pin: u8, level: bool) -> Result<(), HalError>;
    fn read(&self, pin: u8) -> Result<bool, HalError>;
    fn pwm_start(&self, pin: u8, frequency_hz: f64) -> Result<(), HalError>;
    fn pwm_set_duty(&self, pin: u8, duty_pct: f64) -> Result<(), HalError>;
    fn pwm_stop(&self, pin: u8) -> Result<(), HalError>;
    /// Subscribe to edge events on an input pin.
    fn subscribe_edges(&self, pin: u8) -> Result<broadcast::Receiver<RawEdge>, HalError>;
    /// Release a pin claimed by a handle. Idempotent.
    fn release(&self, pin: u8);
}

/// Exclusive digital output line.
pub struct DigitalOut {
    backend: Arc<dyn GpioBackend>,
    pin: u8,
    active_high: bool,
    closed: AtomicBool,
}

impl DigitalOut {
    pub fn open(
        backend: Arc<dyn GpioBackend>,
        pin: u8,
        active_high: bool,
    ) -> Result<Self, HalError> {
        // Drive the line inactive on open so the actuator starts released.
        backend.write(pin, !active_high)?;
        Ok(Self { backend, pin, active_high, closed: AtomicBool::new(false) })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Drive the line. `true` means logically active; polarity is applied
    /// here so callers never see `active_high`.
    pub fn write(&self, active: bool) -> Result<(), HalError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HalError::NotReady(format!("pin {} closed", self.pin)));
        }
        self.backend.write(self.pin, active == self.active_high)
    }

    /// Release the line, driving it inactive first. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.backend.write(self.pin, !self.active_high);
        self.backend.release(self.pin);
    }
}

impl Drop for DigitalOut {
    fn drop(&mut self) {
        self.close();
    }
}

/// Exclusive PWM output channel.
pub struct PwmOut {
    backend: Arc<dyn GpioBackend>,
    pin: u8,
    frequency_hz: f64,
    started: AtomicBool,
    closed: AtomicBool,
}

impl PwmOut {
    pub fn open(
        backend: Arc<dyn GpioBackend>,
        pin: u8,
        frequency_hz: f64,
    ) -> Result<Self, HalError> {
        Ok(Self {
            backend,
            pin,
            frequency_hz,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Set the duty cycle in percent, starting the channel on first use.
    pub fn set_duty(&self, duty_pct: f64) -> Result<(), HalError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HalError::NotReady(format!("pwm {} closed", self.pin)));
        }
        if !self.started.swap(true, Ordering::AcqRel) {
            self.backend.pwm_start(self.pin, self.frequency_hz)?;
        }
        self.backend.pwm_set_duty(self.pin, duty_pct.clamp(0.0, 100.0))
    }

    /// Stop generating pulses without releasing the pin.
    pub fn stop(&self) -> Result<(), HalError> {
        if self.started.swap(false, Ordering::AcqRel) {
            self.backend.pwm_stop(self.pin)?;
        }
        Ok(())
    }

    /// Stop and release the channel. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.stop();
        self.backend.release(self.pin);
    }
}

impl Drop for PwmOut {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "gpio_tests.rs"]
mod tests;
