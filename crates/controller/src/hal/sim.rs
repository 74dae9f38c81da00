// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simulation GPIO backend.
//!
//! Honours every contract of [`GpioBackend`], records writes so tests can
//! observe pin state, and lets tests inject edges as a driver interrupt
//! would.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::HalError;
use crate::hal::gpio::{GpioBackend, RawEdge};

#[derive(Default)]
struct SimPins {
    levels: HashMap<u8, bool>,
    duty: HashMap<u8, f64>,
    pwm_running: HashMap<u8, bool>,
    /// Pins forced to fail, for fault-escalation tests.
    faulted: HashMap<u8, String>,
}

/// In-memory GPIO backend.
pub struct SimGpio {
    pins: Mutex<SimPins>,
    edge_tx: broadcast::Sender<RawEdge>,
}

impl SimGpio {
    pub fn new() -> Self {
        let (edge_tx, _) = broadcast::channel(256);
        Self { pins: Mutex::new(SimPins::default()), edge_tx }
    }

    /// Current logic level of a pin, if ever written.
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.pins.lock().levels.get(&pin).copied()
    }

    /// Current PWM duty of a pin, if ever set.
    pub fn duty(&self, pin: u8) -> Option<f64> {
        self.pins.lock().duty.get(&pin).copied()
    }

    /// Whether the PWM channel on a pin is generating pulses.
    pub fn pwm_running(&self, pin: u8) -> bool {
        self.pins.lock().pwm_running.get(&pin).copied().unwrap_or(false)
    }

    /// Force all operations on a pin to fail with `HardwareFault`.
    pub fn inject_fault(&self, pin: u8, reason: &str) {
        self.pins.lock().faulted.insert(pin, reason.to_owned());
    }

    /// Clear an injected fault.
    pub fn clear_fault(&self, pin: u8) {
        self.pins.lock().faulted.remove(&pin);
    }

    /// Deliver an edge event as the driver interrupt thread would.
    pub fn inject_edge(&self, pin: u8) {
        let _ = self.edge_tx.send(RawEdge { pin, ts: Instant::now() });
    }

    fn check_fault(&self, pin: u8) -> Result<(), HalError> {
        if let Some(reason) = self.pins.lock().faulted.get(&pin) {
            return Err(HalError::HardwareFault(format!("pin {pin}: {reason}")));
        }
        Ok(())
    }
}

impl Default for SimGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioBackend for SimGpio {
    fn write(&self, pin: u8, level: bool) -> Result<(), HalError> {
        self.check_fault(pin)?;
        self.pins.lock().levels.insert(pin, level);
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool, HalError> {
        self.check_fault(pin)?;
        Ok(self.pins.lock().levels.get(&pin).copied().unwrap_or(false))
    }

    fn pwm_start(&self, pin: u8, _frequency_hz: f64) -> Result<(), HalError> {
        self.check_fault(pin)?;
        let mut pins = self.pins.lock();
        pins.pwm_running.insert(pin, true);
        pins.duty.entry(pin).or_insert(0.0);
        Ok(())
    }

    fn pwm_set_duty(&self, pin: u8, duty_pct: f64) -> Result<(), HalError> {
        self.check_fault(pin)?;
        self.pins.lock().duty.insert(pin, duty_pct);
        Ok(())
    }

    fn pwm_stop(&self, pin: u8) -> Result<(), HalError> {
        let mut pins = self.pins.lock();
        pins.pwm_running.insert(pin, false);
        pins.duty.insert(pin, 0.0);
        Ok(())
    }

    fn subscribe_edges(&self, _pin: u8) -> Result<broadcast::Receiver<RawEdge>, HalError> {
        Ok(self.edge_tx.subscribe())
    }

    fn release(&self, pin: u8) {
        let mut pins = self.pins.lock();
        pins.pwm_running.remove(&pin);
    }
}
