// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::hal::sim::SimGpio;

#[test]
fn digital_out_applies_polarity() {
    let backend = Arc::new(SimGpio::new());
    let line = DigitalOut::open(Arc::clone(&backend) as Arc<dyn GpioBackend>, 5, true).unwrap();
    line.write(true).unwrap();
    assert_eq!(backend.level(5), Some(true));
    line.write(false).unwrap();
    assert_eq!(backend.level(5), Some(false));

    let inverted =
        DigitalOut::open(Arc::clone(&backend) as Arc<dyn GpioBackend>, 6, false).unwrap();
    inverted.write(true).unwrap();
    assert_eq!(backend.level(6), Some(false));
}

#[test]
fn open_drives_line_inactive() {
    let backend = Arc::new(SimGpio::new());
    let _line = DigitalOut::open(Arc::clone(&backend) as Arc<dyn GpioBackend>, 9, true).unwrap();
    assert_eq!(backend.level(9), Some(false));

    // Active-low line starts at physical high.
    let _line =
        DigitalOut::open(Arc::clone(&backend) as Arc<dyn GpioBackend>, 10, false).unwrap();
    assert_eq!(backend.level(10), Some(true));
}

#[test]
fn close_is_idempotent_and_releases() {
    let backend = Arc::new(SimGpio::new());
    let line = DigitalOut::open(Arc::clone(&backend) as Arc<dyn GpioBackend>, 5, true).unwrap();
    line.write(true).unwrap();
    line.close();
    line.close();
    // Closed handles refuse writes; the line was driven inactive.
    assert!(matches!(line.write(true), Err(crate::error::HalError::NotReady(_))));
    assert_eq!(backend.level(5), Some(false));
}

#[test]
fn pwm_starts_on_first_duty() {
    let backend = Arc::new(SimGpio::new());
    let pwm = PwmOut::open(Arc::clone(&backend) as Arc<dyn GpioBackend>, 12, 1000.0).unwrap();
    assert!(!backend.pwm_running(12));
    pwm.set_duty(60.0).unwrap();
    assert!(backend.pwm_running(12));
    assert_eq!(backend.duty(12), Some(60.0));
    pwm.stop().unwrap();
    assert!(!backend.pwm_running(12));
    assert_eq!(backend.duty(12), Some(0.0));
}

#[test]
fn pwm_duty_is_clamped() {
    let backend = Arc::new(SimGpio::new());
    let pwm = PwmOut::open(Arc::clone(&backend) as Arc<dyn GpioBackend>, 12, 1000.0).unwrap();
    pwm.set_duty(250.0).unwrap();
    assert_eq!(backend.duty(12), Some(100.0));
    pwm.set_duty(-3.0).unwrap();
    assert_eq!(backend.duty(12), Some(0.0));
}

#[test]
fn injected_fault_surfaces_as_hardware_fault() {
    let backend = Arc::new(SimGpio::new());
    backend.inject_fault(5, "line stuck");
    let result = DigitalOut::open(Arc::clone(&backend) as Arc<dyn GpioBackend>, 5, true);
    assert!(matches!(result, Err(crate::error::HalError::HardwareFault(_))));
}
