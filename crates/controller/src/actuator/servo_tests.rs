// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::hal::{GpioBackend, SimGpio};

fn servo(backend: &Arc<SimGpio>, pin: u8) -> Servo {
    let pwm =
        PwmOut::open(Arc::clone(backend) as Arc<dyn GpioBackend>, pin, SERVO_PWM_HZ).unwrap();
    Servo::new(pwm, 0.0)
}

// ── pulse-width arithmetic ────────────────────────────────────────────

#[test]
fn duty_at_zero_degrees_is_one_millisecond_pulse() {
    // 1.0 ms of a 20 ms period.
    assert!((Servo::angle_to_duty(0.0) - 5.0).abs() < 1e-9);
}

#[test]
fn duty_at_full_sweep_is_two_millisecond_pulse() {
    assert!((Servo::angle_to_duty(180.0) - 10.0).abs() < 1e-9);
}

#[test]
fn duty_at_ninety_degrees_is_midpoint() {
    assert!((Servo::angle_to_duty(90.0) - 7.5).abs() < 1e-9);
}

#[test]
fn angle_is_clamped_to_servo_range() {
    assert_eq!(Servo::angle_to_duty(-20.0), Servo::angle_to_duty(0.0));
    assert_eq!(Servo::angle_to_duty(270.0), Servo::angle_to_duty(180.0));
}

#[test]
fn motion_time_is_sweep_plus_settle() {
    // 60° at 300°/s = 200 ms, plus 100 ms settle.
    assert_eq!(Servo::motion_time(0.0, 60.0), Duration::from_millis(300));
    assert_eq!(Servo::motion_time(60.0, 0.0), Duration::from_millis(300));
    // Zero sweep still settles.
    assert_eq!(Servo::motion_time(45.0, 45.0), Duration::from_millis(100));
}

// ── motion ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn move_cuts_pwm_after_motion() {
    let backend = Arc::new(SimGpio::new());
    let servo = servo(&backend, 18);

    servo.move_to(55.0).await.unwrap();
    assert!((servo.current_angle() - 55.0).abs() < f64::EPSILON);
    // Holding jitter is cut after the sweep.
    assert!(!backend.pwm_running(18));
}

#[tokio::test(start_paused = true)]
async fn concurrent_moves_are_rejected() {
    let backend = Arc::new(SimGpio::new());
    let servo = Arc::new(servo(&backend, 18));

    let first = tokio::spawn({
        let servo = Arc::clone(&servo);
        async move { servo.move_to(180.0).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(servo.move_to(90.0).await, Err(ActuatorError::Busy)));
    first.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn deactivate_cuts_pwm() {
    let backend = Arc::new(SimGpio::new());
    let servo = Arc::new(servo(&backend, 18));

    let sweep = tokio::spawn({
        let servo = Arc::clone(&servo);
        async move { servo.move_to(180.0).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend.pwm_running(18));

    servo.deactivate().await.unwrap();
    assert!(!backend.pwm_running(18));
    let _ = sweep.await;
}
