// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::time::Instant;

use super::*;
use crate::hal::{DigitalOut, GpioBackend, PwmOut, SimGpio};

const PWM: u8 = 12;
const DIR_A: u8 = 20;
const DIR_B: u8 = 21;
const ENABLE: u8 = 16;

fn positioner(backend: &Arc<SimGpio>) -> Positioner {
    let gpio = Arc::clone(backend) as Arc<dyn GpioBackend>;
    let pwm = PwmOut::open(Arc::clone(&gpio), PWM, 1000.0).unwrap();
    let dir_a = DigitalOut::open(Arc::clone(&gpio), DIR_A, true).unwrap();
    let dir_b = DigitalOut::open(Arc::clone(&gpio), DIR_B, true).unwrap();
    let enable = DigitalOut::open(gpio, ENABLE, true).unwrap();
    Positioner::new(DcMotor::new(pwm, dir_a, dir_b, Some(enable)))
}

async fn calibrated(backend: &Arc<SimGpio>) -> Positioner {
    let p = positioner(backend);
    p.calibrate().await.unwrap();
    p
}

#[tokio::test(start_paused = true)]
async fn uncalibrated_move_is_rejected() {
    let backend = Arc::new(SimGpio::new());
    let p = positioner(&backend);
    let result = p.activate_group(1, &CancellationToken::new()).await;
    assert!(matches!(result, Err(ActuatorError::NotCalibrated)));
}

#[tokio::test(start_paused = true)]
async fn calibration_engages_group_zero() {
    let backend = Arc::new(SimGpio::new());
    let p = calibrated(&backend).await;
    assert!(p.is_calibrated());
    assert_eq!(p.active_group(), Some(0));

    let snap = p.snapshot();
    assert_eq!(snap.group_positions[0], GroupPosition::Down);
    assert_eq!(snap.group_positions[1], GroupPosition::Up);
    assert_eq!(snap.group_positions[2], GroupPosition::Up);
}

#[tokio::test(start_paused = true)]
async fn exactly_one_group_is_down_after_moves() {
    let backend = Arc::new(SimGpio::new());
    let p = calibrated(&backend).await;

    for target in [1u8, 2, 0, 2] {
        p.activate_group(target, &CancellationToken::new()).await.unwrap();
        let snap = p.snapshot();
        let down = snap.group_positions.iter().filter(|&&g| g == GroupPosition::Down).count();
        assert_eq!(down, 1);
        assert_eq!(snap.active_group, Some(target));
    }
}

#[tokio::test(start_paused = true)]
async fn move_is_raise_then_lower() {
    let backend = Arc::new(SimGpio::new());
    let p = calibrated(&backend).await;

    let started = Instant::now();
    p.activate_group(1, &CancellationToken::new()).await.unwrap();
    // 1.5 s raise + 1.5 s lower.
    assert_eq!(started.elapsed(), Duration::from_millis(3000));
    // Motor stopped afterwards.
    assert_eq!(backend.duty(PWM), Some(0.0));
    assert!(!p.is_moving());
}

#[tokio::test(start_paused = true)]
async fn repeat_activation_is_idempotent_and_immediate() {
    let backend = Arc::new(SimGpio::new());
    let p = calibrated(&backend).await;
    p.activate_group(2, &CancellationToken::new()).await.unwrap();

    let started = Instant::now();
    p.activate_group(2, &CancellationToken::new()).await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(p.expected_move_time(2), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn expected_move_time_accounts_for_raise() {
    let backend = Arc::new(SimGpio::new());
    let p = calibrated(&backend).await;
    assert_eq!(p.expected_move_time(0), Duration::ZERO);
    assert_eq!(p.expected_move_time(1), Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn cancelled_move_stops_motor_and_clears_group() {
    let backend = Arc::new(SimGpio::new());
    let p = Arc::new(calibrated(&backend).await);
    let cancel = CancellationToken::new();

    let mv = tokio::spawn({
        let p = Arc::clone(&p);
        let cancel = cancel.clone();
        async move { p.activate_group(1, &cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(p.is_moving());
    cancel.cancel();

    let result = mv.await.unwrap();
    assert!(matches!(result, Err(ActuatorError::Cancelled)));
    assert!(!p.is_moving());
    // Carriage position is indeterminate after a cancelled move.
    assert_eq!(p.active_group(), None);
    assert_eq!(backend.duty(PWM), Some(0.0));

    // A re-issued move engages the target.
    p.activate_group(1, &CancellationToken::new()).await.unwrap();
    assert_eq!(p.active_group(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_cuts_pwm_and_enable() {
    let backend = Arc::new(SimGpio::new());
    let p = Arc::new(calibrated(&backend).await);

    let mv = tokio::spawn({
        let p = Arc::clone(&p);
        async move { p.activate_group(1, &CancellationToken::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    p.emergency_stop().unwrap();
    assert_eq!(backend.duty(PWM), Some(0.0));
    assert_eq!(backend.level(ENABLE), Some(false));
    assert!(!p.is_moving());
    let _ = mv.await;
}
