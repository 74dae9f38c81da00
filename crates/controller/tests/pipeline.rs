// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Whole-system pipeline scenarios on the simulation backend: real time,
//! real inference worker threads, triggers injected as GPIO edges.

use std::sync::Arc;
use std::time::Duration;

use visifruit::config::{Config, RunMode};
use visifruit::detection::{MockModel, ModelFactory};
use visifruit::hal::{GpioBackend, Hal, MockCamera, SimGpio};
use visifruit::supervisor::{SupervisorHandle, SystemState};
use visifruit::System;

const TRIGGER_PIN: u8 = 17;

async fn bring_up(factory: ModelFactory) -> (Arc<SimGpio>, SupervisorHandle) {
    let backend = Arc::new(SimGpio::new());
    let hal = Hal::with_backends(
        Arc::clone(&backend) as Arc<dyn GpioBackend>,
        Arc::new(MockCamera::new(64, 48, 30)),
    );
    let sys = System::build(Config::default(), hal, factory, RunMode::Professional)
        .await
        .expect("build failed");
    sys.supervisor.initialise().await.expect("bring-up failed");
    let System { supervisor, handle, .. } = sys;
    tokio::spawn(supervisor.run());

    handle.start_production().await.expect("start failed");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handle.state.current() != SystemState::Running {
        assert!(tokio::time::Instant::now() < deadline, "never reached running");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    (backend, handle)
}

async fn wait_until(what: &str, timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn trigger_flows_through_to_a_labeler_fire() {
    let (backend, handle) = bring_up(MockModel::factory()).await;

    backend.inject_edge(TRIGGER_PIN);

    // The belt leg is 1 s at the default geometry; the group fires then
    // holds for at least 2 s.
    wait_until("labeler fire", Duration::from_secs(5), || {
        handle.components.labelers.any_active()
    })
    .await;

    wait_until("hold release", Duration::from_secs(5), || {
        !handle.components.labelers.any_active()
    })
    .await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.pipeline.processed, 1);
    assert!(snapshot.labelers.iter().filter(|l| l.activations > 0).count() == 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn emergency_stop_mid_hold_releases_heads_and_lands_in_emergency_state() {
    let (backend, handle) = bring_up(MockModel::factory()).await;

    backend.inject_edge(TRIGGER_PIN);
    wait_until("labeler fire", Duration::from_secs(5), || {
        handle.components.labelers.any_active()
    })
    .await;

    // Mid-hold: engage the stop and time the release.
    let engaged = tokio::time::Instant::now();
    handle.emergency_stop().await;
    let elapsed = engaged.elapsed();

    assert!(elapsed <= Duration::from_millis(700), "stop took {elapsed:?}");
    assert_eq!(handle.state.current(), SystemState::EmergencyStop);
    assert!(!handle.components.labelers.any_active());
    assert!(!handle.components.belt.is_running());

    // Triggers injected after the stop do nothing.
    backend.inject_edge(TRIGGER_PIN);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.components.triggers.accepted_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_model_load_runs_sensor_only() {
    let failing: ModelFactory = Arc::new(|| anyhow::bail!("no model file"));
    let (backend, handle) = bring_up(failing).await;

    backend.inject_edge(TRIGGER_PIN);

    // The default group still fires on the raw trigger.
    wait_until("sensor-only fire", Duration::from_secs(5), || {
        handle.components.labelers.any_active()
    })
    .await;

    let snapshot = handle.snapshot();
    assert!(snapshot
        .alerts
        .iter()
        .any(|a| a.message.contains("sensor-only") || a.message.contains("degraded")));
}
