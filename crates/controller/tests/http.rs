// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the supervisory HTTP API.
//!
//! Uses `axum_test::TestServer` over the fully wired system on the
//! simulation backend; no real TCP and no hardware.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;

use visifruit::config::{Config, RunMode};
use visifruit::detection::MockModel;
use visifruit::hal::{GpioBackend, Hal, MockCamera, SimGpio};
use visifruit::supervisor::{SupervisorHandle, SystemState};
use visifruit::System;

async fn server() -> (TestServer, SupervisorHandle) {
    let backend = Arc::new(SimGpio::new());
    let hal = Hal::with_backends(
        Arc::clone(&backend) as Arc<dyn GpioBackend>,
        Arc::new(MockCamera::new(64, 48, 30)),
    );
    let sys = System::build(Config::default(), hal, MockModel::factory(), RunMode::Professional)
        .await
        .expect("failed to build system");
    sys.supervisor.initialise().await.expect("bring-up failed");
    let System { supervisor, handle, .. } = sys;
    tokio::spawn(supervisor.run());

    let router = visifruit::api::build_router(handle.clone());
    let server = TestServer::new(router).expect("failed to create test server");
    (server, handle)
}

async fn wait_for_state(handle: &SupervisorHandle, want: SystemState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.state.current() != want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {want:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_state_and_version() -> anyhow::Result<()> {
    let (server, _handle) = server().await;
    let resp = server.get("/health").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["state"], "idle");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["active_group"], 0);
    assert!(body["uptime_s"].as_f64().is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn status_returns_the_full_snapshot() -> anyhow::Result<()> {
    let (server, _handle) = server().await;
    let resp = server.get("/status").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["labelers"].as_array().map(|a| a.len()), Some(6));
    assert_eq!(body["diverters"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(body["positioner"]["calibrated"], true);
    assert_eq!(body["belt"]["running"], false);
    assert!(body["detector"]["workers"].as_array().is_some());
    assert!(body["pipeline"]["processed"].as_u64().is_some());
    assert!(body["alerts"].as_array().is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn start_then_duplicate_start_conflicts() -> anyhow::Result<()> {
    let (server, handle) = server().await;

    let resp = server.post("/control/start").await;
    resp.assert_status_ok();
    wait_for_state(&handle, SystemState::Running).await;

    let resp = server.post("/control/start").await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["state"], "running");
    assert_eq!(body["error"]["code"], "STATE_CONFLICT");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_from_idle_conflicts() -> anyhow::Result<()> {
    let (server, _handle) = server().await;
    let resp = server.post("/control/stop").await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["state"], "idle");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn start_stop_round_trip() -> anyhow::Result<()> {
    let (server, handle) = server().await;

    server.post("/control/start").await.assert_status_ok();
    wait_for_state(&handle, SystemState::Running).await;

    server.post("/control/stop").await.assert_status_ok();
    wait_for_state(&handle, SystemState::Idle).await;
    assert!(!handle.components.belt.is_running());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn emergency_stop_is_always_legal_and_points_to_reset() -> anyhow::Result<()> {
    let (server, handle) = server().await;

    let resp = server.post("/control/emergency_stop").await;
    resp.assert_status_ok();
    assert_eq!(handle.state.current(), SystemState::EmergencyStop);

    // Start is refused with a pointer to the recovery endpoint.
    let resp = server.post("/control/start").await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["state"], "emergency_stop");
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("/control/reset"));

    // Reset brings the unit back to idle through recovery.
    server.post("/control/reset").await.assert_status_ok();
    wait_for_state(&handle, SystemState::Idle).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_group_move_via_api() -> anyhow::Result<()> {
    let (server, handle) = server().await;

    let resp =
        server.post("/motor/activate_group").json(&serde_json::json!({ "category": "pear" })).await;
    resp.assert_status_ok();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.components.positioner.active_group() != Some(1) {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn belt_endpoints_drive_the_belt() -> anyhow::Result<()> {
    let (server, handle) = server().await;

    server.post("/belt/start_forward").await.assert_status_ok();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.components.belt.is_running());

    server
        .post("/belt/set_speed")
        .json(&serde_json::json!({ "speed_mps": 0.8 }))
        .await
        .assert_status_ok();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!((handle.components.belt.speed_mps() - 0.8).abs() < f64::EPSILON);

    server.post("/belt/stop").await.assert_status_ok();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.components.belt.is_running());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_belt_speed_is_a_bad_request() -> anyhow::Result<()> {
    let (server, _handle) = server().await;
    let resp =
        server.post("/belt/set_speed").json(&serde_json::json!({ "speed_mps": -1.0 })).await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_classification_accepts_and_cycles_flap() -> anyhow::Result<()> {
    let (server, handle) = server().await;

    let resp = server
        .post("/diverters/classify")
        .json(&serde_json::json!({ "category": "lemon", "delay": 0.0 }))
        .await;
    resp.assert_status_ok();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let flaps = handle.components.diverters.snapshot();
        let lemon = flaps
            .iter()
            .find(|f| f.category == visifruit::types::FruitCategory::Lemon)
            .map(|f| f.activations)
            .unwrap_or(0);
        if lemon == 1 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "flap never cycled");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_body_is_rejected() -> anyhow::Result<()> {
    let (server, _handle) = server().await;
    let resp = server
        .post("/motor/activate_group")
        .json(&serde_json::json!({ "category": "banana" }))
        .await;
    assert!(resp.status_code().is_client_error());
    Ok(())
}
