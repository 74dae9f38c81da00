// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisory HTTP + WebSocket API.
//!
//! All endpoints are non-blocking: they enqueue commands onto the
//! supervisor's command channel and answer once the command is accepted,
//! not when it completes.

pub mod http;
pub mod ws;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::supervisor::SupervisorHandle;

/// Deadline on every HTTP handler.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the axum `Router` with every supervisory route.
pub fn build_router(handle: SupervisorHandle) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(http::health))
        .route("/status", get(http::status))
        // Lifecycle control
        .route("/control/start", post(http::control_start))
        .route("/control/stop", post(http::control_stop))
        .route("/control/emergency_stop", post(http::control_emergency_stop))
        .route("/control/reset", post(http::control_reset))
        // Maintenance actuation
        .route("/motor/activate_group", post(http::motor_activate_group))
        // Direct belt control
        .route("/belt/start_forward", post(http::belt_start_forward))
        .route("/belt/start_backward", post(http::belt_start_backward))
        .route("/belt/stop", post(http::belt_stop))
        .route("/belt/set_speed", post(http::belt_set_speed))
        // Manual classification
        .route("/diverters/classify", post(http::diverters_classify))
        // Dashboard stream
        .route("/ws/dashboard", get(ws::dashboard_handler))
        .layer(TimeoutLayer::new(HANDLER_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(handle)
}
