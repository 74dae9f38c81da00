// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the supervisory API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorBody};
use crate::supervisor::{BeltAction, SupervisorHandle, SystemState};
use crate::types::FruitCategory;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub state: SystemState,
    pub uptime_s: f64,
    pub active_group: Option<u8>,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub accepted: bool,
    pub state: SystemState,
}

/// State-conflict body: the current state rides along so the operator can
/// see why the command was refused.
#[derive(Debug, Serialize)]
pub struct ConflictResponse {
    pub error: ErrorBody,
    pub state: SystemState,
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub category: FruitCategory,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub category: FruitCategory,
    #[serde(default)]
    pub delay: f64,
}

#[derive(Debug, Deserialize)]
pub struct SpeedRequest {
    pub speed_mps: f64,
}

// -- Helpers ------------------------------------------------------------------

fn ack_response(ack: Result<(), (ApiError, SystemState)>, accepted_state: SystemState) -> Response {
    match ack {
        Ok(()) => {
            (StatusCode::OK, Json(ActionResponse { accepted: true, state: accepted_state }))
                .into_response()
        }
        Err((code, state)) => {
            let mut message = format!("command not legal in state {}", state.as_str());
            if matches!(state, SystemState::Error | SystemState::EmergencyStop) {
                message.push_str("; recover via POST /control/reset");
            }
            let body = ConflictResponse {
                error: ErrorBody { code: code.as_str().to_owned(), message },
                state,
            };
            (code.http_status(), Json(body)).into_response()
        }
    }
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(handle): State<SupervisorHandle>) -> impl IntoResponse {
    let snapshot = handle.snapshot();
    Json(HealthResponse {
        state: snapshot.state,
        uptime_s: snapshot.uptime_s,
        active_group: snapshot.active_group,
        version: snapshot.version,
    })
}

/// `GET /status` — the full snapshot.
pub async fn status(State(handle): State<SupervisorHandle>) -> impl IntoResponse {
    Json(handle.snapshot())
}

/// `POST /control/start` — legal only from idle.
pub async fn control_start(State(handle): State<SupervisorHandle>) -> Response {
    let ack = handle.start_production().await;
    ack_response(ack, handle.state.current())
}

/// `POST /control/stop` — legal only while running.
pub async fn control_stop(State(handle): State<SupervisorHandle>) -> Response {
    let ack = handle.stop_production().await;
    ack_response(ack, handle.state.current())
}

/// `POST /control/emergency_stop` — always legal.
pub async fn control_emergency_stop(State(handle): State<SupervisorHandle>) -> Response {
    handle.emergency_stop().await;
    (StatusCode::OK, Json(ActionResponse { accepted: true, state: handle.state.current() }))
        .into_response()
}

/// `POST /control/reset` — error or emergency_stop back to idle, after the
/// operator confirms.
pub async fn control_reset(State(handle): State<SupervisorHandle>) -> Response {
    let ack = handle.reset().await;
    ack_response(ack, handle.state.current())
}

/// `POST /motor/activate_group` — maintenance bypass of the pipeline.
pub async fn motor_activate_group(
    State(handle): State<SupervisorHandle>,
    Json(request): Json<CategoryRequest>,
) -> Response {
    let ack = handle.activate_group(request.category).await;
    ack_response(ack, handle.state.current())
}

/// `POST /belt/start_forward`
pub async fn belt_start_forward(State(handle): State<SupervisorHandle>) -> Response {
    let ack = handle.belt(BeltAction::StartForward).await;
    ack_response(ack, handle.state.current())
}

/// `POST /belt/start_backward`
pub async fn belt_start_backward(State(handle): State<SupervisorHandle>) -> Response {
    let ack = handle.belt(BeltAction::StartBackward).await;
    ack_response(ack, handle.state.current())
}

/// `POST /belt/stop`
pub async fn belt_stop(State(handle): State<SupervisorHandle>) -> Response {
    let ack = handle.belt(BeltAction::Stop).await;
    ack_response(ack, handle.state.current())
}

/// `POST /belt/set_speed`
pub async fn belt_set_speed(
    State(handle): State<SupervisorHandle>,
    Json(request): Json<SpeedRequest>,
) -> Response {
    if request.speed_mps <= 0.0 || !request.speed_mps.is_finite() {
        return ApiError::BadRequest
            .to_response(format!("invalid belt speed {}", request.speed_mps))
            .into_response();
    }
    let ack = handle.belt(BeltAction::SetSpeed(request.speed_mps)).await;
    ack_response(ack, handle.state.current())
}

/// `POST /diverters/classify` — manual classification.
pub async fn diverters_classify(
    State(handle): State<SupervisorHandle>,
    Json(request): Json<ClassifyRequest>,
) -> Response {
    if request.delay < 0.0 || !request.delay.is_finite() {
        return ApiError::BadRequest
            .to_response(format!("invalid delay {}", request.delay))
            .into_response();
    }
    let ack = handle.classify(request.category, request.delay).await;
    ack_response(ack, handle.state.current())
}
