// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller error taxonomy and the HTTP error envelope.

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by hardware handles and drivers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HalError {
    /// Another owner currently holds the resource.
    #[error("resource busy: {0}")]
    ResourceBusy(String),
    /// The handle has not completed initialisation.
    #[error("not ready: {0}")]
    NotReady(String),
    /// The handle refuses service. Escalates to the supervisor.
    #[error("hardware fault: {0}")]
    HardwareFault(String),
}

/// Errors surfaced by actuator drivers and the components built on them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActuatorError {
    /// `activate` called while the driver is already active.
    #[error("actuator busy")]
    Busy,
    /// The positioner was commanded before calibration completed.
    #[error("positioner not calibrated")]
    NotCalibrated,
    /// A concurrent request already holds this diverter flap.
    #[error("diverter busy: {0}")]
    DiverterBusy(String),
    /// The action was cancelled by emergency-stop or a state transition.
    /// Not an error in metrics terms; accounted separately.
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Hal(#[from] HalError),
}

/// Errors surfaced by the detection service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectionError {
    /// The worker did not finish within the per-request deadline.
    #[error("detection timed out after {0:.1}s")]
    Timeout(f64),
    /// Queue full and the request was not high-enough priority to evict.
    #[error("detection service unavailable: {0}")]
    Unavailable(String),
    /// The request was evicted by a higher-priority arrival.
    #[error("request evicted by higher-priority work")]
    Evicted,
    #[error("cancelled")]
    Cancelled,
}

/// Machine-readable API error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    BadRequest,
    StateConflict,
    ComponentUnavailable,
    NotFound,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::StateConflict => StatusCode::CONFLICT,
            Self::ComponentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::StateConflict => "STATE_CONFLICT",
            Self::ComponentUnavailable => "COMPONENT_UNAVAILABLE",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let body = ErrorResponse {
            error: ErrorBody { code: self.as_str().to_owned(), message: message.into() },
        };
        (self.http_status(), Json(body))
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
