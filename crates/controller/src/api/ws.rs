// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dashboard WebSocket: pushes the status snapshot every second plus
//! ad-hoc pipeline and alert events.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;

use crate::pipeline::PipelineEvent;
use crate::supervisor::{Alert, StatusSnapshot, SupervisorHandle};

/// Snapshot push cadence.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Wire frames pushed to dashboard clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DashboardFrame {
    Status { status: Box<StatusSnapshot> },
    Alert { alert: Alert },
    Pipeline { event: PipelineEvent },
}

/// `GET /ws/dashboard`
pub async fn dashboard_handler(
    State(handle): State<SupervisorHandle>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| dashboard_connection(handle, socket))
}

async fn dashboard_connection(handle: SupervisorHandle, socket: WebSocket) {
    let (mut tx, mut rx) = socket.split();

    let mut alerts = handle.components.alerts.subscribe();
    let mut events = handle.components.orchestrator.subscribe_events();
    let mut timer = tokio::time::interval(SNAPSHOT_INTERVAL);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let frame = tokio::select! {
            _ = timer.tick() => {
                Some(DashboardFrame::Status { status: Box::new(handle.snapshot()) })
            }
            alert = alerts.recv() => match alert {
                Ok(alert) => Some(DashboardFrame::Alert { alert }),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => None,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => Some(DashboardFrame::Pipeline { event }),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => None,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Inbound content is ignored; the dashboard is read-only.
                    _ => None
                }
            }
        };

        if let Some(frame) = frame {
            let Ok(json) = serde_json::to_string(&frame) else { continue };
            if tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    }
}
