// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System state machine. Allowed transitions are fixed in code; only the
//! supervisor mutates the state, and observers subscribe through a watch
//! channel.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Offline,
    Initialising,
    Idle,
    Running,
    Processing,
    EmergencyStop,
    Recovery,
    ShuttingDown,
    Error,
}

impl SystemState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Initialising => "initialising",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Processing => "processing",
            Self::EmergencyStop => "emergency_stop",
            Self::Recovery => "recovery",
            Self::ShuttingDown => "shutting_down",
            Self::Error => "error",
        }
    }

    /// Whether the pipeline accepts trigger events in this state.
    pub fn accepts_triggers(self) -> bool {
        matches!(self, Self::Running | Self::Processing)
    }
}

/// The fixed transition table.
pub fn transition_allowed(from: SystemState, to: SystemState) -> bool {
    use SystemState::*;
    match (from, to) {
        // Normal lifecycle.
        (Offline, Initialising) => true,
        (Initialising, Idle) => true,
        (Idle, Running) | (Running, Idle) => true,
        (Running, Processing) | (Processing, Running) => true,
        // Emergency stop overrides everything.
        (_, EmergencyStop) => true,
        // Recovery path back to idle.
        (EmergencyStop, Recovery) | (Error, Recovery) => true,
        (Recovery, Idle) => true,
        (Recovery, Error) => true,
        // Orderly shutdown from anywhere.
        (_, ShuttingDown) => true,
        (ShuttingDown, Offline) => true,
        // Fault demotion.
        (Initialising, Error) | (Running, Error) | (Processing, Error) | (Idle, Error) => true,
        _ => false,
    }
}

struct Cell {
    state: Mutex<SystemState>,
    tx: watch::Sender<SystemState>,
}

/// Cloneable handle onto the supervisor's state cell.
#[derive(Clone)]
pub struct StateHandle {
    cell: Arc<Cell>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SystemState::Offline);
        Self { cell: Arc::new(Cell { state: Mutex::new(SystemState::Offline), tx }) }
    }

    pub fn current(&self) -> SystemState {
        *self.cell.state.lock()
    }

    /// Apply a transition if the table allows it.
    pub fn transition(&self, to: SystemState) -> Result<SystemState, (ApiError, SystemState)> {
        let mut state = self.cell.state.lock();
        let from = *state;
        if from == to {
            return Ok(from);
        }
        if !transition_allowed(from, to) {
            return Err((ApiError::StateConflict, from));
        }
        *state = to;
        drop(state);
        tracing::info!(from = from.as_str(), to = to.as_str(), "state transition");
        let _ = self.cell.tx.send(to);
        Ok(from)
    }

    /// Observe transitions.
    pub fn subscribe(&self) -> watch::Receiver<SystemState> {
        self.cell.tx.subscribe()
    }

    /// Running → Processing, ignored in any other state. Returns whether
    /// the pipeline may proceed.
    pub fn enter_processing(&self) -> bool {
        let mut state = self.cell.state.lock();
        match *state {
            SystemState::Running => {
                *state = SystemState::Processing;
                drop(state);
                let _ = self.cell.tx.send(SystemState::Processing);
                true
            }
            SystemState::Processing => true,
            _ => false,
        }
    }

    /// Processing → Running, ignored unless currently processing.
    pub fn exit_processing(&self) {
        let mut state = self.cell.state.lock();
        if *state == SystemState::Processing {
            *state = SystemState::Running;
            drop(state);
            let _ = self.cell.tx.send(SystemState::Running);
        }
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
