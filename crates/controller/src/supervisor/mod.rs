// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor: global state machine, lifecycle orchestration, alert bus and
//! watchdog.
//!
//! Normal commands arrive on a serialised channel; emergency-stop takes a
//! direct path that pre-empts whatever the command loop is doing.

pub mod alerts;
pub mod snapshot;
pub mod state;
pub mod watchdog;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::belt::Belt;
use crate::detection::{Detector, DetectionService};
use crate::diverter::DiverterBank;
use crate::error::ApiError;
use crate::hal::FrameSource;
use crate::labeler::LabelerManager;
use crate::metrics::MemoryMetricsStore;
use crate::pipeline::OrchestratorHandle;
use crate::positioner::Positioner;
use crate::trigger::TriggerSource;
use crate::types::FruitCategory;

pub use alerts::{Alert, AlertBus, AlertLevel};
pub use snapshot::StatusSnapshot;
pub use state::{StateHandle, SystemState};

/// How long `stop_production` lets the pipeline drain before forcing it.
const DRAIN_WAIT: Duration = Duration::from_secs(2);

/// Every long-lived component, shared by the supervisor, watchdog and API.
pub struct Components {
    pub camera: Arc<dyn FrameSource>,
    pub belt: Arc<Belt>,
    pub positioner: Arc<Positioner>,
    pub labelers: Arc<LabelerManager>,
    pub diverters: Arc<DiverterBank>,
    pub detector: Arc<DetectionService>,
    pub triggers: TriggerSource,
    pub orchestrator: OrchestratorHandle,
    pub alerts: Arc<AlertBus>,
    pub metrics: Arc<MemoryMetricsStore>,
}

/// Direct belt control actions.
#[derive(Debug, Clone, Copy)]
pub enum BeltAction {
    StartForward,
    StartBackward,
    Stop,
    SetSpeed(f64),
}

type Ack = Result<(), (ApiError, SystemState)>;

enum Command {
    StartProduction { reply: oneshot::Sender<Ack> },
    StopProduction { reply: oneshot::Sender<Ack> },
    Reset { reply: oneshot::Sender<Ack> },
    ActivateGroup { category: FruitCategory, reply: oneshot::Sender<Ack> },
    Belt { action: BeltAction, reply: oneshot::Sender<Ack> },
    Classify { category: FruitCategory, delay_s: f64, reply: oneshot::Sender<Ack> },
    Shutdown { reply: oneshot::Sender<Ack> },
}

/// Cloneable handle the API talks to.
#[derive(Clone)]
pub struct SupervisorHandle {
    pub state: StateHandle,
    pub components: Arc<Components>,
    pub started_at: Instant,
    command_tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    pub fn snapshot(&self) -> StatusSnapshot {
        snapshot::take(&self.components, &self.state, self.started_at)
    }

    async fn send(&self, build: impl FnOnce(oneshot::Sender<Ack>) -> Command) -> Ack {
        let (reply, rx) = oneshot::channel();
        if self.command_tx.send(build(reply)).await.is_err() {
            return Err((ApiError::ComponentUnavailable, self.state.current()));
        }
        rx.await.unwrap_or(Err((ApiError::ComponentUnavailable, self.state.current())))
    }

    pub async fn start_production(&self) -> Ack {
        self.send(|reply| Command::StartProduction { reply }).await
    }

    pub async fn stop_production(&self) -> Ack {
        self.send(|reply| Command::StopProduction { reply }).await
    }

    pub async fn reset(&self) -> Ack {
        self.send(|reply| Command::Reset { reply }).await
    }

    pub async fn activate_group(&self, category: FruitCategory) -> Ack {
        self.send(|reply| Command::ActivateGroup { category, reply }).await
    }

    pub async fn belt(&self, action: BeltAction) -> Ack {
        self.send(|reply| Command::Belt { action, reply }).await
    }

    pub async fn classify(&self, category: FruitCategory, delay_s: f64) -> Ack {
        self.send(|reply| Command::Classify { category, delay_s, reply }).await
    }

    pub async fn shutdown(&self) -> Ack {
        self.send(|reply| Command::Shutdown { reply }).await
    }

    /// Emergency stop bypasses the command queue entirely: it pre-empts at
    /// any pipeline edge and is legal from every state.
    pub async fn emergency_stop(&self) {
        Supervisor::execute_emergency_stop(&self.components, &self.state).await;
    }
}

pub struct Supervisor {
    components: Arc<Components>,
    state: StateHandle,
    started_at: Instant,
    shutdown: CancellationToken,
    command_rx: mpsc::Receiver<Command>,
}

impl Supervisor {
    pub fn new(
        components: Arc<Components>,
        state: StateHandle,
        shutdown: CancellationToken,
    ) -> (Self, SupervisorHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let started_at = Instant::now();
        let handle = SupervisorHandle {
            state: state.clone(),
            components: Arc::clone(&components),
            started_at,
            command_tx,
        };
        (Self { components, state, started_at, shutdown, command_rx }, handle)
    }

    /// Bring up the unit: calibrate the positioner, verify the detector,
    /// and land in `idle`. Non-recoverable failure lands in `error`.
    pub async fn initialise(&self) -> anyhow::Result<()> {
        self.state
            .transition(SystemState::Initialising)
            .map_err(|(_, s)| anyhow::anyhow!("cannot initialise from {s:?}"))?;

        if let Err(e) = self.components.positioner.calibrate().await {
            self.components.alerts.raise(
                AlertLevel::Critical,
                "positioner",
                "calibration failed",
                serde_json::json!({ "error": e.to_string() }),
            );
            let _ = self.state.transition(SystemState::Error);
            anyhow::bail!("positioner calibration failed: {e}");
        }

        if !self.components.detector.is_ready() {
            self.components.alerts.raise(
                AlertLevel::Warning,
                "detector",
                "detector degraded at bring-up",
                serde_json::Value::Null,
            );
        }

        self.state
            .transition(SystemState::Idle)
            .map_err(|(_, s)| anyhow::anyhow!("unexpected state {s:?} after bring-up"))?;
        tracing::info!("system initialised, idle");
        Ok(())
    }

    /// Serialised command loop. Runs until shutdown.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                maybe = self.command_rx.recv() => {
                    let Some(command) = maybe else { break };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
            }
        }
    }

    fn check_state(&self, allowed: &[SystemState]) -> Ack {
        let current = self.state.current();
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err((ApiError::StateConflict, current))
        }
    }

    async fn handle_command(&self, command: Command) -> bool {
        match command {
            Command::StartProduction { reply } => {
                let check = self.check_state(&[SystemState::Idle]);
                let _ = reply.send(check);
                if check.is_ok() {
                    self.do_start_production().await;
                }
            }
            Command::StopProduction { reply } => {
                let check =
                    self.check_state(&[SystemState::Running, SystemState::Processing]);
                let _ = reply.send(check);
                if check.is_ok() {
                    self.do_stop_production().await;
                }
            }
            Command::Reset { reply } => {
                let check =
                    self.check_state(&[SystemState::Error, SystemState::EmergencyStop]);
                let _ = reply.send(check);
                if check.is_ok() {
                    self.do_reset().await;
                }
            }
            Command::ActivateGroup { category, reply } => {
                let check = self.check_state(&[
                    SystemState::Idle,
                    SystemState::Running,
                    SystemState::Processing,
                ]);
                let check = check.and_then(|()| match category.group() {
                    Some(_) => Ok(()),
                    None => Err((ApiError::BadRequest, self.state.current())),
                });
                let _ = reply.send(check);
                if check.is_ok() {
                    self.do_activate_group(category);
                }
            }
            Command::Belt { action, reply } => {
                let check = self.check_state(&[
                    SystemState::Idle,
                    SystemState::Running,
                    SystemState::Processing,
                ]);
                let _ = reply.send(check);
                if check.is_ok() {
                    self.do_belt(action);
                }
            }
            Command::Classify { category, delay_s, reply } => {
                let check = self.check_state(&[
                    SystemState::Idle,
                    SystemState::Running,
                    SystemState::Processing,
                ]);
                let _ = reply.send(check);
                if check.is_ok() {
                    self.do_classify(category, delay_s);
                }
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(Ok(()));
                self.do_shutdown().await;
                return false;
            }
        }
        true
    }

    async fn do_start_production(&self) {
        if let Err(e) = self.components.belt.start_forward() {
            self.components.alerts.raise(
                AlertLevel::Error,
                "belt",
                "belt start failed",
                serde_json::json!({ "error": e.to_string() }),
            );
            let _ = self.state.transition(SystemState::Error);
            return;
        }
        // Stale triggers from before the start must not fire anything.
        self.components.triggers.drain();
        self.components.triggers.set_accepting(true);
        if self.state.transition(SystemState::Running).is_err() {
            // An emergency stop raced the start; undo the gate and belt.
            self.components.triggers.set_accepting(false);
            let _ = self.components.belt.stop();
            return;
        }
        tracing::info!("production started");
    }

    async fn do_stop_production(&self) {
        self.components.triggers.set_accepting(false);

        // Let the in-flight transaction drain before stopping the belt.
        let deadline = Instant::now() + DRAIN_WAIT;
        while self.state.current() == SystemState::Processing && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.state.current() == SystemState::Processing {
            self.components.orchestrator.cancel_in_flight();
            self.state.exit_processing();
        }

        let _ = self.components.belt.stop();
        let _ = self.state.transition(SystemState::Idle);
        tracing::info!("production stopped");
    }

    async fn do_reset(&self) {
        let _ = self.state.transition(SystemState::Recovery);
        self.components.triggers.drain();
        match self.components.positioner.calibrate().await {
            Ok(()) => {
                let _ = self.state.transition(SystemState::Idle);
                tracing::info!("recovery complete, idle");
            }
            Err(e) => {
                self.components.alerts.raise(
                    AlertLevel::Critical,
                    "positioner",
                    "recalibration failed during recovery",
                    serde_json::json!({ "error": e.to_string() }),
                );
                let _ = self.state.transition(SystemState::Error);
            }
        }
    }

    /// Maintenance group move; runs off the command loop so emergency-stop
    /// stays responsive.
    fn do_activate_group(&self, category: FruitCategory) {
        let Some(group) = category.group() else { return };
        let positioner = Arc::clone(&self.components.positioner);
        let alerts = Arc::clone(&self.components.alerts);
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = positioner.activate_group(group, &token).await {
                alerts.raise(
                    AlertLevel::Warning,
                    "positioner",
                    "manual group move failed",
                    serde_json::json!({ "group": group, "error": e.to_string() }),
                );
            }
        });
    }

    fn do_belt(&self, action: BeltAction) {
        let result = match action {
            BeltAction::StartForward => self.components.belt.start_forward(),
            BeltAction::StartBackward => self.components.belt.start_backward(),
            BeltAction::Stop => self.components.belt.stop(),
            BeltAction::SetSpeed(mps) => self.components.belt.set_speed(mps),
        };
        if let Err(e) = result {
            self.components.alerts.raise(
                AlertLevel::Warning,
                "belt",
                "belt command failed",
                serde_json::json!({ "error": e.to_string() }),
            );
        }
    }

    fn do_classify(&self, category: FruitCategory, delay_s: f64) {
        let diverters = Arc::clone(&self.components.diverters);
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            let delay = Duration::from_secs_f64(delay_s.max(0.0));
            if let Err(e) = diverters.classify(category, delay, &token).await {
                tracing::debug!(category = category.label(), err = %e, "manual classify failed");
            }
        });
    }

    async fn do_shutdown(&self) {
        let _ = self.state.transition(SystemState::ShuttingDown);
        self.components.triggers.set_accepting(false);
        self.components.triggers.drain();
        self.components.orchestrator.cancel_in_flight();
        self.components.orchestrator.shutdown.cancel();
        self.components.labelers.emergency_stop_all().await;
        let _ = self.components.positioner.emergency_stop();
        self.components.diverters.emergency_stop_all().await;
        let _ = self.components.belt.stop();
        self.components.detector.stop().await;
        self.components.camera.close();
        let _ = self.state.transition(SystemState::Offline);
        self.shutdown.cancel();
        tracing::info!("shutdown complete");
    }

    /// The emergency-stop ladder. Legal from any state; pre-empts the
    /// command loop.
    pub async fn execute_emergency_stop(components: &Components, state: &StateHandle) {
        tracing::warn!("emergency stop engaged");
        // 1. No new trigger events; drop everything pending.
        components.triggers.set_accepting(false);
        let dropped = components.triggers.drain();
        // 2. Cancel every scheduled-but-not-fired command.
        components.orchestrator.cancel_in_flight();
        // 3. Release every actuator; labeler releases are bounded at 500 ms.
        components.labelers.emergency_stop_all().await;
        let _ = components.positioner.emergency_stop();
        components.diverters.emergency_stop_all().await;
        let _ = components.belt.emergency_brake();
        // 4. Land in emergency_stop.
        let _ = state.transition(SystemState::EmergencyStop);
        components.alerts.raise(
            AlertLevel::Critical,
            "supervisor",
            "emergency stop engaged",
            serde_json::json!({ "dropped_triggers": dropped }),
        );
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
