// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline orchestrator: consumes trigger events in timestamp order and
//! drives the capture → detect → position → fire → divert sequence.
//!
//! All delays are scheduled against the trigger's monotonic timestamp. The
//! orchestrator enforces at-most-one in-flight labeling; extra triggers
//! defer into a small secondary queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::belt::Belt;
use crate::config::Config;
use crate::detection::Detector;
use crate::diverter::DiverterBank;
use crate::error::{ActuatorError, DetectionError};
use crate::hal::FrameSource;
use crate::labeler::LabelerManager;
use crate::metrics::{epoch_ms, DetectionRecord, LabelingRecord, MetricRecord, MetricsStore};
use crate::pipeline::predictor::CategoryPredictor;
use crate::pipeline::schedule::{self, LineGeometry};
use crate::positioner::Positioner;
use crate::supervisor::alerts::{AlertBus, AlertLevel};
use crate::supervisor::state::StateHandle;
use crate::trigger::TriggerSource;
use crate::types::{
    DiverterCommand, FruitCategory, LabelingCommand, ProcessingPriority, TriggerEvent,
};

/// Secondary queue capacity for triggers arriving mid-labeling.
const BACKLOG_CAPACITY: usize = 8;
/// How long a transaction waits for positioner calibration before giving up.
const CALIBRATION_WAIT: Duration = Duration::from_secs(10);
/// Grace past the planned fire instant before a labeling command is stale.
const STALE_TOLERANCE: Duration = Duration::from_millis(500);

/// Pipeline tuning snapshotted from config at startup.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub geometry: LineGeometry,
    pub predictive_positioning: bool,
    pub default_group: u8,
    /// Single-labeler topology: every fire is clamped to group 0 while the
    /// three diverter flaps keep their per-category routing.
    pub prototype: bool,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            geometry: LineGeometry {
                distance_camera_to_labeler_m: config
                    .labeler_settings
                    .distance_camera_to_labeler_m,
                distance_labeler_to_diverter_m: config
                    .diverter_settings
                    .distance_labeler_to_diverter_m,
                preroll: Duration::from_secs_f64(config.labeler_settings.preroll_s),
            },
            predictive_positioning: config.pipeline_settings.predictive_positioning,
            default_group: config.pipeline_settings.default_group,
            prototype: false,
        }
    }
}

/// Ad-hoc events pushed to dashboard clients alongside the periodic
/// snapshot.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A frame analysis produced a category decision.
    Detection { category: FruitCategory, confidence: f64, fruit_count: usize },
    /// A labeler group fired.
    Labeled { group: u8, success_count: usize, failed: usize },
}

/// Counters shared with the watchdog and the API.
#[derive(Default)]
pub struct OrchestratorStats {
    pub processed: AtomicU64,
    pub noops: AtomicU64,
    pub backlog_dropped: AtomicU64,
    pub cancelled: AtomicU64,
    pub backlog_len: AtomicUsize,
    pub last_fire_ms: AtomicU64,
}

/// Handle the supervisor keeps after spawning the run loop.
#[derive(Clone)]
pub struct OrchestratorHandle {
    /// Ends the run loop; process shutdown only.
    pub shutdown: CancellationToken,
    txn_parent: Arc<Mutex<CancellationToken>>,
    pub stats: Arc<OrchestratorStats>,
    events: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl OrchestratorHandle {
    /// Cancel every scheduled-but-not-fired command. The run loop survives;
    /// the next transaction gets a fresh token tree.
    pub fn cancel_in_flight(&self) {
        let mut parent = self.txn_parent.lock();
        let old = std::mem::replace(&mut *parent, CancellationToken::new());
        drop(parent);
        old.cancel();
    }

    /// Subscribe to ad-hoc pipeline events.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }
}

/// Why a transaction ended without firing.
enum Abort {
    Noop(&'static str),
    Cancelled,
}

struct PredictiveMove {
    category: FruitCategory,
    group: u8,
    expected: Duration,
    token: CancellationToken,
    task: tokio::task::JoinHandle<Result<(), ActuatorError>>,
}

pub struct Orchestrator<D: Detector> {
    detector: Arc<D>,
    camera: Arc<dyn FrameSource>,
    positioner: Arc<Positioner>,
    labelers: Arc<LabelerManager>,
    diverters: Arc<DiverterBank>,
    belt: Arc<Belt>,
    triggers: TriggerSource,
    alerts: Arc<AlertBus>,
    store: Arc<dyn MetricsStore>,
    state: StateHandle,
    config: PipelineConfig,
    shutdown: CancellationToken,
    txn_parent: Arc<Mutex<CancellationToken>>,
    predictor: Mutex<CategoryPredictor>,
    stats: Arc<OrchestratorStats>,
    events: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl<D: Detector + 'static> Orchestrator<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: Arc<D>,
        camera: Arc<dyn FrameSource>,
        positioner: Arc<Positioner>,
        labelers: Arc<LabelerManager>,
        diverters: Arc<DiverterBank>,
        belt: Arc<Belt>,
        triggers: TriggerSource,
        alerts: Arc<AlertBus>,
        store: Arc<dyn MetricsStore>,
        state: StateHandle,
        config: PipelineConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            detector,
            camera,
            positioner,
            labelers,
            diverters,
            belt,
            triggers,
            alerts,
            store,
            state,
            config,
            shutdown,
            txn_parent: Arc::new(Mutex::new(CancellationToken::new())),
            predictor: Mutex::new(CategoryPredictor::new()),
            stats: Arc::new(OrchestratorStats::default()),
            events: tokio::sync::broadcast::channel(64).0,
        })
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            shutdown: self.shutdown.clone(),
            txn_parent: Arc::clone(&self.txn_parent),
            stats: Arc::clone(&self.stats),
            events: self.events.clone(),
        }
    }

    /// Consume triggers until cancelled. One labeling in flight at a time;
    /// the rest defers into the backlog.
    pub async fn run(self: Arc<Self>) {
        let mut backlog: VecDeque<TriggerEvent> = VecDeque::new();
        let (done_tx, mut done_rx) = mpsc::channel::<()>(4);
        let mut in_flight = false;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(()) = done_rx.recv() => {
                    in_flight = false;
                    if let Some(event) = backlog.pop_front() {
                        self.stats.backlog_len.store(backlog.len(), Ordering::Relaxed);
                        in_flight = true;
                        self.spawn_transaction(event, done_tx.clone());
                    }
                }
                maybe = self.triggers.recv() => {
                    let Some(event) = maybe else { break };
                    if !self.state.current().accepts_triggers() {
                        continue;
                    }
                    if in_flight {
                        if backlog.len() < BACKLOG_CAPACITY {
                            backlog.push_back(event);
                            self.stats.backlog_len.store(backlog.len(), Ordering::Relaxed);
                        } else {
                            self.stats.backlog_dropped.fetch_add(1, Ordering::Relaxed);
                            self.alerts.raise(
                                AlertLevel::Warning,
                                "orchestrator",
                                "labeling backlog overflow",
                                serde_json::json!({
                                    "dropped_total":
                                        self.stats.backlog_dropped.load(Ordering::Relaxed)
                                }),
                            );
                        }
                    } else {
                        in_flight = true;
                        self.spawn_transaction(event, done_tx.clone());
                    }
                }
            }
        }

        let dropped = self.triggers.drain();
        if dropped > 0 {
            tracing::info!(dropped, "pending triggers dropped on shutdown");
        }
    }

    fn spawn_transaction(self: &Arc<Self>, event: TriggerEvent, done_tx: mpsc::Sender<()>) {
        let this = Arc::clone(self);
        let token = self.txn_parent.lock().child_token();
        tokio::spawn(async move {
            this.process_trigger(event, token).await;
            let _ = done_tx.send(()).await;
        });
    }

    async fn process_trigger(&self, event: TriggerEvent, cancel: CancellationToken) {
        if !self.state.enter_processing() {
            self.noop("not_running");
            return;
        }
        match self.run_transaction(event.ts, &cancel).await {
            Ok(()) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(Abort::Noop(reason)) => self.noop(reason),
            Err(Abort::Cancelled) => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                self.save_metric("pipeline_cancelled", serde_json::Value::Null);
            }
        }
        self.state.exit_processing();
    }

    async fn run_transaction(&self, t0: Instant, cancel: &CancellationToken) -> Result<(), Abort> {
        // A hardware fault gets one retry; a second failure escalates to
        // the supervisor.
        let frame = match self.camera.capture().or_else(|_| self.camera.capture()) {
            Ok(frame) => frame,
            Err(e) => {
                self.alerts.raise(
                    AlertLevel::Critical,
                    "camera",
                    "frame capture failed",
                    serde_json::json!({ "error": e.to_string() }),
                );
                if matches!(e, crate::error::HalError::HardwareFault(_)) {
                    let _ = self.state.transition(crate::supervisor::state::SystemState::Error);
                }
                return Err(Abort::Noop("capture_failed"));
            }
        };

        if !self.detector.is_ready() {
            return self.sensor_only(t0, cancel).await;
        }

        // Predictive pre-positioning may start the move before the analysis
        // returns.
        let predicted = self.start_predictive_move(cancel);

        let analysis = match self.detector.detect(frame, ProcessingPriority::High).await {
            Ok(analysis) => analysis,
            Err(e) => {
                self.abort_predictive(predicted).await;
                return Err(self.detection_failed(e));
            }
        };

        if analysis.fruit_count == 0 || !analysis.quality.usable() {
            self.abort_predictive(predicted).await;
            return Err(Abort::Noop("no_usable_detection"));
        }
        let Some(category) = analysis.majority_category() else {
            self.abort_predictive(predicted).await;
            return Err(Abort::Noop("unknown_category"));
        };
        let group = self.target_group(category);

        let detection_ts = epoch_ms();
        for detection in &analysis.detections {
            self.store.save_detection(DetectionRecord {
                ts_ms: detection_ts,
                category: detection.category,
                confidence: detection.confidence,
                processing_time_ms: analysis.timing.total_ms,
                bbox: detection.bbox,
            });
        }

        {
            let mut predictor = self.predictor.lock();
            if let Some(ref pm) = predicted {
                predictor.resolve(pm.category, category);
            }
            predictor.record(category);
        }

        let mean_confidence = analysis.detections.iter().map(|d| d.confidence).sum::<f64>()
            / analysis.fruit_count.max(1) as f64;
        let _ = self.events.send(PipelineEvent::Detection {
            category,
            confidence: mean_confidence,
            fruit_count: analysis.fruit_count,
        });

        let pos_move_est = self.position_for(group, predicted, cancel).await?;
        let belt_speed = self.belt.speed_mps();
        let plan =
            schedule::plan(t0, pos_move_est, belt_speed, &self.config.geometry, analysis.fruit_count);
        // A late positioner (cancel-and-reissue path) pushes the fire out to
        // its corrected completion.
        let fire_at = plan.fire_at.max(Instant::now() + self.config.geometry.preroll);
        let divert_at =
            fire_at + schedule::belt_time(self.config.geometry.distance_labeler_to_diverter_m, belt_speed);

        self.fire(category, group, fire_at, divert_at, plan.labeling_duration, cancel).await
    }

    /// Which labeler group serves `category`. The prototype topology has a
    /// single group; everything else lands on group 0.
    fn target_group(&self, category: FruitCategory) -> u8 {
        if self.config.prototype {
            0
        } else {
            // Actuated categories always map onto a group.
            category.group().unwrap_or(self.config.default_group)
        }
    }

    /// Degraded sensor-only mode: no detection, every trigger fires the
    /// default group.
    async fn sensor_only(&self, t0: Instant, cancel: &CancellationToken) -> Result<(), Abort> {
        self.alerts.raise(
            AlertLevel::Warning,
            "detector",
            "detector unavailable, running sensor-only",
            serde_json::Value::Null,
        );
        let group = if self.config.prototype { 0 } else { self.config.default_group };
        let category = FruitCategory::from_group(group).unwrap_or(FruitCategory::Apple);

        let pos_move_est = self.position_for(group, None, cancel).await?;
        let belt_speed = self.belt.speed_mps();
        let plan = schedule::plan(t0, pos_move_est, belt_speed, &self.config.geometry, 1);
        let fire_at = plan.fire_at.max(Instant::now() + self.config.geometry.preroll);
        let divert_at = fire_at
            + schedule::belt_time(self.config.geometry.distance_labeler_to_diverter_m, belt_speed);

        self.fire(category, group, fire_at, divert_at, plan.labeling_duration, cancel).await
    }

    /// Kick off a predictive positioner move when the pattern analyser
    /// offers a prediction and the group is not already engaged.
    fn start_predictive_move(&self, cancel: &CancellationToken) -> Option<PredictiveMove> {
        if !self.config.predictive_positioning {
            return None;
        }
        // The prototype topology never leaves group 0.
        if self.config.prototype {
            return None;
        }
        let category = self.predictor.lock().predict()?;
        let group = category.group()?;
        if self.positioner.active_group() == Some(group) {
            return None;
        }
        let expected = self.positioner.expected_move_time(group);
        let token = cancel.child_token();
        let positioner = Arc::clone(&self.positioner);
        let move_token = token.clone();
        let task =
            tokio::spawn(async move { positioner.activate_group(group, &move_token).await });
        tracing::debug!(category = category.label(), "predictive pre-position started");
        Some(PredictiveMove { category, group, expected, token, task })
    }

    async fn abort_predictive(&self, predicted: Option<PredictiveMove>) {
        if let Some(pm) = predicted {
            pm.token.cancel();
            let _ = pm.task.await;
        }
    }

    /// Ensure `group` is engaged. Returns the move-time estimate the fire
    /// schedule should account for.
    async fn position_for(
        &self,
        group: u8,
        predicted: Option<PredictiveMove>,
        cancel: &CancellationToken,
    ) -> Result<Duration, Abort> {
        self.await_calibration(cancel).await?;

        if let Some(pm) = predicted {
            if pm.group == group {
                // Prediction was right; the move has been running since t0.
                let result = pm.task.await.unwrap_or(Err(ActuatorError::Cancelled));
                return match result {
                    Ok(()) => Ok(pm.expected),
                    Err(ActuatorError::Cancelled) => Err(Abort::Cancelled),
                    Err(_) => self.direct_move(group).await.map(|_| pm.expected),
                };
            }
            // Wrong prediction: cancel the in-flight move and re-issue.
            pm.token.cancel();
            let _ = pm.task.await;
            tracing::debug!(group, "prediction wrong, re-positioning");
            return self.direct_move(group).await;
        }

        if self.positioner.active_group() == Some(group) {
            return Ok(Duration::ZERO);
        }
        let moved = self.direct_move_with_token(group, cancel).await?;
        Ok(moved)
    }

    async fn direct_move(&self, group: u8) -> Result<Duration, Abort> {
        // Re-issued moves use a fresh token tied to the transaction parent,
        // not the cancelled predictive child.
        let token = self.txn_parent.lock().child_token();
        self.direct_move_with_token(group, &token).await
    }

    async fn direct_move_with_token(
        &self,
        group: u8,
        cancel: &CancellationToken,
    ) -> Result<Duration, Abort> {
        let expected = self.positioner.expected_move_time(group);
        match self.positioner.activate_group(group, cancel).await {
            Ok(()) => Ok(expected),
            Err(ActuatorError::Cancelled) => Err(Abort::Cancelled),
            Err(ActuatorError::NotCalibrated) => Err(Abort::Noop("positioner_not_calibrated")),
            Err(e) => {
                self.alerts.raise(
                    AlertLevel::Error,
                    "positioner",
                    "group move failed",
                    serde_json::json!({ "group": group, "error": e.to_string() }),
                );
                Err(Abort::Noop("positioner_failed"))
            }
        }
    }

    /// Triggers arriving before calibration completes defer rather than
    /// drop.
    async fn await_calibration(&self, cancel: &CancellationToken) -> Result<(), Abort> {
        if self.positioner.is_calibrated() {
            return Ok(());
        }
        self.alerts.raise(
            AlertLevel::Warning,
            "positioner",
            "trigger deferred until calibration completes",
            serde_json::Value::Null,
        );
        let deadline = Instant::now() + CALIBRATION_WAIT;
        while !self.positioner.is_calibrated() {
            if Instant::now() >= deadline {
                return Err(Abort::Noop("positioner_not_calibrated"));
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                _ = cancel.cancelled() => return Err(Abort::Cancelled),
            }
        }
        Ok(())
    }

    /// Sleep to the fire instant, fire the group, and schedule the diverter.
    async fn fire(
        &self,
        category: FruitCategory,
        group: u8,
        fire_at: Instant,
        divert_at: Instant,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), Abort> {
        tokio::select! {
            _ = tokio::time::sleep_until(fire_at) => {}
            _ = cancel.cancelled() => return Err(Abort::Cancelled),
        }

        // The labeler never fires across a moving positioner or a foreign
        // group.
        if self.positioner.is_moving() {
            return Err(Abort::Noop("positioner_moving"));
        }
        if self.positioner.active_group() != Some(group) {
            self.alerts.raise(
                AlertLevel::Warning,
                "orchestrator",
                "group mismatch at fire time",
                serde_json::json!({ "expected": group }),
            );
            return Err(Abort::Noop("group_mismatch"));
        }

        // The diverter leg overlaps the labeling hold, so it runs as its
        // own task; the per-flap busy guard serialises conflicting fires.
        if self.diverters.is_enabled() {
            let diverters = Arc::clone(&self.diverters);
            let divert_token = cancel.clone();
            let command = DiverterCommand {
                category,
                pre_delay: divert_at.saturating_duration_since(Instant::now()),
                hold: self.diverters.hold(),
            };
            tokio::spawn(async move {
                if let Err(e) = diverters.dispatch(command, &divert_token).await {
                    tracing::debug!(category = category.label(), err = %e, "diverter skipped");
                }
            });
        }

        let command = LabelingCommand {
            target_group: group,
            duration,
            intensity_pct: 100.0,
            issued_at: fire_at,
            deadline_at: fire_at + STALE_TOLERANCE,
        };
        let Some(outcome) = self.labelers.execute(command).await else {
            return Err(Abort::Noop("stale_labeling_command"));
        };
        self.stats.last_fire_ms.store(epoch_ms(), Ordering::Relaxed);
        let _ = self.events.send(PipelineEvent::Labeled {
            group,
            success_count: outcome.success_count,
            failed: outcome.failed_ids.len(),
        });

        let fired_ts = epoch_ms();
        let fired_heads =
            FruitCategory::from_group(group).map(|c| c.labeler_ids()).unwrap_or(&[]);
        for &id in fired_heads {
            self.store.save_labeling(LabelingRecord {
                ts_ms: fired_ts,
                labeler_id: id,
                category,
                duration_s: duration.as_secs_f64(),
                success: !outcome.failed_ids.contains(&id) && !outcome.cancelled_ids.contains(&id),
                position: group,
            });
        }
        if !outcome.failed_ids.is_empty() {
            self.alerts.raise(
                AlertLevel::Warning,
                "labeler",
                "labeler heads failed to fire",
                serde_json::json!({ "failed_ids": outcome.failed_ids }),
            );
        }
        if !outcome.cancelled_ids.is_empty() {
            return Err(Abort::Cancelled);
        }
        Ok(())
    }

    fn detection_failed(&self, error: DetectionError) -> Abort {
        match error {
            DetectionError::Timeout(deadline) => {
                self.alerts.raise(
                    AlertLevel::Warning,
                    "detector",
                    "detection timed out",
                    serde_json::json!({ "deadline_s": deadline }),
                );
                Abort::Noop("detection_timeout")
            }
            DetectionError::Unavailable(_) | DetectionError::Evicted => {
                Abort::Noop("detection_unavailable")
            }
            DetectionError::Cancelled => Abort::Cancelled,
        }
    }

    fn noop(&self, reason: &'static str) {
        self.stats.noops.fetch_add(1, Ordering::Relaxed);
        self.save_metric("pipeline_noop", serde_json::json!({ "reason": reason }));
        tracing::debug!(reason, "pipeline no-op");
    }

    fn save_metric(&self, kind: &str, payload: serde_json::Value) {
        self.store.save_metric(MetricRecord {
            ts_ms: epoch_ms(),
            kind: kind.to_owned(),
            payload,
        });
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
