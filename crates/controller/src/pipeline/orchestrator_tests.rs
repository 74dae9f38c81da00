// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario tests against a scripted detector and the simulation backend,
//! on the paused tokio clock.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;

use super::*;
use crate::config::CameraKind;
use crate::detection::{DetectorState, DetectorStatus};
use crate::hal::{Hal, MockCamera, SimGpio};
use crate::labeler::build_heads;
use crate::metrics::MemoryMetricsStore;
use crate::supervisor::state::SystemState;
use crate::types::{AnalysisTiming, BoundingBox, Detection, FrameAnalysis};

const TRIGGER_PIN: u8 = 17;
const HEAD_BASE: u8 = 5;

fn analysis_of(categories: &[FruitCategory], confidence: f64) -> FrameAnalysis {
    let detections: Vec<Detection> = categories
        .iter()
        .map(|&category| Detection {
            class_id: category.class_id(),
            category,
            confidence,
            bbox: BoundingBox { x1: 200, y1: 160, x2: 420, y2: 360 },
            quality_score: 0.85,
        })
        .collect();
    FrameAnalysis {
        frame_id: uuid::Uuid::new_v4(),
        frame_hash: "scripted".to_owned(),
        fruit_count: detections.len(),
        quality: FrameAnalysis::grade(&detections, 0.9, 0.9),
        detections,
        timing: AnalysisTiming { total_ms: 40.0, ..Default::default() },
        frame_shape: (640, 480),
        lighting_score: 0.9,
        blur_score: 0.9,
    }
}

/// Detector returning pre-scripted results after a fixed delay.
struct ScriptedDetector {
    results: Mutex<VecDeque<Result<FrameAnalysis, DetectionError>>>,
    delay: Duration,
    ready: AtomicBool,
    fallback: FrameAnalysis,
}

impl ScriptedDetector {
    fn new(delay: Duration) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            delay,
            ready: AtomicBool::new(true),
            fallback: analysis_of(&[FruitCategory::Apple], 0.92),
        }
    }

    fn push(&self, result: Result<FrameAnalysis, DetectionError>) {
        self.results.lock().push_back(result);
    }
}

impl Detector for ScriptedDetector {
    async fn detect(
        &self,
        _frame: crate::hal::Frame,
        _priority: ProcessingPriority,
    ) -> Result<FrameAnalysis, DetectionError> {
        tokio::time::sleep(self.delay).await;
        self.results.lock().pop_front().unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn status(&self) -> DetectorStatus {
        DetectorStatus {
            state: if self.is_ready() { DetectorState::Ready } else { DetectorState::Degraded },
            queue_len: 0,
            cache_len: 0,
            cache_hits: 0,
            cache_misses: 0,
            avg_worker_load: 0.0,
            workers: Vec::new(),
        }
    }
}

struct Rig {
    backend: Arc<SimGpio>,
    detector: Arc<ScriptedDetector>,
    positioner: Arc<Positioner>,
    labelers: Arc<LabelerManager>,
    diverters: Arc<DiverterBank>,
    stats: Arc<OrchestratorStats>,
    handle: OrchestratorHandle,
    alerts: Arc<AlertBus>,
    store: Arc<MemoryMetricsStore>,
    state: StateHandle,
}

impl Rig {
    fn trigger(&self) {
        self.backend.inject_edge(TRIGGER_PIN);
    }

    fn head_level(&self, id: u8) -> Option<bool> {
        self.backend.level(HEAD_BASE + id)
    }
}

async fn rig_with(predictive: bool, prototype: bool, detection_delay: Duration) -> Rig {
    let mut config = Config::default();
    config.camera_settings.kind = CameraKind::Mock;
    config.pipeline_settings.predictive_positioning = predictive;

    let backend = Arc::new(SimGpio::new());
    let hal = Hal::with_backends(
        Arc::clone(&backend) as Arc<dyn crate::hal::GpioBackend>,
        Arc::new(MockCamera::new(64, 48, 30)),
    );

    let detector = Arc::new(ScriptedDetector::new(detection_delay));
    let belt = Arc::new(Belt::new(&hal, &config.conveyor_belt_settings).unwrap());
    let motor = {
        let m = &config.motor_controller_settings;
        crate::actuator::DcMotor::new(
            hal.pwm_out(m.pwm_pin, 1000.0).unwrap(),
            hal.digital_out(m.dir_pin1, true).unwrap(),
            hal.digital_out(m.dir_pin2, true).unwrap(),
            Some(hal.digital_out(m.enable_pin, true).unwrap()),
        )
    };
    let positioner = Arc::new(Positioner::new(motor));
    positioner.calibrate().await.unwrap();
    let labelers =
        Arc::new(LabelerManager::new(build_heads(&hal, config.labeler_settings.base_pin).unwrap()));
    let diverters = Arc::new(DiverterBank::new(&hal, &config.diverter_settings).unwrap());
    let alerts = Arc::new(AlertBus::new());
    let store = Arc::new(MemoryMetricsStore::new(256));

    let state = StateHandle::new();
    state.transition(SystemState::Initialising).unwrap();
    state.transition(SystemState::Idle).unwrap();
    state.transition(SystemState::Running).unwrap();

    let cancel = CancellationToken::new();
    let triggers = TriggerSource::spawn(
        Arc::clone(&backend) as Arc<dyn crate::hal::GpioBackend>,
        config.sensor_settings.trigger.clone(),
        Arc::clone(&alerts),
        cancel.clone(),
        None,
    )
    .unwrap();
    triggers.set_accepting(true);

    let mut pipeline_config = PipelineConfig::from_config(&config);
    pipeline_config.prototype = prototype;

    let orchestrator = Orchestrator::new(
        Arc::clone(&detector),
        Arc::clone(&hal.camera),
        Arc::clone(&positioner),
        Arc::clone(&labelers),
        Arc::clone(&diverters),
        Arc::clone(&belt),
        triggers,
        Arc::clone(&alerts),
        Arc::clone(&store) as Arc<dyn MetricsStore>,
        state.clone(),
        pipeline_config,
        cancel.clone(),
    );
    let handle = orchestrator.handle();
    let stats = Arc::clone(&handle.stats);
    tokio::spawn(Arc::clone(&orchestrator).run());

    Rig {
        backend,
        detector,
        positioner,
        labelers,
        diverters,
        stats,
        handle,
        alerts,
        store,
        state,
    }
}

async fn rig() -> Rig {
    rig_with(false, false, Duration::from_millis(40)).await
}

// ── S1: happy path, apple ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn apple_fires_group_zero_on_schedule() {
    let r = rig().await;
    r.detector.push(Ok(analysis_of(&[FruitCategory::Apple], 0.92)));

    r.trigger();
    // Belt leg is 0.5 m at 0.5 m/s: the fire is due at t0 + 1 s.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(r.head_level(0), Some(false));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(r.head_level(0), Some(true));
    assert_eq!(r.head_level(1), Some(true));
    assert_eq!(r.head_level(2), Some(false));

    // Hold is 2.0 + 0.3 s for one fruit.
    tokio::time::sleep(Duration::from_secs_f64(2.3)).await;
    assert_eq!(r.head_level(0), Some(false));

    // Diverter leg is 1.0 m: flap 0 activates around t0 + 3 s.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let flaps = r.diverters.snapshot();
    let apple = flaps.iter().find(|f| f.category == FruitCategory::Apple).unwrap();
    assert_eq!(apple.activations, 1);

    assert_eq!(r.stats.processed.load(Ordering::Relaxed), 1);
    assert_eq!(r.store.labeling_count(), 2);
    assert_eq!(r.state.current(), SystemState::Running);
}

// ── S2: category change moves the positioner first ────────────────────

#[tokio::test(start_paused = true)]
async fn pear_moves_positioner_then_fires_group_one() {
    let r = rig().await;
    r.detector.push(Ok(analysis_of(&[FruitCategory::Pear], 0.88)));

    r.trigger();
    // Raise + lower pushes the fire out to t0 + 3 + 1 s.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(r.head_level(2), Some(false));
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(r.head_level(2), Some(true));
    assert_eq!(r.head_level(3), Some(true));
    assert_eq!(r.head_level(0), Some(false));

    assert_eq!(r.positioner.active_group(), Some(1));
    tokio::time::sleep(Duration::from_secs(6)).await;
    let flaps = r.diverters.snapshot();
    let pear = flaps.iter().find(|f| f.category == FruitCategory::Pear).unwrap();
    assert_eq!(pear.activations, 1);
}

// ── S4: detection timeout is a no-op ──────────────────────────────────

#[tokio::test(start_paused = true)]
async fn detection_timeout_is_a_noop() {
    let r = rig().await;
    r.detector.push(Err(DetectionError::Timeout(10.0)));

    r.trigger();
    tokio::time::sleep(Duration::from_secs(12)).await;

    assert_eq!(r.stats.processed.load(Ordering::Relaxed), 0);
    assert_eq!(r.stats.noops.load(Ordering::Relaxed), 1);
    assert!(r.labelers.snapshot().iter().all(|(s, _)| s.last_fire_ts.is_none()));
    let recent = r.alerts.recent(10);
    assert!(recent.iter().any(|a| a.message.contains("timed out")));

    // The pipeline is ready for the next trigger.
    r.detector.push(Ok(analysis_of(&[FruitCategory::Apple], 0.9)));
    r.trigger();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(r.stats.processed.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_or_poor_analysis_never_fires() {
    let r = rig().await;
    r.detector.push(Ok(analysis_of(&[], 0.0)));
    r.trigger();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(r.stats.noops.load(Ordering::Relaxed), 1);
    assert!(r.labelers.snapshot().iter().all(|(s, _)| s.last_fire_ts.is_none()));
}

// ── S5: backlog overflow ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ten_triggers_defer_eight_drop_one() {
    let r = rig().await;

    // All ten arrive while the first fruit's labeling is in flight.
    for _ in 0..10 {
        r.trigger();
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    assert_eq!(r.stats.backlog_dropped.load(Ordering::Relaxed), 1);
    let recent = r.alerts.recent(10);
    assert!(recent.iter().any(|a| a.message.contains("backlog overflow")));

    // The deferred nine all complete eventually.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(r.stats.processed.load(Ordering::Relaxed), 9);
    assert_eq!(r.stats.backlog_len.load(Ordering::Relaxed), 0);
}

// ── S6: predictive pre-position with a wrong prediction ───────────────

#[tokio::test(start_paused = true)]
async fn wrong_prediction_cancels_and_reissues() {
    let r = rig_with(true, false, Duration::from_millis(60)).await;

    // Build an apple streak so the predictor offers APPLE.
    for _ in 0..10 {
        r.detector.push(Ok(analysis_of(&[FruitCategory::Apple], 0.9)));
        r.trigger();
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    // Maintenance move leaves the positioner away from the apple group.
    r.positioner.activate_group(1, &CancellationToken::new()).await.unwrap();

    r.detector.push(Ok(analysis_of(&[FruitCategory::Lemon], 0.91)));
    r.trigger();
    tokio::time::sleep(Duration::from_secs(10)).await;

    // The corrected move engaged the lemon group and its heads fired.
    assert_eq!(r.positioner.active_group(), Some(2));
    let snapshot = r.labelers.snapshot();
    assert!(snapshot[4].0.last_fire_ts.is_some());
    assert!(snapshot[5].0.last_fire_ts.is_some());
}

// ── prototype topology ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn prototype_clamps_every_fire_to_group_zero() {
    let r = rig_with(false, true, Duration::from_millis(40)).await;
    r.detector.push(Ok(analysis_of(&[FruitCategory::Pear], 0.88)));

    r.trigger();
    tokio::time::sleep(Duration::from_secs(6)).await;

    // A pear still fires the single group: heads 0 and 1, no positioner
    // move away from group 0.
    let snapshot = r.labelers.snapshot();
    assert!(snapshot[0].0.last_fire_ts.is_some());
    assert!(snapshot[1].0.last_fire_ts.is_some());
    assert!(snapshot[2].0.last_fire_ts.is_none());
    assert!(snapshot[3].0.last_fire_ts.is_none());
    assert_eq!(r.positioner.active_group(), Some(0));

    // The three flaps keep their per-category routing.
    tokio::time::sleep(Duration::from_secs(4)).await;
    let flaps = r.diverters.snapshot();
    let pear = flaps.iter().find(|f| f.category == FruitCategory::Pear).unwrap();
    assert_eq!(pear.activations, 1);

    // Labeling records carry the detected category at position 0.
    let labelings = r.store.recent_labelings(4);
    assert_eq!(labelings.len(), 2);
    assert!(labelings.iter().all(|l| l.category == FruitCategory::Pear && l.position == 0));
}

// ── degraded sensor-only mode ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unavailable_detector_fires_default_group() {
    let r = rig().await;
    r.detector.ready.store(false, Ordering::Release);

    r.trigger();
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Default group 0 fired without any detection.
    let snapshot = r.labelers.snapshot();
    assert!(snapshot[0].0.last_fire_ts.is_some());
    let recent = r.alerts.recent(10);
    assert!(recent.iter().any(|a| a.message.contains("sensor-only")));
}

// ── gating and cancellation ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn triggers_outside_running_are_ignored() {
    let r = rig().await;
    r.state.transition(SystemState::Idle).unwrap();

    r.trigger();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(r.stats.processed.load(Ordering::Relaxed), 0);
    assert_eq!(r.stats.noops.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_schedule_accounts_cancelled() {
    let r = rig().await;
    r.detector.push(Ok(analysis_of(&[FruitCategory::Apple], 0.9)));

    r.trigger();
    // Cancel while the fire is still scheduled (before t0 + 1 s).
    tokio::time::sleep(Duration::from_millis(500)).await;
    r.handle.cancel_in_flight();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(r.stats.processed.load(Ordering::Relaxed), 0);
    assert_eq!(r.stats.cancelled.load(Ordering::Relaxed), 1);
    assert!(r.labelers.snapshot().iter().all(|(s, _)| s.last_fire_ts.is_none()));
}
