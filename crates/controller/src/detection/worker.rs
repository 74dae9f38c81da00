// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inference worker: one OS thread owning one model instance.
//!
//! Workers are isolated: a crash or timeout in one is reported as a
//! per-request failure and the worker rebuilds itself; the others continue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::AiModelSettings;
use crate::detection::cache::DedupCache;
use crate::detection::model::ModelFactory;
use crate::detection::queue::{QueuedRequest, RequestQueue};
use crate::error::DetectionError;
use crate::hal::Frame;
use crate::metrics::epoch_ms;
use crate::types::{AnalysisTiming, Detection, FrameAnalysis};

/// Consecutive errors before a worker rebuilds its model from scratch.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Queue poll interval; doubles as the heartbeat cadence when idle.
const POP_TIMEOUT: Duration = Duration::from_millis(100);
/// Adaptive-threshold review interval.
const ADAPT_INTERVAL: Duration = Duration::from_secs(300);
const ADAPT_STEP: f64 = 0.05;
const ADAPT_MIN: f64 = 0.3;
const ADAPT_MAX: f64 = 0.9;
/// Throughput target for the adaptive threshold, frames per second.
const TARGET_FPS: f64 = 10.0;
/// Sliding window for the FPS measurement.
const FPS_WINDOW: Duration = Duration::from_secs(60);

/// Counters shared between a worker thread and the service.
pub struct WorkerStats {
    pub id: usize,
    busy: AtomicBool,
    model_ready: AtomicBool,
    processed: AtomicU64,
    errors: AtomicU64,
    consecutive_errors: AtomicU32,
    rebuilds: AtomicU32,
    last_heartbeat_ms: AtomicU64,
    confidence_threshold: Mutex<f64>,
    recent_frames: Mutex<VecDeque<Instant>>,
}

impl WorkerStats {
    pub fn new(id: usize, confidence_threshold: f64) -> Self {
        Self {
            id,
            busy: AtomicBool::new(false),
            model_ready: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            consecutive_errors: AtomicU32::new(0),
            rebuilds: AtomicU32::new(0),
            last_heartbeat_ms: AtomicU64::new(0),
            confidence_threshold: Mutex::new(confidence_threshold),
            recent_frames: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_model_ready(&self) -> bool {
        self.model_ready.load(Ordering::Acquire)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn rebuilds(&self) -> u32 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    pub fn confidence_threshold(&self) -> f64 {
        *self.confidence_threshold.lock()
    }

    /// Milliseconds since the worker last reported in.
    pub fn heartbeat_age_ms(&self) -> u64 {
        epoch_ms().saturating_sub(self.last_heartbeat_ms.load(Ordering::Relaxed))
    }

    fn heartbeat(&self) {
        self.last_heartbeat_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    /// Measured throughput over the sliding window.
    pub fn fps(&self) -> f64 {
        let window = self.recent_frames.lock();
        if window.len() < 2 {
            return 0.0;
        }
        let span = window
            .back()
            .zip(window.front())
            .map(|(newest, oldest)| newest.duration_since(*oldest))
            .unwrap_or_default();
        if span.is_zero() {
            0.0
        } else {
            (window.len() - 1) as f64 / span.as_secs_f64()
        }
    }

    fn record_frame(&self) {
        let now = Instant::now();
        let mut window = self.recent_frames.lock();
        window.push_back(now);
        while let Some(front) = window.front() {
            if now.duration_since(*front) > FPS_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Spawn one worker thread. Returns its join handle.
pub fn spawn_worker(
    settings: AiModelSettings,
    queue: Arc<RequestQueue>,
    cache: Arc<DedupCache>,
    factory: ModelFactory,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("inference-{}", stats.id))
        .spawn(move || run(settings, queue, cache, factory, shutdown, stats))
        .unwrap_or_else(|e| {
            // Thread spawn failure is unrecoverable resource exhaustion.
            tracing::error!(err = %e, "failed to spawn inference worker");
            std::thread::spawn(|| {})
        })
}

fn run(
    settings: AiModelSettings,
    queue: Arc<RequestQueue>,
    cache: Arc<DedupCache>,
    factory: ModelFactory,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
) {
    let mut model = match factory() {
        Ok(m) => {
            stats.heartbeat();
            stats.model_ready.store(true, Ordering::Release);
            tracing::info!(worker = stats.id, "model loaded");
            m
        }
        Err(e) => {
            tracing::error!(worker = stats.id, err = %e, "model load failed");
            return;
        }
    };
    let mut last_adapt = Instant::now();

    loop {
        stats.heartbeat();
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let Some(request) = queue.pop_blocking(POP_TIMEOUT) else {
            if settings.adaptive_threshold && last_adapt.elapsed() >= ADAPT_INTERVAL {
                adapt_threshold(&stats);
                last_adapt = Instant::now();
            }
            continue;
        };

        // Stale requests are not worth the inference.
        if request.enqueued_at.elapsed() > request.deadline {
            let _ = request
                .reply
                .send(Err(DetectionError::Timeout(request.deadline.as_secs_f64())));
            continue;
        }

        // Another worker may have finished an identical frame since this one
        // was enqueued.
        if let Some(hit) = cache.get(&request.frame_hash) {
            let _ = request.reply.send(Ok(hit));
            continue;
        }

        stats.busy.store(true, Ordering::Release);
        let threshold = stats.confidence_threshold();
        let result = process_frame(model.as_mut(), &request, threshold);
        stats.busy.store(false, Ordering::Release);

        match result {
            Ok(analysis) => {
                stats.consecutive_errors.store(0, Ordering::Relaxed);
                stats.processed.fetch_add(1, Ordering::Relaxed);
                stats.record_frame();
                cache.put(request.frame_hash.clone(), analysis.clone());
                let _ = request.reply.send(Ok(analysis));
            }
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                let consecutive = stats.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(worker = stats.id, consecutive, err = %e, "inference failed");
                // A genuine failure is not a deadline miss; keep the two
                // distinguishable for the operator.
                let _ = request
                    .reply
                    .send(Err(DetectionError::Unavailable(format!("inference failed: {e}"))));

                if consecutive >= MAX_CONSECUTIVE_ERRORS {
                    match rebuild(&factory, &stats) {
                        Some(fresh) => model = fresh,
                        None => break,
                    }
                }
            }
        }
    }
    tracing::info!(worker = stats.id, "inference worker stopped");
}

/// Reload the model from scratch after repeated failures.
fn rebuild(
    factory: &ModelFactory,
    stats: &WorkerStats,
) -> Option<Box<dyn crate::detection::model::VisionModel>> {
    stats.model_ready.store(false, Ordering::Release);
    tracing::warn!(worker = stats.id, "worker unhealthy, rebuilding model");
    match factory() {
        Ok(model) => {
            stats.model_ready.store(true, Ordering::Release);
            stats.consecutive_errors.store(0, Ordering::Relaxed);
            stats.rebuilds.fetch_add(1, Ordering::Relaxed);
            Some(model)
        }
        Err(e) => {
            tracing::error!(worker = stats.id, err = %e, "model rebuild failed, worker exiting");
            None
        }
    }
}

fn process_frame(
    model: &mut dyn crate::detection::model::VisionModel,
    request: &QueuedRequest,
    confidence_threshold: f64,
) -> anyhow::Result<FrameAnalysis> {
    let start_total = Instant::now();

    let start_preprocess = Instant::now();
    let (lighting_score, blur_score) = frame_quality(&request.frame);
    let preprocess_ms = start_preprocess.elapsed().as_secs_f64() * 1000.0;

    let start_inference = Instant::now();
    let raw = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        model.predict(&request.frame, confidence_threshold)
    }))
    .map_err(|_| anyhow::anyhow!("model panicked"))??;
    let inference_ms = start_inference.elapsed().as_secs_f64() * 1000.0;

    let start_postprocess = Instant::now();
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|r| {
            Detection::from_raw(
                r.class_id,
                r.confidence,
                r.bbox,
                request.frame.width,
                request.frame.height,
            )
        })
        .collect();
    let quality = FrameAnalysis::grade(&detections, lighting_score, blur_score);
    let postprocess_ms = start_postprocess.elapsed().as_secs_f64() * 1000.0;

    Ok(FrameAnalysis {
        frame_id: request.request_id,
        frame_hash: request.frame_hash.clone(),
        fruit_count: detections.len(),
        detections,
        timing: AnalysisTiming {
            preprocess_ms,
            inference_ms,
            postprocess_ms,
            total_ms: start_total.elapsed().as_secs_f64() * 1000.0,
        },
        quality,
        frame_shape: (request.frame.width, request.frame.height),
        lighting_score,
        blur_score,
    })
}

/// Lighting and blur proxies from the raw bytes. Deterministic so identical
/// frames analyse identically.
fn frame_quality(frame: &Frame) -> (f64, f64) {
    if frame.data.is_empty() {
        return (0.0, 0.0);
    }
    let n = frame.data.len() as f64;
    let mean = frame.data.iter().map(|&b| b as f64).sum::<f64>() / n;
    let variance = frame.data.iter().map(|&b| (b as f64 - mean).powi(2)).sum::<f64>() / n;

    // Best lighting at mid exposure; sharpness proxied by local contrast.
    let lighting = 1.0 - (mean / 255.0 - 0.5).abs() * 2.0;
    let blur = (variance.sqrt() / 80.0).min(1.0);
    (lighting, blur)
}

/// Nudge the confidence threshold to keep throughput near the target,
/// within fixed bounds. Per-worker; does not change the request contract.
fn adapt_threshold(stats: &WorkerStats) {
    let fps = stats.fps();
    if fps == 0.0 {
        return;
    }
    let mut threshold = stats.confidence_threshold.lock();
    let before = *threshold;
    if fps < TARGET_FPS * 0.8 {
        *threshold = (*threshold + ADAPT_STEP).min(ADAPT_MAX);
    } else if fps > TARGET_FPS * 1.2 {
        *threshold = (*threshold - ADAPT_STEP).max(ADAPT_MIN);
    }
    if (*threshold - before).abs() > f64::EPSILON {
        tracing::info!(
            worker = stats.id,
            fps,
            from = before,
            to = *threshold,
            "adaptive confidence threshold adjusted"
        );
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
