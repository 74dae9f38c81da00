// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detection service facade: request admission, deadlines, dedup, and the
//! worker pool lifecycle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::AiModelSettings;
use crate::detection::cache::{DedupCache, DEDUP_CAPACITY};
use crate::detection::model::ModelFactory;
use crate::detection::queue::{PushError, QueuedRequest, RequestQueue};
use crate::detection::worker::{spawn_worker, WorkerStats};
use crate::error::DetectionError;
use crate::hal::Frame;
use crate::types::{FrameAnalysis, ProcessingPriority};

/// How long bring-up waits for the first model to load.
const MODEL_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const MODEL_LOAD_POLL: Duration = Duration::from_millis(50);

/// Lifecycle state of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    Initialising,
    Ready,
    /// No model could be loaded; the pipeline runs sensor-only.
    Degraded,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub busy: bool,
    pub model_ready: bool,
    pub processed: u64,
    pub errors: u64,
    pub rebuilds: u32,
    pub heartbeat_age_ms: u64,
    pub confidence_threshold: f64,
    pub fps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectorStatus {
    pub state: DetectorState,
    pub queue_len: usize,
    pub cache_len: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_worker_load: f64,
    pub workers: Vec<WorkerSnapshot>,
}

/// Detection contract the orchestrator consumes.
pub trait Detector: Send + Sync {
    fn detect(
        &self,
        frame: Frame,
        priority: ProcessingPriority,
    ) -> impl Future<Output = Result<FrameAnalysis, DetectionError>> + Send;

    fn is_ready(&self) -> bool;

    fn status(&self) -> DetectorStatus;
}

struct WorkerMember {
    stats: Arc<WorkerStats>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

pub struct DetectionService {
    settings: AiModelSettings,
    queue: Arc<RequestQueue>,
    cache: Arc<DedupCache>,
    workers: Vec<WorkerMember>,
    shutdown: Arc<AtomicBool>,
    state: RwLock<DetectorState>,
}

impl DetectionService {
    /// Bring up the worker pool and wait for model load.
    ///
    /// If no worker manages to load a model the service comes up
    /// `Degraded` rather than failing bring-up: the line keeps moving in
    /// sensor-only mode while the operator is alerted.
    pub async fn start(settings: AiModelSettings, factory: ModelFactory) -> Self {
        let queue = Arc::new(RequestQueue::new(settings.max_queue_size));
        let cache = Arc::new(DedupCache::new(DEDUP_CAPACITY));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(settings.num_workers.max(1));
        for id in 0..settings.num_workers.max(1) {
            let stats = Arc::new(WorkerStats::new(id, settings.confidence_threshold));
            let handle = spawn_worker(
                settings.clone(),
                Arc::clone(&queue),
                Arc::clone(&cache),
                Arc::clone(&factory),
                Arc::clone(&shutdown),
                Arc::clone(&stats),
            );
            workers.push(WorkerMember { stats, handle: Mutex::new(Some(handle)) });
        }

        let service = Self {
            settings,
            queue,
            cache,
            workers,
            shutdown,
            state: RwLock::new(DetectorState::Initialising),
        };
        service.await_model_load().await;
        service
    }

    async fn await_model_load(&self) {
        let deadline = tokio::time::Instant::now() + MODEL_LOAD_TIMEOUT;
        loop {
            let ready = self.workers.iter().filter(|w| w.stats.is_model_ready()).count();
            // Workers that exited early (factory error) will never be ready.
            let still_loading = self
                .workers
                .iter()
                .filter(|w| {
                    !w.stats.is_model_ready()
                        && w.handle.lock().as_ref().map(|h| !h.is_finished()).unwrap_or(false)
                })
                .count();

            if still_loading == 0 || tokio::time::Instant::now() >= deadline {
                if ready > 0 {
                    *self.state.write() = DetectorState::Ready;
                    tracing::info!(
                        ready,
                        total = self.workers.len(),
                        "detection service ready"
                    );
                } else {
                    *self.state.write() = DetectorState::Degraded;
                    tracing::error!("no model loaded, detection service degraded");
                }
                return;
            }
            tokio::time::sleep(MODEL_LOAD_POLL).await;
        }
    }

    /// Busy fraction of the pool, feeding the deadline load factor.
    pub fn avg_worker_load(&self) -> f64 {
        if self.workers.is_empty() {
            return 0.0;
        }
        let busy = self.workers.iter().filter(|w| w.stats.is_busy()).count();
        busy as f64 / self.workers.len() as f64
    }

    /// Per-request deadline: `base_timeout × priority_factor × load_factor`.
    pub fn request_deadline(&self, priority: ProcessingPriority) -> Duration {
        let load_factor = 1.0 + 0.5 * self.avg_worker_load();
        Duration::from_secs_f64(
            self.settings.request_timeout_s * priority.deadline_factor() * load_factor,
        )
    }

    /// Stop the pool: close the queue, join every worker.
    pub async fn stop(&self) {
        *self.state.write() = DetectorState::Stopped;
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();
        for worker in &self.workers {
            let handle = worker.handle.lock().take();
            if let Some(handle) = handle {
                let _ = tokio::task::spawn_blocking(move || handle.join()).await;
            }
        }
        tracing::info!("detection service stopped");
    }

    pub fn state(&self) -> DetectorState {
        *self.state.read()
    }
}

impl Detector for DetectionService {
    async fn detect(
        &self,
        frame: Frame,
        priority: ProcessingPriority,
    ) -> Result<FrameAnalysis, DetectionError> {
        match self.state() {
            DetectorState::Ready => {}
            state => {
                return Err(DetectionError::Unavailable(format!(
                    "detector is {state:?}"
                )))
            }
        }

        let frame_hash = frame.content_hash();
        if let Some(hit) = self.cache.get(&frame_hash) {
            return Ok(hit);
        }

        let deadline = self.request_deadline(priority);
        let (reply, rx) = oneshot::channel();
        let request = QueuedRequest {
            request_id: uuid::Uuid::new_v4(),
            frame,
            frame_hash,
            priority,
            enqueued_at: std::time::Instant::now(),
            deadline,
            reply,
        };

        match self.queue.push(request) {
            Ok(()) => {}
            Err(PushError::Full) => {
                return Err(DetectionError::Unavailable("queue full".to_owned()))
            }
            Err(PushError::Closed) => {
                return Err(DetectionError::Unavailable("queue closed".to_owned()))
            }
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            // Reply sender dropped without answering: worker died mid-request.
            Ok(Err(_)) => Err(DetectionError::Timeout(deadline.as_secs_f64())),
            Err(_) => Err(DetectionError::Timeout(deadline.as_secs_f64())),
        }
    }

    fn is_ready(&self) -> bool {
        self.state() == DetectorState::Ready
    }

    fn status(&self) -> DetectorStatus {
        DetectorStatus {
            state: self.state(),
            queue_len: self.queue.len(),
            cache_len: self.cache.len(),
            cache_hits: self.cache.hit_count(),
            cache_misses: self.cache.miss_count(),
            avg_worker_load: self.avg_worker_load(),
            workers: self
                .workers
                .iter()
                .map(|w| WorkerSnapshot {
                    id: w.stats.id,
                    busy: w.stats.is_busy(),
                    model_ready: w.stats.is_model_ready(),
                    processed: w.stats.processed(),
                    errors: w.stats.errors(),
                    rebuilds: w.stats.rebuilds(),
                    heartbeat_age_ms: w.stats.heartbeat_age_ms(),
                    confidence_threshold: w.stats.confidence_threshold(),
                    fps: w.stats.fps(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
