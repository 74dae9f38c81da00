// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger source: debounced edge detection over the optical sensor.
//!
//! Edges arrive from the GPIO driver's interrupt context and are marshalled
//! through a channel; qualifying edges become [`TriggerEvent`]s in a bounded
//! queue with drop-oldest overflow.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::actuator::{Actuator, Stepper};
use crate::config::TriggerSettings;
use crate::hal::GpioBackend;
use crate::supervisor::alerts::{AlertBus, AlertLevel};
use crate::types::TriggerEvent;

/// Bounded queue capacity.
const QUEUE_CAPACITY: usize = 200;
/// Overflow alerts are rate-limited to one per second.
const OVERFLOW_ALERT_INTERVAL: Duration = Duration::from_secs(1);
/// Direct-fire stepper run time.
const DIRECT_FIRE_DURATION: Duration = Duration::from_millis(200);

struct Inner {
    settings: TriggerSettings,
    queue: Mutex<VecDeque<TriggerEvent>>,
    notify: Notify,
    alerts: Arc<AlertBus>,
    /// Gate closed in emergency-stop / shutting-down / offline.
    accepting: AtomicBool,
    last_edge: Mutex<Option<Instant>>,
    last_overflow_alert: Mutex<Option<Instant>>,
    last_direct_fire: Mutex<Option<Instant>>,
    accepted: AtomicU64,
    dropped: AtomicU64,
    cancel: CancellationToken,
}

/// Handle to the trigger queue.
#[derive(Clone)]
pub struct TriggerSource {
    inner: Arc<Inner>,
}

impl TriggerSource {
    /// Spawn the edge listener task and return the queue handle.
    ///
    /// `direct_stepper` is the optional label-applicator shortcut fired on
    /// each qualifying edge, outside the pipeline.
    pub fn spawn(
        gpio: Arc<dyn GpioBackend>,
        settings: TriggerSettings,
        alerts: Arc<AlertBus>,
        cancel: CancellationToken,
        direct_stepper: Option<Arc<Stepper>>,
    ) -> Result<Self, crate::error::HalError> {
        let edges = gpio.subscribe_edges(settings.pin)?;
        let inner = Arc::new(Inner {
            settings,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            alerts,
            accepting: AtomicBool::new(false),
            last_edge: Mutex::new(None),
            last_overflow_alert: Mutex::new(None),
            last_direct_fire: Mutex::new(None),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            cancel,
        });

        tokio::spawn(listen(Arc::clone(&inner), edges, direct_stepper));
        Ok(Self { inner })
    }

    /// Open or close the pipeline gate. Closed gates discard edges.
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.accepting.store(accepting, Ordering::Release);
    }

    /// Receive the next trigger event in timestamp order. Returns `None`
    /// once the source is cancelled and drained.
    pub async fn recv(&self) -> Option<TriggerEvent> {
        loop {
            if let Some(event) = self.inner.queue.lock().pop_front() {
                return Some(event);
            }
            if self.inner.cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = self.inner.cancel.cancelled() => {}
            }
        }
    }

    /// Drop every pending event. Used on emergency-stop.
    pub fn drain(&self) -> usize {
        let mut queue = self.inner.queue.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    /// Queue fill ratio for the watchdog.
    pub fn fill_ratio(&self) -> f64 {
        self.inner.queue.lock().len() as f64 / QUEUE_CAPACITY as f64
    }

    pub fn accepted_count(&self) -> u64 {
        self.inner.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

/// Edge listener loop. Runs until the source is cancelled.
async fn listen(
    inner: Arc<Inner>,
    mut edges: tokio::sync::broadcast::Receiver<crate::hal::RawEdge>,
    direct_stepper: Option<Arc<Stepper>>,
) {
    loop {
        let edge = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            edge = edges.recv() => match edge {
                Ok(e) => e,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "edge listener lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        };
        if edge.pin != inner.settings.pin {
            continue;
        }

        // Software debounce: one qualifying edge per window.
        {
            let mut last = inner.last_edge.lock();
            if let Some(prev) = *last {
                if edge.ts.duration_since(prev) < inner.settings.debounce() {
                    continue;
                }
            }
            *last = Some(edge.ts);
        }

        if let Some(ref stepper) = direct_stepper {
            maybe_direct_fire(&inner, stepper);
        }

        if !inner.accepting.load(Ordering::Acquire) {
            continue;
        }
        enqueue(&inner, TriggerEvent { ts: edge.ts, pin: edge.pin });
    }
}

fn enqueue(inner: &Inner, event: TriggerEvent) {
    let mut queue = inner.queue.lock();
    if queue.len() >= QUEUE_CAPACITY {
        queue.pop_front();
        inner.dropped.fetch_add(1, Ordering::Relaxed);
        drop(queue);
        raise_overflow(inner);
        inner.queue.lock().push_back(event);
    } else {
        queue.push_back(event);
    }
    inner.accepted.fetch_add(1, Ordering::Relaxed);
    inner.notify.notify_one();
}

/// At most one overflow alert per second, however many events are dropped.
fn raise_overflow(inner: &Inner) {
    let now = Instant::now();
    let mut last = inner.last_overflow_alert.lock();
    if let Some(prev) = *last {
        if now.duration_since(prev) < OVERFLOW_ALERT_INTERVAL {
            return;
        }
    }
    *last = Some(now);
    inner.alerts.raise(
        AlertLevel::Warning,
        "trigger",
        "trigger queue overflow",
        serde_json::json!({ "dropped_total": inner.dropped.load(Ordering::Relaxed) }),
    );
}

/// Rate-limited direct stepper fire, outside the pipeline.
fn maybe_direct_fire(inner: &Inner, stepper: &Arc<Stepper>) {
    if !inner.settings.direct_fire {
        return;
    }
    let min_interval = Duration::from_secs_f64(inner.settings.min_interval_s);
    {
        let mut last = inner.last_direct_fire.lock();
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < min_interval {
                return;
            }
        }
        *last = Some(now);
    }
    let stepper = Arc::clone(stepper);
    tokio::spawn(async move {
        if let Err(e) = stepper.activate(DIRECT_FIRE_DURATION, 100.0).await {
            tracing::debug!(err = %e, "direct fire skipped");
        }
    });
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
