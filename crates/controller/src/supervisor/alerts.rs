// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert bus: multi-producer fan-out of component alerts.
//!
//! Repeated identical (component, message) pairs within a 5-minute window
//! are coalesced with an incremented `occurrence_count` rather than emitted
//! separately.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::metrics::{epoch_ms, AlertRecord, MetricsStore};

/// Coalescing window for identical alerts.
const DEDUP_WINDOW: Duration = Duration::from_secs(300);
/// How many recent alerts the bus keeps for `/status`.
const RECENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub level: AlertLevel,
    pub component: String,
    pub message: String,
    pub details: serde_json::Value,
    pub ts_ms: u64,
    pub occurrence_count: u32,
}

struct DedupEntry {
    alert_id: u64,
    first_seen: Instant,
    count: u32,
}

/// Multi-producer alert fan-out, consumed by the API and the metrics store.
pub struct AlertBus {
    tx: broadcast::Sender<Alert>,
    recent: Mutex<VecDeque<Alert>>,
    dedup: Mutex<HashMap<(String, String), DedupEntry>>,
    next_id: AtomicU64,
    store: Mutex<Option<Arc<dyn MetricsStore>>>,
}

impl AlertBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            recent: Mutex::new(VecDeque::new()),
            dedup: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            store: Mutex::new(None),
        }
    }

    /// Attach the metrics store sink. Called once during bring-up.
    pub fn attach_store(&self, store: Arc<dyn MetricsStore>) {
        *self.store.lock() = Some(store);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }

    /// Raise an alert. Returns the alert id, or the id of the coalesced
    /// earlier alert when deduplicated.
    pub fn raise(
        &self,
        level: AlertLevel,
        component: &str,
        message: &str,
        details: serde_json::Value,
    ) -> u64 {
        let key = (component.to_owned(), message.to_owned());
        let now = Instant::now();

        {
            let mut dedup = self.dedup.lock();
            if let Some(entry) = dedup.get_mut(&key) {
                if now.duration_since(entry.first_seen) < DEDUP_WINDOW {
                    entry.count += 1;
                    let count = entry.count;
                    let id = entry.alert_id;
                    drop(dedup);
                    self.bump_occurrence(id, count);
                    return id;
                }
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            dedup.insert(key, DedupEntry { alert_id: id, first_seen: now, count: 1 });
            drop(dedup);

            let alert = Alert {
                id,
                level,
                component: component.to_owned(),
                message: message.to_owned(),
                details,
                ts_ms: epoch_ms(),
                occurrence_count: 1,
            };
            tracing::info!(
                component,
                level = level.as_str(),
                message,
                "alert raised"
            );
            self.push_recent(alert.clone());
            if let Some(store) = self.store.lock().clone() {
                store.save_alert(to_record(&alert));
            }
            let _ = self.tx.send(alert);
            id
        }
    }

    /// Last `n` alerts, newest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let recent = self.recent.lock();
        recent.iter().rev().take(n).cloned().collect()
    }

    fn push_recent(&self, alert: Alert) {
        let mut recent = self.recent.lock();
        if recent.len() >= RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(alert);
    }

    fn bump_occurrence(&self, id: u64, count: u32) {
        let mut recent = self.recent.lock();
        if let Some(alert) = recent.iter_mut().find(|a| a.id == id) {
            alert.occurrence_count = count;
        }
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}

fn to_record(alert: &Alert) -> AlertRecord {
    AlertRecord {
        id: alert.id,
        ts_ms: alert.ts_ms,
        level: alert.level.as_str().to_owned(),
        component: alert.component.clone(),
        message: alert.message.clone(),
        details: alert.details.clone(),
        resolved: false,
        resolution_ts_ms: None,
        occurrence_count: alert.occurrence_count,
    }
}

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;
