//! Per-operation latency aggregation.
//!
//! Each label maps to one [`MonitorRecord`]. `record` updates it through the
//! map entry, which holds the shard lock for the whole read-modify-write, so
//! two concurrent observations of the same label cannot lose an increment.
//! The label cap is claimed from a counter inside the vacant entry, so racing
//! first-time labels cannot overshoot it either.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::limits::MAX_MONITOR_LABELS;
use crate::model::*;
use crate::wal::WalHandle;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("too many operation labels, dropped {0:?}")]
    TooManyLabels(String),
    #[error("failed to persist observation of {label:?}: {source}")]
    Persist {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct OperationMonitor {
    records: DashMap<String, MonitorRecord>,
    /// Distinct labels admitted so far. Kept apart from `records.len()`,
    /// which would deadlock while an entry is held.
    labels: AtomicUsize,
    wal: Option<WalHandle>,
}

impl Default for OperationMonitor {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl OperationMonitor {
    pub fn in_memory() -> Self {
        Self {
            records: DashMap::new(),
            labels: AtomicUsize::new(0),
            wal: None,
        }
    }

    pub fn with_wal(wal: WalHandle) -> Self {
        Self {
            records: DashMap::new(),
            labels: AtomicUsize::new(0),
            wal: Some(wal),
        }
    }

    /// Fold one observation into the record for `label`.
    pub async fn record(&self, label: &str, elapsed: Duration) -> Result<(), MonitorError> {
        let elapsed_secs = elapsed.as_secs_f64();
        let at = now_ms();
        metrics::histogram!(
            crate::observability::OPERATION_DURATION_SECONDS,
            "operation" => label.to_string()
        )
        .record(elapsed_secs);

        let Some(wal) = &self.wal else {
            return self.upsert(label, elapsed_secs, at);
        };
        let _checkpoint = wal.checkpoint().await;
        self.upsert(label, elapsed_secs, at)?;
        let event = Event::OperationObserved {
            label: label.to_string(),
            elapsed_secs,
            at,
        };
        wal.append(&event).await.map_err(|source| MonitorError::Persist {
            label: label.to_string(),
            source,
        })
    }

    fn upsert(&self, label: &str, elapsed_secs: f64, at: Ms) -> Result<(), MonitorError> {
        match self.records.entry(label.to_string()) {
            Entry::Occupied(mut e) => e.get_mut().observe(elapsed_secs, at),
            Entry::Vacant(e) => {
                let claimed = self
                    .labels
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < MAX_MONITOR_LABELS).then_some(n + 1)
                    });
                if claimed.is_err() {
                    return Err(MonitorError::TooManyLabels(label.to_string()));
                }
                e.insert(MonitorRecord::first(label, elapsed_secs, at));
            }
        }
        Ok(())
    }

    /// Apply a replayed event. Store events are ignored here.
    pub fn restore(&self, event: &Event) {
        match event {
            Event::OperationObserved {
                label,
                elapsed_secs,
                at,
            } => match self.records.entry(label.clone()) {
                Entry::Occupied(mut e) => e.get_mut().observe(*elapsed_secs, *at),
                Entry::Vacant(e) => {
                    self.labels.fetch_add(1, Ordering::SeqCst);
                    e.insert(MonitorRecord::first(label, *elapsed_secs, *at));
                }
            },
            Event::MonitorRestored(record) => {
                let prev = self
                    .records
                    .insert(record.operation_label.clone(), record.clone());
                if prev.is_none() {
                    self.labels.fetch_add(1, Ordering::SeqCst);
                }
            }
            Event::SlotProvisioned { .. } | Event::Committed { .. } => {}
        }
    }

    pub fn get(&self, label: &str) -> Option<MonitorRecord> {
        self.records.get(label).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, largest `total_time` first.
    pub fn list(&self) -> Vec<MonitorRecord> {
        let mut records: Vec<MonitorRecord> =
            self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| {
            b.total_time
                .total_cmp(&a.total_time)
                .then_with(|| a.operation_label.cmp(&b.operation_label))
        });
        records
    }

    pub fn snapshot_events(&self) -> Vec<Event> {
        self.records
            .iter()
            .map(|e| Event::MonitorRestored(e.value().clone()))
            .collect()
    }
}

/// Render a latency in seconds as `"<ms> ms"` with two decimals.
pub fn format_ms(secs: f64) -> String {
    format!("{:.2} ms", secs * 1000.0)
}
