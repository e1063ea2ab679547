//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Latest-value snapshot publisher with single-producer gating."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use chrono::Utc;
use parking_lot::Mutex;
use strum::Display;
use tokio::sync::watch;
use tracing::debug;
use zilla_common::SourcePolicy;
use zilla_telemetry::{MetricsDelta, MetricsSnapshot};

/// Producer of metric deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    /// Decoded from the device stream.
    Live,
    /// Produced by the simulated generator.
    Simulated,
}

/// Producer allowed to write while the link is (or is not) connected.
pub fn producer_for(policy: SourcePolicy, connected: bool) -> Option<SourceKind> {
    match policy {
        SourcePolicy::Live => Some(SourceKind::Live),
        SourcePolicy::Simulated => Some(SourceKind::Simulated),
        SourcePolicy::LiveWithFallback if connected => Some(SourceKind::Live),
        SourcePolicy::LiveWithFallback => Some(SourceKind::Simulated),
    }
}

/// Interface every metrics source pushes through.
pub trait MetricsSink: Send + Sync {
    /// Merge `delta` if `source` is the active producer. Returns whether it was applied.
    fn push(&self, source: SourceKind, delta: &MetricsDelta) -> bool;
}

/// Holds the one current snapshot and notifies subscribers.
///
/// Subscribers see latest-value semantics: a slow reader observes only the most
/// recent snapshot, never a backlog.
#[derive(Debug)]
pub struct MetricsPublisher {
    active: Mutex<Option<SourceKind>>,
    tx: watch::Sender<MetricsSnapshot>,
}

impl MetricsPublisher {
    pub fn new(active: Option<SourceKind>) -> Self {
        let (tx, _) = watch::channel(MetricsSnapshot::default());
        Self {
            active: Mutex::new(active),
            tx,
        }
    }

    /// Merge a delta regardless of producer and stamp the snapshot.
    pub fn update(&self, delta: &MetricsDelta) {
        let _active = self.active.lock();
        self.merge(delta);
    }

    /// Latest snapshot.
    pub fn current(&self) -> MetricsSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MetricsSnapshot> {
        self.tx.subscribe()
    }

    pub fn active_source(&self) -> Option<SourceKind> {
        *self.active.lock()
    }

    /// Switch producer. Pushes already inside the lock finish first.
    pub fn set_active_source(&self, source: Option<SourceKind>) {
        let mut active = self.active.lock();
        if *active != source {
            debug!(from = ?*active, to = ?source, "switching metrics producer");
            *active = source;
        }
    }

    /// Restore the default snapshot.
    pub fn reset(&self) {
        let _active = self.active.lock();
        self.tx.send_replace(MetricsSnapshot::default());
    }

    fn merge(&self, delta: &MetricsDelta) {
        self.tx.send_modify(|snapshot| {
            delta.apply_to(snapshot);
            snapshot.timestamp = Utc::now();
        });
    }
}

impl Default for MetricsPublisher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MetricsSink for MetricsPublisher {
    fn push(&self, source: SourceKind, delta: &MetricsDelta) -> bool {
        let active = self.active.lock();
        if *active != Some(source) {
            return false;
        }
        self.merge(delta);
        true
    }
}
