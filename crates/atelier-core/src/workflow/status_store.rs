//! In-memory store of workflow instance snapshots.
//!
//! The workflow driver writes a snapshot after every step transition; HTTP
//! handlers read them for polling and analytics. Terminal status is sticky:
//! a write can never move an instance out of `success`, `partial_success`,
//! `failed` or `cancelled`. Terminal instances are evicted once their TTL
//! lapses or when the store is over capacity; running ones never are.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use atelier_types::config::StatusStoreConfig;
use atelier_types::workflow::{WorkflowInstance, WorkflowStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// Aggregate counters over the instances currently held.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowAnalytics {
    pub total: usize,
    /// Instance count per status (`snake_case` status names).
    pub by_status: BTreeMap<String, usize>,
    pub templates: BTreeMap<String, TemplateStats>,
}

/// Per-template counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateStats {
    pub runs: usize,
    pub completed: usize,
    /// Mean wall time of completed runs.
    pub average_duration_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// StatusStore
// ---------------------------------------------------------------------------

pub struct StatusStore {
    instances: DashMap<Uuid, WorkflowInstance>,
    config: StatusStoreConfig,
}

impl StatusStore {
    pub fn new(config: StatusStoreConfig) -> Self {
        Self {
            instances: DashMap::new(),
            config,
        }
    }

    /// Insert or replace the snapshot for `instance.id`.
    ///
    /// If the stored instance is already terminal, only step data is taken
    /// from the incoming snapshot; status, completion time and error stay.
    pub fn record(&self, instance: WorkflowInstance) {
        let inserted = match self.instances.entry(instance.id) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                if current.status.is_terminal() {
                    current.steps = instance.steps;
                    if current.started_at.is_none() {
                        current.started_at = instance.started_at;
                    }
                } else {
                    *current = instance;
                }
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(instance);
                true
            }
        };
        if inserted && self.instances.len() > self.config.max_entries {
            self.evict_over_capacity();
        }
    }

    /// Move a non-terminal instance to `cancelled`. Returns the latest
    /// snapshot, or `None` for an unknown ID.
    pub fn mark_cancelled(&self, id: Uuid) -> Option<WorkflowInstance> {
        let mut entry = self.instances.get_mut(&id)?;
        if !entry.status.is_terminal() {
            entry.status = WorkflowStatus::Cancelled;
            entry.completed_at = Some(Utc::now());
            entry.error = Some("workflow cancelled".to_string());
        }
        Some(entry.clone())
    }

    pub fn get(&self, id: Uuid) -> Option<WorkflowInstance> {
        self.instances.get(&id).map(|entry| entry.clone())
    }

    /// Most recent instances first, optionally filtered by status.
    pub fn list(&self, status: Option<WorkflowStatus>, limit: usize) -> Vec<WorkflowInstance> {
        let mut found: Vec<WorkflowInstance> = self
            .instances
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .map(|entry| entry.clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found.truncate(limit);
        found
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Counts per status and average duration per template.
    pub fn analytics(&self) -> WorkflowAnalytics {
        let mut analytics = WorkflowAnalytics::default();
        let mut durations: BTreeMap<String, (u64, u64)> = BTreeMap::new();

        for entry in self.instances.iter() {
            analytics.total += 1;
            *analytics
                .by_status
                .entry(entry.status.as_str().to_string())
                .or_default() += 1;

            let stats = analytics
                .templates
                .entry(entry.template_name.clone())
                .or_default();
            stats.runs += 1;
            if entry.status.is_terminal() {
                stats.completed += 1;
                if let Some(ms) = entry.duration_ms() {
                    let (sum, count) = durations.entry(entry.template_name.clone()).or_default();
                    *sum += ms;
                    *count += 1;
                }
            }
        }

        for (name, (sum, count)) in durations {
            if let Some(stats) = analytics.templates.get_mut(&name) {
                stats.average_duration_ms = Some(sum / count);
            }
        }
        analytics
    }

    /// Drop terminal instances whose TTL lapsed by `now`, then enforce the
    /// capacity limit. Returns the number of instances removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = i64::try_from(self.config.ttl_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX);
        let before = self.instances.len();
        self.instances.retain(|_, instance| {
            match (instance.status.is_terminal(), instance.completed_at) {
                (true, Some(completed)) => completed
                    .checked_add_signed(ttl)
                    .is_none_or(|expiry| expiry > now),
                _ => true,
            }
        });
        let expired = before - self.instances.len();
        expired + self.evict_over_capacity()
    }

    /// Remove the oldest terminal instances until within `max_entries`.
    fn evict_over_capacity(&self) -> usize {
        let excess = self.instances.len().saturating_sub(self.config.max_entries);
        if excess == 0 {
            return 0;
        }

        let mut terminal: Vec<(DateTime<Utc>, Uuid)> = self
            .instances
            .iter()
            .filter(|entry| entry.status.is_terminal())
            .map(|entry| (entry.completed_at.unwrap_or(entry.created_at), entry.id))
            .collect();
        terminal.sort();

        let mut removed = 0;
        for (_, id) in terminal.into_iter().take(excess) {
            if self.instances.remove(&id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "evicted workflow instances over capacity");
        }
        removed
    }

    /// Run `purge_expired` every `sweep_interval_secs` until `shutdown` fires.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.purge_expired(Utc::now());
                        if removed > 0 {
                            tracing::info!(removed, remaining = self.len(), "purged workflow instances");
                        }
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
