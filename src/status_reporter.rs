//! Sink for module/workload state and metrics.
//!
//! A `DashMap` keyed by whole-second timestamp accumulates throughput
//! counts, and a periodic sampler owned by the Supervisor reads off the
//! rate.

use crate::domain::{WorkloadId, WorkloadState};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sink for workload state transitions and routing throughput, exposed to
/// the local HTTP API and to the Supervisor's speed sampler.
#[derive(Default)]
pub struct StatusReporter {
    workload_states: DashMap<WorkloadId, WorkloadState>,
    published_per_workload: DashMap<WorkloadId, u64>,
    processed_total: AtomicU64,
    per_second_counts: DashMap<u64, u64>,
    average_speed_millihertz: AtomicU64,
}

impl StatusReporter {
    /// A reporter with no recorded state yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the reported state for a workload. The Lifecycle Engine is
    /// the sole writer of this table.
    pub fn set_workload_state(&self, uuid: WorkloadId, state: WorkloadState) {
        self.workload_states.insert(uuid, state);
    }

    /// The last-reported state for a workload, if any.
    #[must_use]
    pub fn workload_state(&self, uuid: WorkloadId) -> Option<WorkloadState> {
        self.workload_states.get(&uuid).map(|entry| *entry)
    }

    /// Snapshot of every workload's last-reported state.
    #[must_use]
    pub fn all_workload_states(&self) -> Vec<(WorkloadId, WorkloadState)> {
        self.workload_states
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Record one processed (delivered) message for `publisher`, bumping
    /// both the per-workload counter and the global throughput sample.
    pub fn record_message_processed(&self, publisher: WorkloadId) {
        *self.published_per_workload.entry(publisher).or_insert(0) += 1;
        self.processed_total.fetch_add(1, Ordering::Relaxed);

        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        *self.per_second_counts.entry(now_secs).or_insert(0) += 1;

        // Bound the window so the map does not grow without limit across a
        // long-lived process; a minute of history is more than the speed
        // sampler ever looks back at.
        if self.per_second_counts.len() > 120 {
            let cutoff = now_secs.saturating_sub(60);
            self.per_second_counts.retain(|ts, _| *ts >= cutoff);
        }
    }

    /// `getPublishedMessagesPerWorkload`: the processed-message count for
    /// each workload the reporter has observed publishing.
    #[must_use]
    pub fn published_messages_per_workload(&self) -> Vec<(WorkloadId, u64)> {
        self.published_per_workload
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Add a zero entry for a newly-known workload, or drop a departed one,
    /// so the per-workload counters track the current workload list after a
    /// routing reconfiguration.
    pub fn reconcile_workload_counters(&self, known_uuids: &[WorkloadId]) {
        let known: std::collections::HashSet<_> = known_uuids.iter().copied().collect();
        self.published_per_workload
            .retain(|uuid, _| known.contains(uuid));
        for uuid in known_uuids {
            self.published_per_workload.entry(*uuid).or_insert(0);
        }
    }

    /// Total messages processed since the reporter was created.
    #[must_use]
    pub fn processed_messages(&self) -> u64 {
        self.processed_total.load(Ordering::Relaxed)
    }

    /// Sample the global counter and publish an average messages/second
    /// figure since the last sample. Called by the Supervisor's speed
    /// sampler task on its configured interval.
    pub fn sample_average_speed(&self, window: std::time::Duration) {
        let window_secs = window.as_secs().max(1);
        let total: u64 = self.per_second_counts.iter().map(|entry| *entry).sum();
        #[allow(clippy::cast_precision_loss)]
        let rate = total as f64 / window_secs as f64;
        self.average_speed_millihertz
            .store((rate * 1000.0) as u64, Ordering::Relaxed);
    }

    /// The last sampled average messages/second.
    #[must_use]
    pub fn average_speed(&self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let millihertz = self.average_speed_millihertz.load(Ordering::Relaxed) as f32;
        millihertz / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_state_round_trips() {
        let reporter = StatusReporter::new();
        let uuid = WorkloadId::generate();
        reporter.set_workload_state(uuid, WorkloadState::Running);
        assert_eq!(reporter.workload_state(uuid), Some(WorkloadState::Running));
    }

    #[test]
    fn processed_messages_accumulate() {
        let reporter = StatusReporter::new();
        let publisher = WorkloadId::generate();
        reporter.record_message_processed(publisher);
        reporter.record_message_processed(publisher);
        assert_eq!(reporter.processed_messages(), 2);
        let per_workload = reporter.published_messages_per_workload();
        assert_eq!(per_workload, vec![(publisher, 2)]);
    }

    #[test]
    fn reconcile_drops_departed_and_adds_new_workloads() {
        let reporter = StatusReporter::new();
        let stays = WorkloadId::generate();
        let leaves = WorkloadId::generate();
        let arrives = WorkloadId::generate();
        reporter.record_message_processed(stays);
        reporter.record_message_processed(leaves);

        reporter.reconcile_workload_counters(&[stays, arrives]);

        let mut per_workload = reporter.published_messages_per_workload();
        per_workload.sort_by_key(|(uuid, _)| uuid.to_string());
        let uuids: Vec<_> = per_workload.iter().map(|(u, _)| *u).collect();
        assert!(uuids.contains(&stays));
        assert!(uuids.contains(&arrives));
        assert!(!uuids.contains(&leaves));
    }
}
