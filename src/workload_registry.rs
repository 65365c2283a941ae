//! In-memory store of current and latest-desired workloads, registries, and
//! routes. Each table is a `DashMap` for O(1) lookup without a coarse lock
//! shared across readers and writers.

use crate::domain::{
    ConnectorConfigHandle, ConnectorProducerConfig, Registry, RegistryId, Route, Workload,
    WorkloadId,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Holds `latestMicroservices`, `currentMicroservices`, `routes`, and
/// `registries`. Reads return cloned snapshots; writes are whole-table
/// replacements driven by the controller client (out of scope for this
/// crate: callers push snapshots in via [`WorkloadRegistry::replace_latest`]
/// and friends).
#[derive(Default)]
pub struct WorkloadRegistry {
    latest: DashMap<WorkloadId, Workload>,
    current: DashMap<WorkloadId, Workload>,
    routes: DashMap<WorkloadId, Route>,
    registries: DashMap<RegistryId, Registry>,
    connector_configs: DashMap<ConnectorConfigHandle, ConnectorProducerConfig>,
    /// Set once the registry has received its first controller snapshot;
    /// planners can use this to hold off dispatching tasks against an empty
    /// desired-state view.
    primed: AtomicBool,
}

impl WorkloadRegistry {
    /// An empty registry, as constructed at agent start-up.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once at least one desired-state snapshot has been applied.
    #[must_use]
    pub fn is_primed(&self) -> bool {
        self.primed.load(Ordering::Acquire)
    }

    /// Replace the latest-desired workload set wholesale.
    pub fn replace_latest(&self, workloads: Vec<Workload>) {
        self.latest.clear();
        for workload in workloads {
            self.latest.insert(workload.uuid, workload);
        }
        self.primed.store(true, Ordering::Release);
    }

    /// Replace the registries table wholesale.
    pub fn replace_registries(&self, registries: Vec<Registry>) {
        self.registries.clear();
        for registry in registries {
            self.registries.insert(registry.id, registry);
        }
    }

    /// Replace the routes table wholesale. The Routing Core reconciles its
    /// own publisher/receiver tables against this snapshot separately; this
    /// method only updates the registry's record of desired routing.
    pub fn replace_routes(&self, routes: Vec<Route>) {
        self.routes.clear();
        for route in routes {
            self.routes.insert(route.producer, route);
        }
    }

    /// The latest desired workload for `uuid`, if the controller has
    /// declared one.
    #[must_use]
    pub fn find_latest_by_uuid(&self, uuid: WorkloadId) -> Option<Workload> {
        self.latest.get(&uuid).map(|entry| entry.clone())
    }

    /// `true` if `uuid` exists in the latest-desired set.
    #[must_use]
    pub fn microservice_exists(&self, uuid: WorkloadId) -> bool {
        self.latest.contains_key(&uuid)
    }

    /// Snapshot of every currently-tracked (last-known-applied) workload.
    #[must_use]
    pub fn current_snapshot(&self) -> Vec<Workload> {
        self.current.iter().map(|entry| entry.clone()).collect()
    }

    /// Record (or update) a workload's current state, as observed by the
    /// Lifecycle Engine after a command completes.
    pub fn record_current(&self, workload: Workload) {
        self.current.insert(workload.uuid, workload);
    }

    /// Drop a workload from the current set, e.g. after a successful REMOVE.
    pub fn forget_current(&self, uuid: WorkloadId) {
        self.current.remove(&uuid);
    }

    /// Look up a registry by id.
    #[must_use]
    pub fn find_registry(&self, id: RegistryId) -> Option<Registry> {
        self.registries.get(&id).map(|entry| entry.clone())
    }

    /// Replace the connector producer config table wholesale. The handles
    /// embedded in receivers resolve against this table; it is populated
    /// alongside `routes` by whatever hands the controller's route snapshot
    /// to the registry.
    pub fn replace_connector_configs(&self, configs: Vec<(ConnectorConfigHandle, ConnectorProducerConfig)>) {
        self.connector_configs.clear();
        for (handle, config) in configs {
            self.connector_configs.insert(handle, config);
        }
    }

    /// Resolve a receiver's connector config handle back to the full config.
    #[must_use]
    pub fn resolve_connector_config(
        &self,
        handle: ConnectorConfigHandle,
    ) -> Option<ConnectorProducerConfig> {
        self.connector_configs.get(&handle).map(|entry| entry.clone())
    }

    /// Snapshot of every route currently known to the registry.
    #[must_use]
    pub fn routes_snapshot(&self) -> Vec<Route> {
        self.routes.iter().map(|entry| entry.clone()).collect()
    }

    /// Mark (or clear) the advisory `updating` flag on a tracked workload.
    pub fn set_updating(&self, uuid: WorkloadId, updating: bool) {
        if let Some(mut entry) = self.current.get_mut(&uuid) {
            entry.updating = updating;
        }
    }
}

/// Shared handle to a [`WorkloadRegistry`], threaded through every component
/// that needs to read desired state.
pub type SharedWorkloadRegistry = Arc<WorkloadRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ImageRef;

    fn workload(id: WorkloadId) -> Workload {
        Workload::new(id, ImageRef::try_new("img:1").unwrap(), RegistryId(5), false)
    }

    #[test]
    fn find_latest_by_uuid_returns_none_before_any_snapshot() {
        let registry = WorkloadRegistry::new();
        assert!(registry.find_latest_by_uuid(WorkloadId::generate()).is_none());
        assert!(!registry.is_primed());
    }

    #[test]
    fn replace_latest_primes_the_registry() {
        let registry = WorkloadRegistry::new();
        let id = WorkloadId::generate();
        registry.replace_latest(vec![workload(id)]);
        assert!(registry.is_primed());
        assert!(registry.microservice_exists(id));
    }

    #[test]
    fn replace_latest_is_a_wholesale_swap() {
        let registry = WorkloadRegistry::new();
        let first = WorkloadId::generate();
        let second = WorkloadId::generate();
        registry.replace_latest(vec![workload(first)]);
        registry.replace_latest(vec![workload(second)]);
        assert!(!registry.microservice_exists(first));
        assert!(registry.microservice_exists(second));
    }

    #[test]
    fn current_tracking_round_trips() {
        let registry = WorkloadRegistry::new();
        let id = WorkloadId::generate();
        registry.record_current(workload(id));
        assert_eq!(registry.current_snapshot().len(), 1);
        registry.forget_current(id);
        assert!(registry.current_snapshot().is_empty());
    }

    #[test]
    fn connector_config_resolves_by_handle() {
        let registry = WorkloadRegistry::new();
        let handle = ConnectorConfigHandle(7);
        let config = ConnectorProducerConfig {
            host: "relay.example".to_string(),
            port: 9443,
            tls_cert_fingerprint: "abc".to_string(),
            tls_cert_pem: None,
        };
        registry.replace_connector_configs(vec![(handle, config.clone())]);
        assert_eq!(registry.resolve_connector_config(handle), Some(config));
        assert!(registry.resolve_connector_config(ConnectorConfigHandle(8)).is_none());
    }
}
