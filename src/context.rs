//! `AgentContext`: the explicitly-constructed value holding every shared
//! table and component, threaded downward into the Supervisor's tasks and
//! the local HTTP/WebSocket API.
//!
//! Rather than exposing each major component as a process-global, they are
//! fields on a value built once in `main` and passed by reference, so tests
//! can build as many independent contexts as they like.

use crate::broker_adapter::{BrokerAdapter, InMemoryBrokerAdapter};
use crate::config::AgentConfig;
use crate::connector_pool::ConnectorClientPool;
use crate::database::{DatabaseConfig, DatabaseConnection, DatabasePath, DatabaseResult};
use crate::lifecycle_engine::LifecycleEngine;
use crate::routing_core::MessageRoutingCore;
use crate::runtime_adapter::{InMemoryRuntimeAdapter, RuntimeAdapter};
use crate::status_reporter::StatusReporter;
use crate::storage::WorkloadRegistryStore;
use crate::workload_registry::{SharedWorkloadRegistry, WorkloadRegistry};
use std::sync::Arc;

/// Every shared component the daemon needs, wired together once at
/// start-up.
///
/// The container runtime and message broker are out of this crate's scope:
/// they are modeled here as trait objects, and `AgentContext` is constructed
/// against the in-memory fakes until a real adapter crate is plugged in via
/// [`Self::new_with_adapters`].
pub struct AgentContext {
    /// Validated configuration the context was built from.
    pub config: AgentConfig,
    /// In-memory desired/current workload and registry state.
    pub registry: SharedWorkloadRegistry,
    /// Durable mirror of the registry, backed by embedded SQLite.
    pub store: WorkloadRegistryStore,
    /// Drives container tasks against the runtime adapter.
    pub lifecycle: Arc<LifecycleEngine>,
    /// Owns publishers, receivers, and routes; dispatches messages.
    pub routing: Arc<MessageRoutingCore>,
    /// Sink for workload/module state and throughput metrics.
    pub status: Arc<StatusReporter>,
    /// Long-lived connector sessions to remote brokers.
    pub connector_pool: Arc<ConnectorClientPool>,
}

impl AgentContext {
    /// Build a context from configuration, using the in-memory runtime and
    /// broker fakes as the concrete adapters.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::database::DatabaseError`] if the durable store
    /// cannot be opened or migrated.
    pub async fn new(config: AgentConfig) -> DatabaseResult<Self> {
        let broker = Arc::new(InMemoryBrokerAdapter::new());
        let runtime = Arc::new(InMemoryRuntimeAdapter::new());
        Self::new_with_adapters(config, runtime, broker).await
    }

    /// Build a context from configuration and caller-supplied runtime/broker
    /// adapters, for production deployments with real capability
    /// implementations or for tests that want deterministic fakes.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::database::DatabaseError`] if the durable store
    /// cannot be opened or migrated.
    pub async fn new_with_adapters(
        config: AgentConfig,
        runtime: Arc<dyn RuntimeAdapter>,
        broker: Arc<dyn BrokerAdapter>,
    ) -> DatabaseResult<Self> {
        let database_path = DatabasePath::new(&config.database_path)?;
        let database_config = DatabaseConfig::new(database_path);
        let connection = DatabaseConnection::initialize(database_config).await?;
        let store = WorkloadRegistryStore::new(connection);

        let registry: SharedWorkloadRegistry = Arc::new(WorkloadRegistry::new());
        for workload in store.all_workloads().await? {
            registry.record_current(workload);
        }
        registry.replace_registries(store.all_registries().await?);

        let status = Arc::new(StatusReporter::new());
        let connector_pool = Arc::new(ConnectorClientPool::new(
            config.connector_dev_mode,
            config.trust_store_dir.clone(),
        ));

        let lifecycle = Arc::new(LifecycleEngine::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
            Arc::clone(&status),
            config.bind_address.clone(),
        ));

        let routing = Arc::new(MessageRoutingCore::new(
            Arc::clone(&broker),
            Arc::clone(&connector_pool),
            Arc::clone(&registry),
            Arc::clone(&status),
        ));

        Ok(Self {
            config,
            registry,
            store,
            lifecycle,
            routing,
            status,
            connector_pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(path: std::path::PathBuf) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.database_path = path;
        config
    }

    #[tokio::test]
    async fn new_opens_an_empty_store_and_wires_every_component() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path().join("fogline.db"));

        let context = AgentContext::new(config).await.unwrap();
        assert!(context.registry.current_snapshot().is_empty());
        assert!(context.store.all_workloads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_restores_previously_persisted_workloads() {
        use crate::domain::{ImageRef, RegistryId, Workload, WorkloadId};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fogline.db");

        let workload = Workload::new(
            WorkloadId::generate(),
            ImageRef::try_new("img:1").unwrap(),
            RegistryId(5),
            false,
        );
        {
            let context = AgentContext::new(config_with(path.clone())).await.unwrap();
            context.store.save_workload(&workload).await.unwrap();
        }

        let context = AgentContext::new(config_with(path)).await.unwrap();
        let snapshot = context.registry.current_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].uuid, workload.uuid);
    }
}
