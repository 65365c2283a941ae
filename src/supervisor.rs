//! Supervisor: starts and restarts the agent's long-running tasks, and
//! records their status.
//!
//! Every long-lived task here is a `tokio::time::interval` tick guarded by a
//! `select!` against a shared `tokio_util::sync::CancellationToken`, never a
//! bare `loop { sleep(...) }`.

use crate::domain::ContainerTask;
use crate::lifecycle_engine::LifecycleEngine;
use crate::routing_core::MessageRoutingCore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Last-observed status of one supervised task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    /// Task spawned, has not yet completed its first tick.
    Starting,
    /// Task is ticking normally.
    Running,
    /// Task's last tick failed; it keeps retrying on its own schedule.
    Failed(String),
    /// Task observed the cancellation signal and exited.
    Stopped,
}

/// Owns the agent's supervisor tasks: the Message Routing Core's speed
/// sampler and liveness watchdog. Each task runs until `cancellation` fires;
/// the Supervisor never itself decides to tear the process down.
pub struct Supervisor {
    routing: Arc<MessageRoutingCore>,
    lifecycle: Arc<LifecycleEngine>,
    speed_sampler_interval: Duration,
    watchdog_interval: Duration,
    cancellation: CancellationToken,
    module_status: DashMap<&'static str, ModuleStatus>,
}

impl Supervisor {
    /// Construct a supervisor around a routing core, a lifecycle engine, and
    /// the configured sampler/watchdog intervals. Call [`Self::spawn_all`] to
    /// start its tasks.
    #[must_use]
    pub fn new(
        routing: Arc<MessageRoutingCore>,
        lifecycle: Arc<LifecycleEngine>,
        speed_sampler_interval: Duration,
        watchdog_interval: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        let module_status = DashMap::new();
        module_status.insert("speed_sampler", ModuleStatus::Starting);
        module_status.insert("liveness_watchdog", ModuleStatus::Starting);
        module_status.insert("lifecycle_dispatch", ModuleStatus::Starting);
        Self {
            routing,
            lifecycle,
            speed_sampler_interval,
            watchdog_interval,
            cancellation,
            module_status,
        }
    }

    /// The last-recorded status for a named module, if it has been spawned.
    #[must_use]
    pub fn status(&self, module: &str) -> Option<ModuleStatus> {
        self.module_status.get(module).map(|entry| entry.clone())
    }

    /// Spawn every supervised task, returning their join handles so the
    /// caller can await clean shutdown after cancelling. `tasks` is drained
    /// by the lifecycle dispatch loop; the planner that feeds it (the
    /// controller client) is external to this crate.
    pub fn spawn_all(
        self: &Arc<Self>,
        tasks: mpsc::UnboundedReceiver<ContainerTask>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            Arc::clone(self).spawn_speed_sampler(),
            Arc::clone(self).spawn_liveness_watchdog(),
            Arc::clone(self).spawn_lifecycle_dispatch(tasks),
        ]
    }

    fn spawn_lifecycle_dispatch(
        self: Arc<Self>,
        mut tasks: mpsc::UnboundedReceiver<ContainerTask>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.module_status
                .insert("lifecycle_dispatch", ModuleStatus::Running);
            loop {
                tokio::select! {
                    () = self.cancellation.cancelled() => {
                        self.module_status
                            .insert("lifecycle_dispatch", ModuleStatus::Stopped);
                        break;
                    }
                    task = tasks.recv() => {
                        let Some(task) = task else {
                            self.module_status
                                .insert("lifecycle_dispatch", ModuleStatus::Stopped);
                            break;
                        };
                        if let Err(err) = self.lifecycle.execute(task).await {
                            warn!(error = %err, "lifecycle task failed");
                            self.module_status.insert(
                                "lifecycle_dispatch",
                                ModuleStatus::Failed(err.to_string()),
                            );
                        } else {
                            self.module_status
                                .insert("lifecycle_dispatch", ModuleStatus::Running);
                        }
                    }
                }
            }
        })
    }

    fn spawn_speed_sampler(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.speed_sampler_interval);
            self.module_status.insert("speed_sampler", ModuleStatus::Running);
            loop {
                tokio::select! {
                    () = self.cancellation.cancelled() => {
                        self.module_status.insert("speed_sampler", ModuleStatus::Stopped);
                        break;
                    }
                    _ = ticker.tick() => {
                        self.routing.sample_speed(self.speed_sampler_interval);
                    }
                }
            }
        })
    }

    fn spawn_liveness_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.watchdog_interval);
            self.module_status.insert("liveness_watchdog", ModuleStatus::Running);
            loop {
                tokio::select! {
                    () = self.cancellation.cancelled() => {
                        self.module_status.insert("liveness_watchdog", ModuleStatus::Stopped);
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.routing.check_liveness().await {
                            Ok(()) => {
                                self.module_status.insert("liveness_watchdog", ModuleStatus::Running);
                            }
                            Err(err) => {
                                warn!(error = %err, "liveness watchdog tick failed");
                                self.module_status
                                    .insert("liveness_watchdog", ModuleStatus::Failed(err.to_string()));
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker_adapter::{BrokerAdapter, InMemoryBrokerAdapter};
    use crate::connector_pool::ConnectorClientPool;
    use crate::status_reporter::StatusReporter;
    use crate::workload_registry::WorkloadRegistry;

    async fn routing_core() -> Arc<MessageRoutingCore> {
        let broker = Arc::new(InMemoryBrokerAdapter::new());
        broker.start_server().await.unwrap();
        Arc::new(MessageRoutingCore::new(
            broker as Arc<dyn BrokerAdapter>,
            Arc::new(ConnectorClientPool::new(true, std::env::temp_dir())),
            Arc::new(WorkloadRegistry::new()),
            Arc::new(StatusReporter::new()),
        ))
    }

    fn lifecycle_engine(registry: crate::workload_registry::SharedWorkloadRegistry) -> Arc<LifecycleEngine> {
        Arc::new(LifecycleEngine::new(
            Arc::new(crate::runtime_adapter::InMemoryRuntimeAdapter::new()),
            registry,
            Arc::new(StatusReporter::new()),
            "10.0.0.5".to_string(),
        ))
    }

    #[tokio::test]
    async fn spawned_tasks_report_running_then_stop_on_cancellation() {
        let routing = routing_core().await;
        let lifecycle = lifecycle_engine(Arc::new(Default::default()));
        let cancellation = CancellationToken::new();
        let supervisor = Arc::new(Supervisor::new(
            routing,
            lifecycle,
            Duration::from_millis(10),
            Duration::from_millis(10),
            cancellation.clone(),
        ));
        let (_tx, rx) = mpsc::unbounded_channel();
        let handles = supervisor.spawn_all(rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(supervisor.status("speed_sampler"), Some(ModuleStatus::Running));
        assert_eq!(
            supervisor.status("liveness_watchdog"),
            Some(ModuleStatus::Running)
        );

        cancellation.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(supervisor.status("speed_sampler"), Some(ModuleStatus::Stopped));
        assert_eq!(
            supervisor.status("liveness_watchdog"),
            Some(ModuleStatus::Stopped)
        );
    }

    #[tokio::test]
    async fn lifecycle_dispatch_executes_queued_tasks() {
        use crate::domain::{ImageRef, Registry, RegistryId, TaskAction, Workload, WorkloadId};

        let registry: crate::workload_registry::SharedWorkloadRegistry = Arc::new(Default::default());
        let uuid = WorkloadId::generate();
        registry.replace_latest(vec![Workload::new(
            uuid,
            ImageRef::try_new("img:1").unwrap(),
            RegistryId(5),
            false,
        )]);
        registry.replace_registries(vec![Registry {
            id: RegistryId(5),
            url: "quay.example/team".to_string(),
            credentials: None,
            tls_cert: None,
            dev_mode_enabled: false,
        }]);

        let routing = routing_core().await;
        let lifecycle = lifecycle_engine(Arc::clone(&registry));
        let cancellation = CancellationToken::new();
        let supervisor = Arc::new(Supervisor::new(
            routing,
            lifecycle,
            Duration::from_secs(60),
            Duration::from_secs(60),
            cancellation.clone(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let handles = supervisor.spawn_all(rx);

        tx.send(ContainerTask::new(TaskAction::Add, uuid)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.current_snapshot()[0].container_id.is_some());

        cancellation.cancel();
        drop(tx);
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
