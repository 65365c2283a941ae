//! Workload Lifecycle Engine: `execute(task) -> future<void>`.
//!
//! Applies the pull/create/start/stop/remove call sequence against a
//! container runtime capability trait, reporting state at each step, and
//! dispatches the ADD/UPDATE/REMOVE/STOP command taxonomy onto it.

use crate::domain::{
    ContainerTask, TaskAction, WorkloadId, WorkloadState, CACHE_REGISTRY_ID,
};
use crate::error::{AgentError, AgentResult};
use crate::runtime_adapter::{ContainerStatus, RuntimeAdapter};
use crate::status_reporter::StatusReporter;
use crate::workload_registry::SharedWorkloadRegistry;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

/// Serializes every `removeContainerByUuid` call process-wide, so two
/// concurrent removal attempts for different (or the same) uuid cannot
/// race against the runtime. The design calls this out explicitly as a
/// single global mutex, not a per-uuid one, mirroring the
/// coarse-grained `Arc<RwLock<HashMap>>` state guard.
type DeleteMutex = AsyncMutex<()>;

/// Drives workload tasks against a [`RuntimeAdapter`], reporting state
/// transitions to a [`StatusReporter`] and consulting a
/// [`SharedWorkloadRegistry`] for desired state and registry lookups.
pub struct LifecycleEngine {
    runtime: Arc<dyn RuntimeAdapter>,
    registry: SharedWorkloadRegistry,
    status: Arc<StatusReporter>,
    delete_mutex: DeleteMutex,
    host_ip: String,
}

impl LifecycleEngine {
    /// Construct a lifecycle engine bound to the given runtime, workload
    /// registry, and status reporter. `host_ip` is the address the runtime
    /// binds created containers to.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn RuntimeAdapter>,
        registry: SharedWorkloadRegistry,
        status: Arc<StatusReporter>,
        host_ip: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            registry,
            status,
            delete_mutex: AsyncMutex::new(()),
            host_ip: host_ip.into(),
        }
    }

    /// Execute one [`ContainerTask`] to completion.
    ///
    /// # Errors
    ///
    /// Returns an [`AgentError`] only for the ADD/UPDATE registry-config and
    /// image-unavailable cases; most failures are logged and reported via
    /// the status reporter rather than returned, matching the design's
    /// "failure is surfaced as state, not a propagated error" convention for
    /// START/REMOVE.
    #[instrument(skip(self), fields(uuid = %task.workload_uuid, action = ?task.action))]
    pub async fn execute(&self, task: ContainerTask) -> AgentResult<()> {
        match task.action {
            TaskAction::Add => self.add(task.workload_uuid).await,
            TaskAction::Update => self.update(task.workload_uuid).await,
            TaskAction::Remove => {
                self.remove_container_by_uuid(task.workload_uuid, false).await
            }
            TaskAction::RemoveWithCleanUp => {
                self.remove_container_by_uuid(task.workload_uuid, true).await
            }
            TaskAction::Stop => self.stop_container(task.workload_uuid).await,
        }
    }

    async fn add(&self, uuid: WorkloadId) -> AgentResult<()> {
        if self.registry.find_latest_by_uuid(uuid).is_none() {
            return Ok(());
        }
        let already_applied = self
            .registry
            .current_snapshot()
            .into_iter()
            .any(|w| w.uuid == uuid && w.container_id.is_some());
        if already_applied {
            return Ok(());
        }
        self.create_container(uuid, true).await
    }

    async fn update(&self, uuid: WorkloadId) -> AgentResult<()> {
        self.registry.set_updating(uuid, true);
        let result = self.update_inner(uuid).await;
        self.registry.set_updating(uuid, false);
        result
    }

    async fn update_inner(&self, uuid: WorkloadId) -> AgentResult<()> {
        let Some(workload) = self.registry.find_latest_by_uuid(uuid) else {
            return Ok(());
        };
        let with_clean_up = workload.rebuild && workload.registry_id != CACHE_REGISTRY_ID;
        self.remove_container_by_uuid(uuid, with_clean_up).await?;
        self.create_container(uuid, true).await
    }

    /// `createContainer(workload, pullImage)`.
    #[instrument(skip(self))]
    async fn create_container(&self, uuid: WorkloadId, pull_image: bool) -> AgentResult<()> {
        let Some(mut workload) = self.registry.find_latest_by_uuid(uuid) else {
            return Ok(());
        };

        self.status.set_workload_state(uuid, WorkloadState::Pulling);

        let registry = self
            .registry
            .find_registry(workload.registry_id)
            .ok_or_else(|| AgentError::ConfigError {
                workload_uuid: uuid,
                reason: format!("no registry configured for id {}", workload.registry_id.0),
            })?;

        let attempt_pull = pull_image && !registry.is_cache_only();
        if attempt_pull {
            if let Err(err) = self.runtime.pull_image(&workload.image, &registry).await {
                warn!(error = %err, "image pull failed, falling back to local cache");
            }
        }

        let image_id = self
            .runtime
            .find_local_image(&workload.image)
            .await
            .map_err(|source| AgentError::ImageUnavailable {
                workload_uuid: uuid,
                image: format!("{}: {source}", workload.image),
            })?;
        let Some(image_id) = image_id else {
            self.status.set_workload_state(uuid, WorkloadState::Failed);
            return Err(AgentError::ImageUnavailable {
                workload_uuid: uuid,
                image: format!(
                    "{}: not present in local cache after pull fallback",
                    workload.image
                ),
            });
        };
        workload.image_id = Some(image_id);

        self.status.set_workload_state(uuid, WorkloadState::Starting);

        let container_id = self
            .runtime
            .create_container(&workload, &self.host_ip)
            .await
            .map_err(|source| {
                self.status.set_workload_state(uuid, WorkloadState::Failed);
                AgentError::FatalRuntimeError {
                    workload_uuid: uuid,
                    reason: source.to_string(),
                }
            })?;

        workload.container_id = Some(container_id.clone());
        workload.rebuild = false;
        if let Ok(ip) = self.runtime.get_container_ip_address(&container_id).await {
            workload.ip_address = Some(ip);
        }
        self.registry.record_current(workload.clone());

        self.start_container(uuid).await?;
        Ok(())
    }

    /// `startContainer(workload)`. Failure is logged and reported as
    /// `FAILED`, never returned, since the supervisor re-drives from
    /// desired state on the next tick.
    #[instrument(skip(self))]
    async fn start_container(&self, uuid: WorkloadId) -> AgentResult<()> {
        let Some(workload) = self
            .registry
            .current_snapshot()
            .into_iter()
            .find(|w| w.uuid == uuid)
        else {
            return Ok(());
        };
        let Some(container_id) = workload.container_id.clone() else {
            return Ok(());
        };

        let already_running = self
            .runtime
            .is_container_running(&container_id)
            .await
            .unwrap_or(false);

        if !already_running {
            match self.runtime.start_container(&container_id).await {
                Ok(status) => {
                    self.status.set_workload_state(
                        uuid,
                        match status {
                            ContainerStatus::Running => WorkloadState::Running,
                            ContainerStatus::Exited => WorkloadState::Stopped,
                            ContainerStatus::Unknown => WorkloadState::Unknown,
                        },
                    );
                }
                Err(err) => {
                    warn!(error = %err, "start_container failed");
                    self.status.set_workload_state(uuid, WorkloadState::Failed);
                    return Ok(());
                }
            }
        } else {
            self.status.set_workload_state(uuid, WorkloadState::Running);
        }

        if let Ok(ip) = self.runtime.get_container_ip_address(&container_id).await {
            let mut refreshed = workload;
            refreshed.ip_address = Some(ip);
            self.registry.record_current(refreshed);
        }
        Ok(())
    }

    /// `stopContainer(uuid)` in isolation, for the bare STOP command.
    #[instrument(skip(self))]
    async fn stop_container(&self, uuid: WorkloadId) -> AgentResult<()> {
        let Some(workload) = self
            .registry
            .current_snapshot()
            .into_iter()
            .find(|w| w.uuid == uuid)
        else {
            return Ok(());
        };
        let Some(container_id) = workload.container_id else {
            return Ok(());
        };

        self.status.set_workload_state(uuid, WorkloadState::Stopping);
        if let Err(err) = self.runtime.stop_container(&container_id).await {
            warn!(error = %err, "stop_container failed");
        }
        self.status.set_workload_state(uuid, WorkloadState::Stopped);
        Ok(())
    }

    /// `removeContainerByUuid(uuid, withCleanUp)`, serialized under the
    /// process-wide delete mutex.
    #[instrument(skip(self))]
    async fn remove_container_by_uuid(
        &self,
        uuid: WorkloadId,
        with_clean_up: bool,
    ) -> AgentResult<()> {
        let _guard = self.delete_mutex.lock().await;

        let Some(workload) = self
            .registry
            .current_snapshot()
            .into_iter()
            .find(|w| w.uuid == uuid)
        else {
            self.status.set_workload_state(uuid, WorkloadState::Stopped);
            return Ok(());
        };

        let Some(container_id) = workload.container_id.clone() else {
            self.status.set_workload_state(uuid, WorkloadState::Stopped);
            self.registry.forget_current(uuid);
            return Ok(());
        };

        self.status.set_workload_state(uuid, WorkloadState::Deleting);

        if let Err(err) = self.runtime.stop_container(&container_id).await {
            warn!(error = %err, "stop_container during remove failed, proceeding to remove anyway");
        }

        self.runtime
            .remove_container(&container_id, with_clean_up)
            .await
            .map_err(|source| AgentError::FatalRuntimeError {
                workload_uuid: uuid,
                reason: source.to_string(),
            })?;

        if with_clean_up {
            if let Some(image_id) = workload.image_id.as_ref() {
                if let Err(err) = self.runtime.remove_image_by_id(image_id).await {
                    warn!(error = %err, "image removal failed, leaving image in cache");
                }
            }
        }

        self.status.set_workload_state(uuid, WorkloadState::Stopped);
        self.registry.forget_current(uuid);
        Ok(())
    }
}
