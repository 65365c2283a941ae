//! Thin capability surface over the container runtime.
//!
//! This is deliberately a narrow trait: pull, create, start, stop, remove,
//! inspect, list. The Lifecycle Engine owns all policy (fallback to cache,
//! delete-mutex serialization, state reporting); this trait only talks to
//! the runtime.

use crate::domain::{ContainerId, ImageId, ImageRef, Registry, Workload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Observed container status, as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// The runtime reports the container as running.
    Running,
    /// The runtime reports the container as exited.
    Exited,
    /// The runtime could not classify the container's status.
    Unknown,
}

impl ContainerStatus {
    /// Render the status the way the runtime's own CLI would, for logging.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Unknown => "unknown",
        }
    }
}

/// A runtime-reported container, independent of the agent's own bookkeeping.
#[derive(Debug, Clone)]
pub struct Container {
    /// Runtime-assigned id.
    pub id: ContainerId,
    /// Current status.
    pub status: ContainerStatus,
    /// Observed IP address, if the runtime has assigned one.
    pub ip_address: Option<String>,
}

/// Errors surfaced directly by a runtime call. The Lifecycle Engine maps
/// these onto the design's `TransientRuntimeError`/`FatalRuntimeError` kinds
/// depending on which call failed and in what phase.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeAdapterError {
    /// The runtime has no record of the referenced container.
    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),
    /// The runtime has no record of the referenced image.
    #[error("image not found: {0}")]
    ImageNotFound(ImageId),
    /// The image is still referenced by another container.
    #[error("image still in use: {0}")]
    ImageInUse(ImageId),
    /// The pull, create, start, stop, or remove call itself failed.
    #[error("runtime call failed: {0}")]
    CallFailed(String),
}

/// Capability surface over the container runtime, as consumed by the
/// Workload Lifecycle Engine. Implementations talk to a real container
/// engine (Docker, containerd, ...); tests use [`InMemoryRuntimeAdapter`].
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// List every container the runtime currently knows about.
    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeAdapterError>;

    /// Look up the container assigned to a workload, if any.
    async fn get_container(
        &self,
        container_id: &ContainerId,
    ) -> Result<Option<Container>, RuntimeAdapterError>;

    /// The id of the image in the local cache, if present.
    async fn find_local_image(
        &self,
        image: &ImageRef,
    ) -> Result<Option<ImageId>, RuntimeAdapterError>;

    /// Pull an image from the given registry.
    async fn pull_image(
        &self,
        image: &ImageRef,
        registry: &Registry,
    ) -> Result<(), RuntimeAdapterError>;

    /// Create (but do not necessarily start) a container for the workload,
    /// bound to the given host IP.
    async fn create_container(
        &self,
        workload: &Workload,
        host_ip: &str,
    ) -> Result<ContainerId, RuntimeAdapterError>;

    /// Start a previously created container.
    async fn start_container(
        &self,
        container_id: &ContainerId,
    ) -> Result<ContainerStatus, RuntimeAdapterError>;

    /// Stop a running container. Idempotent: stopping an already-stopped
    /// container succeeds.
    async fn stop_container(&self, container_id: &ContainerId) -> Result<(), RuntimeAdapterError>;

    /// `true` if the runtime currently reports the container as running.
    async fn is_container_running(
        &self,
        container_id: &ContainerId,
    ) -> Result<bool, RuntimeAdapterError>;

    /// The runtime's IP assignment for the container.
    async fn get_container_ip_address(
        &self,
        container_id: &ContainerId,
    ) -> Result<String, RuntimeAdapterError>;

    /// Remove a container. `with_clean_up` is passed through for runtimes
    /// whose remove call can purge dangling layers as part of the same
    /// operation; the Lifecycle Engine additionally issues an explicit
    /// [`RuntimeAdapter::remove_image_by_id`] call for the workload's image.
    async fn remove_container(
        &self,
        container_id: &ContainerId,
        with_clean_up: bool,
    ) -> Result<(), RuntimeAdapterError>;

    /// Remove an image by id. Conflict (still referenced) and not-found are
    /// reported as errors; the Lifecycle Engine demotes both to a warning.
    async fn remove_image_by_id(&self, image_id: &ImageId) -> Result<(), RuntimeAdapterError>;
}

struct FakeContainer {
    status: ContainerStatus,
    ip_address: String,
    image: ImageRef,
    image_id: ImageId,
}

/// Derive a stable fake image id from an image reference, the way a real
/// runtime would resolve a tag to a content digest.
fn image_id_for(image: &ImageRef) -> ImageId {
    ImageId::try_new(format!("sha256-fake-{image}")).expect("generated id is non-empty")
}

/// An in-process fake runtime, backed by a `Mutex<HashMap>`. Used by the
/// Lifecycle Engine's unit and integration tests; also a reasonable
/// reference implementation for running the daemon without a real
/// container engine attached.
#[derive(Default)]
pub struct InMemoryRuntimeAdapter {
    containers: Mutex<HashMap<ContainerId, FakeContainer>>,
    local_images: Mutex<HashMap<ImageRef, ImageId>>,
    next_id: std::sync::atomic::AtomicU64,
    /// When set, `pull_image` fails for every call (simulates a transport
    /// failure so tests can exercise the cache-fallback path).
    pub fail_pulls: std::sync::atomic::AtomicBool,
}

impl InMemoryRuntimeAdapter {
    /// Construct an empty fake runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the local image cache, as if a prior pull had already happened.
    pub fn seed_local_image(&self, image: ImageRef) {
        let id = image_id_for(&image);
        self.local_images.lock().unwrap().insert(image, id);
    }

    fn next_container_id(&self) -> ContainerId {
        let n = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        ContainerId::try_new(format!("container-{n}")).expect("generated id is non-empty")
    }
}

#[async_trait]
impl RuntimeAdapter for InMemoryRuntimeAdapter {
    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeAdapterError> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .map(|(id, c)| Container {
                id: id.clone(),
                status: c.status,
                ip_address: Some(c.ip_address.clone()),
            })
            .collect())
    }

    async fn get_container(
        &self,
        container_id: &ContainerId,
    ) -> Result<Option<Container>, RuntimeAdapterError> {
        let containers = self.containers.lock().unwrap();
        Ok(containers.get(container_id).map(|c| Container {
            id: container_id.clone(),
            status: c.status,
            ip_address: Some(c.ip_address.clone()),
        }))
    }

    async fn find_local_image(
        &self,
        image: &ImageRef,
    ) -> Result<Option<ImageId>, RuntimeAdapterError> {
        Ok(self
            .local_images
            .lock()
            .unwrap()
            .get(image)
            .cloned())
    }

    async fn pull_image(
        &self,
        image: &ImageRef,
        _registry: &Registry,
    ) -> Result<(), RuntimeAdapterError> {
        if self.fail_pulls.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RuntimeAdapterError::CallFailed(
                "simulated pull transport failure".to_string(),
            ));
        }
        let id = image_id_for(image);
        self.local_images.lock().unwrap().insert(image.clone(), id);
        Ok(())
    }

    async fn create_container(
        &self,
        workload: &Workload,
        host_ip: &str,
    ) -> Result<ContainerId, RuntimeAdapterError> {
        let id = self.next_container_id();
        let image_id = image_id_for(&workload.image);
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                status: ContainerStatus::Unknown,
                ip_address: host_ip.to_string(),
                image: workload.image.clone(),
                image_id,
            },
        );
        Ok(id)
    }

    async fn start_container(
        &self,
        container_id: &ContainerId,
    ) -> Result<ContainerStatus, RuntimeAdapterError> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeAdapterError::ContainerNotFound(container_id.clone()))?;
        container.status = ContainerStatus::Running;
        Ok(container.status)
    }

    async fn stop_container(&self, container_id: &ContainerId) -> Result<(), RuntimeAdapterError> {
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(container_id) {
            container.status = ContainerStatus::Exited;
        }
        Ok(())
    }

    async fn is_container_running(
        &self,
        container_id: &ContainerId,
    ) -> Result<bool, RuntimeAdapterError> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .get(container_id)
            .is_some_and(|c| c.status == ContainerStatus::Running))
    }

    async fn get_container_ip_address(
        &self,
        container_id: &ContainerId,
    ) -> Result<String, RuntimeAdapterError> {
        let containers = self.containers.lock().unwrap();
        containers
            .get(container_id)
            .map(|c| c.ip_address.clone())
            .ok_or_else(|| RuntimeAdapterError::ContainerNotFound(container_id.clone()))
    }

    async fn remove_container(
        &self,
        container_id: &ContainerId,
        _with_clean_up: bool,
    ) -> Result<(), RuntimeAdapterError> {
        self.containers.lock().unwrap().remove(container_id);
        Ok(())
    }

    async fn remove_image_by_id(&self, image_id: &ImageId) -> Result<(), RuntimeAdapterError> {
        let still_referenced = self
            .containers
            .lock()
            .unwrap()
            .values()
            .any(|c| &c.image_id == image_id);
        if still_referenced {
            return Err(RuntimeAdapterError::ImageInUse(image_id.clone()));
        }
        let mut images = self.local_images.lock().unwrap();
        let before = images.len();
        images.retain(|_, id| id != image_id);
        if images.len() == before {
            return Err(RuntimeAdapterError::ImageNotFound(image_id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RegistryId, WorkloadId};

    fn test_workload() -> Workload {
        Workload::new(
            WorkloadId::generate(),
            ImageRef::try_new("img:1").unwrap(),
            RegistryId(5),
            false,
        )
    }

    #[tokio::test]
    async fn create_then_start_reports_running() {
        let runtime = InMemoryRuntimeAdapter::new();
        let workload = test_workload();
        let id = runtime.create_container(&workload, "10.0.0.1").await.unwrap();
        let status = runtime.start_container(&id).await.unwrap();
        assert_eq!(status, ContainerStatus::Running);
        assert!(runtime.is_container_running(&id).await.unwrap());
    }

    #[tokio::test]
    async fn stop_is_idempotent_on_missing_container() {
        let runtime = InMemoryRuntimeAdapter::new();
        let bogus = ContainerId::try_new("does-not-exist").unwrap();
        assert!(runtime.stop_container(&bogus).await.is_ok());
    }

    #[tokio::test]
    async fn remove_image_by_id_evicts_local_image_once_container_is_gone() {
        let runtime = InMemoryRuntimeAdapter::new();
        let workload = test_workload();
        let id = runtime.create_container(&workload, "10.0.0.1").await.unwrap();
        runtime.seed_local_image(workload.image.clone());
        let image_id = runtime
            .find_local_image(&workload.image)
            .await
            .unwrap()
            .expect("seeded image is present");
        runtime.remove_container(&id, true).await.unwrap();
        runtime.remove_image_by_id(&image_id).await.unwrap();
        assert!(runtime
            .find_local_image(&workload.image)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn remove_image_by_id_conflicts_while_another_container_references_it() {
        let runtime = InMemoryRuntimeAdapter::new();
        let workload = test_workload();
        let id = runtime.create_container(&workload, "10.0.0.1").await.unwrap();
        runtime.seed_local_image(workload.image.clone());
        let image_id = runtime
            .find_local_image(&workload.image)
            .await
            .unwrap()
            .expect("seeded image is present");
        let err = runtime.remove_image_by_id(&image_id).await.unwrap_err();
        assert!(matches!(err, RuntimeAdapterError::ImageInUse(_)));
        // container still present, so the image really is in use
        assert!(runtime.get_container(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_image_by_id_not_found_is_reported() {
        let runtime = InMemoryRuntimeAdapter::new();
        let bogus = ImageId::try_new("sha256-does-not-exist").unwrap();
        let err = runtime.remove_image_by_id(&bogus).await.unwrap_err();
        assert!(matches!(err, RuntimeAdapterError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn pull_failure_leaves_cache_untouched() {
        let runtime = InMemoryRuntimeAdapter::new();
        runtime
            .fail_pulls
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let image = ImageRef::try_new("img:1").unwrap();
        let registry = Registry {
            id: RegistryId(5),
            url: "quay.example/team".to_string(),
            credentials: None,
            tls_cert: None,
            dev_mode_enabled: false,
        };
        assert!(runtime.pull_image(&image, &registry).await.is_err());
        assert!(runtime.find_local_image(&image).await.unwrap().is_none());
    }
}
