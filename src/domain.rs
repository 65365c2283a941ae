//! Core data model: workloads, registries, routes, and the message envelope.
//!
//! Domain types follow the "make illegal states unrepresentable" discipline used
//! throughout this crate: every primitive that carries a validation rule is a
//! `nutype`-derived newtype rather than a bare `String`/`u64`, so a malformed
//! value cannot be constructed in the first place.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::SystemTime;
use uuid::Uuid;

/// Registry id reserved to mean "never contact a remote registry, image-cache only".
pub const CACHE_REGISTRY_ID: RegistryId = RegistryId(0);

/// Sentinel registry URL meaning the same as [`CACHE_REGISTRY_ID`].
pub const FROM_CACHE_URL: &str = "from_cache";

/// Stable opaque identifier for a workload (a.k.a. microservice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadId(Uuid);

impl WorkloadId {
    /// Generate a fresh random workload id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for WorkloadId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<WorkloadId> for Uuid {
    fn from(workload_id: WorkloadId) -> Self {
        workload_id.0
    }
}

impl std::fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier assigned by the container runtime once a container exists.
#[nutype(
    validate(predicate = |id: &str| !id.trim().is_empty()),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef, Deref, Display)
)]
pub struct ContainerId(String);

/// Opaque identifier for an image, used when purging on clean-up removal.
#[nutype(
    validate(predicate = |id: &str| !id.trim().is_empty()),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef, Deref, Display)
)]
pub struct ImageId(String);

/// An image reference, e.g. `registry.example/team/app:1.4.2`.
#[nutype(
    validate(predicate = |image: &str| !image.trim().is_empty()),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef, Deref, Display)
)]
pub struct ImageRef(String);

/// Registry identifier. `RegistryId(0)` is the reserved cache sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryId(pub u64);

impl std::fmt::Display for RegistryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The reported lifecycle state of a workload. The Lifecycle Engine is the sole
/// writer; the Status Reporter and the local HTTP API are readers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadState {
    /// Task accepted, not yet acted on.
    Queued,
    /// Image pull in progress (or being skipped in favor of cache).
    Pulling,
    /// Container created, runtime `start` in flight.
    Starting,
    /// Container observed running.
    Running,
    /// `stopContainer` in flight.
    Stopping,
    /// Container observed stopped.
    Stopped,
    /// Removal in flight.
    Deleting,
    /// Terminal failure; supervisor will re-drive from desired state.
    Failed,
    /// State could not be determined from the runtime.
    Unknown,
}

/// Remote or cache-backed image source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Identifier referenced by workloads.
    pub id: RegistryId,
    /// Registry URL, or [`FROM_CACHE_URL`] for cache-only.
    pub url: String,
    /// Optional credentials blob, opaque to this crate.
    pub credentials: Option<String>,
    /// Optional TLS certificate, opaque to this crate.
    pub tls_cert: Option<String>,
    /// Whether this registry operates in dev mode (plaintext connector sessions).
    pub dev_mode_enabled: bool,
}

impl Registry {
    /// True when this registry means "local image cache only".
    #[must_use]
    pub fn is_cache_only(&self) -> bool {
        self.id == CACHE_REGISTRY_ID || self.url == FROM_CACHE_URL
    }
}

/// A workload (a.k.a. microservice) tracked by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Stable identifier.
    pub uuid: WorkloadId,
    /// Image reference to pull/run.
    pub image: ImageRef,
    /// Registry the image is resolved against.
    pub registry_id: RegistryId,
    /// When true, an UPDATE purges the image alongside the container.
    pub rebuild: bool,
    /// Container id once created; `None` before the first successful create.
    pub container_id: Option<ContainerId>,
    /// Id of the local image backing the current container, resolved at
    /// create time; used to target `removeImageById` on a clean-up removal.
    pub image_id: Option<ImageId>,
    /// Observed container IP, refreshed after create/start.
    pub ip_address: Option<String>,
    /// Advisory flag read by planners to skip already-updating workloads.
    pub updating: bool,
}

impl Workload {
    /// Construct a freshly declared workload with no container yet.
    #[must_use]
    pub fn new(uuid: WorkloadId, image: ImageRef, registry_id: RegistryId, rebuild: bool) -> Self {
        Self {
            uuid,
            image,
            registry_id,
            rebuild,
            container_id: None,
            image_id: None,
            ip_address: None,
            updating: false,
        }
    }
}

/// The action half of a [`ContainerTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskAction {
    /// Create the container if none exists yet for this uuid.
    Add,
    /// Replace the container in place, honoring the rebuild/registry clean-up rule.
    Update,
    /// Remove the container, keeping any cached image.
    Remove,
    /// Remove the container and purge its image.
    RemoveWithCleanUp,
    /// Stop the container without removing it.
    Stop,
}

/// A single desired-state transition, consumed in FIFO order per workload uuid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTask {
    /// What to do.
    pub action: TaskAction,
    /// Which workload.
    pub workload_uuid: WorkloadId,
}

impl ContainerTask {
    /// Build a task for the given action/uuid pair.
    #[must_use]
    pub fn new(action: TaskAction, workload_uuid: WorkloadId) -> Self {
        Self {
            action,
            workload_uuid,
        }
    }
}

/// Opaque connector configuration attached to a non-local receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorProducerConfig {
    /// Remote connector host.
    pub host: String,
    /// Remote connector port.
    pub port: u16,
    /// Fingerprint of the trust-store certificate, used as part of the pool key.
    pub tls_cert_fingerprint: String,
    /// PEM-encoded certificate backing `tls_cert_fingerprint`, present outside
    /// dev mode so the pool can materialize it into a trust-store file.
    pub tls_cert_pem: Option<String>,
}

/// A consuming endpoint for a [`Route`]: in-process, or behind a remote connector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Receiver {
    /// The receiving workload.
    pub workload_uuid: WorkloadId,
    /// `true` for in-process fan-out, `false` for a remote connector relay.
    pub local: bool,
    /// Present only when `local == false`.
    pub connector_producer_config: Option<ConnectorConfigHandle>,
}

/// A lightweight, hashable handle standing in for [`ConnectorProducerConfig`]
/// inside a `Receiver` so receivers remain hashable without hashing credential
/// material; the pool resolves the handle back to the full config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorConfigHandle(pub u64);

/// Maps one producing workload to its set of receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// The publishing workload.
    pub producer: WorkloadId,
    /// Every consumer of messages published by `producer`.
    pub receivers: HashSet<Receiver>,
}

impl Route {
    /// A route with no receivers, used as the identity element when diffing.
    #[must_use]
    pub fn empty(producer: WorkloadId) -> Self {
        Self {
            producer,
            receivers: HashSet::new(),
        }
    }
}

/// Monotonic, time-ordered, node-unique message identifier (base32 encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new id from the current time and a per-node random tie-breaker.
    #[must_use]
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut bytes = nanos.to_be_bytes().to_vec();
        bytes.extend_from_slice(&Uuid::new_v4().as_u128().to_be_bytes()[..4]);
        Self(base32::encode(base32::Alphabet::Crockford, &bytes))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-type tag carried alongside a message body, e.g. `application/json`.
#[nutype(
    validate(predicate = |s: &str| !s.trim().is_empty()),
    derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRef, Deref, Display)
)]
pub struct ContentType(String);

impl Default for ContentType {
    fn default() -> Self {
        Self::try_new("application/octet-stream").expect("constant is non-empty")
    }
}

/// A freeform routing tag set by the publishing workload.
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    AsRef,
    Deref,
    Default
))]
pub struct MessageTag(String);

/// The message envelope carried by the routing core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Node-unique, time-sortable id.
    pub id: MessageId,
    /// Publishing workload.
    pub publisher: WorkloadId,
    /// Wall-clock publish time.
    pub timestamp: SystemTime,
    /// Freeform routing tag.
    pub tag: MessageTag,
    /// MIME-ish content type.
    pub content_type: ContentType,
    /// Opaque payload.
    pub content: bytes::Bytes,
}

impl Message {
    /// Build a message envelope, stamping a fresh id and the current time.
    #[must_use]
    pub fn new(
        publisher: WorkloadId,
        tag: MessageTag,
        content_type: ContentType,
        content: bytes::Bytes,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            publisher,
            timestamp: SystemTime::now(),
            tag,
            content_type,
            content,
        }
    }
}
