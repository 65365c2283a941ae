//! Thin capability surface over the message broker.
//!
//! A per-destination `DashMap` holds each endpoint's buffered payloads,
//! keyed by workload uuid and split into producer and consumer sides so a
//! publisher's and a receiver's endpoint lifecycles (and closed states) are
//! tracked independently.

use crate::domain::WorkloadId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Errors surfaced directly by a broker call. The Routing Core maps these
/// onto `BrokerDown`/`EndpointClosed` depending on which call failed.
#[derive(Debug, thiserror::Error)]
pub enum BrokerAdapterError {
    /// The broker server process is not currently active.
    #[error("broker server is not active")]
    ServerNotActive,
    /// No producer or consumer is registered for the given workload.
    #[error("no endpoint registered for workload {0}")]
    EndpointNotFound(WorkloadId),
    /// The broker call itself failed.
    #[error("broker call failed: {0}")]
    CallFailed(String),
}

/// Capability surface over the embedded/attached message broker, as consumed
/// by the Message Routing Core. Implementations talk to a real broker
/// process; tests use [`InMemoryBrokerAdapter`].
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Start the broker server process, if the design runs an embedded one.
    async fn start_server(&self) -> Result<(), BrokerAdapterError>;

    /// Stop the broker server process.
    async fn stop_server(&self) -> Result<(), BrokerAdapterError>;

    /// `true` if the broker server is currently accepting connections.
    async fn is_server_active(&self) -> Result<bool, BrokerAdapterError>;

    /// Apply one-time broker initialization (topic/queue provisioning).
    async fn initialize(&self) -> Result<(), BrokerAdapterError>;

    /// Apply a process-wide memory limit to the broker, if it runs embedded.
    async fn set_memory_limit(&self, bytes: u64) -> Result<(), BrokerAdapterError>;

    /// Create a producer endpoint for the publishing workload.
    async fn create_producer(&self, publisher_uuid: WorkloadId) -> Result<(), BrokerAdapterError>;

    /// `true` if a producer is currently registered for `publisher_uuid`.
    async fn get_producer(&self, publisher_uuid: WorkloadId) -> bool;

    /// Close and drop the producer registered for `publisher_uuid`. Idempotent.
    async fn remove_producer(&self, publisher_uuid: WorkloadId) -> Result<(), BrokerAdapterError>;

    /// `true` if the producer for `publisher_uuid` has been closed (or was
    /// never created).
    async fn is_producer_closed(&self, publisher_uuid: WorkloadId) -> bool;

    /// Create a consumer endpoint for the receiving workload.
    async fn create_consumer(&self, receiver_uuid: WorkloadId) -> Result<(), BrokerAdapterError>;

    /// `true` if a consumer is currently registered for `receiver_uuid`.
    async fn get_consumer(&self, receiver_uuid: WorkloadId) -> bool;

    /// Close and drop the consumer registered for `receiver_uuid`. Idempotent.
    async fn remove_consumer(&self, receiver_uuid: WorkloadId) -> Result<(), BrokerAdapterError>;

    /// `true` if the consumer for `receiver_uuid` has been closed (or was
    /// never created).
    async fn is_consumer_closed(&self, receiver_uuid: WorkloadId) -> bool;

    /// Enqueue a raw payload on the producer endpoint for `publisher_uuid`.
    async fn enqueue(
        &self,
        publisher_uuid: WorkloadId,
        payload: &[u8],
    ) -> Result<(), BrokerAdapterError>;

    /// Drain every payload currently buffered for the consumer endpoint of
    /// `receiver_uuid`, non-blockingly.
    async fn drain(&self, receiver_uuid: WorkloadId) -> Result<Vec<Vec<u8>>, BrokerAdapterError>;

    /// Read every payload currently buffered for the consumer endpoint of
    /// `receiver_uuid` without removing it. Unlike [`Self::drain`], a
    /// subsequent `drain`/`peek` call still sees the same messages.
    async fn peek(&self, receiver_uuid: WorkloadId) -> Result<Vec<Vec<u8>>, BrokerAdapterError>;

    /// Deliver a payload directly into a receiver's consumer buffer, as the
    /// routing core's fan-out does for local receivers.
    async fn deliver_to_consumer(
        &self,
        receiver_uuid: WorkloadId,
        payload: &[u8],
    ) -> Result<(), BrokerAdapterError>;
}

#[derive(Default)]
struct EndpointState {
    open: bool,
    buffer: Vec<Vec<u8>>,
}

/// An in-process fake broker, backed by `DashMap`s of endpoint state. Used
/// by the Routing Core's unit and integration tests.
pub struct InMemoryBrokerAdapter {
    server_active: AtomicBool,
    producers: DashMap<WorkloadId, EndpointState>,
    consumers: DashMap<WorkloadId, EndpointState>,
    published: Mutex<Vec<(WorkloadId, Vec<u8>)>>,
}

impl Default for InMemoryBrokerAdapter {
    fn default() -> Self {
        Self {
            server_active: AtomicBool::new(false),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryBrokerAdapter {
    /// Construct a fake broker with its server inactive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every payload enqueued on a producer so far, in enqueue order. Test
    /// helper.
    #[must_use]
    pub fn published_messages(&self) -> Vec<(WorkloadId, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerAdapter for InMemoryBrokerAdapter {
    async fn start_server(&self) -> Result<(), BrokerAdapterError> {
        self.server_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_server(&self) -> Result<(), BrokerAdapterError> {
        self.server_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_server_active(&self) -> Result<bool, BrokerAdapterError> {
        Ok(self.server_active.load(Ordering::SeqCst))
    }

    async fn initialize(&self) -> Result<(), BrokerAdapterError> {
        Ok(())
    }

    async fn set_memory_limit(&self, _bytes: u64) -> Result<(), BrokerAdapterError> {
        Ok(())
    }

    async fn create_producer(&self, publisher_uuid: WorkloadId) -> Result<(), BrokerAdapterError> {
        if !self.server_active.load(Ordering::SeqCst) {
            return Err(BrokerAdapterError::ServerNotActive);
        }
        self.producers.insert(
            publisher_uuid,
            EndpointState {
                open: true,
                buffer: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_producer(&self, publisher_uuid: WorkloadId) -> bool {
        self.producers.get(&publisher_uuid).is_some_and(|e| e.open)
    }

    async fn remove_producer(&self, publisher_uuid: WorkloadId) -> Result<(), BrokerAdapterError> {
        if let Some(mut entry) = self.producers.get_mut(&publisher_uuid) {
            entry.open = false;
        }
        Ok(())
    }

    async fn is_producer_closed(&self, publisher_uuid: WorkloadId) -> bool {
        !self.producers.get(&publisher_uuid).is_some_and(|e| e.open)
    }

    async fn create_consumer(&self, receiver_uuid: WorkloadId) -> Result<(), BrokerAdapterError> {
        if !self.server_active.load(Ordering::SeqCst) {
            return Err(BrokerAdapterError::ServerNotActive);
        }
        self.consumers.insert(
            receiver_uuid,
            EndpointState {
                open: true,
                buffer: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_consumer(&self, receiver_uuid: WorkloadId) -> bool {
        self.consumers.get(&receiver_uuid).is_some_and(|e| e.open)
    }

    async fn remove_consumer(&self, receiver_uuid: WorkloadId) -> Result<(), BrokerAdapterError> {
        if let Some(mut entry) = self.consumers.get_mut(&receiver_uuid) {
            entry.open = false;
        }
        Ok(())
    }

    async fn is_consumer_closed(&self, receiver_uuid: WorkloadId) -> bool {
        !self.consumers.get(&receiver_uuid).is_some_and(|e| e.open)
    }

    async fn enqueue(
        &self,
        publisher_uuid: WorkloadId,
        payload: &[u8],
    ) -> Result<(), BrokerAdapterError> {
        if self.is_producer_closed(publisher_uuid).await {
            return Err(BrokerAdapterError::EndpointNotFound(publisher_uuid));
        }
        self.published
            .lock()
            .unwrap()
            .push((publisher_uuid, payload.to_vec()));
        Ok(())
    }

    async fn drain(&self, receiver_uuid: WorkloadId) -> Result<Vec<Vec<u8>>, BrokerAdapterError> {
        let mut entry = self
            .consumers
            .get_mut(&receiver_uuid)
            .ok_or(BrokerAdapterError::EndpointNotFound(receiver_uuid))?;
        Ok(std::mem::take(&mut entry.buffer))
    }

    async fn peek(&self, receiver_uuid: WorkloadId) -> Result<Vec<Vec<u8>>, BrokerAdapterError> {
        let entry = self
            .consumers
            .get(&receiver_uuid)
            .ok_or(BrokerAdapterError::EndpointNotFound(receiver_uuid))?;
        Ok(entry.buffer.clone())
    }

    async fn deliver_to_consumer(
        &self,
        receiver_uuid: WorkloadId,
        payload: &[u8],
    ) -> Result<(), BrokerAdapterError> {
        if self.is_consumer_closed(receiver_uuid).await {
            return Err(BrokerAdapterError::EndpointNotFound(receiver_uuid));
        }
        if let Some(mut entry) = self.consumers.get_mut(&receiver_uuid) {
            entry.buffer.push(payload.to_vec());
        }
        Ok(())
    }
}
