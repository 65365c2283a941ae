//! Message Routing Core: owns `routes`, `publishers`, `receivers`; dispatches
//! messages; reconfigures atomically on route changes; supervises broker and
//! endpoint liveness.
//!
//! Per-destination fan-out runs off a `DashMap` keyed by publisher/receiver.
//! Reconfiguration builds the next `routes/publishers/receivers` snapshot off
//! to the side under the reconfiguration mutex, then publishes it with a
//! single atomic `RwLock` write. A reader borrows one `Arc<RoutingTables>`
//! for the duration of a single delivery, so it observes either the pre- or
//! the post-reconfigure topology, never a torn mix.

use crate::broker_adapter::BrokerAdapter;
use crate::connector_pool::ConnectorClientPool;
use crate::domain::{Message, Receiver, Route, WorkloadId};
use crate::error::{AgentError, AgentResult};
use crate::status_reporter::StatusReporter;
use crate::workload_registry::SharedWorkloadRegistry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tracing::{error, info, warn};

/// Lifecycle of one broker-backed endpoint (a publisher's producer, or a
/// receiver's consumer). `INIT -> OPEN <-> BROKEN -> OPEN (via supervisor) ->
/// CLOSED (terminal)`; `close()` is idempotent, and a closed entry is removed
/// from its table rather than lingering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Entry created, broker endpoint not yet confirmed open.
    Init,
    /// Endpoint confirmed open and usable.
    Open,
    /// Endpoint observed closed unexpectedly; awaiting supervisor rebuild.
    Broken,
    /// Terminal: the entry is being removed from its table.
    Closed,
}

struct PublisherEntry {
    route: Route,
    state: EndpointState,
}

struct ReceiverEntry {
    receiver: Receiver,
    state: EndpointState,
}

/// Swap-on-write snapshot of the routing topology. Never mutated in place;
/// reconfiguration builds a new instance and publishes it with one atomic
/// assignment.
#[derive(Default)]
struct RoutingTables {
    publishers: HashMap<WorkloadId, PublisherEntry>,
    receivers: HashMap<WorkloadId, ReceiverEntry>,
}

impl RoutingTables {
    fn routes_snapshot(&self) -> Vec<Route> {
        self.publishers
            .values()
            .map(|entry| entry.route.clone())
            .collect()
    }
}

/// Owns the routing topology and the long-lived supervisor tasks that keep
/// it honest against broker and endpoint failure.
pub struct MessageRoutingCore {
    broker: Arc<dyn BrokerAdapter>,
    connector_pool: Arc<ConnectorClientPool>,
    registry: SharedWorkloadRegistry,
    status: Arc<StatusReporter>,
    tables: RwLock<Arc<RoutingTables>>,
    reconfigure_mutex: AsyncMutex<()>,
    realtime_sinks: DashMap<WorkloadId, mpsc::UnboundedSender<Message>>,
}

impl MessageRoutingCore {
    /// Construct a routing core with no publishers or receivers installed;
    /// call [`Self::initialize`] with the Workload Registry's first routes
    /// snapshot to populate it.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        connector_pool: Arc<ConnectorClientPool>,
        registry: SharedWorkloadRegistry,
        status: Arc<StatusReporter>,
    ) -> Self {
        Self {
            broker,
            connector_pool,
            registry,
            status,
            tables: RwLock::new(Arc::new(RoutingTables::default())),
            reconfigure_mutex: AsyncMutex::new(()),
            realtime_sinks: DashMap::new(),
        }
    }

    /// Populate an empty routing core from a fresh routes snapshot. This is
    /// the degenerate case of [`Self::update`]: every route is "new" against
    /// empty tables, so the reconfiguration algorithm alone is sufficient.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects any producer/consumer creation.
    pub async fn initialize(&self, routes: Vec<Route>) -> AgentResult<()> {
        self.update(routes).await
    }

    /// Apply a new desired routes snapshot under the single reconfiguration
    /// mutex. Readers (`publish`/`next_messages`) never observe a
    /// partially-updated topology: the new tables are built off to the side
    /// and published with one atomic swap.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects creating a new producer or
    /// consumer. Endpoints that fail to close are logged and dropped anyway;
    /// a stuck broker is the watchdog's job to recover, not this call's.
    pub async fn update(&self, routes: Vec<Route>) -> AgentResult<()> {
        let _guard = self.reconfigure_mutex.lock().await;

        let current = Arc::clone(&*self.tables.read().await);

        let new_routes: HashMap<WorkloadId, Route> = routes
            .into_iter()
            .filter(|route| !route.receivers.is_empty())
            .map(|route| (route.producer, route))
            .collect();
        let new_receiver_uuids: HashSet<WorkloadId> = new_routes
            .values()
            .flat_map(|route| route.receivers.iter().map(|r| r.workload_uuid))
            .collect();

        let mut publishers: HashMap<WorkloadId, PublisherEntry> = HashMap::new();
        let mut receivers: HashMap<WorkloadId, ReceiverEntry> = HashMap::new();

        // existing publishers not in the new route set are closed
        // and dropped; existing publishers still present keep their broker
        // producer and simply take the new route (no producer reopen).
        for (uuid, entry) in &current.publishers {
            if new_routes.contains_key(uuid) {
                publishers.insert(
                    *uuid,
                    PublisherEntry {
                        route: new_routes[uuid].clone(),
                        state: entry.state,
                    },
                );
            } else if let Err(err) = self.broker.remove_producer(*uuid).await {
                warn!(workload_uuid = %uuid, error = %err, "failed to remove stale producer");
            }
        }

        // Step 4: create publishers for new route uuids not yet present.
        for (uuid, route) in &new_routes {
            if publishers.contains_key(uuid) {
                continue;
            }
            match self.broker.create_producer(*uuid).await {
                Ok(()) => {
                    publishers.insert(
                        *uuid,
                        PublisherEntry {
                            route: route.clone(),
                            state: EndpointState::Open,
                        },
                    );
                }
                Err(err) => {
                    warn!(workload_uuid = %uuid, error = %err, "failed to create producer");
                }
            }
        }

        // Step 5: existing receivers absent from the new receiver set are
        // closed, their broker consumer removed, and (for non-local
        // receivers) their connector-producer session ejected.
        for (uuid, entry) in &current.receivers {
            if new_receiver_uuids.contains(uuid) {
                receivers.insert(
                    *uuid,
                    ReceiverEntry {
                        receiver: entry.receiver.clone(),
                        state: entry.state,
                    },
                );
            } else {
                if let Err(err) = self.broker.remove_consumer(*uuid).await {
                    warn!(workload_uuid = %uuid, error = %err, "failed to remove stale consumer");
                }
                if !entry.receiver.local {
                    self.eject_connector_session(&entry.receiver).await;
                }
                self.realtime_sinks.remove(uuid);
            }
        }

        // Step 6: create new receivers.
        let all_receivers: HashMap<WorkloadId, Receiver> = new_routes
            .values()
            .flat_map(|route| route.receivers.iter().cloned())
            .map(|receiver| (receiver.workload_uuid, receiver))
            .collect();
        for (uuid, receiver) in &all_receivers {
            if receivers.contains_key(uuid) {
                continue;
            }
            match self.broker.create_consumer(*uuid).await {
                Ok(()) => {
                    if !receiver.local {
                        self.attach_connector_session(receiver).await;
                    }
                    receivers.insert(
                        *uuid,
                        ReceiverEntry {
                            receiver: receiver.clone(),
                            state: EndpointState::Open,
                        },
                    );
                }
                Err(err) => {
                    warn!(workload_uuid = %uuid, error = %err, "failed to create consumer");
                }
            }
        }

        // Step 7: commit the new tables with a single atomic swap.
        let next = Arc::new(RoutingTables {
            publishers,
            receivers,
        });
        *self.tables.write().await = Arc::clone(&next);

        // Step 8: reconcile per-workload published-message counters with the
        // current workload list.
        let known_uuids: Vec<WorkloadId> = next.publishers.keys().copied().collect();
        self.status.reconcile_workload_counters(&known_uuids);

        Ok(())
    }

    async fn attach_connector_session(&self, receiver: &Receiver) {
        let Some(handle) = receiver.connector_producer_config else {
            return;
        };
        let Some(config) = self.registry.resolve_connector_config(handle) else {
            warn!(
                workload_uuid = %receiver.workload_uuid,
                "non-local receiver has no resolvable connector config"
            );
            return;
        };
        let client = self.connector_pool.get_or_create(config);
        if let Err(err) = client.start_session(receiver.workload_uuid).await {
            warn!(
                workload_uuid = %receiver.workload_uuid,
                error = %err,
                "failed to attach connector session"
            );
        }
    }

    async fn eject_connector_session(&self, receiver: &Receiver) {
        let Some(handle) = receiver.connector_producer_config else {
            return;
        };
        let Some(config) = self.registry.resolve_connector_config(handle) else {
            return;
        };
        let client = self.connector_pool.get_or_create(config);
        client.eject_session(receiver.workload_uuid).await;
    }

    /// The routes snapshot implied by the currently installed publishers.
    /// Used by the liveness watchdog to re-initialize after a broker restart.
    pub async fn current_routes(&self) -> Vec<Route> {
        self.tables.read().await.routes_snapshot()
    }

    /// Fan a published message out to every receiver of its producer's
    /// route. Local receivers land directly in the shared broker's consumer
    /// buffer; non-local receivers are forwarded over their connector
    /// session. A connector failure for one receiver is logged and does not
    /// prevent delivery to the rest.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::EndpointClosed`] if the publisher has no
    /// installed producer (e.g. its route has no receivers, or it has not
    /// been initialized yet).
    pub async fn publish(&self, message: Message) -> AgentResult<()> {
        let tables = Arc::clone(&*self.tables.read().await);
        let Some(publisher) = tables.publishers.get(&message.publisher) else {
            return Err(AgentError::EndpointClosed {
                workload_uuid: message.publisher,
            });
        };

        let payload = serde_json::to_vec(&message).map_err(|err| AgentError::ProtocolError(err.to_string()))?;

        self.broker
            .enqueue(message.publisher, &payload)
            .await
            .map_err(|_| AgentError::EndpointClosed {
                workload_uuid: message.publisher,
            })?;

        for receiver in &publisher.route.receivers {
            self.deliver_to_receiver(receiver, &payload, &message).await;
        }

        self.status.record_message_processed(message.publisher);
        Ok(())
    }

    async fn deliver_to_receiver(&self, receiver: &Receiver, payload: &[u8], message: &Message) {
        if receiver.local {
            if let Err(err) = self
                .broker
                .deliver_to_consumer(receiver.workload_uuid, payload)
                .await
            {
                warn!(
                    workload_uuid = %receiver.workload_uuid,
                    error = %err,
                    "failed to deliver to local receiver"
                );
                return;
            }
        } else if let Some(handle) = receiver.connector_producer_config {
            if let Some(config) = self.registry.resolve_connector_config(handle) {
                let client = self.connector_pool.get_or_create(config);
                if let Err(err) = client.send_message(receiver.workload_uuid, payload).await {
                    warn!(
                        workload_uuid = %receiver.workload_uuid,
                        error = %err,
                        "connector session forward failed; receiver will be re-initialized on next watchdog tick"
                    );
                    return;
                }
            }
        }

        if let Some(sink) = self.realtime_sinks.get(&receiver.workload_uuid) {
            let _ = sink.send(message.clone());
        }
    }

    /// Non-blockingly drain every message currently buffered for `uuid`'s
    /// consumer, deserializing each envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::EndpointClosed`] if no consumer is registered
    /// for `uuid`.
    pub async fn next_messages(&self, uuid: WorkloadId) -> AgentResult<Vec<Message>> {
        let raw = self
            .broker
            .drain(uuid)
            .await
            .map_err(|_| AgentError::EndpointClosed { workload_uuid: uuid })?;
        raw.into_iter()
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|err| AgentError::ProtocolError(err.to_string()))
            })
            .collect()
    }

    /// Read every message currently buffered for `uuid`'s consumer without
    /// removing it, deserializing each envelope. Unlike [`Self::next_messages`],
    /// a later `next_messages`/`peek_messages` call still sees the same
    /// messages.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::EndpointClosed`] if no consumer is registered
    /// for `uuid`.
    pub async fn peek_messages(&self, uuid: WorkloadId) -> AgentResult<Vec<Message>> {
        let raw = self
            .broker
            .peek(uuid)
            .await
            .map_err(|_| AgentError::EndpointClosed { workload_uuid: uuid })?;
        raw.into_iter()
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|err| AgentError::ProtocolError(err.to_string()))
            })
            .collect()
    }

    /// Register a push sink for `uuid`'s real-time message websocket. Every
    /// message subsequently delivered to that receiver is also sent here.
    pub fn register_realtime_sink(&self, uuid: WorkloadId, sink: mpsc::UnboundedSender<Message>) {
        self.realtime_sinks.insert(uuid, sink);
    }

    /// Tear down a previously registered real-time sink, e.g. on websocket
    /// disconnect.
    pub fn unregister_realtime_sink(&self, uuid: WorkloadId) {
        self.realtime_sinks.remove(&uuid);
    }

    /// Sample the global processed-message counter and publish an average
    /// messages/second figure. Intended to be called on a fixed interval by
    /// the Supervisor's speed sampler task.
    pub fn sample_speed(&self, window: std::time::Duration) {
        self.status.sample_average_speed(window);
    }

    /// Liveness watchdog tick: if the broker server is down, restart
    /// it and re-run initialization against the current routes. Otherwise,
    /// check each publisher/receiver's underlying endpoint; rebuild any that
    /// the broker reports closed, dropping publishers whose route has since
    /// gone empty instead of recreating them.
    ///
    /// # Errors
    ///
    /// Returns an error if restarting the broker or re-initializing routing
    /// fails; the caller (Supervisor) is expected to log and retry on the
    /// next tick rather than treat this as fatal.
    pub async fn check_liveness(&self) -> AgentResult<()> {
        match self.broker.is_server_active().await {
            Ok(true) => {}
            Ok(false) => {
                error!("broker server inactive; restarting routing");
                return self.restart_broker_and_routing().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to query broker liveness");
                return Ok(());
            }
        }

        self.rebuild_broken_endpoints().await;
        Ok(())
    }

    async fn restart_broker_and_routing(&self) -> AgentResult<()> {
        let routes = self.current_routes().await;
        self.broker
            .stop_server()
            .await
            .map_err(|_| AgentError::BrokerDown)?;
        self.broker
            .start_server()
            .await
            .map_err(|_| AgentError::BrokerDown)?;
        *self.tables.write().await = Arc::new(RoutingTables::default());
        self.update(routes).await?;
        info!("routing re-initialized after broker restart");
        Ok(())
    }

    async fn rebuild_broken_endpoints(&self) {
        let tables = Arc::clone(&*self.tables.read().await);

        let mut dropped_publishers = Vec::new();
        for (uuid, entry) in &tables.publishers {
            if self.broker.is_producer_closed(*uuid).await {
                if entry.route.receivers.is_empty() {
                    dropped_publishers.push(*uuid);
                } else if let Err(err) = self.broker.create_producer(*uuid).await {
                    warn!(workload_uuid = %uuid, error = %err, "failed to rebuild broken producer");
                }
            }
        }

        let mut dropped_receivers = Vec::new();
        for (uuid, entry) in &tables.receivers {
            if self.broker.is_consumer_closed(*uuid).await {
                match self.broker.create_consumer(*uuid).await {
                    Ok(()) => {
                        if !entry.receiver.local {
                            self.eject_connector_session(&entry.receiver).await;
                            self.attach_connector_session(&entry.receiver).await;
                        }
                    }
                    Err(err) => {
                        warn!(workload_uuid = %uuid, error = %err, "failed to rebuild broken consumer");
                        dropped_receivers.push(*uuid);
                    }
                }
            }
        }

        if dropped_publishers.is_empty() && dropped_receivers.is_empty() {
            return;
        }

        let mut publishers: HashMap<WorkloadId, PublisherEntry> = HashMap::new();
        for (uuid, entry) in tables.publishers.iter() {
            if !dropped_publishers.contains(uuid) {
                publishers.insert(
                    *uuid,
                    PublisherEntry {
                        route: entry.route.clone(),
                        state: entry.state,
                    },
                );
            }
        }
        let mut receivers: HashMap<WorkloadId, ReceiverEntry> = HashMap::new();
        for (uuid, entry) in tables.receivers.iter() {
            if !dropped_receivers.contains(uuid) {
                receivers.insert(
                    *uuid,
                    ReceiverEntry {
                        receiver: entry.receiver.clone(),
                        state: entry.state,
                    },
                );
            }
        }
        *self.tables.write().await = Arc::new(RoutingTables {
            publishers,
            receivers,
        });
    }

    /// Publishers currently installed, for status/diagnostic purposes.
    #[must_use]
    pub async fn publisher_uuids(&self) -> Vec<WorkloadId> {
        self.tables.read().await.publishers.keys().copied().collect()
    }

    /// Receivers currently installed, for status/diagnostic purposes.
    #[must_use]
    pub async fn receiver_uuids(&self) -> Vec<WorkloadId> {
        self.tables.read().await.receivers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker_adapter::InMemoryBrokerAdapter;
    use crate::connector_pool::ConnectorClientPool;
    use crate::domain::{ContentType, ConnectorConfigHandle, ConnectorProducerConfig, MessageTag};
    use crate::workload_registry::WorkloadRegistry;

    fn local_receiver(uuid: WorkloadId) -> Receiver {
        Receiver {
            workload_uuid: uuid,
            local: true,
            connector_producer_config: None,
        }
    }

    fn remote_receiver(uuid: WorkloadId, handle: ConnectorConfigHandle) -> Receiver {
        Receiver {
            workload_uuid: uuid,
            local: false,
            connector_producer_config: Some(handle),
        }
    }

    async fn core_with_active_broker() -> (MessageRoutingCore, Arc<InMemoryBrokerAdapter>) {
        let broker = Arc::new(InMemoryBrokerAdapter::new());
        broker.start_server().await.unwrap();
        let core = MessageRoutingCore::new(
            Arc::clone(&broker) as Arc<dyn BrokerAdapter>,
            Arc::new(ConnectorClientPool::new(true, std::env::temp_dir())),
            Arc::new(WorkloadRegistry::new()),
            Arc::new(StatusReporter::new()),
        );
        (core, broker)
    }

    #[tokio::test]
    async fn initialize_creates_producer_and_consumer_for_a_local_route() {
        let (core, broker) = core_with_active_broker().await;
        let publisher = WorkloadId::generate();
        let receiver = WorkloadId::generate();
        let mut route = Route::empty(publisher);
        route.receivers.insert(local_receiver(receiver));

        core.initialize(vec![route]).await.unwrap();

        assert!(broker.get_producer(publisher).await);
        assert!(broker.get_consumer(receiver).await);
        assert_eq!(core.publisher_uuids().await, vec![publisher]);
        assert_eq!(core.receiver_uuids().await, vec![receiver]);
    }

    #[tokio::test]
    async fn publish_delivers_to_local_receiver() {
        let (core, _broker) = core_with_active_broker().await;
        let publisher = WorkloadId::generate();
        let receiver = WorkloadId::generate();
        let mut route = Route::empty(publisher);
        route.receivers.insert(local_receiver(receiver));
        core.initialize(vec![route]).await.unwrap();

        let message = Message::new(
            publisher,
            MessageTag::default(),
            ContentType::default(),
            bytes::Bytes::from_static(b"payload"),
        );
        core.publish(message.clone()).await.unwrap();

        let drained = core.next_messages(receiver).await.unwrap();
        assert_eq!(drained, vec![message]);
    }

    #[tokio::test]
    async fn peek_messages_leaves_them_available_for_a_later_read() {
        let (core, _broker) = core_with_active_broker().await;
        let publisher = WorkloadId::generate();
        let receiver = WorkloadId::generate();
        let mut route = Route::empty(publisher);
        route.receivers.insert(local_receiver(receiver));
        core.initialize(vec![route]).await.unwrap();

        let message = Message::new(
            publisher,
            MessageTag::default(),
            ContentType::default(),
            bytes::Bytes::from_static(b"payload"),
        );
        core.publish(message.clone()).await.unwrap();

        assert_eq!(core.peek_messages(receiver).await.unwrap(), vec![message.clone()]);
        assert_eq!(core.peek_messages(receiver).await.unwrap(), vec![message.clone()]);
        assert_eq!(core.next_messages(receiver).await.unwrap(), vec![message]);
        assert!(core.peek_messages(receiver).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_to_unknown_publisher_is_an_endpoint_closed_error() {
        let (core, _broker) = core_with_active_broker().await;
        let message = Message::new(
            WorkloadId::generate(),
            MessageTag::default(),
            ContentType::default(),
            bytes::Bytes::from_static(b"x"),
        );
        let err = core.publish(message).await.unwrap_err();
        assert!(matches!(err, AgentError::EndpointClosed { .. }));
    }

    #[tokio::test]
    async fn update_swaps_route_in_place_and_drops_stale_receiver() {
        let (core, broker) = core_with_active_broker().await;
        let p1 = WorkloadId::generate();
        let r1 = WorkloadId::generate();
        let r2 = WorkloadId::generate();
        let handle = ConnectorConfigHandle(1);

        let mut initial_route = Route::empty(p1);
        initial_route.receivers.insert(local_receiver(r1));
        initial_route.receivers.insert(remote_receiver(r2, handle));
        core.initialize(vec![initial_route]).await.unwrap();
        assert!(broker.get_consumer(r2).await);

        let p2 = WorkloadId::generate();
        let r3 = WorkloadId::generate();
        let mut route_p1 = Route::empty(p1);
        route_p1.receivers.insert(local_receiver(r1));
        let mut route_p2 = Route::empty(p2);
        route_p2.receivers.insert(local_receiver(r3));

        core.update(vec![route_p1, route_p2]).await.unwrap();

        let mut publishers = core.publisher_uuids().await;
        publishers.sort_by_key(ToString::to_string);
        let mut expected = vec![p1, p2];
        expected.sort_by_key(ToString::to_string);
        assert_eq!(publishers, expected);

        let mut receivers = core.receiver_uuids().await;
        receivers.sort_by_key(ToString::to_string);
        let mut expected_receivers = vec![r1, r3];
        expected_receivers.sort_by_key(ToString::to_string);
        assert_eq!(receivers, expected_receivers);

        assert!(broker.is_consumer_closed(r2).await);
    }

    #[tokio::test]
    async fn update_with_same_routes_is_a_no_op_on_broker_state() {
        let (core, broker) = core_with_active_broker().await;
        let publisher = WorkloadId::generate();
        let receiver = WorkloadId::generate();
        let mut route = Route::empty(publisher);
        route.receivers.insert(local_receiver(receiver));
        core.initialize(vec![route.clone()]).await.unwrap();

        core.update(vec![route]).await.unwrap();

        assert!(broker.get_producer(publisher).await);
        assert!(broker.get_consumer(receiver).await);
    }

    #[tokio::test]
    async fn broker_restart_reinstalls_current_routes() {
        let (core, broker) = core_with_active_broker().await;
        let publisher = WorkloadId::generate();
        let receiver = WorkloadId::generate();
        let mut route = Route::empty(publisher);
        route.receivers.insert(local_receiver(receiver));
        core.initialize(vec![route]).await.unwrap();

        broker.stop_server().await.unwrap();
        core.check_liveness().await.unwrap();

        assert!(broker.is_server_active().await.unwrap());
        assert!(broker.get_producer(publisher).await);
        assert!(broker.get_consumer(receiver).await);
    }

    #[tokio::test]
    async fn realtime_sink_receives_published_messages() {
        let (core, _broker) = core_with_active_broker().await;
        let publisher = WorkloadId::generate();
        let receiver = WorkloadId::generate();
        let mut route = Route::empty(publisher);
        route.receivers.insert(local_receiver(receiver));
        core.initialize(vec![route]).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        core.register_realtime_sink(receiver, tx);

        let message = Message::new(
            publisher,
            MessageTag::default(),
            ContentType::default(),
            bytes::Bytes::from_static(b"payload"),
        );
        core.publish(message.clone()).await.unwrap();

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed, message);
    }
}
