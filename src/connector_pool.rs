//! Connector Client Pool: one client per distinct `(host, port,
//! tlsCertFingerprint)` triple, each owning a session factory and a map of
//! per-workload sessions.
//!
//! A trait-plus-fake session factory, matching the capability traits in
//! [`crate::runtime_adapter`] and [`crate::broker_adapter`]; the factory's
//! close-then-recreate discipline never mutates an existing factory in
//! place, instead tearing it down and building a fresh one.

use crate::domain::{ConnectorProducerConfig, WorkloadId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::warn;

/// Errors raised by connector pool operations.
#[derive(Debug, Error)]
pub enum ConnectorSessionError {
    /// Materializing the trust-store file for a connector failed.
    #[error("failed to materialize trust store at {path}: {source}")]
    TrustStoreWrite {
        /// Path the trust-store file was to be written to.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The session factory could not establish a session.
    #[error("session factory failed for {host}:{port}: {reason}")]
    FactoryFailed {
        /// Connector host.
        host: String,
        /// Connector port.
        port: u16,
        /// Human-readable failure reason.
        reason: String,
    },

    /// No session is open for the given workload.
    #[error("no session open for workload {0}")]
    NoSession(WorkloadId),
}

/// A session factory: produces per-workload sessions against one connector
/// endpoint. Implementations talk to a real TLS or plaintext transport;
/// tests use [`FakeSessionFactory`].
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session for `workload_uuid`.
    async fn open_session(&self, workload_uuid: WorkloadId)
    -> Result<(), ConnectorSessionError>;

    /// Close a previously opened session. Idempotent.
    async fn close_session(&self, workload_uuid: WorkloadId);

    /// Forward a payload to the remote broker over the session for
    /// `workload_uuid`. Fails if no session is open.
    async fn send(
        &self,
        workload_uuid: WorkloadId,
        payload: &[u8],
    ) -> Result<(), ConnectorSessionError>;

    /// Tear down the factory itself, transitively closing every open
    /// session.
    async fn shutdown(&self);

    /// The trust-store file this factory was built against, if it uses one.
    /// `None` for a plaintext (dev-mode) transport.
    fn trust_store_path(&self) -> Option<&Path> {
        None
    }
}

/// In-memory session factory used by tests, and by the pool itself until a
/// real TLS/plaintext transport is plugged in. Still carries the trust-store
/// path it was built against, so non-dev-mode wiring is observable even
/// though the transport underneath is fake.
#[derive(Default)]
pub struct FakeSessionFactory {
    open_sessions: DashMap<WorkloadId, ()>,
    sent: Mutex<Vec<(WorkloadId, Vec<u8>)>>,
    trust_store_path: Option<PathBuf>,
}

impl FakeSessionFactory {
    fn with_trust_store(path: PathBuf) -> Self {
        Self {
            trust_store_path: Some(path),
            ..Self::default()
        }
    }

    /// Every payload forwarded through an open session so far, in send order.
    /// Test helper.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<(WorkloadId, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn open_session(
        &self,
        workload_uuid: WorkloadId,
    ) -> Result<(), ConnectorSessionError> {
        self.open_sessions.insert(workload_uuid, ());
        Ok(())
    }

    async fn close_session(&self, workload_uuid: WorkloadId) {
        self.open_sessions.remove(&workload_uuid);
    }

    async fn send(
        &self,
        workload_uuid: WorkloadId,
        payload: &[u8],
    ) -> Result<(), ConnectorSessionError> {
        if !self.open_sessions.contains_key(&workload_uuid) {
            return Err(ConnectorSessionError::NoSession(workload_uuid));
        }
        self.sent.lock().unwrap().push((workload_uuid, payload.to_vec()));
        Ok(())
    }

    async fn shutdown(&self) {
        self.open_sessions.clear();
    }

    fn trust_store_path(&self) -> Option<&Path> {
        self.trust_store_path.as_deref()
    }
}

type FactoryBuilder = dyn Fn() -> Arc<dyn SessionFactory> + Send + Sync;

/// One client against a single `(host, port, tlsCertFingerprint)` endpoint.
/// All public methods are intended to be called under the pool's per-key
/// lock, matching the design's single-writer-per-client rule.
pub struct ConnectorClient {
    config: ConnectorProducerConfig,
    factory: RwLock<Arc<dyn SessionFactory>>,
    build_factory: Arc<FactoryBuilder>,
    sessions: DashMap<WorkloadId, ()>,
}

impl ConnectorClient {
    fn new(config: ConnectorProducerConfig, build_factory: Arc<FactoryBuilder>) -> Self {
        let factory = build_factory();
        Self {
            config,
            factory: RwLock::new(factory),
            build_factory,
            sessions: DashMap::new(),
        }
    }

    fn current_factory(&self) -> Arc<dyn SessionFactory> {
        Arc::clone(&self.factory.read().unwrap())
    }

    /// The factory currently backing this client's sessions, for diagnostics
    /// and tests.
    #[must_use]
    pub fn factory(&self) -> Arc<dyn SessionFactory> {
        self.current_factory()
    }

    /// The `(host, port, tlsCertFingerprint)` configuration this client was
    /// built against.
    #[must_use]
    pub fn config(&self) -> &ConnectorProducerConfig {
        &self.config
    }

    /// Open (or confirm) a session for `workload_uuid` against this client's
    /// current factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory fails to establish the session.
    pub async fn start_session(
        &self,
        workload_uuid: WorkloadId,
    ) -> Result<(), ConnectorSessionError> {
        self.current_factory().open_session(workload_uuid).await?;
        self.sessions.insert(workload_uuid, ());
        Ok(())
    }

    /// Forward a payload to the remote broker over the session for
    /// `workload_uuid`, against this client's current factory.
    ///
    /// # Errors
    ///
    /// Returns an error if no session is open, or the factory fails to send.
    pub async fn send_message(
        &self,
        workload_uuid: WorkloadId,
        payload: &[u8],
    ) -> Result<(), ConnectorSessionError> {
        self.current_factory().send(workload_uuid, payload).await
    }

    /// Close the session for `workload_uuid`, if one is open.
    pub async fn eject_session(&self, workload_uuid: WorkloadId) {
        self.current_factory().close_session(workload_uuid).await;
        self.sessions.remove(&workload_uuid);
    }

    /// `true` if a session is currently tracked for `workload_uuid`.
    #[must_use]
    pub fn has_session(&self, workload_uuid: WorkloadId) -> bool {
        self.sessions.contains_key(&workload_uuid)
    }

    /// Terminate the current factory (closing every session transitively)
    /// and replace it with a freshly built one. Never mutates the existing
    /// factory in place.
    pub async fn close(&self) {
        self.current_factory().shutdown().await;
        self.sessions.clear();
        let fresh = (self.build_factory)();
        *self.factory.write().unwrap() = fresh;
    }
}

/// Materialize (or refresh) the trust-store file backing a connector client,
/// from the config's certificate material. Skipped entirely in dev mode,
/// where sessions run plaintext.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn materialize_trust_store(
    dir: &Path,
    config: &ConnectorProducerConfig,
    cert_pem: &str,
) -> Result<PathBuf, ConnectorSessionError> {
    let path = dir.join(format!("{}.pem", config.tls_cert_fingerprint));
    std::fs::write(&path, cert_pem).map_err(|source| ConnectorSessionError::TrustStoreWrite {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Pool of [`ConnectorClient`]s keyed by `(host, port, tlsCertFingerprint)`.
pub struct ConnectorClientPool {
    clients: DashMap<(String, u16, String), Arc<ConnectorClient>>,
    dev_mode: bool,
    trust_store_dir: PathBuf,
}

impl ConnectorClientPool {
    /// Construct an empty pool. `dev_mode` skips trust-store materialization
    /// entirely and builds plaintext clients; otherwise `trust_store_dir` is
    /// where each client's pinned certificate is written.
    #[must_use]
    pub fn new(dev_mode: bool, trust_store_dir: PathBuf) -> Self {
        Self {
            clients: DashMap::new(),
            dev_mode,
            trust_store_dir,
        }
    }

    fn key(config: &ConnectorProducerConfig) -> (String, u16, String) {
        (
            config.host.clone(),
            config.port,
            config.tls_cert_fingerprint.clone(),
        )
    }

    /// Fetch the client for `config`, creating it if absent. Outside dev
    /// mode, the client's certificate material is materialized into
    /// `trust_store_dir` before the session factory is built; a failure to
    /// write it is logged and the client falls back to a plaintext factory
    /// rather than blocking session creation.
    #[must_use]
    pub fn get_or_create(&self, config: ConnectorProducerConfig) -> Arc<ConnectorClient> {
        let key = Self::key(&config);
        if let Some(existing) = self.clients.get(&key) {
            return Arc::clone(&existing);
        }

        let trust_store_path = if self.dev_mode {
            None
        } else {
            match &config.tls_cert_pem {
                Some(cert_pem) => match materialize_trust_store(&self.trust_store_dir, &config, cert_pem) {
                    Ok(path) => Some(path),
                    Err(err) => {
                        warn!(error = %err, host = %config.host, "failed to materialize trust store; falling back to plaintext session factory");
                        None
                    }
                },
                None => {
                    warn!(host = %config.host, "non-dev-mode connector config has no certificate material; sessions will run plaintext");
                    None
                }
            }
        };

        let build_factory: Arc<FactoryBuilder> = Arc::new(move || match &trust_store_path {
            Some(path) => Arc::new(FakeSessionFactory::with_trust_store(path.clone())) as Arc<dyn SessionFactory>,
            None => Arc::new(FakeSessionFactory::default()) as Arc<dyn SessionFactory>,
        });
        let client = Arc::new(ConnectorClient::new(config, build_factory));
        self.clients.insert(key, Arc::clone(&client));
        client
    }

    /// Close and drop the client for `config`, if one exists.
    pub async fn close_client(&self, config: &ConnectorProducerConfig) {
        let key = Self::key(config);
        if let Some((_, client)) = self.clients.remove(&key) {
            client.close().await;
        }
    }

    /// Number of distinct connector endpoints currently pooled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` if the pool holds no clients.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectorProducerConfig {
        ConnectorProducerConfig {
            host: "relay.example".to_string(),
            port: 9443,
            tls_cert_fingerprint: "abc123".to_string(),
            tls_cert_pem: None,
        }
    }

    fn dev_pool() -> ConnectorClientPool {
        ConnectorClientPool::new(true, std::env::temp_dir())
    }

    #[tokio::test]
    async fn get_or_create_returns_same_client_for_same_key() {
        let pool = dev_pool();
        let a = pool.get_or_create(config());
        let b = pool.get_or_create(config());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn start_then_eject_session_round_trips() {
        let pool = dev_pool();
        let client = pool.get_or_create(config());
        let workload = WorkloadId::generate();
        client.start_session(workload).await.unwrap();
        assert!(client.has_session(workload));
        client.eject_session(workload).await;
        assert!(!client.has_session(workload));
    }

    #[tokio::test]
    async fn close_drops_all_sessions_and_rebuilds_factory() {
        let pool = dev_pool();
        let client = pool.get_or_create(config());
        let workload = WorkloadId::generate();
        client.start_session(workload).await.unwrap();
        client.close().await;
        assert!(!client.has_session(workload));
        // the client is still usable after close, via the freshly built factory
        client.start_session(workload).await.unwrap();
        assert!(client.has_session(workload));
    }

    #[tokio::test]
    async fn close_client_removes_it_from_the_pool() {
        let pool = dev_pool();
        let _client = pool.get_or_create(config());
        pool.close_client(&config()).await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn dev_mode_never_materializes_a_trust_store() {
        let pool = dev_pool();
        let client = pool.get_or_create(config());
        assert!(client.factory().trust_store_path().is_none());
    }

    #[tokio::test]
    async fn non_dev_mode_materializes_a_trust_store_when_cert_pem_is_present() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectorClientPool::new(false, dir.path().to_path_buf());
        let mut with_cert = config();
        with_cert.tls_cert_pem = Some("-----BEGIN CERTIFICATE-----\nstub\n-----END CERTIFICATE-----\n".to_string());

        let client = pool.get_or_create(with_cert);
        let path = client.factory().trust_store_path().expect("trust store should be materialized");
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn non_dev_mode_falls_back_to_plaintext_without_cert_pem() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectorClientPool::new(false, dir.path().to_path_buf());
        let client = pool.get_or_create(config());
        assert!(client.factory().trust_store_path().is_none());
    }

    #[tokio::test]
    async fn send_message_requires_an_open_session() {
        let pool = dev_pool();
        let client = pool.get_or_create(config());
        let workload = WorkloadId::generate();
        assert!(client.send_message(workload, b"hi").await.is_err());
        client.start_session(workload).await.unwrap();
        assert!(client.send_message(workload, b"hi").await.is_ok());
    }
}
