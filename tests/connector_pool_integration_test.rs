//! End-to-end exercises of the Connector Client Pool: endpoint keying,
//! trust-store materialization, session round trips, and the
//! close-then-rebuild discipline that never mutates a factory in place.

use std::sync::Arc;
use test_log::test;

use fogline::connector_pool::{materialize_trust_store, ConnectorClientPool};
use fogline::domain::{ConnectorProducerConfig, WorkloadId};

fn config(fingerprint: &str) -> ConnectorProducerConfig {
    ConnectorProducerConfig {
        host: "relay.example".to_string(),
        port: 9443,
        tls_cert_fingerprint: fingerprint.to_string(),
        tls_cert_pem: None,
    }
}

fn dev_pool() -> ConnectorClientPool {
    ConnectorClientPool::new(true, std::env::temp_dir())
}

#[test(tokio::test)]
async fn distinct_fingerprints_against_the_same_host_get_distinct_clients() {
    let pool = dev_pool();
    let a = pool.get_or_create(config("aaa"));
    let b = pool.get_or_create(config("bbb"));
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(pool.len(), 2);
}

#[test(tokio::test)]
async fn trust_store_is_materialized_alongside_a_pooled_client() {
    let dir = tempfile::tempdir().unwrap();
    let mut with_cert = config("fingerprint-123");
    with_cert.tls_cert_pem = Some("-----BEGIN CERTIFICATE-----\n...".to_string());

    let pool = ConnectorClientPool::new(false, dir.path().to_path_buf());
    let client = pool.get_or_create(with_cert);

    let path = client
        .factory()
        .trust_store_path()
        .expect("non-dev-mode client with certificate material should materialize a trust store")
        .to_path_buf();
    assert!(path.exists());
    assert_eq!(path.parent().unwrap(), dir.path());
    assert_eq!(client.config().tls_cert_fingerprint, "fingerprint-123");
}

#[test(tokio::test)]
async fn trust_store_materialization_matches_the_standalone_helper() {
    let dir = tempfile::tempdir().unwrap();
    let cert_pem = "-----BEGIN CERTIFICATE-----\n...";
    let expected = materialize_trust_store(dir.path(), &config("standalone"), cert_pem).unwrap();
    assert_eq!(
        std::fs::read_to_string(&expected).unwrap(),
        cert_pem,
    );
}

#[test(tokio::test)]
async fn multiple_workloads_share_one_client_with_independent_sessions() {
    let pool = dev_pool();
    let client = pool.get_or_create(config("shared"));
    let a = WorkloadId::generate();
    let b = WorkloadId::generate();

    client.start_session(a).await.unwrap();
    client.start_session(b).await.unwrap();
    assert!(client.has_session(a));
    assert!(client.has_session(b));

    client.eject_session(a).await;
    assert!(!client.has_session(a));
    assert!(client.has_session(b));
    assert!(client.send_message(b, b"payload").await.is_ok());
}

#[test(tokio::test)]
async fn closing_the_client_through_the_pool_tears_down_every_session() {
    let pool = dev_pool();
    let client = pool.get_or_create(config("ephemeral"));
    let workload = WorkloadId::generate();
    client.start_session(workload).await.unwrap();

    pool.close_client(&config("ephemeral")).await;

    assert!(pool.is_empty());
    // the client handle held by the test is still valid Arc-wise, but is
    // no longer reachable through the pool for reuse.
    assert!(!client.has_session(workload) || client.send_message(workload, b"x").await.is_err());
}

#[test(tokio::test)]
async fn reinit_never_loses_the_pool_slot_only_the_sessions() {
    let pool = dev_pool();
    let client = pool.get_or_create(config("resilient"));
    let workload = WorkloadId::generate();
    client.start_session(workload).await.unwrap();

    client.close().await;

    assert_eq!(pool.len(), 1);
    assert!(!client.has_session(workload));
    client.start_session(workload).await.unwrap();
    assert!(client.send_message(workload, b"after reinit").await.is_ok());
}
