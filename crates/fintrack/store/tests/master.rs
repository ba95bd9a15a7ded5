//! Master store handle: lazy single-flight connect, invalidation and the
//! account operations delegated through it.

mod common;

use chrono::{Duration as TtlDuration, Utc};
use common::{PanicOnceConnector, PoolLikeConnector};
use fintrack_store::{
    Connector, MasterConfig, MasterStore, MemoryConnector, StoreError,
};
use fintrack_types::{AccountRole, NewAccount, VerificationError};
use std::time::Duration;

const MASTER: &str = "memory://fintrack_master";

fn config() -> MasterConfig {
    MasterConfig {
        address: Some(MASTER.to_string()),
        connect_timeout: Duration::from_secs(15),
    }
}

fn master(connector: &MemoryConnector) -> MasterStore<MemoryConnector> {
    MasterStore::new(connector.clone(), config())
}

fn signup(email: &str) -> NewAccount {
    NewAccount {
        full_name: "Katherine Johnson".into(),
        email: email.into(),
        phone_number: format!("+1-555-{}", email.len()),
        credential: "trajectory".into(),
        role: AccountRole::Business,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_acquires_make_one_attempt() {
    let connector = MemoryConnector::new();
    connector.set_latency(Duration::from_millis(100));
    let master = master(&connector);

    let tasks: Vec<_> = (0..24)
        .map(|_| {
            let master = master.clone();
            tokio::spawn(async move { master.acquire().await })
        })
        .collect();

    let mut connections = Vec::new();
    for task in tasks {
        connections.push(task.await.unwrap().unwrap());
    }
    let first = &connections[0];
    assert!(connections.iter().all(|c| {
        c.generation() == first.generation() && c.connection().same_connection(first.connection())
    }));
    assert_eq!(connector.connect_attempts(), 1);
    assert_eq!(master.connect_attempts(), 1);
}

#[tokio::test]
async fn missing_address_fails_before_any_attempt() {
    let connector = MemoryConnector::new();
    let master = MasterStore::new(connector.clone(), MasterConfig::default());

    assert!(matches!(
        master.acquire().await,
        Err(StoreError::Configuration(_))
    ));
    let blank = MasterStore::new(
        connector.clone(),
        MasterConfig {
            address: Some("   ".into()),
            ..MasterConfig::default()
        },
    );
    assert!(matches!(
        blank.acquire().await,
        Err(StoreError::Configuration(_))
    ));
    assert_eq!(connector.connect_attempts(), 0);
}

#[tokio::test]
async fn failed_attempt_is_not_cached() {
    let connector = MemoryConnector::new();
    connector.set_reachable(MASTER, false).await;
    let master = master(&connector);

    assert!(matches!(
        master.acquire().await,
        Err(StoreError::Connection(_))
    ));
    assert!(!master.is_connected().await);

    connector.set_reachable(MASTER, true).await;
    master.acquire().await.unwrap();
    assert!(master.is_connected().await);
    assert_eq!(connector.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_master_times_out() {
    let connector = MemoryConnector::new();
    connector.set_latency(Duration::from_secs(30));
    let master = master(&connector);

    match master.acquire().await {
        Err(StoreError::Connection(message)) => assert!(message.contains("15"), "{message}"),
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_operation_invalidates_the_connection_it_ran_on() {
    let connector = PoolLikeConnector::default();
    let master = MasterStore::new(connector.clone(), config());

    let first = master.acquire().await.unwrap();
    first.connection().disconnect();
    assert!(master.is_connected().await, "breakage is not visible before use");

    let err = master
        .find_account_by_email("nobody@example.com")
        .await
        .unwrap_err();
    assert!(err.is_connection());
    assert_eq!(connector.memory.connect_attempts(), 1, "no automatic retry");
    assert!(!master.is_connected().await);
    assert!(
        !master.invalidate(first.generation()).await,
        "already invalidated by the failing operation"
    );

    let second = master.acquire().await.unwrap();
    assert!(second.generation() > first.generation());
    assert!(second.connection().is_open());
    master
        .find_account_by_email("nobody@example.com")
        .await
        .unwrap();
    assert_eq!(connector.memory.connect_attempts(), 2);
}

#[tokio::test]
async fn unhealthy_connection_is_replaced_on_acquire() {
    let connector = MemoryConnector::new();
    let master = master(&connector);

    let first = master.acquire().await.unwrap();
    first.connection().disconnect();
    assert!(!master.is_connected().await);

    let second = master.acquire().await.unwrap();
    assert!(second.generation() > first.generation());
    assert!(connector.is_healthy(second.connection()));
    master.acquire().await.unwrap();
    assert_eq!(connector.connect_attempts(), 2);
}

#[tokio::test]
async fn crashed_attempt_is_not_cached() {
    let connector = PanicOnceConnector::new();
    let master = MasterStore::new(connector.clone(), config());

    match master.acquire().await {
        Err(StoreError::Connection(message)) => assert!(message.contains("aborted"), "{message}"),
        other => panic!("expected a connection error, got {other:?}"),
    }
    assert!(!master.is_connected().await);

    master.acquire().await.unwrap();
    assert!(master.is_connected().await);
    assert_eq!(master.connect_attempts(), 2);
    assert_eq!(connector.memory.connect_attempts(), 1);
}

#[tokio::test]
async fn stale_invalidation_is_ignored() {
    let connector = MemoryConnector::new();
    let master = master(&connector);

    let first = master.acquire().await.unwrap();
    assert!(master.invalidate(first.generation()).await);
    let second = master.acquire().await.unwrap();

    assert!(!master.invalidate(first.generation()).await);
    let again = master.acquire().await.unwrap();
    assert_eq!(again.generation(), second.generation());
    assert_eq!(connector.connect_attempts(), 2);
}

#[tokio::test]
async fn shutdown_closes_and_refuses() {
    let connector = MemoryConnector::new();
    let master = master(&connector);
    let live = master.acquire().await.unwrap();

    master.shutdown().await;

    assert!(!connector.is_healthy(live.connection()));
    assert!(matches!(
        master.acquire().await,
        Err(StoreError::ShuttingDown)
    ));
}

#[tokio::test]
async fn account_lifecycle_through_the_master_handle() {
    let connector = MemoryConnector::new();
    let master = master(&connector);
    let ttl = TtlDuration::minutes(10);

    let issued = master
        .create_account(signup("kj@nasa.gov"), ttl)
        .await
        .unwrap();
    let tenant = issued.record.tenant_id.clone();
    assert!(matches!(
        master.create_account(signup("kj@nasa.gov"), ttl).await,
        Err(StoreError::Conflict(_))
    ));

    assert!(matches!(
        master
            .verify_account("kj@nasa.gov", "000000x", Utc::now())
            .await,
        Err(StoreError::Verification(VerificationError::InvalidCode))
    ));
    let verified = master
        .verify_account("KJ@nasa.gov", &issued.verification_code, Utc::now())
        .await
        .unwrap();
    assert!(verified.verification.is_verified());

    let account = master
        .authenticate("kj@nasa.gov", "trajectory")
        .await
        .unwrap()
        .expect("credential matches");
    let session = master
        .issue_session(&account.id, TtlDuration::days(30))
        .await
        .unwrap();
    let principal = master
        .find_session(&session.token, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(principal.tenant_id, Some(tenant.clone()));

    assert!(master.retire_account(&account.id).await.unwrap());
    assert!(master
        .find_account_by_email("kj@nasa.gov")
        .await
        .unwrap()
        .is_none());

    let database = connector.database(MASTER).await.unwrap();
    assert_eq!(database.account_count().await, 1, "retired, not deleted");
    assert_eq!(connector.connect_attempts(), 1);
}
