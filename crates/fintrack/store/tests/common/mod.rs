#![allow(dead_code)]

use async_trait::async_trait;
use fintrack_store::{
    Connector, MemoryConnector, MemoryStore, RegistryConfig, RegistryStats, StoreResult,
    TenantRegistry,
};
use fintrack_types::TenantId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const TEMPLATE: &str = "memory://{tenant}";

pub fn tenant(id: &str) -> TenantId {
    TenantId::new(id).expect("valid tenant id")
}

pub fn address(id: &str) -> String {
    format!("memory://{id}")
}

pub fn registry_config() -> RegistryConfig {
    RegistryConfig {
        address_template: Some(TEMPLATE.to_string()),
        connect_timeout: Duration::from_secs(15),
    }
}

pub fn memory_registry() -> (MemoryConnector, TenantRegistry<MemoryConnector>) {
    let connector = MemoryConnector::new();
    let registry =
        TenantRegistry::new(connector.clone(), registry_config()).expect("valid registry config");
    (connector, registry)
}

/// Memory connector whose connects to selected addresses block until the
/// test lets them through, one permit per attempt.
#[derive(Clone)]
pub struct GatedConnector {
    pub memory: MemoryConnector,
    gated: Arc<HashSet<String>>,
    gate: Arc<Semaphore>,
}

impl GatedConnector {
    pub fn new(gated: &[&str]) -> Self {
        Self {
            memory: MemoryConnector::new(),
            gated: Arc::new(gated.iter().map(|a| a.to_string()).collect()),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn release(&self, attempts: usize) {
        self.gate.add_permits(attempts);
    }
}

#[async_trait]
impl Connector for GatedConnector {
    type Connection = MemoryStore;

    async fn connect(&self, address: &str) -> StoreResult<MemoryStore> {
        if self.gated.contains(address) {
            self.gate
                .acquire()
                .await
                .expect("gate never closes")
                .forget();
        }
        self.memory.connect(address).await
    }

    fn is_healthy(&self, connection: &MemoryStore) -> bool {
        self.memory.is_healthy(connection)
    }

    async fn close(&self, connection: MemoryStore) {
        self.memory.close(connection).await
    }
}

/// Memory connector whose first connect panics, as a buggy driver would.
#[derive(Clone)]
pub struct PanicOnceConnector {
    pub memory: MemoryConnector,
    panicked: Arc<AtomicBool>,
}

impl PanicOnceConnector {
    pub fn new() -> Self {
        Self {
            memory: MemoryConnector::new(),
            panicked: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Connector for PanicOnceConnector {
    type Connection = MemoryStore;

    async fn connect(&self, address: &str) -> StoreResult<MemoryStore> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("driver crashed while connecting to {address}");
        }
        self.memory.connect(address).await
    }

    fn is_healthy(&self, connection: &MemoryStore) -> bool {
        self.memory.is_healthy(connection)
    }

    async fn close(&self, connection: MemoryStore) {
        self.memory.close(connection).await
    }
}

/// Memory connector that, like a connection pool, keeps reporting a
/// connection healthy after the server side has gone away. Breakage only
/// shows up when an operation runs.
#[derive(Clone, Default)]
pub struct PoolLikeConnector {
    pub memory: MemoryConnector,
}

#[async_trait]
impl Connector for PoolLikeConnector {
    type Connection = MemoryStore;

    async fn connect(&self, address: &str) -> StoreResult<MemoryStore> {
        self.memory.connect(address).await
    }

    fn is_healthy(&self, _connection: &MemoryStore) -> bool {
        true
    }

    async fn close(&self, connection: MemoryStore) {
        self.memory.close(connection).await
    }
}

pub fn gated_registry(gated: &[&str]) -> (GatedConnector, TenantRegistry<GatedConnector>) {
    let connector = GatedConnector::new(gated);
    let registry =
        TenantRegistry::new(connector.clone(), registry_config()).expect("valid registry config");
    (connector, registry)
}

/// Poll registry stats until `condition` holds, failing the test after five
/// seconds.
pub async fn wait_for_stats<C, F>(registry: &TenantRegistry<C>, what: &str, condition: F)
where
    C: Connector,
    F: Fn(&RegistryStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition(&registry.stats().await) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub async fn wait_until_cached<C: Connector>(registry: &TenantRegistry<C>, tenant: &TenantId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !registry.is_cached(tenant).await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {tenant} to be cached"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
