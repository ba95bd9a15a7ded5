//! Per-tenant connection cache
//!
//! Each tenant id maps to at most one live connection. The first caller for
//! a tenant starts a connection attempt and parks a placeholder in the map;
//! concurrent callers for the same tenant join that attempt instead of
//! starting their own. The attempt runs as its own task and writes its
//! outcome back into the map itself: success installs the connection,
//! failure removes the placeholder so the next call retries from scratch.
//!
//! Every connection carries a generation number. Disconnect reports name the
//! generation they observed, so a late report about a connection that has
//! already been replaced never evicts its successor.
//!
//! The cache is unbounded and entries have no TTL; `stats().live` is the
//! number to watch.

use chrono::{DateTime, Utc};
use fintrack_types::{EntryKind, LedgerEntry, LedgerTotals, TenantId};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connector::{redact_address, Connector};
use crate::error::{StoreError, StoreResult};
use crate::flight::{spawn_attempt, Attempt};
use crate::traits::{QueryWindow, TenantLedger};
use crate::DEFAULT_CONNECT_TIMEOUT;

/// Tenant address template with exactly one `{tenant}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTemplate {
    prefix: String,
    suffix: String,
}

impl AddressTemplate {
    pub const PLACEHOLDER: &'static str = "{tenant}";

    pub fn parse(template: &str) -> StoreResult<Self> {
        let template = template.trim();
        if template.is_empty() {
            return Err(StoreError::Configuration(
                "tenant address template is empty".to_string(),
            ));
        }

        let mut pieces = template.split(Self::PLACEHOLDER);
        match (pieces.next(), pieces.next(), pieces.next()) {
            (Some(prefix), Some(suffix), None) => Ok(Self {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
            (_, None, _) => Err(StoreError::Configuration(format!(
                "tenant address template has no {} placeholder",
                Self::PLACEHOLDER
            ))),
            _ => Err(StoreError::Configuration(format!(
                "tenant address template has more than one {} placeholder",
                Self::PLACEHOLDER
            ))),
        }
    }

    /// Address of the store for `tenant`.
    pub fn compose(&self, tenant: &TenantId) -> String {
        format!("{}{}{}", self.prefix, tenant, self.suffix)
    }
}

impl fmt::Display for AddressTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.prefix, Self::PLACEHOLDER, self.suffix)
    }
}

/// Settings read once when the registry is built
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub address_template: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address_template: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Point-in-time view of the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Ready entries in the cache.
    pub live: usize,
    /// Attempts currently in flight.
    pub connecting: usize,
    pub hits: u64,
    pub joins: u64,
    pub connect_attempts: u64,
    pub failures: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    joins: AtomicU64,
    connect_attempts: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
struct Ready<T> {
    generation: u64,
    connection: T,
    established_at: DateTime<Utc>,
}

enum Slot<T> {
    Ready(Ready<T>),
    Connecting {
        generation: u64,
        attempt: Attempt<Ready<T>>,
    },
}

struct RegistryState<T> {
    closed: bool,
    slots: HashMap<TenantId, Slot<T>>,
}

impl<T> RegistryState<T> {
    fn is_current_attempt(&self, tenant: &TenantId, generation: u64) -> bool {
        matches!(
            self.slots.get(tenant),
            Some(Slot::Connecting { generation: g, .. }) if *g == generation
        )
    }

    /// Drop the placeholder for `tenant` if it still belongs to attempt
    /// `generation`.
    fn clear_attempt(&mut self, tenant: &TenantId, generation: u64) -> bool {
        let current = self.is_current_attempt(tenant, generation);
        if current {
            self.slots.remove(tenant);
        }
        current
    }
}

enum Lookup<T> {
    Hit(Ready<T>),
    Unhealthy(u64),
    Join(Attempt<Ready<T>>),
    Miss,
}

struct RegistryInner<C: Connector> {
    connector: C,
    template: AddressTemplate,
    connect_timeout: Duration,
    state: Mutex<RegistryState<C::Connection>>,
    next_generation: AtomicU64,
    counters: Counters,
}

/// Single-flight cache of tenant store connections
pub struct TenantRegistry<C: Connector> {
    inner: Arc<RegistryInner<C>>,
}

impl<C: Connector> Clone for TenantRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for TenantRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantRegistry")
            .field("template", &redact_address(&self.inner.template.to_string()))
            .field("connect_timeout", &self.inner.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> TenantRegistry<C> {
    /// Build a registry. A missing or malformed address template is a
    /// configuration error, reported here rather than on first use.
    pub fn new(connector: C, config: RegistryConfig) -> StoreResult<Self> {
        let raw = config.address_template.as_deref().ok_or_else(|| {
            StoreError::Configuration("tenant address template is not configured".to_string())
        })?;
        let template = AddressTemplate::parse(raw)?;

        Ok(Self {
            inner: Arc::new(RegistryInner {
                connector,
                template,
                connect_timeout: config.connect_timeout,
                state: Mutex::new(RegistryState {
                    closed: false,
                    slots: HashMap::new(),
                }),
                next_generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        })
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub fn template(&self) -> &AddressTemplate {
        &self.inner.template
    }

    /// Handle on the tenant's store, connecting on first use.
    ///
    /// A healthy cached connection is returned without touching the
    /// connector. Concurrent first-time callers share one attempt and all
    /// see its outcome. A failed attempt leaves nothing behind.
    pub async fn resolve(&self, tenant: &TenantId) -> StoreResult<TenantHandle<C>> {
        let attempt = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(StoreError::ShuttingDown);
            }

            let lookup = match state.slots.get(tenant) {
                Some(Slot::Ready(ready)) if self.inner.connector.is_healthy(&ready.connection) => {
                    Lookup::Hit(ready.clone())
                }
                Some(Slot::Ready(ready)) => Lookup::Unhealthy(ready.generation),
                Some(Slot::Connecting { attempt, .. }) => Lookup::Join(attempt.clone()),
                None => Lookup::Miss,
            };

            match lookup {
                Lookup::Hit(ready) => {
                    Counters::bump(&self.inner.counters.hits);
                    debug!(tenant = %tenant, generation = ready.generation, "tenant connection reused");
                    return Ok(self.handle(tenant, ready));
                }
                Lookup::Join(attempt) => {
                    Counters::bump(&self.inner.counters.joins);
                    debug!(tenant = %tenant, "joining in-flight tenant connection attempt");
                    attempt
                }
                Lookup::Unhealthy(generation) => {
                    state.slots.remove(tenant);
                    Counters::bump(&self.inner.counters.evictions);
                    info!(tenant = %tenant, generation, "evicted unhealthy tenant connection");
                    self.start_attempt(&mut state, tenant)
                }
                Lookup::Miss => self.start_attempt(&mut state, tenant),
            }
        };

        let ready = attempt.await?;
        Ok(self.handle(tenant, ready))
    }

    /// Drop the cached connection for `tenant` if it is still `generation`.
    /// Returns whether anything was evicted.
    pub async fn evict(&self, tenant: &TenantId, generation: u64) -> bool {
        self.inner.evict(tenant, generation).await
    }

    /// Whether a ready connection is cached for `tenant`.
    pub async fn is_cached(&self, tenant: &TenantId) -> bool {
        let state = self.inner.state.lock().await;
        matches!(state.slots.get(tenant), Some(Slot::Ready(_)))
    }

    pub async fn stats(&self) -> RegistryStats {
        let (live, connecting) = {
            let state = self.inner.state.lock().await;
            let live = state
                .slots
                .values()
                .filter(|slot| matches!(slot, Slot::Ready(_)))
                .count();
            (live, state.slots.len() - live)
        };
        let counters = &self.inner.counters;
        RegistryStats {
            live,
            connecting,
            hits: counters.hits.load(Ordering::Relaxed),
            joins: counters.joins.load(Ordering::Relaxed),
            connect_attempts: counters.connect_attempts.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Close every cached connection and refuse further resolves.
    ///
    /// Attempts still in flight close their connection when they finish and
    /// report `ShuttingDown` to their waiters.
    pub async fn shutdown(&self) {
        let drained: Vec<(TenantId, Ready<C::Connection>)> = {
            let mut state = self.inner.state.lock().await;
            state.closed = true;
            state
                .slots
                .drain()
                .filter_map(|(tenant, slot)| match slot {
                    Slot::Ready(ready) => Some((tenant, ready)),
                    Slot::Connecting { .. } => None,
                })
                .collect()
        };

        info!(connections = drained.len(), "draining tenant registry");
        for (tenant, ready) in drained {
            debug!(tenant = %tenant, generation = ready.generation, "closing tenant connection");
            self.inner.connector.close(ready.connection).await;
        }
    }

    fn start_attempt(
        &self,
        state: &mut RegistryState<C::Connection>,
        tenant: &TenantId,
    ) -> Attempt<Ready<C::Connection>> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let address = self.inner.template.compose(tenant);
        Counters::bump(&self.inner.counters.connect_attempts);
        info!(
            tenant = %tenant,
            generation,
            address = %redact_address(&address),
            "opening tenant connection"
        );

        let registry = Arc::downgrade(&self.inner);
        let aborted_tenant = tenant.clone();
        let attempt = spawn_attempt(
            Arc::clone(&self.inner).establish(tenant.clone(), generation, address),
            move |join| async move {
                let message = format!("connection attempt aborted: {join}");
                if let Some(inner) = registry.upgrade() {
                    inner.abandon(&aborted_tenant, generation, &message).await;
                }
                StoreError::TenantConnection {
                    tenant: aborted_tenant,
                    message,
                }
            },
        );
        state.slots.insert(
            tenant.clone(),
            Slot::Connecting {
                generation,
                attempt: attempt.clone(),
            },
        );
        attempt
    }

    fn handle(&self, tenant: &TenantId, ready: Ready<C::Connection>) -> TenantHandle<C> {
        TenantHandle {
            tenant: tenant.clone(),
            generation: ready.generation,
            connection: ready.connection,
            established_at: ready.established_at,
            registry: Arc::downgrade(&self.inner),
        }
    }
}

impl<C: Connector> RegistryInner<C> {
    async fn establish(
        self: Arc<Self>,
        tenant: TenantId,
        generation: u64,
        address: String,
    ) -> StoreResult<Ready<C::Connection>> {
        let outcome =
            match tokio::time::timeout(self.connect_timeout, self.connector.connect(&address)).await
            {
                Ok(Ok(connection)) => Ok(connection),
                Ok(Err(err)) => Err(err.detail()),
                Err(_) => Err(format!(
                    "no connection within {}s",
                    self.connect_timeout.as_secs_f64()
                )),
            };

        let mut state = self.state.lock().await;
        let connection = match outcome {
            Ok(connection) => connection,
            Err(message) => {
                state.clear_attempt(&tenant, generation);
                drop(state);
                Counters::bump(&self.counters.failures);
                warn!(tenant = %tenant, generation, error = %message, "tenant connection failed");
                return Err(StoreError::TenantConnection { tenant, message });
            }
        };
        let current = state.is_current_attempt(&tenant, generation);

        if state.closed || !current {
            drop(state);
            debug!(tenant = %tenant, generation, "closing connection opened during shutdown");
            self.connector.close(connection).await;
            return Err(StoreError::ShuttingDown);
        }

        let ready = Ready {
            generation,
            connection,
            established_at: Utc::now(),
        };
        state.slots.insert(tenant.clone(), Slot::Ready(ready.clone()));
        info!(tenant = %tenant, generation, "tenant connection established");
        Ok(ready)
    }

    /// Clean up after an attempt whose task died before reporting back.
    async fn abandon(&self, tenant: &TenantId, generation: u64, message: &str) {
        self.state.lock().await.clear_attempt(tenant, generation);
        Counters::bump(&self.counters.failures);
        warn!(tenant = %tenant, generation, error = %message, "tenant connection attempt aborted");
    }

    async fn evict(&self, tenant: &TenantId, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        let matches = matches!(
            state.slots.get(tenant),
            Some(Slot::Ready(ready)) if ready.generation == generation
        );
        if matches {
            state.slots.remove(tenant);
            Counters::bump(&self.counters.evictions);
            info!(tenant = %tenant, generation, "evicted tenant connection after disconnect");
        } else {
            debug!(tenant = %tenant, generation, "ignoring stale disconnect report");
        }
        matches
    }
}

/// A resolved tenant store connection, scoped to the work of one request.
///
/// Cloning is cheap. The handle does not keep the registry alive.
pub struct TenantHandle<C: Connector> {
    tenant: TenantId,
    generation: u64,
    connection: C::Connection,
    established_at: DateTime<Utc>,
    registry: Weak<RegistryInner<C>>,
}

impl<C: Connector> Clone for TenantHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tenant: self.tenant.clone(),
            generation: self.generation,
            connection: self.connection.clone(),
            established_at: self.established_at,
            registry: Weak::clone(&self.registry),
        }
    }
}

impl<C: Connector> fmt::Debug for TenantHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantHandle")
            .field("tenant", &self.tenant)
            .field("generation", &self.generation)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> TenantHandle<C> {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> &C::Connection {
        &self.connection
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Whether both handles wrap the same underlying connection.
    pub fn same_connection(&self, other: &Self) -> bool {
        self.tenant == other.tenant && self.generation == other.generation
    }

    /// Tell the registry this connection is broken. Only evicts if the
    /// cache still holds this handle's generation.
    pub async fn report_disconnect(&self) -> bool {
        match self.registry.upgrade() {
            Some(inner) => inner.evict(&self.tenant, self.generation).await,
            None => false,
        }
    }

    /// Pass `result` through, reporting a disconnect first when it failed
    /// on a broken connection.
    pub async fn observe<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        match result {
            Err(err) if err.is_connection() => {
                self.report_disconnect().await;
                Err(StoreError::TenantConnection {
                    tenant: self.tenant.clone(),
                    message: err.detail(),
                })
            }
            other => other,
        }
    }
}

impl<C> TenantHandle<C>
where
    C: Connector,
    C::Connection: TenantLedger,
{
    pub async fn record_entry(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry> {
        let result = self.connection.record_entry(entry).await;
        self.observe(result).await
    }

    pub async fn list_entries(
        &self,
        kind: Option<EntryKind>,
        window: QueryWindow,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let result = self.connection.list_entries(kind, window).await;
        self.observe(result).await
    }

    pub async fn totals(&self) -> StoreResult<LedgerTotals> {
        let result = self.connection.totals().await;
        self.observe(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn template_needs_exactly_one_placeholder() {
        let ok = AddressTemplate::parse("postgres://db/{tenant}?sslmode=disable").unwrap();
        let tenant = TenantId::new("acct_42").unwrap();
        assert_eq!(ok.compose(&tenant), "postgres://db/acct_42?sslmode=disable");
        assert_eq!(ok.to_string(), "postgres://db/{tenant}?sslmode=disable");

        for bad in ["", "   ", "postgres://db/fintrack", "postgres://{tenant}/{tenant}"] {
            assert!(
                matches!(AddressTemplate::parse(bad), Err(StoreError::Configuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn composition_is_injective(
            a in "[a-z][a-z0-9_]{0,30}",
            b in "[a-z][a-z0-9_]{0,30}",
        ) {
            let template = AddressTemplate::parse("postgres://app@db:5432/{tenant}_data").unwrap();
            let ta = TenantId::new(a.clone()).unwrap();
            let tb = TenantId::new(b.clone()).unwrap();
            prop_assert_eq!(template.compose(&ta) == template.compose(&tb), a == b);
            prop_assert_eq!(template.compose(&ta), template.compose(&ta));
        }
    }
}
