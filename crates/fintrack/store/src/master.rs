//! The shared master store connection
//!
//! Built once by the daemon and handed to whatever needs account data. The
//! connection is opened lazily on the first `acquire`, shared by every
//! caller after that, and replaced when it is reported broken.

use chrono::{DateTime, Duration as TtlDuration, Utc};
use fintrack_types::{AccountId, AccountRecord, NewAccount, Principal, ProfileUpdate, SessionToken};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connector::{redact_address, Connector};
use crate::error::{StoreError, StoreResult};
use crate::flight::{spawn_attempt, Attempt};
use crate::traits::{AccountStore, IssuedAccount, IssuedSession};
use crate::DEFAULT_CONNECT_TIMEOUT;

/// Settings read once when the handle is built
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub address: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            address: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// An established master connection tagged with its generation
#[derive(Debug, Clone)]
pub struct MasterConnection<T> {
    generation: u64,
    connection: T,
}

impl<T> MasterConnection<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> &T {
        &self.connection
    }

    pub fn into_inner(self) -> T {
        self.connection
    }
}

enum MasterState<T> {
    Idle,
    Connecting {
        generation: u64,
        attempt: Attempt<MasterConnection<T>>,
    },
    Ready(MasterConnection<T>),
    Closed,
}

impl<T> MasterState<T> {
    fn is_current_attempt(&self, generation: u64) -> bool {
        matches!(self, MasterState::Connecting { generation: g, .. } if *g == generation)
    }

    /// Back to `Idle` if the placeholder still belongs to attempt
    /// `generation`.
    fn clear_attempt(&mut self, generation: u64) -> bool {
        let current = self.is_current_attempt(generation);
        if current {
            *self = MasterState::Idle;
        }
        current
    }
}

enum Lookup<T> {
    Hit(MasterConnection<T>),
    Join(Attempt<MasterConnection<T>>),
    Connect,
    Closed,
}

struct MasterInner<C: Connector> {
    connector: C,
    address: Option<String>,
    connect_timeout: Duration,
    state: Mutex<MasterState<C::Connection>>,
    next_generation: AtomicU64,
    connect_attempts: AtomicU64,
}

/// Lazily connected, single-flight handle on the master store
pub struct MasterStore<C: Connector> {
    inner: Arc<MasterInner<C>>,
}

impl<C: Connector> Clone for MasterStore<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for MasterStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterStore")
            .field(
                "address",
                &self.inner.address.as_deref().map(redact_address),
            )
            .field("connect_timeout", &self.inner.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> MasterStore<C> {
    /// Build the handle. No connection is opened until `acquire`.
    pub fn new(connector: C, config: MasterConfig) -> Self {
        let address = config
            .address
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty());

        Self {
            inner: Arc::new(MasterInner {
                connector,
                address,
                connect_timeout: config.connect_timeout,
                state: Mutex::new(MasterState::Idle),
                next_generation: AtomicU64::new(0),
                connect_attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Connection attempts started so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::Relaxed)
    }

    /// Whether a healthy connection is currently cached.
    pub async fn is_connected(&self) -> bool {
        let state = self.inner.state.lock().await;
        matches!(&*state, MasterState::Ready(master) if self.inner.connector.is_healthy(&master.connection))
    }

    /// The shared master connection, opening it if needed.
    ///
    /// A missing address fails with `Configuration` before any attempt is
    /// made. Concurrent callers during an attempt all wait on that one
    /// attempt.
    pub async fn acquire(&self) -> StoreResult<MasterConnection<C::Connection>> {
        let address = self.inner.address.clone().ok_or_else(|| {
            StoreError::Configuration("master store address is not configured".to_string())
        })?;

        let attempt = {
            let mut state = self.inner.state.lock().await;
            let lookup = match &*state {
                MasterState::Closed => Lookup::Closed,
                MasterState::Ready(master) if self.inner.connector.is_healthy(&master.connection) => {
                    Lookup::Hit(master.clone())
                }
                MasterState::Ready(master) => {
                    info!(generation = master.generation, "master connection unhealthy, reconnecting");
                    Lookup::Connect
                }
                MasterState::Connecting { attempt, .. } => Lookup::Join(attempt.clone()),
                MasterState::Idle => Lookup::Connect,
            };

            match lookup {
                Lookup::Closed => return Err(StoreError::ShuttingDown),
                Lookup::Hit(master) => return Ok(master),
                Lookup::Join(attempt) => {
                    debug!("joining in-flight master connection attempt");
                    attempt
                }
                Lookup::Connect => self.start_attempt(&mut state, address),
            }
        };

        attempt.await
    }

    /// Forget the cached connection if it is still `generation`, so the
    /// next `acquire` reconnects. Returns whether anything was dropped.
    pub async fn invalidate(&self, generation: u64) -> bool {
        let mut state = self.inner.state.lock().await;
        let matches = matches!(&*state, MasterState::Ready(master) if master.generation == generation);
        if matches {
            *state = MasterState::Idle;
            info!(generation, "master connection invalidated");
        } else {
            debug!(generation, "ignoring stale master disconnect report");
        }
        matches
    }

    /// Close the live connection and refuse further acquires.
    pub async fn shutdown(&self) {
        let previous = {
            let mut state = self.inner.state.lock().await;
            std::mem::replace(&mut *state, MasterState::Closed)
        };
        if let MasterState::Ready(master) = previous {
            info!(generation = master.generation, "closing master connection");
            self.inner.connector.close(master.connection).await;
        }
    }

    fn start_attempt(
        &self,
        state: &mut MasterState<C::Connection>,
        address: String,
    ) -> Attempt<MasterConnection<C::Connection>> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.connect_attempts.fetch_add(1, Ordering::Relaxed);
        info!(generation, address = %redact_address(&address), "opening master store connection");

        let inner = Arc::downgrade(&self.inner);
        let attempt = spawn_attempt(
            Arc::clone(&self.inner).establish(generation, address),
            move |join| async move {
                let message = format!("connection attempt aborted: {join}");
                if let Some(inner) = inner.upgrade() {
                    inner.state.lock().await.clear_attempt(generation);
                    warn!(generation, error = %message, "master connection attempt aborted");
                }
                StoreError::Connection(message)
            },
        );
        *state = MasterState::Connecting {
            generation,
            attempt: attempt.clone(),
        };
        attempt
    }

    /// Run `op` on the master connection. A connection-class failure
    /// invalidates the generation it happened on; nothing is retried.
    async fn run<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(C::Connection) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let master = self.acquire().await?;
        let generation = master.generation;
        let result = op(master.connection).await;
        if let Err(err) = &result {
            if err.is_connection() {
                warn!(generation, error = %err, "master store operation hit a broken connection");
                self.invalidate(generation).await;
            }
        }
        result
    }
}

impl<C: Connector> MasterInner<C> {
    async fn establish(
        self: Arc<Self>,
        generation: u64,
        address: String,
    ) -> StoreResult<MasterConnection<C::Connection>> {
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
        let current = state.is_current_attempt(generation);

        let connection = match outcome {
            Ok(connection) => connection,
            Err(message) => {
                state.clear_attempt(generation);
                warn!(generation, error = %message, "master store connection failed");
                return Err(StoreError::Connection(message));
            }
        };

        if !current {
            drop(state);
            debug!(generation, "closing master connection opened during shutdown");
            self.connector.close(connection).await;
            return Err(StoreError::ShuttingDown);
        }

        let master = MasterConnection {
            generation,
            connection,
        };
        *state = MasterState::Ready(master.clone());
        info!(generation, "master store connection established");
        Ok(master)
    }
}

impl<C> MasterStore<C>
where
    C: Connector,
    C::Connection: AccountStore,
{
    pub async fn create_account(
        &self,
        account: NewAccount,
        code_ttl: TtlDuration,
    ) -> StoreResult<IssuedAccount> {
        self.run(|db| async move { db.create_account(account, code_ttl).await })
            .await
    }

    pub async fn find_account(&self, id: &AccountId) -> StoreResult<Option<AccountRecord>> {
        self.run(|db| async move { db.find_account(id).await }).await
    }

    pub async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<AccountRecord>> {
        self.run(|db| async move { db.find_account_by_email(email).await })
            .await
    }

    pub async fn authenticate(
        &self,
        email: &str,
        credential: &str,
    ) -> StoreResult<Option<AccountRecord>> {
        self.run(|db| async move { db.authenticate(email, credential).await })
            .await
    }

    pub async fn verify_account(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AccountRecord> {
        self.run(|db| async move { db.verify_account(email, code, now).await })
            .await
    }

    pub async fn update_profile(
        &self,
        id: &AccountId,
        update: ProfileUpdate,
    ) -> StoreResult<AccountRecord> {
        self.run(|db| async move { db.update_profile(id, update).await })
            .await
    }

    pub async fn retire_account(&self, id: &AccountId) -> StoreResult<bool> {
        self.run(|db| async move { db.retire_account(id).await }).await
    }

    pub async fn issue_session(
        &self,
        id: &AccountId,
        ttl: TtlDuration,
    ) -> StoreResult<IssuedSession> {
        self.run(|db| async move { db.issue_session(id, ttl).await })
            .await
    }

    pub async fn find_session(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Principal>> {
        self.run(|db| async move { db.find_session(token, now).await })
            .await
    }

    pub async fn revoke_session(&self, token: &SessionToken) -> StoreResult<bool> {
        self.run(|db| async move { db.revoke_session(token).await })
            .await
    }
}
