//! Connection registry shared by the key/value and relational clients.
//!
//! One connection is kept per `(server alias, role)` pair. Connections are
//! established lazily on first use, retried up to [`ConnectionPolicy::max_attempts`]
//! with a fixed delay, and dropped back to unconnected when a client reports a
//! transport failure. Access to a given connection is serialized through a
//! per-slot async mutex, so concurrent callers sharing a pair take turns.
//!
//! The registry is an explicit object handed to the store clients, which lets
//! tests plug in scripted connectors and lets independent configurations coexist.
//!
//! ```text
//! Unconnected ──connect──▶ Connected ──auth──▶ Ready
//!      ▲                                         │
//!      └──────────── transport error ────────────┘
//! ```

use crate::config::{ConfigSource, ConnectionPolicy, Endpoint, Role, StoreKind};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Opens transport connections for one kind of store.
pub trait Connector: Send + Sync + 'static {
    /// Live connection handle.
    type Connection: Send + 'static;

    /// Open a connection to the endpoint. Authentication is not part of connect.
    fn connect(&self, endpoint: &Endpoint)
        -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// Registry key: server alias plus role.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub server: String,
    pub role: Role,
}

impl ConnectionKey {
    pub fn new(server: &str, role: Role) -> Self {
        ConnectionKey {
            server: server.to_string(),
            role,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server, self.role)
    }
}

/// Observable lifecycle state of one registry slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    /// Connected but a configured secret has not been asserted yet.
    Connected,
    Ready,
}

struct Slot<T> {
    connection: Option<T>,
    endpoint: Option<Endpoint>,
    authenticated_at: Option<Instant>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            connection: None,
            endpoint: None,
            authenticated_at: None,
        }
    }
}

impl<T> Slot<T> {
    fn requires_auth(&self) -> bool {
        self.endpoint
            .as_ref()
            .is_some_and(|endpoint| endpoint.password.is_some())
    }
}

/// Exclusive access to one connected slot.
///
/// Dropping the guard releases the slot for the next caller.
pub struct ConnectionGuard<T> {
    key: ConnectionKey,
    slot: OwnedMutexGuard<Slot<T>>,
}

impl<T> ConnectionGuard<T> {
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// The live connection.
    ///
    /// # Errors
    /// Returns `Error::Disconnected` after [`reset`](Self::reset).
    pub fn connection(&mut self) -> Result<&mut T> {
        let key = &self.key;
        self.slot
            .connection
            .as_mut()
            .ok_or_else(|| Error::Disconnected(format!("connection {} was reset", key)))
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.slot.endpoint.as_ref()
    }

    /// Drop the connection; the next acquire reconnects from scratch.
    pub fn reset(&mut self) {
        self.slot.connection = None;
        self.slot.authenticated_at = None;
    }

    /// True when a secret is configured and it was never asserted or is older than `interval`.
    pub fn needs_auth(&self, interval: Duration) -> bool {
        if !self.slot.requires_auth() {
            return false;
        }
        match self.slot.authenticated_at {
            None => true,
            Some(at) => at.elapsed() >= interval,
        }
    }

    /// True when an earlier AUTH is older than `interval`.
    pub fn auth_expired(&self, interval: Duration) -> bool {
        self.slot
            .authenticated_at
            .is_some_and(|at| at.elapsed() >= interval)
    }

    pub fn mark_authenticated(&mut self) {
        self.slot.authenticated_at = Some(Instant::now());
    }
}

/// Arena of connections keyed by `(server, role)` for one store kind.
pub struct ConnectionRegistry<C: Connector> {
    connector: C,
    config: Arc<dyn ConfigSource>,
    kind: StoreKind,
    policy: ConnectionPolicy,
    slots: DashMap<ConnectionKey, Arc<Mutex<Slot<C::Connection>>>>,
}

impl<C: Connector> ConnectionRegistry<C> {
    pub fn new(connector: C, config: Arc<dyn ConfigSource>, kind: StoreKind) -> Self {
        ConnectionRegistry {
            connector,
            config,
            kind,
            policy: ConnectionPolicy::default(),
            slots: DashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: ConnectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Lock the slot for `(server, role)`, connecting it first if needed.
    ///
    /// # Errors
    /// - `Error::ConfigError` if the pair has no configuration
    /// - `Error::ConnectionError` once every connect attempt failed
    pub async fn acquire(&self, server: &str, role: Role) -> Result<ConnectionGuard<C::Connection>> {
        let key = ConnectionKey::new(server, role);
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let mut guard = slot.lock_owned().await;

        if guard.connection.is_none() {
            let endpoint = self.config.endpoint(self.kind, server, role)?;
            let connection = self.connect_with_retry(&key, &endpoint).await?;
            guard.connection = Some(connection);
            guard.endpoint = Some(endpoint);
            guard.authenticated_at = None;
        }

        Ok(ConnectionGuard { key, slot: guard })
    }

    /// Re-read the endpoint of the guarded slot from the configuration.
    ///
    /// Credentials rotated since connect apply from the next AUTH on. When
    /// the pair no longer resolves the endpoint from connect time is kept.
    pub fn refresh_endpoint(&self, guard: &mut ConnectionGuard<C::Connection>) {
        match self.config.endpoint(self.kind, &guard.key.server, guard.key.role) {
            Ok(endpoint) => guard.slot.endpoint = Some(endpoint),
            Err(e) => warn!(
                "⚠ Keeping connect-time endpoint for {} server {}: {}",
                self.kind, guard.key, e
            ),
        }
    }

    async fn connect_with_retry(
        &self,
        key: &ConnectionKey,
        endpoint: &Endpoint,
    ) -> Result<C::Connection> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome =
                tokio::time::timeout(self.policy.connect_timeout, self.connector.connect(endpoint))
                    .await;
            match outcome {
                Ok(Ok(connection)) => {
                    info!(
                        "✓ Connected to {} server {} at {} (attempt {}/{})",
                        self.kind, key, endpoint.host, attempt, max_attempts
                    );
                    return Ok(connection);
                }
                Ok(Err(Error::ConfigError(msg))) => return Err(Error::ConfigError(msg)),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "connect timed out after {:?}",
                        self.policy.connect_timeout
                    )
                }
            }

            warn!(
                "⚠ connect {} server {} failed (attempt {}/{}): {}",
                self.kind, key, attempt, max_attempts, last_error
            );
            if attempt < max_attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        error!(
            "✗ Giving up on {} server {} after {} attempts: {}",
            self.kind, key, max_attempts, last_error
        );
        Err(Error::ConnectionError {
            store: self.kind,
            server: key.server.clone(),
            role: key.role,
            attempts: max_attempts,
            message: last_error,
        })
    }

    /// Current lifecycle state of `(server, role)`.
    ///
    /// Waits for the slot if another caller holds it.
    pub async fn state(&self, server: &str, role: Role) -> ConnectionState {
        let key = ConnectionKey::new(server, role);
        let slot = match self.slots.get(&key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return ConnectionState::Unconnected,
        };
        let guard = slot.lock().await;
        match (&guard.connection, guard.authenticated_at) {
            (None, _) => ConnectionState::Unconnected,
            (Some(_), None) if guard.requires_auth() => ConnectionState::Connected,
            (Some(_), _) => ConnectionState::Ready,
        }
    }

    /// Drop every open connection.
    pub async fn close_all(&self) {
        let slots: Vec<_> = self
            .slots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for slot in slots {
            let mut guard = slot.lock().await;
            guard.connection = None;
            guard.authenticated_at = None;
        }
        debug!("Closed all {} connections", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FlakyConnector {
        failures_left: AtomicU32,
        connects: AtomicU32,
    }

    impl FlakyConnector {
        fn failing(times: u32) -> Self {
            FlakyConnector {
                failures_left: AtomicU32::new(times),
                connects: AtomicU32::new(0),
            }
        }
    }

    impl Connector for FlakyConnector {
        type Connection = u32;

        async fn connect(&self, _endpoint: &Endpoint) -> Result<u32> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Disconnected("connection refused".to_string()));
            }
            Ok(n)
        }
    }

    fn config(password: Option<&str>) -> Arc<dyn ConfigSource> {
        let mut endpoint = Endpoint::new("cache1");
        if let Some(secret) = password {
            endpoint = endpoint.with_credentials(None, secret);
        }
        Arc::new(StaticConfig::new().with_server(StoreKind::KeyValue, "default", endpoint))
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_connect_reuses_connection() {
        let registry = ConnectionRegistry::new(
            FlakyConnector::default(),
            config(None),
            StoreKind::KeyValue,
        );
        assert_eq!(
            registry.state("default", Role::Read).await,
            ConnectionState::Unconnected
        );

        {
            let mut guard = registry
                .acquire("default", Role::Read)
                .await
                .expect("Failed to acquire");
            assert_eq!(*guard.connection().expect("No connection"), 1);
        }
        {
            let mut guard = registry
                .acquire("default", Role::Read)
                .await
                .expect("Failed to acquire");
            assert_eq!(*guard.connection().expect("No connection"), 1);
        }

        assert_eq!(registry.connector().connects.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.state("default", Role::Read).await,
            ConnectionState::Ready
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_roles_get_separate_connections() {
        let registry = ConnectionRegistry::new(
            FlakyConnector::default(),
            config(None),
            StoreKind::KeyValue,
        );

        drop(registry.acquire("default", Role::Read).await.expect("read"));
        drop(registry.acquire("default", Role::Write).await.expect("write"));

        assert_eq!(registry.connector().connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_with_delay() {
        let registry = ConnectionRegistry::new(
            FlakyConnector::failing(2),
            config(None),
            StoreKind::KeyValue,
        );

        let started = Instant::now();
        let mut guard = registry
            .acquire("default", Role::Write)
            .await
            .expect("Third attempt should succeed");

        assert_eq!(*guard.connection().expect("No connection"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_bound() {
        let registry = ConnectionRegistry::new(
            FlakyConnector::failing(u32::MAX),
            config(None),
            StoreKind::KeyValue,
        );

        let err = match registry.acquire("default", Role::Read).await {
            Ok(_) => panic!("Connect should fail"),
            Err(e) => e,
        };

        match err {
            Error::ConnectionError {
                attempts, server, ..
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(server, "default");
            }
            other => panic!("Expected ConnectionError, got {:?}", other),
        }
        assert_eq!(registry.connector().connects.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_server_is_config_error() {
        let registry = ConnectionRegistry::new(
            FlakyConnector::default(),
            config(None),
            StoreKind::KeyValue,
        );

        let result = registry.acquire("missing", Role::Read).await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
        assert_eq!(registry.connector().connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forces_reconnect() {
        let registry = ConnectionRegistry::new(
            FlakyConnector::default(),
            config(None),
            StoreKind::KeyValue,
        );

        {
            let mut guard = registry
                .acquire("default", Role::Read)
                .await
                .expect("Failed to acquire");
            guard.reset();
            assert!(matches!(guard.connection(), Err(Error::Disconnected(_))));
        }
        assert_eq!(
            registry.state("default", Role::Read).await,
            ConnectionState::Unconnected
        );

        let mut guard = registry
            .acquire("default", Role::Read)
            .await
            .expect("Failed to reacquire");
        assert_eq!(*guard.connection().expect("No connection"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_interval_tracking() {
        let registry = ConnectionRegistry::new(
            FlakyConnector::default(),
            config(Some("s3cret")),
            StoreKind::KeyValue,
        );
        let interval = Duration::from_secs(300);

        {
            let mut guard = registry
                .acquire("default", Role::Read)
                .await
                .expect("Failed to acquire");
            assert!(guard.needs_auth(interval));
            guard.mark_authenticated();
            assert!(!guard.needs_auth(interval));
        }

        tokio::time::advance(Duration::from_secs(299)).await;
        {
            let guard = registry
                .acquire("default", Role::Read)
                .await
                .expect("Failed to acquire");
            assert!(!guard.needs_auth(interval));
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        let guard = registry
            .acquire("default", Role::Read)
            .await
            .expect("Failed to acquire");
        assert!(guard.needs_auth(interval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reports_pending_auth() {
        let registry = ConnectionRegistry::new(
            FlakyConnector::default(),
            config(Some("s3cret")),
            StoreKind::KeyValue,
        );

        drop(registry.acquire("default", Role::Read).await.expect("acquire"));
        assert_eq!(
            registry.state("default", Role::Read).await,
            ConnectionState::Connected
        );

        registry.close_all().await;
        assert_eq!(
            registry.state("default", Role::Read).await,
            ConnectionState::Unconnected
        );
    }
}
