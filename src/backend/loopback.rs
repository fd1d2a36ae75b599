//! In-process key/value transport.
//!
//! [`LoopbackConnector`] hands out connections that execute [`KvCommand`]s
//! against a shared [`InMemoryBackend`]. It behaves like a server: it can
//! require a password, it counts connects, AUTHs and round-trips, and it can
//! be told to refuse connections or drop calls. Useful for exercising
//! [`ManagedBackend`](super::ManagedBackend) without a Redis server.

use super::managed::{KvCommand, KvConnection, KvReply};
use super::{CacheBackend, InMemoryBackend};
use crate::config::Endpoint;
use crate::connection::Connector;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Counters and fault switches shared by a connector and its connections.
#[derive(Debug, Default)]
pub struct LoopbackStats {
    connects: AtomicU32,
    auths: AtomicU32,
    round_trips: AtomicU32,
    refuse_connects: AtomicU32,
    drop_calls: AtomicU32,
}

impl LoopbackStats {
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn auths(&self) -> u32 {
        self.auths.load(Ordering::SeqCst)
    }

    pub fn round_trips(&self) -> u32 {
        self.round_trips.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

/// Connector for the in-process transport.
#[derive(Clone)]
pub struct LoopbackConnector {
    store: InMemoryBackend,
    secret: Arc<RwLock<Option<String>>>,
    stats: Arc<LoopbackStats>,
}

impl LoopbackConnector {
    pub fn new(store: InMemoryBackend) -> Self {
        LoopbackConnector {
            store,
            secret: Arc::new(RwLock::new(None)),
            stats: Arc::new(LoopbackStats::default()),
        }
    }

    /// Require AUTH with `secret` before any command.
    pub fn with_secret(self, secret: &str) -> Self {
        self.rotate_secret(secret);
        self
    }

    /// Replace the required secret. Open connections stay authenticated
    /// until their next AUTH.
    pub fn rotate_secret(&self, secret: &str) {
        let mut current = self.secret.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(secret.to_string());
    }

    pub fn store(&self) -> &InMemoryBackend {
        &self.store
    }

    pub fn stats(&self) -> &LoopbackStats {
        &self.stats
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next_connects(&self, n: u32) {
        self.stats.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with a dropped-connection error.
    pub fn drop_next_calls(&self, n: u32) {
        self.stats.drop_calls.store(n, Ordering::SeqCst);
    }
}

impl Connector for LoopbackConnector {
    type Connection = LoopbackConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<LoopbackConnection> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        if LoopbackStats::take(&self.stats.refuse_connects) {
            return Err(Error::Disconnected(format!(
                "connection to {} refused",
                endpoint.address(6379)
            )));
        }
        Ok(LoopbackConnection {
            store: self.store.clone(),
            secret: Arc::clone(&self.secret),
            authenticated: false,
            stats: Arc::clone(&self.stats),
        })
    }
}

/// One in-process connection.
pub struct LoopbackConnection {
    store: InMemoryBackend,
    secret: Arc<RwLock<Option<String>>>,
    authenticated: bool,
    stats: Arc<LoopbackStats>,
}

impl LoopbackConnection {
    fn required_secret(&self) -> Option<String> {
        self.secret
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn begin_round_trip(&self) -> Result<()> {
        self.stats.round_trips.fetch_add(1, Ordering::SeqCst);
        if LoopbackStats::take(&self.stats.drop_calls) {
            return Err(Error::Disconnected("connection reset by peer".to_string()));
        }
        if self.required_secret().is_some() && !self.authenticated {
            return Err(Error::BackendError(
                "NOAUTH Authentication required".to_string(),
            ));
        }
        Ok(())
    }

    async fn dispatch(&self, command: KvCommand) -> Result<KvReply> {
        let store = &self.store;
        let reply = match command {
            KvCommand::Ping => KvReply::Ok,
            KvCommand::Get(key) => store.get(&key).await?.map_or(KvReply::Nil, KvReply::Bytes),
            KvCommand::MGet(keys) => {
                let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
                KvReply::Values(store.mget(&refs).await?)
            }
            KvCommand::Set { key, value, ttl } => {
                store.set(&key, value, ttl).await?;
                KvReply::Ok
            }
            KvCommand::Del(keys) => {
                let mut removed = 0;
                for key in &keys {
                    if store.exists(key).await? {
                        removed += 1;
                    }
                    store.delete(key).await?;
                }
                KvReply::Int(removed)
            }
            KvCommand::Exists(key) => KvReply::Int(i64::from(store.exists(&key).await?)),
            KvCommand::Expire { key, ttl } => {
                KvReply::Int(i64::from(store.expire(&key, ttl).await?))
            }
            KvCommand::IncrBy { key, delta } => KvReply::Int(store.increment(&key, delta).await?),
            KvCommand::HGet { key, field } => store
                .hash_get(&key, &field)
                .await?
                .map_or(KvReply::Nil, KvReply::Bytes),
            KvCommand::HGetAll(key) => {
                KvReply::Pairs(store.hash_get_all(&key).await?.into_iter().collect())
            }
            KvCommand::HSet { key, field, value } => {
                let existed = store.hash_get(&key, &field).await?.is_some();
                store.hash_set(&key, &field, value).await?;
                KvReply::Int(if existed { 0 } else { 1 })
            }
            KvCommand::HIncrBy { key, field, delta } => {
                KvReply::Int(store.hash_increment(&key, &field, delta).await?)
            }
            KvCommand::RPush { key, value } => {
                KvReply::Int(store.list_push(&key, value).await? as i64)
            }
            KvCommand::LPush { key, value } => {
                KvReply::Int(store.list_unshift(&key, value).await? as i64)
            }
            KvCommand::RPop(key) => store.list_pop(&key).await?.map_or(KvReply::Nil, KvReply::Bytes),
            KvCommand::LPop(key) => store
                .list_shift(&key)
                .await?
                .map_or(KvReply::Nil, KvReply::Bytes),
            KvCommand::LLen(key) => KvReply::Int(store.list_len(&key).await? as i64),
            KvCommand::LRange { key, start, stop } => {
                KvReply::List(store.list_range(&key, start, stop).await?)
            }
            KvCommand::LTrim { key, start, stop } => {
                store.list_trim(&key, start, stop).await?;
                KvReply::Ok
            }
            KvCommand::FlushDb => {
                store.clear_all().await?;
                KvReply::Ok
            }
        };
        Ok(reply)
    }
}

impl KvConnection for LoopbackConnection {
    async fn auth(&mut self, _username: Option<&str>, secret: &str) -> Result<()> {
        self.stats.round_trips.fetch_add(1, Ordering::SeqCst);
        self.stats.auths.fetch_add(1, Ordering::SeqCst);
        match self.required_secret() {
            Some(expected) if expected != secret => {
                self.authenticated = false;
                Err(Error::BackendError(
                    "WRONGPASS invalid username-password pair".to_string(),
                ))
            }
            _ => {
                self.authenticated = true;
                Ok(())
            }
        }
    }

    async fn execute(&mut self, command: KvCommand) -> Result<KvReply> {
        self.begin_round_trip()?;
        self.dispatch(command).await
    }

    async fn pipeline(&mut self, commands: Vec<KvCommand>) -> Result<()> {
        self.begin_round_trip()?;
        for command in commands {
            self.dispatch(command).await?;
        }
        Ok(())
    }
}
