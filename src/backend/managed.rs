//! Key/value client over a pluggable transport.
//!
//! [`ManagedBackend`] owns no sockets itself. It asks its
//! [`ConnectionRegistry`] for the connection of `(server, role)`, asserts the
//! configured secret when it is due, and sends [`KvCommand`]s through the
//! [`KvConnection`] transport. Reads use the `read` role and mutations the
//! `write` role; batch writes are sent as one pipeline.
//!
//! A transport failure or a call timeout drops the connection, so the next
//! call reconnects from scratch instead of reusing a half-broken stream.

use super::CacheBackend;
use crate::config::Role;
use crate::connection::{ConnectionGuard, ConnectionRegistry, Connector};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One key/value store command.
#[derive(Clone, Debug, PartialEq)]
pub enum KvCommand {
    Ping,
    Get(String),
    MGet(Vec<String>),
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Del(Vec<String>),
    Exists(String),
    Expire {
        key: String,
        ttl: Duration,
    },
    IncrBy {
        key: String,
        delta: i64,
    },
    HGet {
        key: String,
        field: String,
    },
    HGetAll(String),
    HSet {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    RPush {
        key: String,
        value: Vec<u8>,
    },
    LPush {
        key: String,
        value: Vec<u8>,
    },
    RPop(String),
    LPop(String),
    LLen(String),
    LRange {
        key: String,
        start: i64,
        stop: i64,
    },
    LTrim {
        key: String,
        start: i64,
        stop: i64,
    },
    FlushDb,
}

impl KvCommand {
    /// Command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            KvCommand::Ping => "PING",
            KvCommand::Get(_) => "GET",
            KvCommand::MGet(_) => "MGET",
            KvCommand::Set { .. } => "SET",
            KvCommand::Del(_) => "DEL",
            KvCommand::Exists(_) => "EXISTS",
            KvCommand::Expire { .. } => "PEXPIRE",
            KvCommand::IncrBy { .. } => "INCRBY",
            KvCommand::HGet { .. } => "HGET",
            KvCommand::HGetAll(_) => "HGETALL",
            KvCommand::HSet { .. } => "HSET",
            KvCommand::HIncrBy { .. } => "HINCRBY",
            KvCommand::RPush { .. } => "RPUSH",
            KvCommand::LPush { .. } => "LPUSH",
            KvCommand::RPop(_) => "RPOP",
            KvCommand::LPop(_) => "LPOP",
            KvCommand::LLen(_) => "LLEN",
            KvCommand::LRange { .. } => "LRANGE",
            KvCommand::LTrim { .. } => "LTRIM",
            KvCommand::FlushDb => "FLUSHDB",
        }
    }
}

/// Decoded command reply.
#[derive(Clone, Debug, PartialEq)]
pub enum KvReply {
    Ok,
    Nil,
    Int(i64),
    Bytes(Vec<u8>),
    /// One optional value per requested key (MGET).
    Values(Vec<Option<Vec<u8>>>),
    List(Vec<Vec<u8>>),
    Pairs(Vec<(String, Vec<u8>)>),
}

impl KvReply {
    fn unexpected(self, op: &str) -> Error {
        Error::BackendError(format!("Unexpected reply to {}: {:?}", op, self))
    }

    pub fn into_bytes(self, op: &str) -> Result<Option<Vec<u8>>> {
        match self {
            KvReply::Nil => Ok(None),
            KvReply::Bytes(b) => Ok(Some(b)),
            other => Err(other.unexpected(op)),
        }
    }

    pub fn into_int(self, op: &str) -> Result<i64> {
        match self {
            KvReply::Int(n) => Ok(n),
            other => Err(other.unexpected(op)),
        }
    }

    pub fn into_values(self, op: &str) -> Result<Vec<Option<Vec<u8>>>> {
        match self {
            KvReply::Values(v) => Ok(v),
            other => Err(other.unexpected(op)),
        }
    }

    pub fn into_list(self, op: &str) -> Result<Vec<Vec<u8>>> {
        match self {
            KvReply::List(l) => Ok(l),
            KvReply::Nil => Ok(Vec::new()),
            other => Err(other.unexpected(op)),
        }
    }

    pub fn into_pairs(self, op: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        match self {
            KvReply::Pairs(p) => Ok(p.into_iter().collect()),
            KvReply::Nil => Ok(BTreeMap::new()),
            other => Err(other.unexpected(op)),
        }
    }

    pub fn into_ok(self, op: &str) -> Result<()> {
        match self {
            KvReply::Ok => Ok(()),
            other => Err(other.unexpected(op)),
        }
    }
}

/// Transport for one key/value connection.
///
/// Transport loss must be reported as `Error::Disconnected` so the client
/// can drop the connection.
pub trait KvConnection: Send + 'static {
    /// Assert the shared secret (AUTH).
    fn auth(
        &mut self,
        username: Option<&str>,
        secret: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn execute(&mut self, command: KvCommand) -> impl Future<Output = Result<KvReply>> + Send;

    /// Send all commands in one round-trip, discarding replies.
    fn pipeline(&mut self, commands: Vec<KvCommand>) -> impl Future<Output = Result<()>> + Send;
}

/// Key/value client bound to one server alias.
pub struct ManagedBackend<C: Connector> {
    registry: Arc<ConnectionRegistry<C>>,
    server: String,
}

impl<C: Connector> Clone for ManagedBackend<C> {
    fn clone(&self) -> Self {
        ManagedBackend {
            registry: Arc::clone(&self.registry),
            server: self.server.clone(),
        }
    }
}

impl<C> ManagedBackend<C>
where
    C: Connector,
    C::Connection: KvConnection,
{
    /// Client for the `default` server alias.
    pub fn new(registry: Arc<ConnectionRegistry<C>>) -> Self {
        Self::with_server(registry, "default")
    }

    pub fn with_server(registry: Arc<ConnectionRegistry<C>>, server: &str) -> Self {
        ManagedBackend {
            registry,
            server: server.to_string(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<C>> {
        &self.registry
    }

    /// Connected, authenticated connection for `role`.
    async fn session(&self, role: Role) -> Result<ConnectionGuard<C::Connection>> {
        let mut guard = self.registry.acquire(&self.server, role).await?;
        let policy = self.registry.policy();

        if guard.auth_expired(policy.auth_interval) {
            self.registry.refresh_endpoint(&mut guard);
        }
        if guard.needs_auth(policy.auth_interval) {
            let (username, secret) = match guard.endpoint() {
                Some(endpoint) => (endpoint.username.clone(), endpoint.password.clone()),
                None => (None, None),
            };
            if let Some(secret) = secret {
                let outcome = tokio::time::timeout(
                    policy.call_timeout,
                    guard.connection()?.auth(username.as_deref(), &secret),
                )
                .await;
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("AUTH timed out after {:?}", policy.call_timeout)),
                };
                if let Some(message) = failure {
                    guard.reset();
                    error!(
                        "✗ AUTH failed for {} server {}: {}",
                        self.registry.kind(),
                        guard.key(),
                        message
                    );
                    return Err(Error::ConnectionError {
                        store: self.registry.kind(),
                        server: self.server.clone(),
                        role,
                        attempts: 1,
                        message,
                    });
                }
                guard.mark_authenticated();
                debug!("✓ AUTH {} ok", guard.key());
            }
        }

        Ok(guard)
    }

    fn on_failure(guard: &mut ConnectionGuard<C::Connection>, op: &str, error: &Error) {
        if error.is_transient() {
            warn!(
                "⚠ {} on {} failed, dropping connection: {}",
                op,
                guard.key(),
                error
            );
            guard.reset();
        }
    }

    async fn call(&self, role: Role, command: KvCommand) -> Result<KvReply> {
        let op = command.name();
        let mut guard = self.session(role).await?;
        let timeout = self.registry.policy().call_timeout;

        let result = match tokio::time::timeout(timeout, guard.connection()?.execute(command)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("{} timed out after {:?}", op, timeout))),
        };
        if let Err(e) = &result {
            Self::on_failure(&mut guard, op, e);
        }
        result
    }

    async fn call_pipeline(&self, commands: Vec<KvCommand>) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let count = commands.len();
        let mut guard = self.session(Role::Write).await?;
        let timeout = self.registry.policy().call_timeout;

        let result =
            match tokio::time::timeout(timeout, guard.connection()?.pipeline(commands)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "pipeline of {} commands timed out after {:?}",
                    count, timeout
                ))),
            };
        if let Err(e) = &result {
            Self::on_failure(&mut guard, "PIPELINE", e);
        }
        result
    }
}

impl<C> CacheBackend for ManagedBackend<C>
where
    C: Connector,
    C::Connection: KvConnection,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .call(Role::Read, KvCommand::Get(key.to_string()))
            .await?
            .into_bytes("GET")?;
        if value.is_some() {
            debug!("✓ KV GET {} -> HIT", key);
        } else {
            debug!("✓ KV GET {} -> MISS", key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.call(
            Role::Write,
            KvCommand::Set {
                key: key.to_string(),
                value,
                ttl,
            },
        )
        .await?
        .into_ok("SET")?;
        debug!("✓ KV SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.call(Role::Write, KvCommand::Del(vec![key.to_string()]))
            .await?
            .into_int("DEL")?;
        debug!("✓ KV DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count = self
            .call(Role::Read, KvCommand::Exists(key.to_string()))
            .await?
            .into_int("EXISTS")?;
        Ok(count > 0)
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = self
            .call(
                Role::Read,
                KvCommand::MGet(keys.iter().map(|k| k.to_string()).collect()),
            )
            .await?
            .into_values("MGET")?;
        if values.len() != keys.len() {
            return Err(Error::BackendError(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        debug!("✓ KV MGET {} keys", keys.len());
        Ok(values)
    }

    async fn mset(&self, items: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Result<()> {
        let commands = items
            .iter()
            .map(|(key, value)| KvCommand::Set {
                key: key.clone(),
                value: value.clone(),
                ttl,
            })
            .collect();
        self.call_pipeline(commands).await?;
        debug!("✓ KV MSET {} keys (pipelined)", items.len());
        Ok(())
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.call(
            Role::Write,
            KvCommand::Del(keys.iter().map(|k| k.to_string()).collect()),
        )
        .await?
        .into_int("DEL")?;
        debug!("✓ KV MDELETE {} keys", keys.len());
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let updated = self
            .call(
                Role::Write,
                KvCommand::Expire {
                    key: key.to_string(),
                    ttl,
                },
            )
            .await?
            .into_int("PEXPIRE")?;
        Ok(updated == 1)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        self.call(
            Role::Write,
            KvCommand::IncrBy {
                key: key.to_string(),
                delta,
            },
        )
        .await?
        .into_int("INCRBY")
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        self.call(
            Role::Read,
            KvCommand::HGet {
                key: key.to_string(),
                field: field.to_string(),
            },
        )
        .await?
        .into_bytes("HGET")
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        self.call(Role::Read, KvCommand::HGetAll(key.to_string()))
            .await?
            .into_pairs("HGETALL")
    }

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> Result<()> {
        self.call(
            Role::Write,
            KvCommand::HSet {
                key: key.to_string(),
                field: field.to_string(),
                value,
            },
        )
        .await?
        .into_int("HSET")?;
        Ok(())
    }

    async fn hash_set_many(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()> {
        let commands = fields
            .iter()
            .map(|(field, value)| KvCommand::HSet {
                key: key.to_string(),
                field: field.clone(),
                value: value.clone(),
            })
            .collect();
        self.call_pipeline(commands).await
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.call(
            Role::Write,
            KvCommand::HIncrBy {
                key: key.to_string(),
                field: field.to_string(),
                delta,
            },
        )
        .await?
        .into_int("HINCRBY")
    }

    async fn list_push(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let len = self
            .call(
                Role::Write,
                KvCommand::RPush {
                    key: key.to_string(),
                    value,
                },
            )
            .await?
            .into_int("RPUSH")?;
        Ok(len.max(0) as u64)
    }

    async fn list_unshift(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let len = self
            .call(
                Role::Write,
                KvCommand::LPush {
                    key: key.to_string(),
                    value,
                },
            )
            .await?
            .into_int("LPUSH")?;
        Ok(len.max(0) as u64)
    }

    async fn list_pop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.call(Role::Write, KvCommand::RPop(key.to_string()))
            .await?
            .into_bytes("RPOP")
    }

    async fn list_shift(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.call(Role::Write, KvCommand::LPop(key.to_string()))
            .await?
            .into_bytes("LPOP")
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let len = self
            .call(Role::Read, KvCommand::LLen(key.to_string()))
            .await?
            .into_int("LLEN")?;
        Ok(len.max(0) as u64)
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        self.call(
            Role::Read,
            KvCommand::LRange {
                key: key.to_string(),
                start,
                stop,
            },
        )
        .await?
        .into_list("LRANGE")
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.call(
            Role::Write,
            KvCommand::LTrim {
                key: key.to_string(),
                start,
                stop,
            },
        )
        .await?
        .into_ok("LTRIM")
    }

    async fn health_check(&self) -> Result<bool> {
        match self.call(Role::Read, KvCommand::Ping).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("⚠ KV health check failed for {}: {}", self.server, e);
                Ok(false)
            }
        }
    }

    async fn clear_all(&self) -> Result<()> {
        self.call(Role::Write, KvCommand::FlushDb)
            .await?
            .into_ok("FLUSHDB")?;
        warn!("⚠ KV FLUSHDB executed on {} - all cache cleared!", self.server);
        Ok(())
    }

    fn route(&self, server: &str) -> Self {
        Self::with_server(Arc::clone(&self.registry), server)
    }
}
