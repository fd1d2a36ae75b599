//! Redis transport for [`ManagedBackend`].
//!
//! The connector opens one connection per `(server, role)` slot. The secret is
//! deliberately left out of the URL: AUTH is sent by the managed client on
//! first use and every `auth_interval`. Each re-AUTH re-reads the endpoint
//! from the configuration, so a rotated secret is picked up without
//! reconnecting.

use super::managed::{KvCommand, KvConnection, KvReply, ManagedBackend};
use crate::config::{ConfigSource, ConnectionPolicy, Endpoint, StoreKind};
use crate::connection::{ConnectionRegistry, Connector};
use crate::error::{Error, Result};
use ::redis::aio::ConnectionManager;
use ::redis::{Client, Cmd, Pipeline};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_PORT: u16 = 6379;

/// Key/value client backed by Redis.
pub type RedisBackend = ManagedBackend<RedisConnector>;

/// Opens Redis connections.
#[derive(Clone, Debug, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        RedisConnector
    }

    /// Build the connection URL, without credentials.
    pub fn connection_string(endpoint: &Endpoint) -> String {
        let database = endpoint.database.as_deref().unwrap_or("0");
        format!(
            "redis://{}:{}/{}",
            endpoint.host,
            endpoint.port.unwrap_or(DEFAULT_PORT),
            database
        )
    }

    /// Registry plus client for the `default` alias.
    pub fn backend(config: Arc<dyn ConfigSource>, policy: ConnectionPolicy) -> RedisBackend {
        let registry =
            ConnectionRegistry::new(RedisConnector::new(), config, StoreKind::KeyValue)
                .with_policy(policy);
        ManagedBackend::new(Arc::new(registry))
    }
}

impl Connector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<RedisConnection> {
        if let Some(database) = &endpoint.database {
            if database.parse::<u32>().is_err() {
                return Err(Error::ConfigError(format!(
                    "Redis database must be numeric, got '{}'",
                    database
                )));
            }
        }
        let url = Self::connection_string(endpoint);
        let client = Client::open(url.as_str())
            .map_err(|e| Error::ConfigError(format!("Invalid Redis URL {}: {}", url, e)))?;
        let conn = ConnectionManager::new(client).await?;
        info!("✓ Redis connection opened: {}", endpoint.address(DEFAULT_PORT));
        Ok(RedisConnection { conn })
    }
}

/// One Redis connection.
pub struct RedisConnection {
    conn: ConnectionManager,
}

fn to_cmd(command: &KvCommand) -> Cmd {
    let mut cmd = ::redis::cmd(command.name());
    match command {
        KvCommand::Ping | KvCommand::FlushDb => {}
        KvCommand::Get(key)
        | KvCommand::Exists(key)
        | KvCommand::HGetAll(key)
        | KvCommand::RPop(key)
        | KvCommand::LPop(key)
        | KvCommand::LLen(key) => {
            cmd.arg(key);
        }
        KvCommand::MGet(keys) | KvCommand::Del(keys) => {
            cmd.arg(keys);
        }
        KvCommand::Set { key, value, ttl } => {
            cmd.arg(key).arg(value.as_slice());
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
            }
        }
        KvCommand::Expire { key, ttl } => {
            cmd.arg(key).arg(ttl.as_millis().max(1) as u64);
        }
        KvCommand::IncrBy { key, delta } => {
            cmd.arg(key).arg(*delta);
        }
        KvCommand::HGet { key, field } => {
            cmd.arg(key).arg(field);
        }
        KvCommand::HSet { key, field, value } => {
            cmd.arg(key).arg(field).arg(value.as_slice());
        }
        KvCommand::HIncrBy { key, field, delta } => {
            cmd.arg(key).arg(field).arg(*delta);
        }
        KvCommand::RPush { key, value } | KvCommand::LPush { key, value } => {
            cmd.arg(key).arg(value.as_slice());
        }
        KvCommand::LRange { key, start, stop } | KvCommand::LTrim { key, start, stop } => {
            cmd.arg(key).arg(*start).arg(*stop);
        }
    }
    cmd
}

impl KvConnection for RedisConnection {
    async fn auth(&mut self, username: Option<&str>, secret: &str) -> Result<()> {
        let mut cmd = ::redis::cmd("AUTH");
        if let Some(username) = username {
            cmd.arg(username);
        }
        cmd.arg(secret);
        cmd.query_async::<()>(&mut self.conn).await?;
        Ok(())
    }

    async fn execute(&mut self, command: KvCommand) -> Result<KvReply> {
        let cmd = to_cmd(&command);
        let conn = &mut self.conn;
        let reply = match command {
            KvCommand::Get(_)
            | KvCommand::HGet { .. }
            | KvCommand::RPop(_)
            | KvCommand::LPop(_) => cmd
                .query_async::<Option<Vec<u8>>>(conn)
                .await?
                .map_or(KvReply::Nil, KvReply::Bytes),
            KvCommand::MGet(_) => KvReply::Values(cmd.query_async::<Vec<Option<Vec<u8>>>>(conn).await?),
            KvCommand::HGetAll(_) => KvReply::Pairs(
                cmd.query_async::<HashMap<String, Vec<u8>>>(conn)
                    .await?
                    .into_iter()
                    .collect(),
            ),
            KvCommand::LRange { .. } => KvReply::List(cmd.query_async::<Vec<Vec<u8>>>(conn).await?),
            KvCommand::Del(_)
            | KvCommand::Exists(_)
            | KvCommand::Expire { .. }
            | KvCommand::IncrBy { .. }
            | KvCommand::HSet { .. }
            | KvCommand::HIncrBy { .. }
            | KvCommand::RPush { .. }
            | KvCommand::LPush { .. }
            | KvCommand::LLen(_) => KvReply::Int(cmd.query_async::<i64>(conn).await?),
            KvCommand::Ping => {
                let pong = cmd.query_async::<String>(conn).await?;
                if pong != "PONG" {
                    return Err(Error::BackendError(format!(
                        "Unexpected PING response: {}",
                        pong
                    )));
                }
                KvReply::Ok
            }
            KvCommand::Set { .. } | KvCommand::LTrim { .. } | KvCommand::FlushDb => {
                cmd.query_async::<()>(conn).await?;
                KvReply::Ok
            }
        };
        Ok(reply)
    }

    async fn pipeline(&mut self, commands: Vec<KvCommand>) -> Result<()> {
        let mut pipe = Pipeline::new();
        for command in &commands {
            pipe.add_command(to_cmd(command)).ignore();
        }
        pipe.query_async::<()>(&mut self.conn).await?;
        debug!("✓ Redis pipeline of {} commands", commands.len());
        Ok(())
    }
}
