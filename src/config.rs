//! Store configuration: endpoints, roles and the configuration seam.
//!
//! The core never reads configuration files. It asks a [`ConfigSource`] for a
//! resolved [`Endpoint`] by `(store kind, server alias, role)`. [`StaticConfig`]
//! is a ready-made source that can be built in code or deserialized from JSON:
//!
//! ```json
//! {
//!   "redis": {
//!     "default": { "write": { "host": "10.0.0.1", "password": "s3cret" }, "read": "write" }
//!   },
//!   "mysql": {
//!     "main": { "write": { "host": "db1", "username": "app", "database": "shop" }, "read": "write" }
//!   }
//! }
//! ```
//!
//! A role whose entry is a string is an alias to another role of the same server.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Which backing store a connection belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Key/value cache (Redis).
    KeyValue,
    /// Relational store (MySQL).
    Relational,
}

impl StoreKind {
    /// Name of the configuration section for this store.
    pub fn section(&self) -> &'static str {
        match self {
            StoreKind::KeyValue => "redis",
            StoreKind::Relational => "mysql",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::KeyValue => write!(f, "key/value"),
            StoreKind::Relational => write!(f, "relational"),
        }
    }
}

/// Connection role. Reads and writes may route to different endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Read,
    Write,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Read => "read",
            Role::Write => "write",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Role::Read),
            "write" => Ok(Role::Write),
            other => Err(Error::ConfigError(format!("Unknown role '{}'", other))),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

/// Resolved connection descriptor for one `(server, role)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default = "default_host")]
    pub host: String,
    /// Missing port means the driver default (6379 / 3306).
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    /// Shared secret. For the key/value store this enables periodic AUTH.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            host: default_host(),
            port: None,
            username: None,
            password: None,
            database: None,
            charset: None,
        }
    }
}

impl Endpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Endpoint {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(mut self, username: Option<&str>, password: &str) -> Self {
        self.username = username.map(str::to_string);
        self.password = Some(password.to_string());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// `host:port` with the given default port, for log lines.
    pub fn address(&self, default_port: u16) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(default_port))
    }
}

/// Supplies resolved endpoints to the store clients.
pub trait ConfigSource: Send + Sync {
    /// Resolve the endpoint for a server alias and role.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when the section, server or role is missing.
    fn endpoint(&self, kind: StoreKind, server: &str, role: Role) -> Result<Endpoint>;
}

/// One role entry: either a concrete endpoint or the name of another role.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleEntry {
    Alias(String),
    Endpoint(Endpoint),
}

type ServerMap = HashMap<String, HashMap<String, RoleEntry>>;

/// In-process configuration, built in code or deserialized.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    redis: ServerMap,
    #[serde(default)]
    mysql: ServerMap,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document with `redis` and `mysql` sections.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` on malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn section(&self, kind: StoreKind) -> &ServerMap {
        match kind {
            StoreKind::KeyValue => &self.redis,
            StoreKind::Relational => &self.mysql,
        }
    }

    fn section_mut(&mut self, kind: StoreKind) -> &mut ServerMap {
        match kind {
            StoreKind::KeyValue => &mut self.redis,
            StoreKind::Relational => &mut self.mysql,
        }
    }

    /// Register a concrete endpoint for a server role.
    pub fn with_endpoint(
        mut self,
        kind: StoreKind,
        server: &str,
        role: Role,
        endpoint: Endpoint,
    ) -> Self {
        self.section_mut(kind)
            .entry(server.to_string())
            .or_default()
            .insert(role.as_str().to_string(), RoleEntry::Endpoint(endpoint));
        self
    }

    /// Route `role` to whatever `target` resolves to.
    pub fn with_alias(mut self, kind: StoreKind, server: &str, role: Role, target: Role) -> Self {
        self.section_mut(kind)
            .entry(server.to_string())
            .or_default()
            .insert(
                role.as_str().to_string(),
                RoleEntry::Alias(target.as_str().to_string()),
            );
        self
    }

    /// Same endpoint for both roles.
    pub fn with_server(self, kind: StoreKind, server: &str, endpoint: Endpoint) -> Self {
        self.with_endpoint(kind, server, Role::Write, endpoint)
            .with_alias(kind, server, Role::Read, Role::Write)
    }
}

impl ConfigSource for StaticConfig {
    fn endpoint(&self, kind: StoreKind, server: &str, role: Role) -> Result<Endpoint> {
        let roles = self.section(kind).get(server).ok_or_else(|| {
            Error::ConfigError(format!(
                "No {} configuration for server '{}'",
                kind.section(),
                server
            ))
        })?;

        let mut current = role.as_str().to_string();
        let mut seen: Vec<String> = Vec::new();
        loop {
            if seen.contains(&current) {
                return Err(Error::ConfigError(format!(
                    "Role alias cycle for {} server '{}': {}",
                    kind.section(),
                    server,
                    seen.join(" -> ")
                )));
            }
            let entry = roles.get(&current).ok_or_else(|| {
                Error::ConfigError(format!(
                    "No role '{}' configured for {} server '{}'",
                    current,
                    kind.section(),
                    server
                ))
            })?;
            match entry {
                RoleEntry::Endpoint(endpoint) => return Ok(endpoint.clone()),
                RoleEntry::Alias(target) => {
                    seen.push(current);
                    current = target.clone();
                }
            }
        }
    }
}

/// Connection lifecycle limits shared by both store clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Connect attempts before giving up; also the relational retry budget.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    /// Re-authenticate after this much time since the last AUTH.
    pub auth_interval: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        ConnectionPolicy {
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            auth_interval: Duration::from_secs(300),
        }
    }
}

impl ConnectionPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_auth_interval(mut self, interval: Duration) -> Self {
        self.auth_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.address(6379), "localhost:6379");
        assert_eq!(Endpoint::new("db").with_port(3307).address(3306), "db:3307");
    }

    #[test]
    fn test_static_config_alias_resolution() {
        let config = StaticConfig::new().with_server(
            StoreKind::KeyValue,
            "default",
            Endpoint::new("10.0.0.1"),
        );

        let read = config
            .endpoint(StoreKind::KeyValue, "default", Role::Read)
            .expect("Failed to resolve read role");
        let write = config
            .endpoint(StoreKind::KeyValue, "default", Role::Write)
            .expect("Failed to resolve write role");
        assert_eq!(read, write);
        assert_eq!(read.host, "10.0.0.1");
    }

    #[test]
    fn test_static_config_from_json() {
        let config = StaticConfig::from_json(
            r#"{
                "redis": {
                    "session": {
                        "write": { "host": "cache1", "port": 6380, "password": "s3cret" },
                        "read": "write"
                    }
                },
                "mysql": {
                    "main": {
                        "write": { "host": "db1", "username": "app", "database": "shop", "charset": "utf8mb4" },
                        "read": { "host": "db2", "username": "ro" }
                    }
                }
            }"#,
        )
        .expect("Failed to parse config");

        let kv = config
            .endpoint(StoreKind::KeyValue, "session", Role::Read)
            .expect("Failed to resolve");
        assert_eq!(kv.port, Some(6380));
        assert_eq!(kv.password.as_deref(), Some("s3cret"));

        let read = config
            .endpoint(StoreKind::Relational, "main", Role::Read)
            .expect("Failed to resolve");
        assert_eq!(read.host, "db2");
        assert_eq!(read.database, None);
    }

    #[test]
    fn test_static_config_missing_server() {
        let config = StaticConfig::new();
        let err = config
            .endpoint(StoreKind::Relational, "main", Role::Write)
            .expect_err("Missing server should fail");
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_static_config_alias_cycle() {
        let config = StaticConfig::new()
            .with_alias(StoreKind::KeyValue, "loop", Role::Read, Role::Write)
            .with_alias(StoreKind::KeyValue, "loop", Role::Write, Role::Read);

        let err = config
            .endpoint(StoreKind::KeyValue, "loop", Role::Read)
            .expect_err("Alias cycle should fail");
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = StaticConfig::from_json("{ not json").expect_err("Should fail");
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_policy_defaults() {
        let policy = ConnectionPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.retry_delay, Duration::from_secs(1));
        assert_eq!(policy.auth_interval, Duration::from_secs(300));
        assert_eq!(policy.with_max_attempts(0).max_attempts, 1);
    }
}
