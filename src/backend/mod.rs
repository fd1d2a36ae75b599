//! Key/value store clients.
//!
//! [`CacheBackend`] is the seam the expander talks to. Two implementations ship:
//!
//! - [`InMemoryBackend`]: process-local, default and test backend
//! - [`ManagedBackend`]: drives any [`KvConnection`] transport through a
//!   [`ConnectionRegistry`](crate::connection::ConnectionRegistry) (lazy
//!   connect, periodic AUTH, reset on transport failure); with the `redis`
//!   feature, [`RedisConnector`] supplies the transport

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod inmemory;
pub mod loopback;
pub mod managed;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
pub use loopback::LoopbackConnector;
pub use managed::{KvCommand, KvConnection, KvReply, ManagedBackend};
#[cfg(feature = "redis")]
pub use self::redis::{RedisBackend, RedisConnector};

fn not_implemented<T>(op: &str) -> Result<T> {
    Err(Error::NotImplemented(format!(
        "{} not implemented for this backend",
        op
    )))
}

/// Trait for key/value store clients.
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow concurrent access.
/// Implementations use interior mutability (DashMap, per-connection mutex).
///
/// **ASYNC:** All methods are async and must be awaited.
///
/// Hash and list operations are optional; the defaults return
/// `Error::NotImplemented`.
#[allow(async_fn_in_trait)]
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve value from cache by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found in cache
    /// - `Ok(None)` - Cache miss (key not found)
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs (connection lost, etc.)
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store value in cache with optional TTL.
    ///
    /// # Arguments
    /// - `key`: Cache key
    /// - `value`: Serialized bytes
    /// - `ttl`: Time-to-live. None = no expiry
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove value from cache.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if key exists in cache.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Bulk get, one slot per key in request order.
    ///
    /// Default implementation calls `get()` for each key. Network backends
    /// override it with a single round-trip.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.get(key).await?);
        }
        Ok(results)
    }

    /// Bulk set with a shared TTL.
    ///
    /// Default implementation calls `set()` for each pair. Network backends
    /// override it with one pipelined round-trip.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn mset(&self, items: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Result<()> {
        for (key, value) in items {
            self.set(key, value.clone(), ttl).await?;
        }
        Ok(())
    }

    /// Bulk delete.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Set a TTL on an existing key. Returns false if the key does not exist.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        not_implemented("expire")
    }

    /// Add `delta` to an integer value, creating it at 0. Returns the new value.
    ///
    /// # Errors
    /// Returns `Err` if the stored value is not an integer or the operation is unsupported
    async fn increment(&self, _key: &str, _delta: i64) -> Result<i64> {
        not_implemented("increment")
    }

    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn hash_get(&self, _key: &str, _field: &str) -> Result<Option<Vec<u8>>> {
        not_implemented("hash_get")
    }

    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn hash_get_all(&self, _key: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        not_implemented("hash_get_all")
    }

    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn hash_set(&self, _key: &str, _field: &str, _value: Vec<u8>) -> Result<()> {
        not_implemented("hash_set")
    }

    /// Set several hash fields in one round-trip.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn hash_set_many(&self, _key: &str, _fields: &[(String, Vec<u8>)]) -> Result<()> {
        not_implemented("hash_set_many")
    }

    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn hash_increment(&self, _key: &str, _field: &str, _delta: i64) -> Result<i64> {
        not_implemented("hash_increment")
    }

    /// Append to the tail of a list. Returns the new length.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn list_push(&self, _key: &str, _value: Vec<u8>) -> Result<u64> {
        not_implemented("list_push")
    }

    /// Prepend to the head of a list. Returns the new length.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn list_unshift(&self, _key: &str, _value: Vec<u8>) -> Result<u64> {
        not_implemented("list_unshift")
    }

    /// Remove and return the tail element.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn list_pop(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        not_implemented("list_pop")
    }

    /// Remove and return the head element.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn list_shift(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        not_implemented("list_shift")
    }

    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn list_len(&self, _key: &str) -> Result<u64> {
        not_implemented("list_len")
    }

    /// Inclusive range; negative indexes count from the tail (`-1` is the last element).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn list_range(&self, _key: &str, _start: i64, _stop: i64) -> Result<Vec<Vec<u8>>> {
        not_implemented("list_range")
    }

    /// Keep only the inclusive range `start..=stop`.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the operation is unsupported
    async fn list_trim(&self, _key: &str, _start: i64, _stop: i64) -> Result<()> {
        not_implemented("list_trim")
    }

    /// Health check - verify backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Clear the whole database (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if operation is not implemented or fails
    async fn clear_all(&self) -> Result<()> {
        not_implemented("clear_all")
    }

    /// Client for another server alias.
    ///
    /// Backends without alias routing return themselves.
    fn route(&self, _server: &str) -> Self {
        self.clone()
    }
}

/// Resolve Redis-style inclusive `start..=stop` indexes against `len`.
///
/// Returns `None` for an empty range.
pub(crate) fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}
