//! In-memory key/value backend (default, thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! Holds plain values, hashes and lists; TTL expiry is checked on access.

use super::{resolve_range, CacheBackend};
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

enum Stored {
    Bytes(Vec<u8>),
    Hash(BTreeMap<String, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
}

impl Stored {
    fn kind(&self) -> &'static str {
        match self {
            Stored::Bytes(_) => "string",
            Stored::Hash(_) => "hash",
            Stored::List(_) => "list",
        }
    }

    fn size(&self) -> usize {
        match self {
            Stored::Bytes(b) => b.len(),
            Stored::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len()).sum(),
            Stored::List(l) => l.iter().map(Vec::len).sum(),
        }
    }
}

/// In-memory cache entry with optional expiration.
struct CacheEntry {
    data: Stored,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(data: Stored, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        CacheEntry { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

fn wrong_type(key: &str, expected: &str, found: &Stored) -> Error {
    Error::BackendError(format!(
        "WRONGTYPE key {} holds a {}, not a {}",
        key,
        found.kind(),
        expected
    ))
}

/// Thread-safe async in-memory key/value backend.
///
/// Uses DashMap for lock-free concurrent access with fine-grained per-key sharding.
/// No async locks required - operations are non-blocking.
///
/// # Example
///
/// ```no_run
/// use cache_table::backend::{InMemoryBackend, CacheBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("key1", b"value".to_vec(), None).await?;
///     assert!(backend.get("key1").await?.is_some());
///
///     backend.set("key2", b"expires".to_vec(), Some(Duration::from_secs(300))).await?;
///     backend.list_push("queue", b"job".to_vec()).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryBackend {
    /// Create a new in-memory cache backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
        }
    }

    /// Get the current number of entries in cache.
    pub async fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Get memory statistics.
    pub async fn stats(&self) -> CacheStats {
        let total_bytes: usize = self.store.iter().map(|entry| entry.data.size()).sum();
        let expired_count = self.store.iter().filter(|entry| entry.is_expired()).count();

        CacheStats {
            total_entries: self.store.len(),
            expired_entries: expired_count,
            total_bytes,
        }
    }

    /// Print cache statistics to debug log.
    pub async fn log_stats(&self) {
        let stats = self.stats().await;
        debug!(
            "Cache Stats: {} entries ({} expired), {} bytes",
            stats.total_entries, stats.expired_entries, stats.total_bytes
        );
    }

    /// Live entry for `key`, with expired entries dropped first.
    fn live_entry(&self, key: &str) -> Entry<'_, String, CacheEntry> {
        self.store.remove_if(key, |_, entry| entry.is_expired());
        self.store.entry(key.to_string())
    }

    fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.store.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.data {
                Stored::Bytes(b) => Ok(Some(b.clone())),
                other => Err(wrong_type(key, "string", other)),
            },
            _ => Ok(None),
        }
    }

    fn with_hash<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut BTreeMap<String, Vec<u8>>) -> Result<T>,
    ) -> Result<T> {
        let mut entry = self
            .live_entry(key)
            .or_insert_with(|| CacheEntry::new(Stored::Hash(BTreeMap::new()), None));
        match &mut entry.data {
            Stored::Hash(h) => f(h),
            other => Err(wrong_type(key, "hash", other)),
        }
    }

    fn with_list<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut VecDeque<Vec<u8>>) -> Result<T>,
    ) -> Result<T> {
        let mut entry = self
            .live_entry(key)
            .or_insert_with(|| CacheEntry::new(Stored::List(VecDeque::new()), None));
        let result = match &mut entry.data {
            Stored::List(l) => f(l),
            other => Err(wrong_type(key, "list", other)),
        };
        drop(entry);
        self.store
            .remove_if(key, |_, e| matches!(&e.data, Stored::List(l) if l.is_empty()));
        result
    }

    fn read_list<T>(&self, key: &str, f: impl FnOnce(&VecDeque<Vec<u8>>) -> T) -> Result<T> {
        match self.store.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.data {
                Stored::List(l) => Ok(f(l)),
                other => Err(wrong_type(key, "list", other)),
            },
            _ => Ok(f(&VecDeque::new())),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.read_bytes(key)?;
        if value.is_some() {
            debug!("✓ InMemory GET {} -> HIT", key);
        } else {
            self.store.remove_if(key, |_, entry| entry.is_expired());
            debug!("✓ InMemory GET {} -> MISS", key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(Stored::Bytes(value), ttl);
        self.store.insert(key.to_string(), entry);

        if let Some(d) = ttl {
            debug!("✓ InMemory SET {} (TTL: {:?})", key, d);
        } else {
            debug!("✓ InMemory SET {}", key);
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Some(entry) = self.store.get(key) {
            return Ok(!entry.is_expired());
        }

        Ok(false)
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let results = keys
            .iter()
            .map(|k| self.read_bytes(k))
            .collect::<Result<Vec<_>>>()?;

        debug!("✓ InMemory MGET {} keys", keys.len());
        Ok(results)
    }

    async fn mset(&self, items: &[(String, Vec<u8>)], ttl: Option<Duration>) -> Result<()> {
        for (key, value) in items {
            self.store
                .insert(key.clone(), CacheEntry::new(Stored::Bytes(value.clone()), ttl));
        }

        debug!("✓ InMemory MSET {} keys", items.len());
        Ok(())
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.store.remove(*key);
        }

        debug!("✓ InMemory MDELETE {} keys", keys.len());
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self.store.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entry = self
            .live_entry(key)
            .or_insert_with(|| CacheEntry::new(Stored::Bytes(b"0".to_vec()), None));
        let current = match &entry.data {
            Stored::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    Error::BackendError(format!("value at {} is not an integer", key))
                })?,
            other => return Err(wrong_type(key, "string", other)),
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| Error::BackendError(format!("increment of {} overflows", key)))?;
        entry.data = Stored::Bytes(next.to_string().into_bytes());
        Ok(next)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        match self.store.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.data {
                Stored::Hash(h) => Ok(h.get(field).cloned()),
                other => Err(wrong_type(key, "hash", other)),
            },
            _ => Ok(None),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        match self.store.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.data {
                Stored::Hash(h) => Ok(h.clone()),
                other => Err(wrong_type(key, "hash", other)),
            },
            _ => Ok(BTreeMap::new()),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> Result<()> {
        self.with_hash(key, |h| {
            h.insert(field.to_string(), value);
            Ok(())
        })
    }

    async fn hash_set_many(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()> {
        self.with_hash(key, |h| {
            h.extend(fields.iter().cloned());
            Ok(())
        })
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.with_hash(key, |h| {
            let current = match h.get(field) {
                Some(bytes) => std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| {
                        Error::BackendError(format!("hash field {} is not an integer", field))
                    })?,
                None => 0,
            };
            let next = current.checked_add(delta).ok_or_else(|| {
                Error::BackendError(format!("increment of {} overflows", field))
            })?;
            h.insert(field.to_string(), next.to_string().into_bytes());
            Ok(next)
        })
    }

    async fn list_push(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        self.with_list(key, |l| {
            l.push_back(value);
            Ok(l.len() as u64)
        })
    }

    async fn list_unshift(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        self.with_list(key, |l| {
            l.push_front(value);
            Ok(l.len() as u64)
        })
    }

    async fn list_pop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_list(key, |l| Ok(l.pop_back()))
    }

    async fn list_shift(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_list(key, |l| Ok(l.pop_front()))
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        self.read_list(key, |l| l.len() as u64)
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        self.read_list(key, |l| match resolve_range(l.len(), start, stop) {
            Some((from, to)) => l.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.with_list(key, |l| {
            match resolve_range(l.len(), start, stop) {
                Some((from, to)) => {
                    l.truncate(to + 1);
                    l.drain(..from);
                }
                None => l.clear(),
            }
            Ok(())
        })
    }

    async fn health_check(&self) -> Result<bool> {
        // In-memory backend is always healthy
        Ok(true)
    }

    async fn clear_all(&self) -> Result<()> {
        self.store.clear();
        warn!("⚠ InMemory CLEAR_ALL executed - all cache cleared!");
        Ok(())
    }
}

/// Cache statistics.
#[derive(Clone, Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_bytes: usize,
}
