//! Data repository trait for abstracting relational access.
//!
//! The `DataRepository` trait is the seam between the cache expander and the
//! relational store: the expander only needs a batched fetch by lookup field
//! and the three write statements. [`Table`](crate::table::Table) implements it
//! over a [`RelationalStore`](crate::sql::RelationalStore);
//! [`InMemoryRepository`] implements it over a map for tests.
//!
//! # Error Handling
//!
//! Implementations return `Err` for:
//! - Connection failures and exhausted retries
//! - Duplicate keys (`Error::DuplicateKey`)
//! - Records that cannot be written (missing primary value)

use crate::error::{Error, Result};
use crate::record::Record;
use crate::structure::RecordStructure;
use crate::value::Value;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Trait for relational repository implementations.
///
/// One repository serves one [`RecordStructure`].
#[allow(async_fn_in_trait)]
pub trait DataRepository: Send + Sync {
    /// Structure of the records this repository reads and writes.
    fn structure(&self) -> &Arc<RecordStructure>;

    /// Fetch every record whose `field` equals one of `values`, in one round-trip.
    ///
    /// Values with no matching row are simply absent from the result.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the statement fails
    async fn fetch_by_values(&self, field: &str, values: &[Value]) -> Result<Vec<Record>>;

    /// Insert `record`, storing a generated primary value back into it.
    ///
    /// With `ignore`, a duplicate key is skipped instead of failing. Returns
    /// false when nothing was inserted.
    ///
    /// # Errors
    /// Returns `Error::DuplicateKey` on a duplicate without `ignore`
    async fn insert(&self, record: &mut Record, ignore: bool) -> Result<bool>;

    /// Write the changed fields (all fields with `force`).
    ///
    /// Returns true if a statement was issued; no changes and no `force`
    /// means no I/O and `false`.
    ///
    /// # Errors
    /// Returns `Error::ValidationError` if the record has no primary value
    async fn update(&self, record: &mut Record, force: bool) -> Result<bool>;

    /// Delete the row by primary value and drop the primary from `record`.
    ///
    /// # Errors
    /// Returns `Error::ValidationError` if the record has no primary value
    async fn delete(&self, record: &mut Record) -> Result<()>;
}

/// Primary value of `record`, required for update and delete.
pub(crate) fn require_primary<'a>(record: &'a Record, op: &str) -> Result<&'a Value> {
    let structure = record.structure();
    match record.primary_value() {
        Some(value) if !value.is_null() && !value.to_key_string().is_empty() => Ok(value),
        _ => Err(Error::ValidationError(format!(
            "Can not {} {} record with no primary key",
            op,
            structure.name()
        ))),
    }
}

// ============================================================================
// In-Memory Test Repository
// ============================================================================

/// Map-backed repository for tests.
///
/// Rows are keyed by their primary value. Generated identifiers count up from
/// 1. Fetch and write calls are counted so tests can assert round-trips, and
/// the next call can be made to fail with [`fail_next`](Self::fail_next).
///
/// # Example
///
/// ```ignore
/// let repo = InMemoryRepository::new(users.clone());
/// repo.put([("id", Value::UInt(42)), ("email", "b@x.com".into())])?;
///
/// let rows = repo.fetch_by_values("id", &[Value::UInt(42)]).await?;
/// assert_eq!(rows.len(), 1);
/// assert_eq!(repo.fetch_count(), 1);
/// ```
pub struct InMemoryRepository {
    structure: Arc<RecordStructure>,
    rows: DashMap<String, BTreeMap<String, Value>>,
    next_id: AtomicU64,
    fetches: AtomicU32,
    writes: AtomicU32,
    failure: Mutex<Option<Error>>,
}

impl InMemoryRepository {
    pub fn new(structure: Arc<RecordStructure>) -> Self {
        InMemoryRepository {
            structure,
            rows: DashMap::new(),
            next_id: AtomicU64::new(1),
            fetches: AtomicU32::new(0),
            writes: AtomicU32::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Seed a row directly, bypassing the counters.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an unknown field, or
    /// `Error::ValidationError` without a primary value
    pub fn put<I, K>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let record = Record::from_values(Arc::clone(&self.structure), values)?;
        let primary = require_primary(&record, "seed")?.to_key_string();
        self.bump_next_id(record.primary_value());
        self.rows.insert(primary, record.to_map());
        Ok(())
    }

    /// Stored row by primary value.
    pub fn row(&self, primary: &Value) -> Option<Record> {
        let values = self.rows.get(&primary.to_key_string())?.value().clone();
        Record::from_values(Arc::clone(&self.structure), values).ok()
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: Error) {
        *self.failure_slot() = Some(error);
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of insert, update and delete statements run.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&self) {
        self.rows.clear();
    }

    fn failure_slot(&self) -> std::sync::MutexGuard<'_, Option<Error>> {
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure_slot().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn bump_next_id(&self, primary: Option<&Value>) {
        if let Some(id) = primary.and_then(Value::as_u64) {
            self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);
        }
    }
}

impl DataRepository for InMemoryRepository {
    fn structure(&self) -> &Arc<RecordStructure> {
        &self.structure
    }

    async fn fetch_by_values(&self, field: &str, values: &[Value]) -> Result<Vec<Record>> {
        self.structure.field_type(field)?;
        self.check_failure()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let wanted: HashSet<String> = values.iter().map(Value::to_key_string).collect();
        let matching: Vec<BTreeMap<String, Value>> = self
            .rows
            .iter()
            .filter(|row| {
                row.value()
                    .get(field)
                    .is_some_and(|value| wanted.contains(&value.to_key_string()))
            })
            .map(|row| row.value().clone())
            .collect();

        matching
            .into_iter()
            .map(|values| Record::from_values(Arc::clone(&self.structure), values))
            .collect()
    }

    async fn insert(&self, record: &mut Record, ignore: bool) -> Result<bool> {
        self.check_failure()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let primary_field = self.structure.primary().to_string();
        let missing = record.primary_value().map_or(true, Value::is_null);
        if self.structure.auto_generated() && missing {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            record.set(&primary_field, Value::UInt(id))?;
        }
        let primary = require_primary(record, "insert")?.clone();
        let key = primary.to_key_string();

        if self.rows.contains_key(&key) {
            if ignore {
                return Ok(false);
            }
            return Err(Error::DuplicateKey {
                key_name: "PRIMARY".to_string(),
                key_value: key.clone(),
                message: format!("Duplicate entry '{}' for key 'PRIMARY'", key),
            });
        }

        self.bump_next_id(Some(&primary));
        self.rows.insert(key, record.to_map());
        record.clear_changes();
        Ok(true)
    }

    async fn update(&self, record: &mut Record, force: bool) -> Result<bool> {
        if !force && !record.has_changes() {
            return Ok(false);
        }
        let key = require_primary(record, "update")?.to_key_string();
        self.check_failure()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let primary_field = self.structure.primary();
        if let Some(mut row) = self.rows.get_mut(&key) {
            for (field, value) in record.fields() {
                if field != primary_field && (force || record.is_changed(field)) {
                    row.insert(field.to_string(), value.clone());
                }
            }
        }
        record.clear_changes();
        Ok(true)
    }

    async fn delete(&self, record: &mut Record) -> Result<()> {
        let key = require_primary(record, "delete")?.to_key_string();
        self.check_failure()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        self.rows.remove(&key);
        record.remove(self.structure.primary());
        record.clear_changes();
        Ok(())
    }
}
