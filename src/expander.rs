//! Cache expander - batched read-through lookups and write-through persistence.
//!
//! [`CacheExpander::find`] resolves many lookup values with at most one
//! round-trip per store:
//!
//! ```text
//! values ──dedupe──▶ keys ──mget──▶ hits
//!                                   misses ──fetch_by_values──▶ rows ──mset──▶ cache
//!                                                                  │
//! result (request order, duplicates reinstated) ◀──────────────────┘
//! ```
//!
//! Cache failures never fail a read: an unreadable or unreachable entry is a
//! miss and a failed write-back is skipped. Relational failures propagate.

use crate::backend::CacheBackend;
use crate::error::{Error, Result};
use crate::key::CacheKeyBuilder;
use crate::observability::{CacheMetrics, NoOpMetrics, TtlPolicy};
use crate::record::{Model, Record};
use crate::repository::DataRepository;
use crate::serialization::{deserialize_record, serialize_record};
use crate::strategy::CacheStrategy;
use crate::structure::RecordStructure;
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for per-operation overrides.
///
/// # Example
///
/// ```ignore
/// use cache_table::OperationConfig;
/// use std::time::Duration;
///
/// // Flash sale: keep these entries for one minute only
/// let config = OperationConfig::default().with_ttl(Duration::from_secs(60));
/// expander.find_with_config(&table, &ids, CacheStrategy::Refresh, config).await?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct OperationConfig {
    /// Override the expander's `ttl_policy` for entries written by this call.
    pub ttl_override: Option<Duration>,
}

impl OperationConfig {
    /// Override TTL for this operation.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }
}

/// Result of a batched lookup.
///
/// One slot per requested value, in request order and with duplicates
/// reinstated. A value found in neither store has an empty slot, so "not
/// found" stays distinguishable from "not requested".
#[derive(Clone, Debug)]
pub struct Found<M> {
    slots: Vec<(Value, Option<M>)>,
}

impl<M> Found<M> {
    pub fn empty() -> Self {
        Found { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Entity in slot `index`.
    pub fn get(&self, index: usize) -> Option<&M> {
        self.slots.get(index).and_then(|(_, model)| model.as_ref())
    }

    /// Requested value of slot `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).map(|(value, _)| value)
    }

    /// Entity requested as `value`.
    pub fn by_value(&self, value: &Value) -> Option<&M> {
        let ident = value.to_key_string();
        self.slots
            .iter()
            .find(|(requested, _)| requested.to_key_string() == ident)
            .and_then(|(_, model)| model.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, Option<&M>)> + '_ {
        self.slots.iter().map(|(value, model)| (value, model.as_ref()))
    }

    /// Requested values with empty slots, in request order.
    pub fn missing(&self) -> Vec<&Value> {
        self.slots
            .iter()
            .filter(|(_, model)| model.is_none())
            .map(|(value, _)| value)
            .collect()
    }

    pub fn found_count(&self) -> usize {
        self.slots.iter().filter(|(_, model)| model.is_some()).count()
    }

    pub fn into_vec(self) -> Vec<Option<M>> {
        self.slots.into_iter().map(|(_, model)| model).collect()
    }

    pub fn into_pairs(self) -> Vec<(Value, Option<M>)> {
        self.slots
    }

    /// Entity of the first slot, for single-value requests.
    pub fn into_single(self) -> Option<M> {
        self.slots.into_iter().next().and_then(|(_, model)| model)
    }
}

/// One distinct requested value.
struct Lookup {
    ident: String,
    value: Value,
    key: String,
}

/// Core cache expander - handles batched lookup and write-through logic.
///
/// The expander is stateless apart from its backend client, metrics sink and
/// TTL policy; share it behind an `Arc` (see [`CacheService`](crate::CacheService)).
///
/// # Example
///
/// ```ignore
/// use cache_table::{CacheExpander, CacheStrategy, backend::InMemoryBackend};
///
/// let expander = CacheExpander::new(InMemoryBackend::new());
/// let found = expander
///     .find::<Record, _>(&table, &[7u64.into(), 42u64.into()], CacheStrategy::Refresh)
///     .await?;
/// ```
pub struct CacheExpander<B: CacheBackend> {
    backend: B,
    metrics: Box<dyn CacheMetrics>,
    pub(crate) ttl_policy: TtlPolicy,
}

impl<B: CacheBackend> CacheExpander<B> {
    /// Create new expander with given backend.
    pub fn new(backend: B) -> Self {
        CacheExpander {
            backend,
            metrics: Box::new(NoOpMetrics),
            ttl_policy: TtlPolicy::default(),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set custom TTL policy.
    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    /// Batched lookup by the structure's lookup field.
    ///
    /// # Errors
    ///
    /// Cache failures are absorbed. Returns `Err` when:
    /// - the relational fallback fails (`Error::TransientQueryError`,
    ///   `Error::ConnectionError`, `Error::QueryError`, ...)
    /// - a fetched row cannot form a model (`Model::from_record` or
    ///   `Model::after_hydrate` failed)
    pub async fn find<M, R>(
        &self,
        repository: &R,
        values: &[Value],
        strategy: CacheStrategy,
    ) -> Result<Found<M>>
    where
        M: Model,
        R: DataRepository,
    {
        self.find_with_config(repository, values, strategy, OperationConfig::default())
            .await
    }

    /// Single-value lookup; `None` when the value is found in neither store.
    ///
    /// # Errors
    /// Same as [`find`](Self::find).
    pub async fn find_one<M, R>(
        &self,
        repository: &R,
        value: impl Into<Value>,
        strategy: CacheStrategy,
    ) -> Result<Option<M>>
    where
        M: Model,
        R: DataRepository,
    {
        Ok(self
            .find(repository, &[value.into()], strategy)
            .await?
            .into_single())
    }

    /// Batched lookup with per-operation overrides.
    ///
    /// # Errors
    /// Same as [`find`](Self::find).
    pub async fn find_with_config<M, R>(
        &self,
        repository: &R,
        values: &[Value],
        strategy: CacheStrategy,
        config: OperationConfig,
    ) -> Result<Found<M>>
    where
        M: Model,
        R: DataRepository,
    {
        if values.is_empty() {
            return Ok(Found::empty());
        }
        let timer = Instant::now();
        let structure = Arc::clone(repository.structure());
        let family = structure.cache_family();
        let backend = self.backend.route(structure.cache_server());

        let mut seen = HashSet::new();
        let mut distinct = Vec::new();
        for value in values {
            let ident = value.to_key_string();
            if seen.insert(ident.clone()) {
                distinct.push(Lookup {
                    key: CacheKeyBuilder::build(family, &ident),
                    ident,
                    value: value.clone(),
                });
            }
        }

        debug!(
            "» find {} x{} ({} distinct, strategy: {})",
            family,
            values.len(),
            distinct.len(),
            strategy
        );

        let mut resolved: HashMap<String, M> = HashMap::new();
        match strategy {
            CacheStrategy::Fresh | CacheStrategy::Refresh => {
                self.read_cached(&backend, &structure, &distinct, &mut resolved)
                    .await;
                self.metrics.record_hits(family, resolved.len());
                self.metrics
                    .record_misses(family, distinct.len() - resolved.len());
            }
            CacheStrategy::Invalidate => self.invalidate(&backend, family, &distinct).await,
            CacheStrategy::Bypass => {}
        }

        if strategy.falls_back() {
            let missed: Vec<&Lookup> = distinct
                .iter()
                .filter(|lookup| !resolved.contains_key(&lookup.ident))
                .collect();
            if !missed.is_empty() {
                let ttl = config
                    .ttl_override
                    .or_else(|| self.ttl_policy.get_ttl(family));
                self.resolve_misses(&backend, repository, &missed, &mut resolved, ttl)
                    .await?;
            }
        }

        let slots = values
            .iter()
            .map(|value| (value.clone(), resolved.get(&value.to_key_string()).cloned()))
            .collect();

        self.metrics
            .record_find(family, values.len(), timer.elapsed());
        Ok(Found { slots })
    }

    /// One multi-get; hits go into `resolved`, anything else is a miss.
    async fn read_cached<M: Model>(
        &self,
        backend: &B,
        structure: &Arc<RecordStructure>,
        distinct: &[Lookup],
        resolved: &mut HashMap<String, M>,
    ) {
        let family = structure.cache_family();
        let keys: Vec<&str> = distinct.iter().map(|lookup| lookup.key.as_str()).collect();
        let entries = match backend.mget(&keys).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "⚠ Cache read for {} ({} keys) failed, treating as misses: {}",
                    family,
                    keys.len(),
                    e
                );
                self.metrics.record_error(family, "mget", &e.to_string());
                return;
            }
        };

        for (lookup, entry) in distinct.iter().zip(entries) {
            let Some(bytes) = entry else { continue };
            match deserialize_record(&bytes, structure).and_then(M::from_record) {
                Ok(model) => {
                    resolved.insert(lookup.ident.clone(), model);
                }
                Err(e) => debug!(
                    "✗ Unreadable cache entry {} for {} {}, treating as miss: {}",
                    lookup.key, family, lookup.ident, e
                ),
            }
        }
        debug!(
            "✓ find {}: {} hits, {} misses",
            family,
            resolved.len(),
            distinct.len() - resolved.len()
        );
    }

    async fn invalidate(&self, backend: &B, family: &str, distinct: &[Lookup]) {
        let keys: Vec<&str> = distinct.iter().map(|lookup| lookup.key.as_str()).collect();
        match backend.mdelete(&keys).await {
            Ok(()) => self.metrics.record_delete(family, keys.len()),
            Err(e) => {
                warn!(
                    "⚠ Cache invalidation for {} ({} keys) failed: {}",
                    family,
                    keys.len(),
                    e
                );
                self.metrics.record_error(family, "mdelete", &e.to_string());
            }
        }
    }

    /// One relational fetch for `missed`, then one multi-set for the rows found.
    async fn resolve_misses<M, R>(
        &self,
        backend: &B,
        repository: &R,
        missed: &[&Lookup],
        resolved: &mut HashMap<String, M>,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        M: Model,
        R: DataRepository,
    {
        let structure = Arc::clone(repository.structure());
        let family = structure.cache_family();
        let lookup_field = structure.lookup_field();
        let values: Vec<Value> = missed.iter().map(|lookup| lookup.value.clone()).collect();

        let records = match repository.fetch_by_values(lookup_field, &values).await {
            Ok(records) => records,
            Err(e) => {
                self.metrics.record_error(family, "fetch", &e.to_string());
                return Err(e);
            }
        };
        debug!(
            "✓ find {}: {} of {} misses found in the relational store",
            family,
            records.len(),
            missed.len()
        );

        let keys: HashMap<&str, &str> = missed
            .iter()
            .map(|lookup| (lookup.ident.as_str(), lookup.key.as_str()))
            .collect();
        let mut writes = Vec::with_capacity(records.len());

        for record in records {
            let Some(ident) = record.lookup_value().map(Value::to_key_string) else {
                continue;
            };
            let Some(key) = keys.get(ident.as_str()) else {
                continue;
            };
            if resolved.contains_key(&ident) {
                continue;
            }

            let mut model = M::from_record(record)?;
            model.after_hydrate()?;
            if is_cacheable(model.record()) {
                match serialize_record(model.record()) {
                    Ok(bytes) => writes.push((key.to_string(), bytes)),
                    Err(e) => debug!("✗ {} {} not cacheable: {}", family, ident, e),
                }
            }
            resolved.insert(ident, model);
        }

        self.write_back(backend, family, &writes, ttl).await;

        for lookup in missed {
            if !resolved.contains_key(&lookup.ident) {
                warn!(
                    "⚠ find {}: no record for {} = {}",
                    family, lookup_field, lookup.ident
                );
                self.metrics.record_not_found(family, &lookup.ident);
            }
        }
        Ok(())
    }

    /// One multi-set; failures are logged and skipped.
    async fn write_back(
        &self,
        backend: &B,
        family: &str,
        writes: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) {
        if writes.is_empty() {
            return;
        }
        let timer = Instant::now();
        match backend.mset(writes, ttl).await {
            Ok(()) => {
                debug!("✓ Repopulated {} {} entries", writes.len(), family);
                self.metrics
                    .record_set(family, writes.len(), timer.elapsed());
            }
            Err(e) => {
                warn!(
                    "⚠ Cache write-back for {} ({} keys) failed, skipping: {}",
                    family,
                    writes.len(),
                    e
                );
                self.metrics.record_error(family, "mset", &e.to_string());
            }
        }
    }

    /// Insert into the relational store, then write the cache entry.
    ///
    /// Nothing is cached when `ignore` skipped a duplicate.
    ///
    /// # Errors
    /// Relational errors propagate (`Error::DuplicateKey` without `ignore`).
    /// A failed cache write after a successful insert is logged, not returned.
    pub async fn insert<M, R>(&self, repository: &R, model: &mut M, ignore: bool) -> Result<bool>
    where
        M: Model,
        R: DataRepository,
    {
        let inserted = repository.insert(model.record_mut(), ignore).await?;
        if inserted {
            self.write_through(model.record(), "insert").await;
        }
        Ok(inserted)
    }

    /// Update the relational row, run the side-update hook, and overwrite the
    /// cache entry if either reported a change.
    ///
    /// With no changed fields and no `force`, and a hook reporting nothing,
    /// this performs no I/O.
    ///
    /// # Errors
    /// Relational and hook errors propagate; cache failures are logged.
    pub async fn update<M, R>(&self, repository: &R, model: &mut M, force: bool) -> Result<bool>
    where
        M: Model,
        R: DataRepository,
    {
        let mut changed = repository.update(model.record_mut(), force).await?;
        if model.cache_update().await? {
            changed = true;
        }
        if changed {
            self.write_through(model.record(), "update").await;
        }
        Ok(changed)
    }

    /// Delete the relational row, then the cache entry.
    ///
    /// The two steps are not atomic: a failure between them leaves a stale
    /// entry until it is overwritten or expires.
    ///
    /// # Errors
    /// Relational errors propagate; cache failures are logged.
    pub async fn delete<M, R>(&self, repository: &R, model: &mut M) -> Result<()>
    where
        M: Model,
        R: DataRepository,
    {
        let key = cache_key_of(model.record());
        repository.delete(model.record_mut()).await?;

        let structure = Arc::clone(model.record().structure());
        let family = structure.cache_family();
        if let Some(key) = key {
            match self
                .backend
                .route(structure.cache_server())
                .delete(&key)
                .await
            {
                Ok(()) => self.metrics.record_delete(family, 1),
                Err(e) => {
                    error!(
                        "✗ Cache delete for {} {} failed after the relational delete: {}",
                        family, key, e
                    );
                    self.metrics.record_error(family, "delete", &e.to_string());
                }
            }
        }
        Ok(())
    }

    /// Write `model` to the cache, without touching the relational store.
    ///
    /// A record holding a raw SQL expression has its entry deleted instead.
    ///
    /// # Errors
    /// - `Error::ValidationError` if the lookup field is unset
    /// - cache store errors
    pub async fn store<M: Model>(&self, model: &M) -> Result<()> {
        self.put_record(model.record(), None).await
    }

    /// Same as [`store`](Self::store) with a TTL override.
    ///
    /// # Errors
    /// Same as [`store`](Self::store).
    pub async fn store_with_config<M: Model>(&self, model: &M, config: OperationConfig) -> Result<()> {
        self.put_record(model.record(), config.ttl_override).await
    }

    /// Delete `model`'s cache entry.
    ///
    /// # Errors
    /// - `Error::ValidationError` if the lookup field is unset
    /// - cache store errors
    pub async fn remove<M: Model>(&self, model: &M) -> Result<()> {
        let record = model.record();
        let structure = record.structure();
        let key = require_cache_key(record)?;
        self.backend
            .route(structure.cache_server())
            .delete(&key)
            .await?;
        self.metrics.record_delete(structure.cache_family(), 1);
        Ok(())
    }

    async fn write_through(&self, record: &Record, op: &str) {
        if let Err(e) = self.put_record(record, None).await {
            let family = record.structure().cache_family();
            error!(
                "✗ Cache {} for {} failed after the relational write: {}",
                op, family, e
            );
            self.metrics.record_error(family, op, &e.to_string());
        }
    }

    async fn put_record(&self, record: &Record, ttl_override: Option<Duration>) -> Result<()> {
        let structure = record.structure();
        let family = structure.cache_family();
        let key = require_cache_key(record)?;
        let backend = self.backend.route(structure.cache_server());

        if !is_cacheable(record) {
            debug!("{} entry {} is not cacheable, dropping it", family, key);
            backend.delete(&key).await?;
            self.metrics.record_delete(family, 1);
            return Ok(());
        }

        let bytes = serialize_record(record)?;
        let ttl = ttl_override.or_else(|| self.ttl_policy.get_ttl(family));
        let timer = Instant::now();
        backend.set(&key, bytes, ttl).await?;
        self.metrics.record_set(family, 1, timer.elapsed());
        debug!("✓ Cached {} {}", family, key);
        Ok(())
    }

    /// Get backend reference (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get mutable backend reference (for advanced use).
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

/// Raw SQL expressions have no cacheable value.
fn is_cacheable(record: &Record) -> bool {
    record.fields().all(|(_, value)| !value.is_raw())
}

fn cache_key_of(record: &Record) -> Option<String> {
    record
        .lookup_value()
        .filter(|value| !value.is_null() && !value.is_raw())
        .map(|value| CacheKeyBuilder::for_structure(record.structure(), value))
}

fn require_cache_key(record: &Record) -> Result<String> {
    cache_key_of(record).ok_or_else(|| {
        let structure = record.structure();
        Error::ValidationError(format!(
            "{} record has no {} value to key its cache entry",
            structure.name(),
            structure.lookup_field()
        ))
    })
}
