//! High-level cache service for web applications.
//!
//! Provides a convenient wrapper around CacheExpander with Arc for easy sharing.

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::expander::{CacheExpander, Found, OperationConfig};
use crate::observability::{CacheMetrics, TtlPolicy};
use crate::record::Model;
use crate::repository::DataRepository;
use crate::strategy::CacheStrategy;
use crate::value::Value;
use std::sync::Arc;

/// High-level cache service for web applications.
///
/// Wraps `CacheExpander` in `Arc` for easy sharing across tasks. The
/// expander only takes `&self`, and backends keep their state behind shared
/// handles, so no extra `Mutex` is needed.
///
/// # Example
///
/// ```ignore
/// use cache_table::{CacheService, CacheStrategy, Record, Table, backend::InMemoryBackend};
///
/// let cache = CacheService::new(InMemoryBackend::new());
///
/// pub struct UserService {
///     cache: CacheService<InMemoryBackend>,
///     users: Table<MySqlConnector>,
/// }
///
/// impl UserService {
///     pub async fn get_many(&self, ids: &[Value]) -> Result<Found<Record>> {
///         self.cache.find(&self.users, ids, CacheStrategy::Refresh).await
///     }
/// }
/// ```
#[derive(Clone)]
pub struct CacheService<B: CacheBackend> {
    expander: Arc<CacheExpander<B>>,
}

impl<B: CacheBackend> CacheService<B> {
    /// Create a new cache service with the given backend.
    pub fn new(backend: B) -> Self {
        CacheService {
            expander: Arc::new(CacheExpander::new(backend)),
        }
    }

    /// Create a new cache service with custom metrics.
    pub fn with_metrics(backend: B, metrics: Box<dyn CacheMetrics>) -> Self {
        CacheService {
            expander: Arc::new(CacheExpander::new(backend).with_metrics(metrics)),
        }
    }

    /// Wrap a fully configured expander.
    pub fn from_expander(expander: CacheExpander<B>) -> Self {
        CacheService {
            expander: Arc::new(expander),
        }
    }

    /// Create a new cache service with a TTL policy.
    pub fn with_ttl_policy(backend: B, policy: TtlPolicy) -> Self {
        Self::from_expander(CacheExpander::new(backend).with_ttl_policy(policy))
    }

    /// Batched lookup, see [`CacheExpander::find`].
    ///
    /// # Errors
    ///
    /// Cache failures are absorbed. Returns `Err` when:
    /// - the relational fallback fails
    /// - a fetched row cannot form a model
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
        self.expander.find(repository, values, strategy).await
    }

    /// Batched lookup with per-operation overrides.
    ///
    /// ```ignore
    /// let config = OperationConfig::default().with_ttl(Duration::from_secs(300));
    /// cache.find_with_config::<Record, _>(&users, &ids, CacheStrategy::Refresh, config).await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Same error cases as `find()`.
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
        self.expander
            .find_with_config(repository, values, strategy, config)
            .await
    }

    /// Single-value lookup.
    ///
    /// # Errors
    ///
    /// Same error cases as `find()`.
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
        self.expander.find_one(repository, value, strategy).await
    }

    /// Insert, then cache. See [`CacheExpander::insert`].
    ///
    /// # Errors
    ///
    /// Relational errors only.
    pub async fn insert<M, R>(&self, repository: &R, model: &mut M, ignore: bool) -> Result<bool>
    where
        M: Model,
        R: DataRepository,
    {
        self.expander.insert(repository, model, ignore).await
    }

    /// Update, then overwrite the cache entry. See [`CacheExpander::update`].
    ///
    /// # Errors
    ///
    /// Relational and side-update hook errors.
    pub async fn update<M, R>(&self, repository: &R, model: &mut M, force: bool) -> Result<bool>
    where
        M: Model,
        R: DataRepository,
    {
        self.expander.update(repository, model, force).await
    }

    /// Delete the row, then the cache entry.
    ///
    /// # Errors
    ///
    /// Relational errors only.
    pub async fn delete<M, R>(&self, repository: &R, model: &mut M) -> Result<()>
    where
        M: Model,
        R: DataRepository,
    {
        self.expander.delete(repository, model).await
    }

    /// Write `model` to the cache only.
    ///
    /// # Errors
    ///
    /// Validation and cache errors.
    pub async fn store<M: Model>(&self, model: &M) -> Result<()> {
        self.expander.store(model).await
    }

    /// Delete `model`'s cache entry only.
    ///
    /// # Errors
    ///
    /// Validation and cache errors.
    pub async fn remove<M: Model>(&self, model: &M) -> Result<()> {
        self.expander.remove(model).await
    }

    /// Get a reference to the underlying expander.
    ///
    /// Use this if you need direct access to expander methods.
    pub fn expander(&self) -> &CacheExpander<B> {
        &self.expander
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::record::Record;
    use crate::repository::InMemoryRepository;
    use crate::structure::RecordStructure;
    use std::time::Duration;

    fn repository() -> InMemoryRepository {
        let structure = RecordStructure::new(
            "settings",
            &[("name", "string"), ("value", "string")],
            "name",
            false,
        )
        .expect("Failed to build structure");
        let repo = InMemoryRepository::new(Arc::new(structure));
        for i in 0..5 {
            repo.put([
                ("name", Value::from(format!("{}", i))),
                ("value", Value::from(format!("value_{}", i))),
            ])
            .expect("Failed to seed");
        }
        repo
    }

    #[test]
    fn test_cache_service_creation() {
        let backend = InMemoryBackend::new();
        let _service = CacheService::new(backend);
    }

    #[tokio::test]
    async fn test_cache_service_find_one() {
        let service = CacheService::new(InMemoryBackend::new());
        let repo = repository();

        let setting = service
            .find_one::<Record, _>(&repo, "1", CacheStrategy::Refresh)
            .await
            .expect("Failed to find")
            .expect("Setting not found");

        assert_eq!(setting.get("value"), Some(&Value::from("value_1")));
    }

    #[test]
    fn test_cache_service_clone() {
        let backend = InMemoryBackend::new();
        let service1 = CacheService::new(backend);
        let service2 = service1.clone();

        // Both services share the same expander
        assert!(Arc::ptr_eq(&service1.expander, &service2.expander));
    }

    #[tokio::test]
    async fn test_cache_service_thread_safety() {
        let backend = InMemoryBackend::new();
        let service = CacheService::new(backend.clone());
        let repo = Arc::new(repository());

        let mut handles = vec![];

        for i in 0..5 {
            let service_clone = service.clone();
            let repo = Arc::clone(&repo);
            let handle = tokio::spawn(async move {
                let found = service_clone
                    .find::<Record, _>(&*repo, &[Value::from(format!("{}", i))], CacheStrategy::Refresh)
                    .await
                    .expect("Failed to find");

                assert_eq!(found.found_count(), 1);
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.await.expect("Task failed");
        }
        assert_eq!(backend.len().await, 5);
    }

    #[tokio::test]
    async fn test_cache_service_find_with_config() {
        let service = CacheService::new(InMemoryBackend::new());
        let repo = repository();

        let config = OperationConfig::default().with_ttl(Duration::from_secs(300));

        let found = service
            .find_with_config::<Record, _>(
                &repo,
                &[Value::from("1"), Value::from("9")],
                CacheStrategy::Refresh,
                config,
            )
            .await
            .expect("Failed to find with config");

        assert_eq!(found.found_count(), 1);
        assert_eq!(found.missing(), vec![&Value::from("9")]);
    }

    #[tokio::test]
    async fn test_cache_service_write_path() {
        let backend = InMemoryBackend::new();
        let service = CacheService::new(backend.clone());
        let repo = repository();

        let mut setting = Record::from_values(
            Arc::clone(repo.structure()),
            [("name", Value::from("theme")), ("value", Value::from("dark"))],
        )
        .expect("Failed to hydrate");

        assert!(service
            .insert(&repo, &mut setting, false)
            .await
            .expect("Failed to insert"));
        assert_eq!(backend.len().await, 1);

        service
            .delete(&repo, &mut setting)
            .await
            .expect("Failed to delete");
        assert!(backend.is_empty().await);
        assert_eq!(repo.len(), 5);
    }
}
