//! # cache-table
//!
//! Read-through, batched caching of relational records in a key/value store.
//!
//! ## Features
//!
//! - **Batched:** one multi-get, at most one relational fetch and one
//!   multi-set per [`CacheExpander::find`], however many values are requested
//! - **Ordered:** results come back in request order with duplicates
//!   reinstated and explicit empty slots for values found nowhere
//! - **Degrading:** cache failures turn into misses, never into errors
//! - **Stable keys:** `md5(family + ":" + value)`, compatible with caches
//!   populated by other writers
//! - **Managed connections:** lazy connect, bounded retry, periodic
//!   re-authentication, one connection per `(server, role)`
//! - **Backend Agnostic:** in-memory, Redis (`redis` feature) and MySQL
//!   (`mysql` feature), or your own [`CacheBackend`] / [`DataRepository`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use cache_table::{
//!     CacheService, CacheStrategy, Record, RecordStructure, Table, Value,
//!     backend::InMemoryBackend,
//!     config::{ConnectionPolicy, StaticConfig},
//!     sql::MySqlConnector,
//! };
//! use std::sync::Arc;
//!
//! // 1. Describe the table
//! let users = Arc::new(RecordStructure::new(
//!     "users",
//!     &[("id", "uint"), ("email", "string"), ("active", "bool")],
//!     "id",
//!     true,
//! )?);
//!
//! // 2. Point it at a relational store
//! let store = MySqlConnector::store(config, ConnectionPolicy::default());
//! let table = Table::new(store, users);
//!
//! // 3. Create the cache (CacheService is Clone for sharing across tasks)
//! let cache = CacheService::new(InMemoryBackend::new());
//!
//! // 4. Batched read-through
//! let found = cache
//!     .find::<Record, _>(&table, &[Value::from(7u64), Value::from(42u64)], CacheStrategy::Refresh)
//!     .await?;
//! for (id, user) in found.iter() {
//!     println!("{} => {:?}", id, user.map(|u| u.get("email")));
//! }
//! ```
//!
//! ### Entities
//!
//! Implement [`Model`] to get application types back instead of bare
//! records. `after_hydrate` runs on rows read from the relational store and
//! `cache_update` lets an entity force a cache overwrite on `update`.

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod expander;
pub mod key;
pub mod observability;
pub mod record;
pub mod repository;
pub mod serialization;
pub mod service;
pub mod sql;
pub mod strategy;
pub mod structure;
pub mod table;
pub mod value;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use error::{Error, Result};
pub use expander::{CacheExpander, Found, OperationConfig};
pub use key::CacheKeyBuilder;
pub use record::{Model, Record};
pub use repository::DataRepository;
pub use service::CacheService;
pub use sql::RelationalStore;
pub use strategy::CacheStrategy;
pub use structure::{FieldType, RecordStructure};
pub use table::Table;
pub use value::Value;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
