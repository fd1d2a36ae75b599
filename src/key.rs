//! Cache key derivation.
//!
//! Keys are `hex(md5(family + ":" + lookup value))`. MD5 only shortens the key
//! and keeps it a fixed width; it is not used for security. The format must
//! stay byte-compatible with caches populated by earlier writers.

use crate::structure::RecordStructure;
use crate::value::Value;
use md5::{Digest, Md5};

/// Builder for cache keys.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Key for `value` in `family`.
    ///
    /// ```
    /// use cache_table::key::CacheKeyBuilder;
    ///
    /// let key = CacheKeyBuilder::build("users", "42");
    /// assert_eq!(key.len(), 32);
    /// assert_eq!(key, CacheKeyBuilder::build("users", "42"));
    /// ```
    pub fn build(family: &str, value: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(family.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Key for a typed lookup value.
    pub fn for_value(family: &str, value: &Value) -> String {
        Self::build(family, &value.to_key_string())
    }

    /// Key for a lookup value of `structure`'s cache family.
    pub fn for_structure(structure: &RecordStructure, value: &Value) -> String {
        Self::for_value(structure.cache_family(), value)
    }
}
