//! Records and the `Model` trait.
//!
//! A [`Record`] is the in-memory projection of one row or cache entry: typed
//! values keyed by field name, the set of fields changed since load, and a
//! shared reference to its [`RecordStructure`].

use crate::error::{Error, Result};
use crate::structure::RecordStructure;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

/// One logical row.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    structure: Arc<RecordStructure>,
    values: BTreeMap<String, Value>,
    changed: BTreeSet<String>,
}

impl Record {
    /// Empty record with no changes.
    pub fn new(structure: Arc<RecordStructure>) -> Self {
        Record {
            structure,
            values: BTreeMap::new(),
            changed: BTreeSet::new(),
        }
    }

    /// Hydrate from stored values. Values are coerced, nothing is marked changed.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for a field the structure does not know.
    pub fn from_values<I, K>(structure: Arc<RecordStructure>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut record = Record::new(structure);
        for (field, value) in values {
            let field = field.into();
            let value = record.structure.coerce(&field, value)?;
            record.values.insert(field, value);
        }
        Ok(record)
    }

    pub fn structure(&self) -> &Arc<RecordStructure> {
        &self.structure
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Value of `field`, or `default` when unset.
    pub fn get_or(&self, field: &str, default: Value) -> Value {
        self.values.get(field).cloned().unwrap_or(default)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Set a field, marking it changed when the value differs or was unset.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an unknown field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<&mut Self> {
        if !self.structure.has_field(field) {
            return Err(Error::ConfigError(format!(
                "Unknown field '{}' in '{}'",
                field,
                self.structure.name()
            )));
        }
        let value = value.into();
        if self.values.get(field) != Some(&value) {
            self.values.insert(field.to_string(), value);
            self.changed.insert(field.to_string());
        }
        Ok(self)
    }

    /// Remove a field's value. The field is not marked changed.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.changed.remove(field);
        self.values.remove(field)
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = &str> + '_ {
        self.changed.iter().map(String::as_str)
    }

    pub fn is_changed(&self, field: &str) -> bool {
        self.changed.contains(field)
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.changed.clear();
    }

    /// Value of the structure's lookup field.
    pub fn lookup_value(&self) -> Option<&Value> {
        self.values.get(self.structure.lookup_field())
    }

    pub fn primary_value(&self) -> Option<&Value> {
        self.values.get(self.structure.primary())
    }

    /// Set values in structure field order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.structure
            .field_names()
            .filter_map(move |name| self.values.get(name).map(|value| (name, value)))
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.values.clone()
    }

    /// Values of one field across records, skipping records where it is unset.
    pub fn column(records: &[Record], field: &str) -> Vec<Value> {
        records
            .iter()
            .filter_map(|record| record.get(field).cloned())
            .collect()
    }

    /// `key_field` → `value_field` map across records.
    pub fn hash(records: &[Record], key_field: &str, value_field: &str) -> BTreeMap<String, Value> {
        records
            .iter()
            .filter_map(|record| {
                let key = record.get(key_field)?.to_key_string();
                Some((key, record.get_or(value_field, Value::Null)))
            })
            .collect()
    }
}

/// A typed entity backed by a [`Record`].
///
/// Implement this for application types so the expander can materialise them
/// without runtime type lookup. [`Record`] implements it for plain use.
pub trait Model: Clone + Send + Sync + 'static {
    /// Wrap a hydrated record. Runs for relational rows and cache hits alike.
    ///
    /// # Errors
    /// Returns `Err` if the record cannot form a valid entity.
    fn from_record(record: Record) -> Result<Self>;

    fn record(&self) -> &Record;

    fn record_mut(&mut self) -> &mut Record;

    /// Post-hydration hook for rows freshly read from the relational store.
    ///
    /// Runs before the entity is written to the cache.
    ///
    /// # Errors
    /// Errors abort the read that produced the row.
    fn after_hydrate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Side-update hook run on every `update`; `true` forces a cache overwrite.
    fn cache_update(&mut self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(false) }
    }
}

impl Model for Record {
    fn from_record(record: Record) -> Result<Self> {
        Ok(record)
    }

    fn record(&self) -> &Record {
        self
    }

    fn record_mut(&mut self) -> &mut Record {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Arc<RecordStructure> {
        Arc::new(
            RecordStructure::new(
                "users",
                &[("id", "uint"), ("email", "string"), ("active", "bool")],
                "id",
                true,
            )
            .expect("Failed to build structure"),
        )
    }

    #[test]
    fn test_from_values_coerces_without_changes() {
        let record = Record::from_values(
            users(),
            [("id", Value::Int(7)), ("active", Value::Int(1))],
        )
        .expect("Failed to hydrate");

        assert_eq!(record.get("id"), Some(&Value::UInt(7)));
        assert_eq!(record.get("active"), Some(&Value::Bool(true)));
        assert!(!record.has_changes());
        assert_eq!(record.primary_value(), Some(&Value::UInt(7)));
    }

    #[test]
    fn test_set_tracks_real_changes() {
        let mut record =
            Record::from_values(users(), [("id", Value::UInt(7)), ("email", "a@x.com".into())])
                .expect("Failed to hydrate");

        record.set("email", "a@x.com").expect("Failed to set");
        assert!(!record.has_changes());

        record.set("email", "b@x.com").expect("Failed to set");
        record.set("active", false).expect("Failed to set");
        assert_eq!(record.changed_fields().collect::<Vec<_>>(), vec!["active", "email"]);

        record.clear_changes();
        assert!(!record.has_changes());

        assert!(matches!(record.set("nope", 1), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_get_or_and_fields_order() {
        let record = Record::from_values(
            users(),
            [("active", Value::Bool(true)), ("id", Value::UInt(1))],
        )
        .expect("Failed to hydrate");

        assert_eq!(record.get_or("email", Value::from("none")), Value::from("none"));
        let order: Vec<&str> = record.fields().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["id", "active"]);
    }

    #[test]
    fn test_column_and_hash() {
        let structure = users();
        let records: Vec<Record> = [(1u64, "a@x.com"), (2, "b@x.com")]
            .iter()
            .map(|(id, email)| {
                Record::from_values(
                    Arc::clone(&structure),
                    [("id", Value::UInt(*id)), ("email", Value::from(*email))],
                )
                .expect("Failed to hydrate")
            })
            .collect();

        assert_eq!(
            Record::column(&records, "email"),
            vec![Value::from("a@x.com"), Value::from("b@x.com")]
        );
        let map = Record::hash(&records, "id", "email");
        assert_eq!(map.get("2"), Some(&Value::from("b@x.com")));
    }

    #[tokio::test]
    async fn test_record_model_defaults() {
        let mut record = Record::new(users());
        assert!(!record.cache_update().await.expect("hook"));
        record.after_hydrate().expect("hook");
    }
}
