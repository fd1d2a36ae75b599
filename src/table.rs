//! Uncached relational persistence for one [`RecordStructure`].
//!
//! `Table` generates MySQL-dialect statements from the structure (backtick
//! quoted names, literals through [`RecordStructure::escape_value`]) and runs
//! them on a [`RelationalStore`]. It is the relational half the expander falls
//! back to, and can be used directly when caching is not wanted.

use crate::connection::Connector;
use crate::error::Result;
use crate::record::Record;
use crate::repository::{require_primary, DataRepository};
use crate::sql::{RelationalStore, SqlConnection};
use crate::structure::RecordStructure;
use crate::value::Value;
use std::sync::Arc;

fn quote(name: &str) -> String {
    format!("`{}`", name)
}

/// Relational table of one structure.
pub struct Table<C: Connector> {
    store: RelationalStore<C>,
    structure: Arc<RecordStructure>,
}

impl<C: Connector> Clone for Table<C> {
    fn clone(&self) -> Self {
        Table {
            store: self.store.clone(),
            structure: Arc::clone(&self.structure),
        }
    }
}

impl<C> Table<C>
where
    C: Connector,
    C::Connection: SqlConnection,
{
    pub fn new(store: RelationalStore<C>, structure: Arc<RecordStructure>) -> Self {
        Table { store, structure }
    }

    pub fn store(&self) -> &RelationalStore<C> {
        &self.store
    }

    /// `SELECT <fields> FROM <table> WHERE <field> IN (<values>)`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an unknown field.
    pub fn select_sql(&self, field: &str, values: &[Value]) -> Result<String> {
        let columns: Vec<String> = self.structure.field_names().map(quote).collect();
        let literals = values
            .iter()
            .map(|value| self.structure.escape_value(field, value))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "SELECT {} FROM {} WHERE {} IN ({})",
            columns.join(", "),
            quote(self.structure.name()),
            quote(field),
            literals.join(",")
        ))
    }

    /// `INSERT [IGNORE] INTO …`, skipping a generated primary and unset fields.
    ///
    /// # Errors
    /// Returns `Err` if a value cannot be escaped.
    pub fn insert_sql(&self, record: &Record, ignore: bool) -> Result<String> {
        let structure = &self.structure;
        let mut columns = Vec::new();
        let mut literals = Vec::new();
        for (field, value) in record.fields() {
            if value.is_null() || (field == structure.primary() && structure.auto_generated()) {
                continue;
            }
            columns.push(quote(field));
            literals.push(structure.escape_value(field, value)?);
        }
        Ok(format!(
            "INSERT {}INTO {} ({}) VALUES ({})",
            if ignore { "IGNORE " } else { "" },
            quote(structure.name()),
            columns.join(","),
            literals.join(",")
        ))
    }

    /// `UPDATE … SET` the changed fields (every set field with `force`).
    ///
    /// `None` when there is nothing to write.
    ///
    /// # Errors
    /// Returns `Error::ValidationError` without a primary value.
    pub fn update_sql(&self, record: &Record, force: bool) -> Result<Option<String>> {
        let structure = &self.structure;
        let primary = require_primary(record, "update")?;
        let mut assignments = Vec::new();
        for (field, value) in record.fields() {
            if field != structure.primary() && (force || record.is_changed(field)) {
                assignments.push(format!(
                    "{} = {}",
                    quote(field),
                    structure.escape_value(field, value)?
                ));
            }
        }
        if assignments.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!(
            "UPDATE {} SET {} WHERE {} = {}",
            quote(structure.name()),
            assignments.join(", "),
            quote(structure.primary()),
            structure.escape_value(structure.primary(), primary)?
        )))
    }

    /// `DELETE FROM … WHERE <primary> = …`.
    ///
    /// # Errors
    /// Returns `Error::ValidationError` without a primary value.
    pub fn delete_sql(&self, record: &Record) -> Result<String> {
        let structure = &self.structure;
        let primary = require_primary(record, "delete")?;
        Ok(format!(
            "DELETE FROM {} WHERE {} = {}",
            quote(structure.name()),
            quote(structure.primary()),
            structure.escape_value(structure.primary(), primary)?
        ))
    }

    /// Uncached read of one record by primary value.
    pub async fn find_one(&self, value: impl Into<Value>) -> Result<Option<Record>> {
        let mut records = self
            .fetch_by_values(self.structure.primary(), &[value.into()])
            .await?;
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.swap_remove(0))
        })
    }

    /// Uncached read of records by primary value, in store order.
    pub async fn find_many(&self, values: &[Value]) -> Result<Vec<Record>> {
        self.fetch_by_values(self.structure.primary(), values).await
    }
}

impl<C> DataRepository for Table<C>
where
    C: Connector,
    C::Connection: SqlConnection,
{
    fn structure(&self) -> &Arc<RecordStructure> {
        &self.structure
    }

    async fn fetch_by_values(&self, field: &str, values: &[Value]) -> Result<Vec<Record>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let sql = self.select_sql(field, values)?;
        let rows = self.store.select_all(&sql).await?;
        debug!(
            "✓ {} fetch by {}: {} of {} found",
            self.structure.name(),
            field,
            rows.len(),
            values.len()
        );
        rows.into_iter()
            .map(|row| Record::from_values(Arc::clone(&self.structure), row))
            .collect()
    }

    async fn insert(&self, record: &mut Record, ignore: bool) -> Result<bool> {
        let sql = self.insert_sql(record, ignore)?;
        let inserted = if self.structure.auto_generated() {
            let id = self.store.insert(&sql).await?;
            if id > 0 {
                record.set(self.structure.primary(), Value::UInt(id))?;
            }
            id > 0
        } else {
            self.store.exec(&sql).await? > 0
        };
        record.clear_changes();
        Ok(inserted)
    }

    async fn update(&self, record: &mut Record, force: bool) -> Result<bool> {
        if !force && !record.has_changes() {
            return Ok(false);
        }
        let sql = match self.update_sql(record, force)? {
            Some(sql) => sql,
            None => return Ok(false),
        };
        self.store.exec(&sql).await?;
        record.clear_changes();
        Ok(true)
    }

    async fn delete(&self, record: &mut Record) -> Result<()> {
        let sql = self.delete_sql(record)?;
        self.store.exec(&sql).await?;
        record.remove(self.structure.primary());
        record.clear_changes();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, Endpoint, StaticConfig, StoreKind};
    use crate::connection::ConnectionRegistry;
    use crate::error::Error;
    use crate::sql::{classify_error, Executed, ResultSet, ScriptedConnector};

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

    fn table(connector: &ScriptedConnector) -> Table<ScriptedConnector> {
        let config: Arc<dyn ConfigSource> = Arc::new(StaticConfig::new().with_server(
            StoreKind::Relational,
            "default",
            Endpoint::new("db1"),
        ));
        let registry = ConnectionRegistry::new(connector.clone(), config, StoreKind::Relational);
        Table::new(RelationalStore::new(Arc::new(registry)), users())
    }

    #[test]
    fn test_select_sql() {
        let table = table(&ScriptedConnector::new());
        let sql = table
            .select_sql("id", &[Value::UInt(7), Value::UInt(42)])
            .expect("Failed to build SQL");
        assert_eq!(
            sql,
            "SELECT `id`, `email`, `active` FROM `users` WHERE `id` IN (7,42)"
        );
    }

    #[test]
    fn test_insert_sql_skips_generated_primary() {
        let table = table(&ScriptedConnector::new());
        let mut record = Record::new(users());
        record
            .set("id", 9u64)
            .and_then(|r| r.set("email", "o'brien@x.com"))
            .and_then(|r| r.set("active", true))
            .expect("Failed to set");

        assert_eq!(
            table.insert_sql(&record, true).expect("Failed to build SQL"),
            "INSERT IGNORE INTO `users` (`email`,`active`) VALUES ('o\\'brien@x.com',1)"
        );
    }

    #[test]
    fn test_update_sql() {
        let table = table(&ScriptedConnector::new());
        let mut record = Record::from_values(
            users(),
            [
                ("id", Value::UInt(42)),
                ("email", Value::from("b@x.com")),
                ("active", Value::Bool(false)),
            ],
        )
        .expect("Failed to hydrate");

        assert_eq!(table.update_sql(&record, false).expect("sql"), None);

        record.set("active", true).expect("Failed to set");
        assert_eq!(
            table.update_sql(&record, false).expect("sql").as_deref(),
            Some("UPDATE `users` SET `active` = 1 WHERE `id` = 42")
        );
        assert_eq!(
            table.update_sql(&record, true).expect("sql").as_deref(),
            Some("UPDATE `users` SET `email` = 'b@x.com', `active` = 1 WHERE `id` = 42")
        );

        record.set("active", Value::raw("NOT `active`")).expect("Failed to set");
        assert_eq!(
            table.update_sql(&record, false).expect("sql").as_deref(),
            Some("UPDATE `users` SET `active` = NOT `active` WHERE `id` = 42")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_many_hydrates_rows() {
        let connector = ScriptedConnector::new();
        connector.push_result(
            ResultSet::new(&["id", "email", "active"])
                .with_row(vec![Value::UInt(42), Value::from("b@x.com"), Value::Int(0)]),
        );
        let table = table(&connector);

        let records = table
            .find_many(&[Value::UInt(42), Value::UInt(8)])
            .await
            .expect("Failed to find");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("active"), Some(&Value::Bool(false)));
        assert!(!records[0].has_changes());
        assert_eq!(
            connector.statements(),
            vec!["SELECT `id`, `email`, `active` FROM `users` WHERE `id` IN (42,8)".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_one_missing() {
        let connector = ScriptedConnector::new();
        let table = table(&connector);
        assert!(table.find_one(5u64).await.expect("Failed to find").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_fetch_skips_query() {
        let connector = ScriptedConnector::new();
        let table = table(&connector);
        assert!(table.find_many(&[]).await.expect("Failed to find").is_empty());
        assert!(connector.statements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_stores_generated_id() {
        let connector = ScriptedConnector::new();
        connector.push_executed(Executed {
            rows_affected: 1,
            last_insert_id: 43,
        });
        let table = table(&connector);
        let mut record = Record::new(users());
        record.set("email", "c@x.com").expect("Failed to set");

        assert!(table.insert(&mut record, false).await.expect("Failed to insert"));
        assert_eq!(record.primary_value(), Some(&Value::UInt(43)));
        assert!(!record.has_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_duplicate_propagates() {
        let connector = ScriptedConnector::new();
        connector.push_error(classify_error(
            Some(1062),
            "Duplicate entry 'c@x.com' for key 'email'",
        ));
        let table = table(&connector);
        let mut record = Record::new(users());
        record.set("email", "c@x.com").expect("Failed to set");

        let err = table
            .insert(&mut record, false)
            .await
            .expect_err("Duplicate");
        match err {
            Error::DuplicateKey { key_name, .. } => assert_eq!(key_name, "email"),
            other => panic!("Expected DuplicateKey, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_without_changes_issues_nothing() {
        let connector = ScriptedConnector::new();
        let table = table(&connector);
        let mut record =
            Record::from_values(users(), [("id", Value::UInt(42))]).expect("Failed to hydrate");

        assert!(!table.update(&mut record, false).await.expect("Failed to update"));
        assert!(connector.statements().is_empty());
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_primary() {
        let connector = ScriptedConnector::new();
        let table = table(&connector);
        let mut record =
            Record::from_values(users(), [("id", Value::UInt(42))]).expect("Failed to hydrate");

        table.delete(&mut record).await.expect("Failed to delete");
        assert!(record.primary_value().is_none());
        assert_eq!(
            connector.statements(),
            vec!["DELETE FROM `users` WHERE `id` = 42".to_string()]
        );
    }
}
