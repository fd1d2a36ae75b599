//! Relational store client.
//!
//! [`RelationalStore`] drives any [`SqlConnection`] transport through a
//! [`ConnectionRegistry`]: one lazily opened connection per `(server, role)`,
//! selects on the `read` role and statements on the `write` role.
//!
//! A statement that loses its connection (`Error::Disconnected`) is re-issued
//! unchanged on a fresh connection after `retry_delay`, up to
//! `max_attempts` times; then it fails with `Error::TransientQueryError`.
//! Every other failure is returned as classified by [`classify_error`].
//!
//! Selects are reduced client-side to one of the [`Select`] shapes.

use crate::config::Role;
use crate::connection::{ConnectionRegistry, Connector};
use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

#[cfg(feature = "mysql")]
pub mod mysql;
pub mod scripted;

#[cfg(feature = "mysql")]
pub use self::mysql::MySqlConnector;
pub use scripted::ScriptedConnector;

/// MySQL client error: server has gone away.
pub const CR_SERVER_GONE_ERROR: u32 = 2006;
/// MySQL client error: lost connection during query.
pub const CR_SERVER_LOST: u32 = 2013;
/// MySQL server error: duplicate entry for a unique key.
pub const ER_DUP_ENTRY: u32 = 1062;

/// One row keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Columns and rows of one result stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: &[&str]) -> Self {
        ResultSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows keyed by column name.
    pub fn into_rows(self) -> Vec<Row> {
        let ResultSet { columns, rows } = self;
        rows.into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect())
            .collect()
    }
}

/// Outcome of a data-changing statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Executed {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

/// Transport for one relational connection.
pub trait SqlConnection: Send + 'static {
    /// Run a statement that produces rows.
    fn query(&mut self, sql: &str) -> impl Future<Output = Result<ResultSet>> + Send;

    /// Run a statement that changes data.
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<Executed>> + Send;
}

/// Result shape for [`RelationalStore::select`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Select {
    /// Every row.
    All,
    /// First row only.
    Row,
    /// First column of every row.
    Column,
    /// First column of the first row.
    Cell,
    /// First column as key, second as value.
    Hash,
    /// First column as key, whole row as value.
    HashRows,
}

/// A reduced result stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Column(Vec<Value>),
    Cell(Option<Value>),
    Hash(BTreeMap<String, Value>),
    HashRows(BTreeMap<String, Row>),
}

impl Selection {
    /// Reduce `result` to `shape`. Later duplicate keys overwrite earlier ones.
    pub fn reduce(result: ResultSet, shape: Select) -> Selection {
        match shape {
            Select::All => Selection::Rows(result.into_rows()),
            Select::Row => {
                let ResultSet { columns, rows } = result;
                Selection::Row(
                    rows.into_iter()
                        .next()
                        .map(|row| columns.iter().cloned().zip(row).collect()),
                )
            }
            Select::Column => Selection::Column(
                result
                    .rows
                    .into_iter()
                    .map(|row| row.into_iter().next().unwrap_or(Value::Null))
                    .collect(),
            ),
            Select::Cell => Selection::Cell(
                result
                    .rows
                    .into_iter()
                    .next()
                    .and_then(|row| row.into_iter().next()),
            ),
            Select::Hash => Selection::Hash(
                result
                    .rows
                    .into_iter()
                    .map(|row| {
                        let mut cells = row.into_iter();
                        let key = cells.next().unwrap_or(Value::Null).to_key_string();
                        (key, cells.next().unwrap_or(Value::Null))
                    })
                    .collect(),
            ),
            Select::HashRows => {
                let ResultSet { columns, rows } = result;
                let mut hash = BTreeMap::new();
                for row in rows {
                    let key = row.first().map(Value::to_key_string).unwrap_or_default();
                    hash.insert(key, columns.iter().cloned().zip(row).collect());
                }
                Selection::HashRows(hash)
            }
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Selection::Rows(_) => "rows",
            Selection::Row(_) => "row",
            Selection::Column(_) => "column",
            Selection::Cell(_) => "cell",
            Selection::Hash(_) => "hash",
            Selection::HashRows(_) => "hash rows",
        }
    }
}

/// Escape text for use inside a single-quoted MySQL literal.
pub fn escape_str(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        match c {
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\x1a' => escaped.push_str("\\Z"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Map a driver error code and message onto the error taxonomy.
///
/// Lost connections become `Disconnected` (retried by the store), duplicate
/// entries become `DuplicateKey`, anything else is a `QueryError`.
pub fn classify_error(code: Option<u32>, message: &str) -> Error {
    match code {
        Some(CR_SERVER_GONE_ERROR) | Some(CR_SERVER_LOST) => {
            Error::Disconnected(message.to_string())
        }
        Some(ER_DUP_ENTRY) => {
            let (key_value, key_name) = parse_duplicate_entry(message).unwrap_or_default();
            Error::DuplicateKey {
                key_name,
                key_value,
                message: message.to_string(),
            }
        }
        code => Error::QueryError {
            code,
            message: message.to_string(),
        },
    }
}

/// Split `Duplicate entry '<value>' for key '<name>'` into value and name.
fn parse_duplicate_entry(message: &str) -> Option<(String, String)> {
    const ENTRY: &str = "Duplicate entry '";
    const KEY: &str = "' for key '";
    let start = message.find(ENTRY)? + ENTRY.len();
    let rest = &message[start..];
    let split = rest.rfind(KEY)?;
    let value = &rest[..split];
    let name = rest[split + KEY.len()..].trim_end_matches('\'');
    Some((value.to_string(), name.to_string()))
}

#[derive(Clone, Copy)]
enum Statement {
    Query,
    Execute,
}

enum Outcome {
    Rows(ResultSet),
    Done(Executed),
}

/// Client for one relational server alias.
pub struct RelationalStore<C: Connector> {
    registry: Arc<ConnectionRegistry<C>>,
    server: String,
}

impl<C: Connector> Clone for RelationalStore<C> {
    fn clone(&self) -> Self {
        RelationalStore {
            registry: Arc::clone(&self.registry),
            server: self.server.clone(),
        }
    }
}

impl<C> RelationalStore<C>
where
    C: Connector,
    C::Connection: SqlConnection,
{
    /// Client for the `default` alias.
    pub fn new(registry: Arc<ConnectionRegistry<C>>) -> Self {
        Self::with_server(registry, "default")
    }

    pub fn with_server(registry: Arc<ConnectionRegistry<C>>, server: &str) -> Self {
        RelationalStore {
            registry,
            server: server.to_string(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<C>> {
        &self.registry
    }

    /// Client for another alias sharing the same registry.
    pub fn route(&self, server: &str) -> Self {
        Self::with_server(Arc::clone(&self.registry), server)
    }

    /// Escape text for a single-quoted literal (utf8 connections).
    pub fn escape(&self, text: &str) -> String {
        escape_str(text)
    }

    async fn run(&self, role: Role, statement: Statement, sql: &str) -> Result<Outcome> {
        let policy = self.registry.policy().clone();
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let mut guard = self.registry.acquire(&self.server, role).await?;
            let connection = guard.connection()?;
            let call = async {
                match statement {
                    Statement::Query => connection.query(sql).await.map(Outcome::Rows),
                    Statement::Execute => connection.execute(sql).await.map(Outcome::Done),
                }
            };

            let outcome = tokio::time::timeout(policy.call_timeout, call).await;
            match outcome {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(Error::Disconnected(message))) => {
                    guard.reset();
                    drop(guard);
                    warn!(
                        "⚠ SQL on {}:{} lost its connection (attempt {}/{}): {}",
                        self.server, role, attempt, max_attempts, message
                    );
                    last_error = message;
                    if attempt < max_attempts {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
                Ok(Err(e)) => {
                    debug!("✗ SQL on {}:{} failed: {}", self.server, role, e);
                    return Err(e);
                }
                Err(_) => {
                    guard.reset();
                    return Err(Error::Timeout(format!(
                        "SQL on {}:{} timed out after {:?}",
                        self.server, role, policy.call_timeout
                    )));
                }
            }
        }

        error!(
            "✗ Giving up on SQL on {}:{} after {} attempts: {}",
            self.server, role, max_attempts, last_error
        );
        Err(Error::TransientQueryError {
            attempts: max_attempts,
            message: last_error,
            sql: sql.to_string(),
        })
    }

    async fn query(&self, sql: &str) -> Result<ResultSet> {
        match self.run(Role::Read, Statement::Query, sql).await? {
            Outcome::Rows(result) => Ok(result),
            Outcome::Done(_) => Err(Error::Other("query produced no result set".to_string())),
        }
    }

    /// Run a select and reduce its result to `shape`.
    ///
    /// # Errors
    /// - `Error::TransientQueryError` once the retry budget is spent
    /// - `Error::QueryError` / `Error::DuplicateKey` as classified
    /// - `Error::ConnectionError` if no connection could be opened
    pub async fn select(&self, sql: &str, shape: Select) -> Result<Selection> {
        let result = self.query(sql).await?;
        let selection = Selection::reduce(result, shape);
        debug!("✓ SQL SELECT -> {}", selection.shape());
        Ok(selection)
    }

    pub async fn select_all(&self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.query(sql).await?.into_rows())
    }

    pub async fn select_row(&self, sql: &str) -> Result<Option<Row>> {
        match self.select(sql, Select::Row).await? {
            Selection::Row(row) => Ok(row),
            other => Err(unexpected(other)),
        }
    }

    pub async fn select_column(&self, sql: &str) -> Result<Vec<Value>> {
        match self.select(sql, Select::Column).await? {
            Selection::Column(column) => Ok(column),
            other => Err(unexpected(other)),
        }
    }

    pub async fn select_cell(&self, sql: &str) -> Result<Option<Value>> {
        match self.select(sql, Select::Cell).await? {
            Selection::Cell(cell) => Ok(cell),
            other => Err(unexpected(other)),
        }
    }

    pub async fn select_hash(&self, sql: &str) -> Result<BTreeMap<String, Value>> {
        match self.select(sql, Select::Hash).await? {
            Selection::Hash(hash) => Ok(hash),
            other => Err(unexpected(other)),
        }
    }

    pub async fn select_hash_rows(&self, sql: &str) -> Result<BTreeMap<String, Row>> {
        match self.select(sql, Select::HashRows).await? {
            Selection::HashRows(hash) => Ok(hash),
            other => Err(unexpected(other)),
        }
    }

    async fn execute(&self, sql: &str) -> Result<Executed> {
        match self.run(Role::Write, Statement::Execute, sql).await? {
            Outcome::Done(executed) => Ok(executed),
            Outcome::Rows(_) => Err(Error::Other("statement returned rows".to_string())),
        }
    }

    /// Run a data-changing statement. Returns the affected row count.
    ///
    /// # Errors
    /// Same classes as [`select`](Self::select).
    pub async fn exec(&self, sql: &str) -> Result<u64> {
        let executed = self.execute(sql).await?;
        debug!("✓ SQL EXEC -> {} rows", executed.rows_affected);
        Ok(executed.rows_affected)
    }

    /// Run an INSERT. Returns the generated identifier (0 if none).
    ///
    /// # Errors
    /// Same classes as [`select`](Self::select); a duplicate key is
    /// `Error::DuplicateKey`.
    pub async fn insert(&self, sql: &str) -> Result<u64> {
        let executed = self.execute(sql).await?;
        debug!("✓ SQL INSERT -> id {}", executed.last_insert_id);
        Ok(executed.last_insert_id)
    }
}

fn unexpected(selection: Selection) -> Error {
    Error::Other(format!("unexpected {} selection", selection.shape()))
}
