//! MySQL transport for [`RelationalStore`](super::RelationalStore), over sqlx.
//!
//! Statements go through `sqlx::raw_sql` (text protocol), since the SQL is
//! generated with literals already escaped. Column values are decoded by the
//! server-reported type name.

use super::{classify_error, Executed, ResultSet, SqlConnection};
use crate::config::{ConfigSource, ConnectionPolicy, Endpoint, StoreKind};
use crate::connection::{ConnectionRegistry, Connector};
use crate::error::{Error, Result};
use crate::value::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, ConnectOptions, Executor, Row, TypeInfo, ValueRef};
use std::sync::Arc;

const DEFAULT_PORT: u16 = 3306;

/// Relational client backed by MySQL.
pub type MySqlStore = super::RelationalStore<MySqlConnector>;

/// Opens MySQL connections.
#[derive(Clone, Debug, Default)]
pub struct MySqlConnector;

impl MySqlConnector {
    pub fn new() -> Self {
        MySqlConnector
    }

    pub fn options(endpoint: &Endpoint) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port.unwrap_or(DEFAULT_PORT));
        if let Some(username) = &endpoint.username {
            options = options.username(username);
        }
        if let Some(password) = &endpoint.password {
            options = options.password(password);
        }
        if let Some(database) = &endpoint.database {
            options = options.database(database);
        }
        options.charset(endpoint.charset.as_deref().unwrap_or("utf8mb4"))
    }

    /// Registry plus client for the `default` alias.
    pub fn store(config: Arc<dyn ConfigSource>, policy: ConnectionPolicy) -> MySqlStore {
        let registry = ConnectionRegistry::new(MySqlConnector::new(), config, StoreKind::Relational)
            .with_policy(policy);
        super::RelationalStore::new(Arc::new(registry))
    }
}

impl Connector for MySqlConnector {
    type Connection = MySqlSession;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MySqlSession> {
        let conn = Self::options(endpoint).connect().await?;
        info!("✓ MySQL connection opened: {}", endpoint.address(DEFAULT_PORT));
        Ok(MySqlSession { conn })
    }
}

/// One MySQL connection.
pub struct MySqlSession {
    conn: MySqlConnection,
}

fn decode_cell(row: &MySqlRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::Int(row.try_get::<i64, _>(index)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" => Value::UInt(row.try_get::<u64, _>(index)?),
        "FLOAT" | "DOUBLE" => Value::Float(row.try_get::<f64, _>(index)?),
        _ => match row.try_get_unchecked::<String, _>(index) {
            Ok(text) => Value::Text(text),
            Err(_) => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
        },
    };
    Ok(value)
}

impl SqlConnection for MySqlSession {
    async fn query(&mut self, sql: &str) -> Result<ResultSet> {
        let conn: &mut MySqlConnection = &mut self.conn;
        let rows = conn.fetch_all(sqlx::raw_sql(sql)).await?;
        let mut result = ResultSet::default();
        if let Some(first) = rows.first() {
            result.columns = first
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect();
        }
        for row in &rows {
            let cells = (0..row.len())
                .map(|index| decode_cell(row, index))
                .collect::<Result<Vec<_>>>()?;
            result.rows.push(cells);
        }
        Ok(result)
    }

    async fn execute(&mut self, sql: &str) -> Result<Executed> {
        let conn: &mut MySqlConnection = &mut self.conn;
        let done = conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(Executed {
            rows_affected: done.rows_affected(),
            last_insert_id: done.last_insert_id(),
        })
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => {
                let code = db
                    .try_downcast_ref::<MySqlDatabaseError>()
                    .map(|mysql| u32::from(mysql.number()));
                classify_error(code, db.message())
            }
            sqlx::Error::Io(e) => Error::Disconnected(format!("MySQL error: {}", e)),
            sqlx::Error::Protocol(msg) => Error::Disconnected(format!("MySQL error: {}", msg)),
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                Error::Disconnected("MySQL error: connection worker gone".to_string())
            }
            sqlx::Error::PoolTimedOut => Error::Timeout("MySQL error: pool timed out".to_string()),
            sqlx::Error::Configuration(e) => Error::ConfigError(format!("MySQL error: {}", e)),
            other => Error::QueryError {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err: Error = sqlx::Error::Io(io).into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_session_futures_are_send() {
        fn assert_send<T: Send>(_: T) {}
        fn check(session: &mut MySqlSession) {
            assert_send(session.query("SELECT 1"));
            assert_send(session.execute("DO 1"));
        }
        let _ = check;
    }

    #[test]
    fn test_row_not_found_is_query_error() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::QueryError { code: None, .. }));
    }
}
