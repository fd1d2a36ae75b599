//! Scripted relational transport for tests.
//!
//! Replies are queued up front and handed out in order, one per statement;
//! an empty queue answers with an empty result set (or zero affected rows).
//! Every statement text is recorded.

use super::{classify_error, Executed, ResultSet, SqlConnection, CR_SERVER_GONE_ERROR};
use crate::config::Endpoint;
use crate::connection::Connector;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

enum Reply {
    Rows(ResultSet),
    Done(Executed),
    Fail(Error),
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    statements: Vec<String>,
    connects: u32,
    always_disconnect: bool,
}

/// Connector whose connections replay queued replies.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement with "server has gone away".
    pub fn always_disconnect(self) -> Self {
        self.lock().always_disconnect = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_result(&self, result: ResultSet) {
        self.lock().replies.push_back(Reply::Rows(result));
    }

    pub fn push_executed(&self, executed: Executed) {
        self.lock().replies.push_back(Reply::Done(executed));
    }

    pub fn push_error(&self, error: Error) {
        self.lock().replies.push_back(Reply::Fail(error));
    }

    /// Statements received so far, oldest first.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }
}

impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self, _endpoint: &Endpoint) -> Result<ScriptedConnection> {
        self.lock().connects += 1;
        Ok(ScriptedConnection {
            connector: self.clone(),
        })
    }
}

/// One scripted connection.
pub struct ScriptedConnection {
    connector: ScriptedConnector,
}

impl ScriptedConnection {
    fn next_reply(&self, sql: &str) -> Option<Reply> {
        let mut script = self.connector.lock();
        script.statements.push(sql.to_string());
        if script.always_disconnect {
            return Some(Reply::Fail(classify_error(
                Some(CR_SERVER_GONE_ERROR),
                "MySQL server has gone away",
            )));
        }
        script.replies.pop_front()
    }
}

impl SqlConnection for ScriptedConnection {
    async fn query(&mut self, sql: &str) -> Result<ResultSet> {
        match self.next_reply(sql) {
            Some(Reply::Rows(result)) => Ok(result),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Done(_)) => Err(Error::Other(format!(
                "scripted reply for '{}' has no result set",
                sql
            ))),
            None => Ok(ResultSet::default()),
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<Executed> {
        match self.next_reply(sql) {
            Some(Reply::Done(executed)) => Ok(executed),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Rows(_)) => Err(Error::Other(format!(
                "scripted reply for '{}' is a result set",
                sql
            ))),
            None => Ok(Executed::default()),
        }
    }
}
