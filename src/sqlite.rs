//! Reference backend over `rusqlite`.
//!
//! SQLite has no stored procedures, output parameters, or multiple result
//! sets, so readers produced here expose a single result set and empty
//! outputs. The driver never reports `Broken`: an embedded handle either
//! opens or fails to.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::Connection as NativeConnection;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

use crate::classify::CodeTableClassifier;
use crate::command::{Command, CommandKind, ParamDirection};
use crate::driver::{
    ConnectionState, Driver, DriverConnection, DriverTransaction, IsolationLevel, RowStream,
};
use crate::error::{DriverFailure, ErrorKind};
use crate::results::ResultSet;
use crate::value::SqlValue;

/// SQLite driver; connection string is a path or `:memory:`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn parameter_prefix(&self) -> &'static str {
        ":"
    }

    fn connect(&self, connection_string: &str) -> Box<dyn DriverConnection> {
        Box::new(SqliteConnection {
            path: connection_string.to_owned(),
            conn: None,
        })
    }

    fn append_client_tag(&self, connection_string: &str, _tag: &str) -> String {
        // SQLite has no client-identification channel.
        connection_string.to_owned()
    }
}

/// Classifier table for SQLite extended result codes.
#[must_use]
pub fn sqlite_classifier() -> CodeTableClassifier {
    CodeTableClassifier::from_pairs([
        ("1555", ErrorKind::Conflict),   // SQLITE_CONSTRAINT_PRIMARYKEY
        ("2067", ErrorKind::Conflict),   // SQLITE_CONSTRAINT_UNIQUE
        ("787", ErrorKind::Business),    // SQLITE_CONSTRAINT_FOREIGNKEY
        ("275", ErrorKind::Validation),  // SQLITE_CONSTRAINT_CHECK
        ("1299", ErrorKind::Validation), // SQLITE_CONSTRAINT_NOTNULL
        ("5", ErrorKind::Unavailable),   // SQLITE_BUSY
        ("6", ErrorKind::Unavailable),   // SQLITE_LOCKED
        ("261", ErrorKind::Unavailable), // SQLITE_BUSY_RECOVERY
        ("9", ErrorKind::Timeout),       // SQLITE_INTERRUPT
    ])
}

struct SqliteConnection {
    path: String,
    conn: Option<Arc<Mutex<NativeConnection>>>,
}

impl SqliteConnection {
    fn handle(&self) -> Result<&Arc<Mutex<NativeConnection>>, DriverFailure> {
        self.conn
            .as_ref()
            .ok_or_else(|| DriverFailure::message("connection is not open"))
    }
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    fn state(&self) -> ConnectionState {
        if self.conn.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&mut self) -> Result<(), DriverFailure> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = NativeConnection::open(&self.path).map_err(|e| failure(&e))?;
        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverFailure> {
        self.conn = None;
        Ok(())
    }

    async fn begin(
        &mut self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn DriverTransaction>, DriverFailure> {
        let handle = self.handle()?;
        lock(handle)
            .execute_batch(begin_statement(isolation))
            .map_err(|e| failure(&e))?;
        Ok(Box::new(SqliteTransaction {
            conn: Arc::clone(handle),
            done: false,
        }))
    }

    async fn execute_non_query(&mut self, command: &mut Command) -> Result<u64, DriverFailure> {
        reject_stored_procedure(command)?;
        let handle = self.handle()?;
        let guard = lock(handle);
        let mut stmt = guard
            .prepare(command.command_text())
            .map_err(|e| failure(&e))?;
        let named = named_args(command);
        let args = arg_refs(&named);
        let rows = stmt.execute(&args[..]).map_err(|e| failure(&e))?;
        Ok(rows as u64)
    }

    async fn execute_scalar(&mut self, command: &mut Command) -> Result<SqlValue, DriverFailure> {
        reject_stored_procedure(command)?;
        let handle = self.handle()?;
        let guard = lock(handle);
        let mut stmt = guard
            .prepare(command.command_text())
            .map_err(|e| failure(&e))?;
        let named = named_args(command);
        let args = arg_refs(&named);
        let mut rows = stmt.query(&args[..]).map_err(|e| failure(&e))?;
        match rows.next().map_err(|e| failure(&e))? {
            Some(row) => {
                let value = row.get_ref(0).map_err(|e| failure(&e))?;
                Ok(from_sqlite(value))
            }
            None => Ok(SqlValue::Null),
        }
    }

    async fn execute_reader<'a>(
        &'a mut self,
        command: &Command,
    ) -> Result<Box<dyn RowStream + Send + 'a>, DriverFailure> {
        reject_stored_procedure(command)?;
        let handle = self.handle()?;
        let guard = lock(handle);
        let mut stmt = guard
            .prepare(command.command_text())
            .map_err(|e| failure(&e))?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = column_names.len();
        let mut set = ResultSet::new(column_names);
        let named = named_args(command);
        let args = arg_refs(&named);
        let mut rows = stmt.query(&args[..]).map_err(|e| failure(&e))?;
        while let Some(row) = rows.next().map_err(|e| failure(&e))? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value = row.get_ref(idx).map_err(|e| failure(&e))?;
                values.push(from_sqlite(value));
            }
            set.add_row(values);
        }
        Ok(Box::new(SqliteRowStream { set }))
    }
}

struct SqliteTransaction {
    conn: Arc<Mutex<NativeConnection>>,
    done: bool,
}

#[async_trait]
impl DriverTransaction for SqliteTransaction {
    async fn commit(&mut self) -> Result<(), DriverFailure> {
        if self.done {
            return Err(DriverFailure::message("transaction already completed"));
        }
        lock(&self.conn)
            .execute_batch("COMMIT")
            .map_err(|e| failure(&e))?;
        self.done = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverFailure> {
        if self.done {
            return Err(DriverFailure::message("transaction already completed"));
        }
        lock(&self.conn)
            .execute_batch("ROLLBACK")
            .map_err(|e| failure(&e))?;
        self.done = true;
        Ok(())
    }
}

struct SqliteRowStream {
    set: ResultSet,
}

#[async_trait]
impl RowStream for SqliteRowStream {
    fn current(&self) -> &ResultSet {
        &self.set
    }

    async fn next_result(&mut self) -> Result<bool, DriverFailure> {
        Ok(false)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Timestamp(ts) => ToSqlOutput::Owned(Value::Text(
                ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            )),
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Json(j) => ToSqlOutput::Owned(Value::Text(j.to_string())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

fn begin_statement(isolation: IsolationLevel) -> &'static str {
    // SQLite transactions are serializable; levels map onto lock acquisition.
    match isolation {
        IsolationLevel::Serializable => "BEGIN EXCLUSIVE",
        IsolationLevel::RepeatableRead => "BEGIN IMMEDIATE",
        IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted => "BEGIN DEFERRED",
    }
}

fn reject_stored_procedure(command: &Command) -> Result<(), DriverFailure> {
    if command.kind() == CommandKind::StoredProcedure {
        return Err(DriverFailure::message(
            "sqlite does not support stored procedures",
        ));
    }
    Ok(())
}

fn named_args(command: &Command) -> Vec<(String, SqlValue)> {
    command
        .parameters()
        .iter()
        .filter(|p| {
            matches!(
                p.direction,
                ParamDirection::Input | ParamDirection::InputOutput
            )
        })
        .map(|p| (format!(":{}", p.name), p.value.clone()))
        .collect()
}

fn arg_refs(named: &[(String, SqlValue)]) -> Vec<(&str, &dyn ToSql)> {
    named
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

fn lock(conn: &Arc<Mutex<NativeConnection>>) -> MutexGuard<'_, NativeConnection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failure(err: &rusqlite::Error) -> DriverFailure {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => DriverFailure {
            code: Some(code.extended_code.to_string()),
            message: message.clone().unwrap_or_else(|| code.to_string()),
        },
        other => DriverFailure::message(other.to_string()),
    }
}
