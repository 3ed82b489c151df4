use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{Command, Parameter};
use crate::error::DriverFailure;
use crate::results::ResultSet;
use crate::value::SqlValue;

/// Connection handle state as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened, or cleanly closed; can be reopened in place
    Closed,
    Open,
    /// Unusable; the holder discards and recreates the handle
    Broken,
}

/// Transaction isolation requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Factory contract for a pluggable backend.
///
/// One implementation per database product. The core only ever talks to
/// these traits; swapping backends means handing a different driver (and
/// classifier) to the session builder.
pub trait Driver: Send + Sync {
    /// Stable name used for registry lookup.
    fn name(&self) -> &'static str;

    /// Placeholder prefix callers use when writing parameterized text
    /// (`:` for sqlite, `$` for postgres, `@` for SQL Server).
    fn parameter_prefix(&self) -> &'static str;

    /// Create an unopened native connection handle for the given
    /// connection string.
    fn connect(&self, connection_string: &str) -> Box<dyn DriverConnection>;

    /// Append client-identification metadata to a connection string, in
    /// whatever syntax the backend understands. Drivers with no such
    /// channel return the string unchanged.
    fn append_client_tag(&self, connection_string: &str, tag: &str) -> String;
}

/// A single native connection handle.
///
/// The open transaction (if any) lives on the connection itself, so
/// commands executed while one is active participate in it implicitly.
#[async_trait]
pub trait DriverConnection: Send {
    fn state(&self) -> ConnectionState;

    /// Open (or reopen) the handle. Blocking network I/O happens here.
    async fn open(&mut self) -> Result<(), DriverFailure>;

    /// Close the handle. Called at most once per handle by the holder.
    async fn close(&mut self) -> Result<(), DriverFailure>;

    /// Start a native transaction at the given isolation level.
    async fn begin(
        &mut self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn DriverTransaction>, DriverFailure>;

    /// Execute a command that returns an affected-row count. Output
    /// parameter values are written back into the command.
    async fn execute_non_query(&mut self, command: &mut Command) -> Result<u64, DriverFailure>;

    /// Execute a command and return the first column of the first row,
    /// or [`SqlValue::Null`] when the result is empty.
    async fn execute_scalar(&mut self, command: &mut Command) -> Result<SqlValue, DriverFailure>;

    /// Execute a command and return a cursor over its result sets.
    async fn execute_reader<'a>(
        &'a mut self,
        command: &Command,
    ) -> Result<Box<dyn RowStream + Send + 'a>, DriverFailure>;
}

/// A native transaction controller returned by [`DriverConnection::begin`].
#[async_trait]
pub trait DriverTransaction: Send {
    async fn commit(&mut self) -> Result<(), DriverFailure>;
    async fn rollback(&mut self) -> Result<(), DriverFailure>;
}

/// Cursor over one or more result sets produced by a single execution.
#[async_trait]
pub trait RowStream: Send {
    /// Rows of the result set the cursor is currently positioned on.
    fn current(&self) -> &ResultSet;

    /// Advance to the next result set. `Ok(false)` once exhausted.
    async fn next_result(&mut self) -> Result<bool, DriverFailure>;

    /// Output parameter and return-code values. Backends populate these
    /// only after every result set has been drained; before that the list
    /// is empty.
    fn outputs(&self) -> Vec<Parameter> {
        Vec::new()
    }
}

/// Explicit name → driver map handed to whatever code builds sessions.
///
/// Replaces process-wide static registration so tests and embedders can
/// hold isolated registries.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own name, replacing any previous entry.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name).cloned()
    }

    /// Registered driver names, unordered.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
