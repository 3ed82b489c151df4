//! Scriptable in-memory driver for exercising the session pipeline without
//! a real backend. Enabled with the `test-utils` feature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{Command, Parameter};
use crate::driver::{
    ConnectionState, Driver, DriverConnection, DriverTransaction, IsolationLevel, RowStream,
};
use crate::error::DriverFailure;
use crate::results::ResultSet;
use crate::value::SqlValue;

/// Scripted response for one SQL text.
#[derive(Clone, Default)]
pub struct Script {
    pub rows_affected: u64,
    pub scalar: Option<SqlValue>,
    pub sets: Vec<ResultSet>,
    pub outputs: Vec<Parameter>,
    pub failure: Option<DriverFailure>,
    pub next_result_failure: Option<DriverFailure>,
    pub delay: Option<Duration>,
}

impl Script {
    #[must_use]
    pub fn rows(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn scalar(value: SqlValue) -> Self {
        Self {
            scalar: Some(value),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sets(sets: Vec<ResultSet>) -> Self {
        Self {
            sets,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failure(failure: DriverFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// Output parameters the driver reports once the call has fully
    /// completed (for readers, only after every result set is drained).
    #[must_use]
    pub fn with_outputs(mut self, outputs: Vec<Parameter>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Make the first `next_result` call on the produced stream fail.
    #[must_use]
    pub fn with_next_result_failure(mut self, failure: DriverFailure) -> Self {
        self.next_result_failure = Some(failure);
        self
    }

    /// Sleep this long inside the execute call before producing the
    /// outcome, so in-flight work can be raced against cancellation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Transaction lifecycle entries recorded by the fake driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin,
    Commit,
    Rollback,
}

#[derive(Default)]
struct FakeState {
    scripts: HashMap<String, Script>,
    connects: usize,
    opens: usize,
    executed: Vec<String>,
    connection_strings: Vec<String>,
    tx_log: Vec<TxEvent>,
    next_result_calls: usize,
    handles: Vec<Arc<Mutex<ConnectionState>>>,
    fail_open: Option<DriverFailure>,
    fail_begin: Option<DriverFailure>,
    fail_commit: Option<DriverFailure>,
}

/// In-memory driver whose behavior is scripted per SQL text and whose
/// lifecycle (connects, opens, handle states, transaction log) is fully
/// observable. Clones share state.
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for a SQL text.
    pub fn script(&self, sql: impl Into<String>, script: Script) {
        self.lock().scripts.insert(sql.into(), script);
    }

    /// Script a failure with a native code for a SQL text.
    pub fn fail_with(&self, sql: impl Into<String>, code: &str, message: &str) {
        self.script(sql, Script::failure(DriverFailure::new(code, message)));
    }

    /// Make the next `open` call fail once.
    pub fn fail_next_open(&self, failure: DriverFailure) {
        self.lock().fail_open = Some(failure);
    }

    /// Make the next `begin` call fail once.
    pub fn fail_next_begin(&self, failure: DriverFailure) {
        self.lock().fail_begin = Some(failure);
    }

    /// Make the next `commit` call fail once; the transaction stays open.
    pub fn fail_next_commit(&self, failure: DriverFailure) {
        self.lock().fail_commit = Some(failure);
    }

    /// Number of handles created through `connect`.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Number of `open` calls across all handles.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.lock().handles.len()
    }

    /// SQL texts executed, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Connection strings seen by `connect`, in order.
    #[must_use]
    pub fn connection_strings(&self) -> Vec<String> {
        self.lock().connection_strings.clone()
    }

    #[must_use]
    pub fn tx_log(&self) -> Vec<TxEvent> {
        self.lock().tx_log.clone()
    }

    #[must_use]
    pub fn next_result_calls(&self) -> usize {
        self.lock().next_result_calls
    }

    /// Flip the most recently created handle to `Closed` (clean close).
    pub fn close_current(&self) {
        self.set_current_state(ConnectionState::Closed);
    }

    /// Flip the most recently created handle to `Broken`.
    pub fn break_current(&self) {
        self.set_current_state(ConnectionState::Broken);
    }

    fn set_current_state(&self, state: ConnectionState) {
        if let Some(handle) = self.lock().handles.last() {
            *handle.lock().unwrap_or_else(PoisonError::into_inner) = state;
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Driver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn parameter_prefix(&self) -> &'static str {
        "@"
    }

    fn connect(&self, connection_string: &str) -> Box<dyn DriverConnection> {
        let handle_state = Arc::new(Mutex::new(ConnectionState::Closed));
        let mut state = self.lock();
        state.connects += 1;
        state.connection_strings.push(connection_string.to_owned());
        state.handles.push(Arc::clone(&handle_state));
        Box::new(FakeConnection {
            shared: Arc::clone(&self.state),
            state: handle_state,
        })
    }

    fn append_client_tag(&self, connection_string: &str, tag: &str) -> String {
        format!("{connection_string};app={tag}")
    }
}

struct FakeConnection {
    shared: Arc<Mutex<FakeState>>,
    state: Arc<Mutex<ConnectionState>>,
}

impl FakeConnection {
    fn shared(&self) -> MutexGuard<'_, FakeState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_script(&self, command: &Command) -> Result<Script, DriverFailure> {
        let mut state = self.shared();
        state.executed.push(command.command_text().to_owned());
        let script = state
            .scripts
            .get(command.command_text())
            .cloned()
            .unwrap_or_default();
        match script.failure {
            Some(failure) => Err(failure),
            None => Ok(script),
        }
    }
}

#[async_trait]
impl DriverConnection for FakeConnection {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&mut self) -> Result<(), DriverFailure> {
        let mut state = self.shared();
        state.opens += 1;
        if let Some(failure) = state.fail_open.take() {
            return Err(failure);
        }
        drop(state);
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Open;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverFailure> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Closed;
        Ok(())
    }

    async fn begin(
        &mut self,
        _isolation: IsolationLevel,
    ) -> Result<Box<dyn DriverTransaction>, DriverFailure> {
        let mut state = self.shared();
        if let Some(failure) = state.fail_begin.take() {
            return Err(failure);
        }
        state.tx_log.push(TxEvent::Begin);
        drop(state);
        Ok(Box::new(FakeTransaction {
            shared: Arc::clone(&self.shared),
            done: false,
        }))
    }

    async fn execute_non_query(&mut self, command: &mut Command) -> Result<u64, DriverFailure> {
        let script = self.take_script(command)?;
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        for output in script.outputs {
            command.set_output(&output.name, output.value.clone());
        }
        Ok(script.rows_affected)
    }

    async fn execute_scalar(&mut self, command: &mut Command) -> Result<SqlValue, DriverFailure> {
        let script = self.take_script(command)?;
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(script.scalar.unwrap_or(SqlValue::Null))
    }

    async fn execute_reader<'a>(
        &'a mut self,
        command: &Command,
    ) -> Result<Box<dyn RowStream + Send + 'a>, DriverFailure> {
        let script = self.take_script(command)?;
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        let sets = if script.sets.is_empty() {
            vec![ResultSet::default()]
        } else {
            script.sets
        };
        Ok(Box::new(FakeRowStream {
            shared: Arc::clone(&self.shared),
            sets,
            index: 0,
            exhausted: false,
            outputs: script.outputs,
            next_result_failure: script.next_result_failure,
        }))
    }
}

struct FakeTransaction {
    shared: Arc<Mutex<FakeState>>,
    done: bool,
}

impl FakeTransaction {
    fn log(&self, event: TxEvent) {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tx_log
            .push(event);
    }
}

#[async_trait]
impl DriverTransaction for FakeTransaction {
    async fn commit(&mut self) -> Result<(), DriverFailure> {
        if self.done {
            return Err(DriverFailure::message("transaction already completed"));
        }
        let injected = self
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_commit
            .take();
        if let Some(failure) = injected {
            // The native transaction is still open; rollback remains valid.
            return Err(failure);
        }
        self.log(TxEvent::Commit);
        self.done = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverFailure> {
        if self.done {
            return Err(DriverFailure::message("transaction already completed"));
        }
        self.log(TxEvent::Rollback);
        self.done = true;
        Ok(())
    }
}

struct FakeRowStream {
    shared: Arc<Mutex<FakeState>>,
    sets: Vec<ResultSet>,
    index: usize,
    exhausted: bool,
    outputs: Vec<Parameter>,
    next_result_failure: Option<DriverFailure>,
}

#[async_trait]
impl RowStream for FakeRowStream {
    fn current(&self) -> &ResultSet {
        &self.sets[self.index]
    }

    async fn next_result(&mut self) -> Result<bool, DriverFailure> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_result_calls += 1;
        if let Some(failure) = self.next_result_failure.take() {
            return Err(failure);
        }
        if self.index + 1 < self.sets.len() {
            self.index += 1;
            Ok(true)
        } else {
            self.exhausted = true;
            Ok(false)
        }
    }

    fn outputs(&self) -> Vec<Parameter> {
        if self.exhausted {
            self.outputs.clone()
        } else {
            Vec::new()
        }
    }
}
