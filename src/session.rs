use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::classify::{DefaultClassifier, ErrorClassifier};
use crate::command::Command;
use crate::connection::{ConnectionHolder, ConnectionStringProvider, HolderError};
use crate::driver::{Driver, DriverRegistry, IsolationLevel};
use crate::error::{DbError, DriverFailure, SessionError, SessionResult, UsageError};
use crate::events::{EventHub, PendingCall};
use crate::features::{FeatureHost, SessionFeature};
use crate::results::ResultSet;
use crate::transaction::{Transaction, TransactionHolder, TxSlot};
use crate::value::SqlValue;

/// A connection/executor instance: owns exactly one native connection, at
/// most one active transaction, an event hub, and a feature host.
///
/// Every operation takes `&mut self`, so a session is exclusively used by
/// one unit of work at a time; concurrent work uses one session each.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sql_session::prelude::*;
///
/// # async fn demo() -> SessionResult<()> {
/// let mut session = Session::builder(Arc::new(sql_session::sqlite::SqliteDriver))
///     .connection_string(":memory:")
///     .classifier(Arc::new(sql_session::sqlite::sqlite_classifier()))
///     .build()?;
///
/// session
///     .execute_non_query(|_| Command::text("CREATE TABLE t (id INTEGER PRIMARY KEY)"))
///     .await?;
/// # Ok(()) }
/// ```
pub struct Session {
    driver: Arc<dyn Driver>,
    classifier: Arc<dyn ErrorClassifier>,
    connection: ConnectionHolder,
    tx_slot: TxSlot,
    events: EventHub,
    features: FeatureHost,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    driver: Arc<dyn Driver>,
    connection_string: Option<ConnectionStringProvider>,
    classifier: Arc<dyn ErrorClassifier>,
    client_tag: Option<String>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("client_tag", &self.client_tag)
            .finish_non_exhaustive()
    }
}

impl SessionBuilder {
    fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            connection_string: None,
            classifier: Arc::new(DefaultClassifier),
            client_tag: None,
        }
    }

    /// Start a builder from a driver resolved out of an explicit registry.
    ///
    /// # Errors
    /// `UsageError::UnknownDriver` when no driver is registered under
    /// `name`.
    pub fn from_registry(registry: &DriverRegistry, name: &str) -> Result<Self, UsageError> {
        registry
            .get(name)
            .map(Self::new)
            .ok_or_else(|| UsageError::UnknownDriver(name.to_string()))
    }

    /// Fixed connection string.
    #[must_use]
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        let fixed = connection_string.into();
        self.connection_string = Some(Arc::new(move || fixed.clone()));
        self
    }

    /// Connection string recomputed on every handle creation, so per-call
    /// contextual data can be embedded.
    #[must_use]
    pub fn connection_string_with(
        mut self,
        provider: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.connection_string = Some(Arc::new(provider));
        self
    }

    /// Error-classification policy; defaults to [`DefaultClassifier`].
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Client-identification tag appended to the connection string through
    /// the driver's builder capability.
    #[must_use]
    pub fn client_tag(mut self, tag: impl Into<String>) -> Self {
        self.client_tag = Some(tag.into());
        self
    }

    /// # Errors
    /// `UsageError::Config` when no connection string was supplied.
    pub fn build(self) -> Result<Session, UsageError> {
        let provider = self
            .connection_string
            .ok_or_else(|| UsageError::Config("connection string is required".to_string()))?;
        let provider: ConnectionStringProvider = match self.client_tag {
            Some(tag) => {
                let driver = Arc::clone(&self.driver);
                Arc::new(move || driver.append_client_tag(&provider(), &tag))
            }
            None => provider,
        };
        Ok(Session {
            connection: ConnectionHolder::new(Arc::clone(&self.driver), provider),
            driver: self.driver,
            classifier: self.classifier,
            tx_slot: Arc::new(Mutex::new(None)),
            events: EventHub::new(),
            features: FeatureHost::new(),
        })
    }
}

/// Raw outcome of racing a driver primitive against cancellation.
enum RawOutcome<T> {
    Done(Result<T, DriverFailure>),
    Cancelled,
}

impl Session {
    #[must_use]
    pub fn builder(driver: Arc<dyn Driver>) -> SessionBuilder {
        SessionBuilder::new(driver)
    }

    /// Telemetry hub for this session.
    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Register a feature; it is released when the session closes.
    pub fn add_feature(&mut self, feature: Box<dyn SessionFeature>) {
        self.features.add(feature);
    }

    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Placeholder prefix of the underlying driver, for command factories.
    #[must_use]
    pub fn parameter_prefix(&self) -> &str {
        self.driver.parameter_prefix()
    }

    #[must_use]
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_disposed()
    }

    /// Whether a transaction is currently active on this session.
    pub async fn transaction_active(&self) -> bool {
        self.tx_slot.lock().await.is_some()
    }

    /// Ensure the native connection is open without executing anything.
    ///
    /// # Errors
    /// `UsageError::Disposed` after [`Session::close`]; a classified error
    /// when the native open fails.
    pub async fn open(&mut self) -> SessionResult<()> {
        match self.connection.ensure_open().await {
            Ok(_) => Ok(()),
            Err(HolderError::Disposed) => Err(UsageError::Disposed.into()),
            Err(HolderError::Driver(failure)) => {
                Err(SessionError::Db(self.classifier.classify(&failure)))
            }
        }
    }

    /// Begin a transaction at the default isolation level
    /// ([`IsolationLevel::ReadCommitted`]).
    ///
    /// # Errors
    /// `UsageError::TransactionActive` while another transaction is active;
    /// `UsageError::Disposed` after close; classified errors from the
    /// native open or begin.
    pub async fn begin_transaction(&mut self) -> SessionResult<Transaction> {
        self.begin_transaction_with(IsolationLevel::default()).await
    }

    /// Begin a transaction at the given isolation level.
    ///
    /// # Errors
    /// See [`Session::begin_transaction`].
    pub async fn begin_transaction_with(
        &mut self,
        isolation: IsolationLevel,
    ) -> SessionResult<Transaction> {
        let mut guard = self.tx_slot.lock().await;
        if guard.is_some() {
            return Err(UsageError::TransactionActive.into());
        }
        let conn = match self.connection.ensure_open().await {
            Ok(conn) => conn,
            Err(HolderError::Disposed) => return Err(UsageError::Disposed.into()),
            Err(HolderError::Driver(failure)) => {
                return Err(SessionError::Db(self.classifier.classify(&failure)));
            }
        };
        let native = match conn.begin(isolation).await {
            Ok(native) => native,
            Err(failure) => return Err(SessionError::Db(self.classifier.classify(&failure))),
        };
        *guard = Some(TransactionHolder::new(native));
        Ok(Transaction::new(
            Arc::clone(&self.tx_slot),
            Arc::clone(&self.classifier),
        ))
    }

    /// Execute a command that returns an affected-row count.
    ///
    /// # Errors
    /// Classified backend failures as [`SessionError::Db`];
    /// `UsageError::Disposed` after close.
    pub async fn execute_non_query<F>(&mut self, factory: F) -> SessionResult<u64>
    where
        F: FnOnce(&Session) -> Command,
    {
        let mut command = factory(&*self);
        self.run_non_query(&mut command, None).await
    }

    /// Like [`Session::execute_non_query`], with a hook that runs only on
    /// success, after execution, with output parameters populated.
    pub async fn execute_non_query_with<F, A>(
        &mut self,
        factory: F,
        after_call: A,
    ) -> SessionResult<u64>
    where
        F: FnOnce(&Session) -> Command,
        A: FnOnce(&Command),
    {
        let mut command = factory(&*self);
        let rows = self.run_non_query(&mut command, None).await?;
        after_call(&command);
        Ok(rows)
    }

    /// Cancellable form of [`Session::execute_non_query`]. Cancellation
    /// before the native call starts returns [`SessionError::Cancelled`]
    /// without touching the backend; afterwards it is best-effort.
    pub async fn execute_non_query_cancellable<F>(
        &mut self,
        factory: F,
        cancel: &CancellationToken,
    ) -> SessionResult<u64>
    where
        F: FnOnce(&Session) -> Command,
    {
        let mut command = factory(&*self);
        self.run_non_query(&mut command, Some(cancel)).await
    }

    /// Execute a command and return the first column of the first row
    /// ([`SqlValue::Null`] when the result is empty).
    ///
    /// # Errors
    /// See [`Session::execute_non_query`].
    pub async fn execute_scalar<F>(&mut self, factory: F) -> SessionResult<SqlValue>
    where
        F: FnOnce(&Session) -> Command,
    {
        let mut command = factory(&*self);
        self.run_scalar(&mut command, None).await
    }

    /// Like [`Session::execute_scalar`], with an on-success hook.
    pub async fn execute_scalar_with<F, A>(
        &mut self,
        factory: F,
        after_call: A,
    ) -> SessionResult<SqlValue>
    where
        F: FnOnce(&Session) -> Command,
        A: FnOnce(&Command),
    {
        let mut command = factory(&*self);
        let value = self.run_scalar(&mut command, None).await?;
        after_call(&command);
        Ok(value)
    }

    /// Cancellable form of [`Session::execute_scalar`].
    pub async fn execute_scalar_cancellable<F>(
        &mut self,
        factory: F,
        cancel: &CancellationToken,
    ) -> SessionResult<SqlValue>
    where
        F: FnOnce(&Session) -> Command,
    {
        let mut command = factory(&*self);
        self.run_scalar(&mut command, Some(cancel)).await
    }

    /// Execute a command and let `consumer` extract a domain value from the
    /// first result set. Remaining result sets are drained before the
    /// reader is released, so output parameters populated after the last
    /// set become readable; the reader is released by this method, never by
    /// the consumer.
    ///
    /// # Errors
    /// See [`Session::execute_non_query`].
    pub async fn execute_reader<F, C, T>(&mut self, factory: F, consumer: C) -> SessionResult<T>
    where
        F: FnOnce(&Session) -> Command,
        C: FnOnce(&ResultSet) -> T,
    {
        let mut command = factory(&*self);
        self.run_reader(&mut command, consumer, None).await
    }

    /// Like [`Session::execute_reader`], with an on-success hook that sees
    /// output parameters populated after the full drain.
    pub async fn execute_reader_with<F, C, A, T>(
        &mut self,
        factory: F,
        consumer: C,
        after_call: A,
    ) -> SessionResult<T>
    where
        F: FnOnce(&Session) -> Command,
        C: FnOnce(&ResultSet) -> T,
        A: FnOnce(&Command),
    {
        let mut command = factory(&*self);
        let value = self.run_reader(&mut command, consumer, None).await?;
        after_call(&command);
        Ok(value)
    }

    /// Cancellable form of [`Session::execute_reader`].
    pub async fn execute_reader_cancellable<F, C, T>(
        &mut self,
        factory: F,
        consumer: C,
        cancel: &CancellationToken,
    ) -> SessionResult<T>
    where
        F: FnOnce(&Session) -> Command,
        C: FnOnce(&ResultSet) -> T,
    {
        let mut command = factory(&*self);
        self.run_reader(&mut command, consumer, Some(cancel)).await
    }

    /// Execute a non-query command, then map the post-execution command
    /// state (output parameters) into a domain value. The binder never runs
    /// when execution failed; the classified error passes through
    /// unchanged.
    ///
    /// # Errors
    /// See [`Session::execute_non_query`]; binder failures surface as
    /// [`SessionError::Db`] with the binder's error.
    pub async fn execute_and_bind<F, B, T>(&mut self, factory: F, binder: B) -> SessionResult<T>
    where
        F: FnOnce(&Session) -> Command,
        B: FnOnce(&Command) -> Result<T, DbError>,
    {
        let mut command = factory(&*self);
        self.run_non_query(&mut command, None).await?;
        binder(&command).map_err(SessionError::Db)
    }

    /// Cancellable form of [`Session::execute_and_bind`].
    pub async fn execute_and_bind_cancellable<F, B, T>(
        &mut self,
        factory: F,
        binder: B,
        cancel: &CancellationToken,
    ) -> SessionResult<T>
    where
        F: FnOnce(&Session) -> Command,
        B: FnOnce(&Command) -> Result<T, DbError>,
    {
        let mut command = factory(&*self);
        self.run_non_query(&mut command, Some(cancel)).await?;
        binder(&command).map_err(SessionError::Db)
    }

    /// Dispose the session: release every registered feature, then close
    /// the native connection. Idempotent. An active transaction is left to
    /// its handle; closing never commits or rolls back.
    pub async fn close(&mut self) {
        if self.connection.is_disposed() {
            return;
        }
        self.features.release_all();
        self.connection.close().await;
    }

    async fn run_non_query(
        &mut self,
        command: &mut Command,
        cancel: Option<&CancellationToken>,
    ) -> SessionResult<u64> {
        if is_cancelled(cancel) {
            return Err(SessionError::Cancelled);
        }
        let call = PendingCall::begin(command.command_text());
        let conn = match self.connection.ensure_open().await {
            Ok(conn) => conn,
            Err(err) => {
                return Err(open_failure(self.classifier.as_ref(), &self.events, call, err));
            }
        };
        let raw = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => RawOutcome::Cancelled,
                result = conn.execute_non_query(command) => RawOutcome::Done(result),
            },
            None => RawOutcome::Done(conn.execute_non_query(command).await),
        };
        self.settle(call, raw)
    }

    async fn run_scalar(
        &mut self,
        command: &mut Command,
        cancel: Option<&CancellationToken>,
    ) -> SessionResult<SqlValue> {
        if is_cancelled(cancel) {
            return Err(SessionError::Cancelled);
        }
        let call = PendingCall::begin(command.command_text());
        let conn = match self.connection.ensure_open().await {
            Ok(conn) => conn,
            Err(err) => {
                return Err(open_failure(self.classifier.as_ref(), &self.events, call, err));
            }
        };
        let raw = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => RawOutcome::Cancelled,
                result = conn.execute_scalar(command) => RawOutcome::Done(result),
            },
            None => RawOutcome::Done(conn.execute_scalar(command).await),
        };
        self.settle(call, raw)
    }

    async fn run_reader<C, T>(
        &mut self,
        command: &mut Command,
        consumer: C,
        cancel: Option<&CancellationToken>,
    ) -> SessionResult<T>
    where
        C: FnOnce(&ResultSet) -> T,
    {
        if is_cancelled(cancel) {
            return Err(SessionError::Cancelled);
        }
        let call = PendingCall::begin(command.command_text());
        let conn = match self.connection.ensure_open().await {
            Ok(conn) => conn,
            Err(err) => {
                return Err(open_failure(self.classifier.as_ref(), &self.events, call, err));
            }
        };
        let raw = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => RawOutcome::Cancelled,
                result = conn.execute_reader(command) => RawOutcome::Done(result),
            },
            None => RawOutcome::Done(conn.execute_reader(command).await),
        };
        let mut stream = match raw {
            RawOutcome::Cancelled => {
                self.events.publish(&call.finish(true));
                return Err(SessionError::Cancelled);
            }
            RawOutcome::Done(Err(failure)) => {
                let error = self.classifier.classify(&failure);
                self.events.publish(&call.finish(true));
                return Err(SessionError::Db(error));
            }
            RawOutcome::Done(Ok(stream)) => stream,
        };
        let value = consumer(stream.current());
        // Drain the remaining result sets so output parameters and return
        // codes populated after the last set become readable.
        loop {
            match stream.next_result().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(failure) => {
                    tracing::debug!(error = %failure, "ignoring failure while draining result sets");
                    break;
                }
            }
        }
        let outputs = stream.outputs();
        drop(stream);
        for parameter in outputs {
            command.set_output(&parameter.name, parameter.value.clone());
        }
        self.events.publish(&call.finish(false));
        Ok(value)
    }

    fn settle<T>(&self, call: PendingCall, raw: RawOutcome<T>) -> SessionResult<T> {
        match raw {
            RawOutcome::Done(Ok(value)) => {
                self.events.publish(&call.finish(false));
                Ok(value)
            }
            RawOutcome::Done(Err(failure)) => {
                let error = self.classifier.classify(&failure);
                self.events.publish(&call.finish(true));
                Err(SessionError::Db(error))
            }
            RawOutcome::Cancelled => {
                self.events.publish(&call.finish(true));
                Err(SessionError::Cancelled)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Features are released even when close() was never called; the
        // native handle cleans up in the driver's own Drop.
        self.features.release_all();
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(CancellationToken::is_cancelled)
}

fn open_failure(
    classifier: &dyn ErrorClassifier,
    events: &EventHub,
    call: PendingCall,
    err: HolderError,
) -> SessionError {
    match err {
        HolderError::Disposed => SessionError::Usage(UsageError::Disposed),
        HolderError::Driver(failure) => {
            let error = classifier.classify(&failure);
            events.publish(&call.finish(true));
            SessionError::Db(error)
        }
    }
}
