use serde::Serialize;
use thiserror::Error;

/// Closed taxonomy for normalized backend failures.
///
/// Values of this enum are only ever produced by an
/// [`ErrorClassifier`](crate::classify::ErrorClassifier); the execution
/// envelope never invents them ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Input rejected by the backend (check/not-null constraint and similar)
    Validation,
    /// Duplicate key or comparable uniqueness violation
    Conflict,
    /// Statement timeout or backend-side cancellation
    Timeout,
    /// Backend temporarily unable to serve the call (busy, deadlock victim)
    Unavailable,
    /// Recognized database failure with no finer category
    Database,
    /// Domain-rule violation surfaced by the backend (e.g. foreign key)
    Business,
    /// Failure the classifier could not recognize at all
    Unexpected,
}

/// Normalized error value: a stable `{kind, code, message}` triple suitable
/// for logging and programmatic branching.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind:?} [{code}]: {message}")]
pub struct DbError {
    /// Taxonomy bucket assigned by the classifier
    pub kind: ErrorKind,
    /// Native error code, or a stable placeholder when the backend gave none
    pub code: String,
    /// Human-readable message carried over from the native failure
    pub message: String,
}

impl DbError {
    #[must_use]
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether a retry at the call site is a reasonable reaction.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Unavailable | ErrorKind::Timeout)
    }
}

/// Raw failure surfaced by a backend driver, before classification.
///
/// Drivers report the native error code when the backend provides one; the
/// classifier pattern-matches on it. The raw failure never crosses the
/// session API boundary.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverFailure {
    /// Backend-native error code, if any
    pub code: Option<String>,
    /// Driver-reported message
    pub message: String,
}

impl DriverFailure {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Failure with no native code attached.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

/// Caller programming errors.
///
/// These fail fast and are never routed through the classifier; they are a
/// separate signal from the [`ErrorKind`] taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("session is disposed")]
    Disposed,

    #[error("transaction already active on this session")]
    TransactionActive,

    #[error("transaction already completed")]
    TransactionCompleted,

    #[error("no driver registered under name: {0}")]
    UnknownDriver(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Error surface of every session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Backend failure normalized by the classifier
    #[error(transparent)]
    Db(#[from] DbError),

    /// Programming error; never produced by a classifier
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// The operation was cancelled before it produced a result
    #[error("operation cancelled")]
    Cancelled,
}

impl SessionError {
    /// The classified error, if this is a backend failure.
    #[must_use]
    pub fn as_db(&self) -> Option<&DbError> {
        match self {
            SessionError::Db(err) => Some(err),
            _ => None,
        }
    }

    /// The taxonomy bucket, if this is a backend failure.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.as_db().map(|err| err.kind)
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
