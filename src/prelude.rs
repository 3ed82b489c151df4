//! Convenience re-exports for typical callers.

pub use crate::classify::{CodeTableClassifier, DefaultClassifier, ErrorClassifier};
pub use crate::command::{Command, CommandKind, ParamDirection, Parameter};
pub use crate::driver::{ConnectionState, Driver, DriverRegistry, IsolationLevel};
pub use crate::error::{DbError, DriverFailure, ErrorKind, SessionError, SessionResult, UsageError};
pub use crate::events::{CallObserver, EventHub, SqlCall};
pub use crate::features::{FeatureHost, SessionFeature, SqlLogger};
pub use crate::results::{ResultSet, Row};
pub use crate::session::{Session, SessionBuilder};
pub use crate::transaction::Transaction;
pub use crate::value::SqlValue;
