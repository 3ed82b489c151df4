//! Session-oriented database access layer with pluggable backend drivers.
//!
//! A [`Session`] owns exactly one native connection (created lazily and
//! healed across clean closes and broken handles), at most one active
//! [`Transaction`], an [`EventHub`] publishing per-call telemetry, and a
//! host of disposable [`SessionFeature`]s. Every execution flows through a
//! uniform envelope: build the command, ensure the connection is open, run
//! the driver primitive, classify any raw failure through the session's
//! [`ErrorClassifier`], and publish exactly one [`SqlCall`] event.
//!
//! Backends plug in through the [`driver`] traits; a `rusqlite`-backed
//! reference driver ships behind the `sqlite` feature (on by default), and
//! a scriptable in-memory driver ships behind `test-utils`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sql_session::prelude::*;
//!
//! # async fn demo() -> SessionResult<()> {
//! let mut session = Session::builder(Arc::new(sql_session::sqlite::SqliteDriver))
//!     .connection_string(":memory:")
//!     .classifier(Arc::new(sql_session::sqlite::sqlite_classifier()))
//!     .build()?;
//!
//! session
//!     .execute_non_query(|_| {
//!         Command::text("INSERT INTO t (name) VALUES (:name)")
//!             .param("name", SqlValue::Text("a".into()))
//!     })
//!     .await?;
//!
//! let mut tx = session.begin_transaction().await?;
//! session
//!     .execute_non_query(|_| Command::text("DELETE FROM t"))
//!     .await?;
//! tx.commit().await?;
//! # Ok(()) }
//! ```

pub mod classify;
pub mod command;
mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod features;
pub mod prelude;
pub mod results;
pub mod session;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transaction;
pub mod value;

pub use classify::{CodeTableClassifier, DefaultClassifier, ErrorClassifier};
pub use command::{Command, CommandKind, ParamDirection, Parameter};
pub use driver::{
    ConnectionState, Driver, DriverConnection, DriverRegistry, DriverTransaction, IsolationLevel,
    RowStream,
};
pub use error::{DbError, DriverFailure, ErrorKind, SessionError, SessionResult, UsageError};
pub use events::{CallObserver, EventHub, SqlCall};
pub use features::{FeatureHost, SessionFeature, SqlLogger};
pub use results::{ResultSet, Row};
pub use session::{Session, SessionBuilder};
pub use transaction::Transaction;
pub use value::SqlValue;
