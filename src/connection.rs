use std::sync::Arc;

use crate::driver::{ConnectionState, Driver, DriverConnection};
use crate::error::DriverFailure;

/// Callback producing the connection string on demand, so per-call
/// contextual data (caller identity, tags) can be embedded at the moment a
/// handle is actually created.
pub type ConnectionStringProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Failure modes of [`ConnectionHolder::ensure_open`]. The session maps
/// `Disposed` to a usage error and classifies `Driver` failures.
#[derive(Debug)]
pub(crate) enum HolderError {
    Disposed,
    Driver(DriverFailure),
}

/// Owns the session's single native connection handle.
///
/// The handle is created lazily on first use, reopened in place when merely
/// closed, and discarded + recreated only when the driver reports it broken.
/// Reopening in place preserves any backend-side session affinity tied to
/// the handle.
pub(crate) struct ConnectionHolder {
    driver: Arc<dyn Driver>,
    connection_string: ConnectionStringProvider,
    handle: Option<Box<dyn DriverConnection>>,
    disposed: bool,
}

impl ConnectionHolder {
    pub(crate) fn new(driver: Arc<dyn Driver>, connection_string: ConnectionStringProvider) -> Self {
        Self {
            driver,
            connection_string,
            handle: None,
            disposed: false,
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Return a connection guaranteed open, creating or recycling the
    /// native handle as needed.
    pub(crate) async fn ensure_open(
        &mut self,
    ) -> Result<&mut Box<dyn DriverConnection>, HolderError> {
        if self.disposed {
            return Err(HolderError::Disposed);
        }

        let recreate = match self.handle.as_ref() {
            None => true,
            Some(handle) => handle.state() == ConnectionState::Broken,
        };

        if recreate {
            if let Some(mut old) = self.handle.take() {
                if let Err(failure) = old.close().await {
                    tracing::debug!(error = %failure, "discarding broken connection handle");
                }
            }
            let connection_string = (self.connection_string)();
            let mut handle = self.driver.connect(&connection_string);
            handle.open().await.map_err(HolderError::Driver)?;
            self.handle = Some(handle);
        }

        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| HolderError::Driver(DriverFailure::message("connection handle missing")))?;

        // Closed-but-not-broken reopens the same handle instance.
        if handle.state() == ConnectionState::Closed {
            handle.open().await.map_err(HolderError::Driver)?;
        }

        Ok(handle)
    }

    /// Close and release the native handle. Idempotent; close failures are
    /// logged and swallowed.
    pub(crate) async fn close(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(mut handle) = self.handle.take() {
            if let Err(failure) = handle.close().await {
                tracing::warn!(error = %failure, "closing native connection failed");
            }
        }
    }
}
