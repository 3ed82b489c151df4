use std::sync::Arc;

use tokio::sync::Mutex;

use crate::classify::ErrorClassifier;
use crate::driver::DriverTransaction;
use crate::error::{SessionError, SessionResult, UsageError};

/// The session's single active-transaction slot. Shared between the session
/// (which checks it before beginning a new transaction) and the handle the
/// caller holds; the slot, not the handle, is the source of truth for
/// "is a transaction active".
pub(crate) type TxSlot = Arc<Mutex<Option<TransactionHolder>>>;

/// Wraps the native transaction and tracks whether it was committed.
pub(crate) struct TransactionHolder {
    native: Box<dyn DriverTransaction>,
    committed: bool,
}

impl TransactionHolder {
    pub(crate) fn new(native: Box<dyn DriverTransaction>) -> Self {
        Self {
            native,
            committed: false,
        }
    }

    /// Best-effort rollback for cleanup paths. Never rolls back a committed
    /// transaction; failures are logged and swallowed, since teardown must
    /// not fail louder than whatever caused it.
    pub(crate) async fn rollback_quiet(&mut self) {
        if self.committed {
            return;
        }
        if let Err(failure) = self.native.rollback().await {
            tracing::warn!(error = %failure, "rollback during cleanup failed");
        }
    }
}

/// Disposable transaction handle returned by
/// [`Session::begin_transaction`](crate::session::Session::begin_transaction).
///
/// Commit and rollback each complete the transaction exactly once; dropping
/// an uncompleted handle rolls back on a background task and frees the
/// session's transaction slot.
///
/// Because drop cleanup is spawned, the slot may still be occupied for a
/// short window after the handle is dropped, and a `begin_transaction`
/// issued in that window can report a transaction as still active. Callers
/// that want to start the next transaction immediately should call
/// [`Transaction::rollback`] instead of relying on drop; it frees the slot
/// before returning.
pub struct Transaction {
    slot: TxSlot,
    classifier: Arc<dyn ErrorClassifier>,
    completed: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(slot: TxSlot, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self {
            slot,
            classifier,
            completed: false,
        }
    }

    /// Commit the native transaction and clear the session's slot.
    ///
    /// A failed commit is classified and leaves the transaction active so
    /// the caller can still roll back explicitly.
    ///
    /// # Errors
    /// `UsageError::TransactionCompleted` if this handle already committed
    /// or rolled back; a classified error if the native commit fails.
    pub async fn commit(&mut self) -> SessionResult<()> {
        if self.completed {
            return Err(UsageError::TransactionCompleted.into());
        }
        let mut guard = self.slot.lock().await;
        let Some(holder) = guard.as_mut() else {
            return Err(UsageError::TransactionCompleted.into());
        };
        match holder.native.commit().await {
            Ok(()) => {
                holder.committed = true;
                *guard = None;
                self.completed = true;
                Ok(())
            }
            Err(failure) => Err(SessionError::Db(self.classifier.classify(&failure))),
        }
    }

    /// Roll back the native transaction and clear the session's slot.
    ///
    /// Rollback is a cleanup path, not a reportable operation: native
    /// rollback failures are logged and swallowed.
    ///
    /// # Errors
    /// `UsageError::TransactionCompleted` if this handle already committed
    /// or rolled back.
    pub async fn rollback(&mut self) -> SessionResult<()> {
        if self.completed {
            return Err(UsageError::TransactionCompleted.into());
        }
        let mut guard = self.slot.lock().await;
        let Some(mut holder) = guard.take() else {
            return Err(UsageError::TransactionCompleted.into());
        };
        holder.rollback_quiet().await;
        self.completed = true;
        Ok(())
    }

    /// Whether this handle has committed or rolled back.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let slot = Arc::clone(&self.slot);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut guard = slot.lock().await;
                if let Some(mut holder) = guard.take() {
                    holder.rollback_quiet().await;
                }
            });
        }
    }
}
