use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Execution telemetry for one completed command call.
///
/// Built as a [`PendingCall`] when the call starts and finalized exactly
/// once when it ends; immutable afterwards.
#[derive(Debug, Clone)]
pub struct SqlCall {
    text: String,
    started_at: DateTime<Utc>,
    duration: Duration,
    is_error: bool,
}

impl SqlCall {
    /// The SQL text or procedure name of the call.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Wall-clock time the call started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// How long the call took, stamped when it finished.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the call ended in a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

/// Call event under construction; duration not yet stamped.
pub(crate) struct PendingCall {
    text: String,
    started_at: DateTime<Utc>,
    timer: Instant,
}

impl PendingCall {
    pub(crate) fn begin(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            started_at: Utc::now(),
            timer: Instant::now(),
        }
    }

    pub(crate) fn finish(self, is_error: bool) -> SqlCall {
        SqlCall {
            text: self.text,
            started_at: self.started_at,
            duration: self.timer.elapsed(),
            is_error,
        }
    }
}

/// A telemetry subscriber. Registered and unregistered by `Arc` identity.
pub type CallObserver = Arc<dyn Fn(&SqlCall) + Send + Sync>;

/// In-process multicast register for call telemetry.
///
/// Publishing snapshots the subscriber list and invokes each subscriber
/// synchronously in registration order; a panicking subscriber is caught
/// and logged so telemetry can never break execution or starve later
/// subscribers. Cloning the hub shares the underlying list, which is how
/// features keep a handle for unsubscribing on release.
#[derive(Clone, Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<CallObserver>>>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber. Registering the same observer twice delivers
    /// events twice, per ordinary multicast semantics.
    pub fn subscribe(&self, observer: CallObserver) {
        self.lock().push(observer);
    }

    /// Remove the first subscriber matching by identity. Returns whether
    /// one was removed.
    pub fn unsubscribe(&self, observer: &CallObserver) -> bool {
        let mut subscribers = self.lock();
        if let Some(pos) = subscribers.iter().position(|s| Arc::ptr_eq(s, observer)) {
            subscribers.remove(pos);
            true
        } else {
            false
        }
    }

    /// Deliver an event to every current subscriber.
    pub fn publish(&self, call: &SqlCall) {
        let snapshot = self.lock().clone();
        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(call))).is_err() {
                tracing::warn!(sql = call.text(), "telemetry subscriber panicked");
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CallObserver>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
