use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::events::{CallObserver, EventHub, SqlCall};

/// A disposable cross-cutting add-on owned by a session.
///
/// Features are released when the owning session is disposed; `release`
/// must be safe to call once and should undo whatever the feature wired up
/// (subscriptions, counters, background handles).
pub trait SessionFeature: Send {
    fn name(&self) -> &str;

    /// Tear the feature down. Called exactly once by the host.
    fn release(&mut self);
}

/// Ownership list of session features, released in registration order.
#[derive(Default)]
pub struct FeatureHost {
    features: Vec<Box<dyn SessionFeature>>,
}

impl FeatureHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, feature: Box<dyn SessionFeature>) {
        self.features.push(feature);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Release every feature in registration order. A panicking release is
    /// suppressed and logged so teardown is total. Idempotent.
    pub fn release_all(&mut self) {
        for mut feature in self.features.drain(..) {
            let name = feature.name().to_owned();
            if catch_unwind(AssertUnwindSafe(|| feature.release())).is_err() {
                tracing::warn!(feature = %name, "feature release panicked");
            }
        }
    }
}

impl std::fmt::Debug for FeatureHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.features.iter().map(|f| f.name()).collect();
        f.debug_struct("FeatureHost").field("features", &names).finish()
    }
}

/// Built-in logging feature: subscribes a tracing-backed observer to the
/// session's event hub and unsubscribes when released.
pub struct SqlLogger {
    hub: EventHub,
    observer: Option<CallObserver>,
}

impl SqlLogger {
    /// Attach a logger to the given hub.
    #[must_use]
    pub fn attach(hub: &EventHub) -> Self {
        let observer: CallObserver = Arc::new(|call: &SqlCall| {
            let millis = call.duration().as_millis();
            if call.is_error() {
                tracing::warn!(sql = call.text(), duration_ms = millis, "sql call failed");
            } else {
                tracing::info!(sql = call.text(), duration_ms = millis, "sql call completed");
            }
        });
        hub.subscribe(Arc::clone(&observer));
        Self {
            hub: hub.clone(),
            observer: Some(observer),
        }
    }
}

impl SessionFeature for SqlLogger {
    fn name(&self) -> &str {
        "sql-logger"
    }

    fn release(&mut self) {
        if let Some(observer) = self.observer.take() {
            self.hub.unsubscribe(&observer);
        }
    }
}
