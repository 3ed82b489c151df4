use std::collections::HashMap;

use crate::error::{DbError, DriverFailure, ErrorKind};

/// Policy that converts a raw driver failure into a normalized [`DbError`].
///
/// Implementations must be pure and total: no I/O, no mutation, and every
/// failure maps to exactly one error value. Swapping backends only requires
/// swapping the classifier handed to the session builder.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, failure: &DriverFailure) -> DbError;
}

/// Fallback policy: wraps any failure as [`ErrorKind::Unexpected`], carrying
/// the original message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, failure: &DriverFailure) -> DbError {
        DbError::new(
            ErrorKind::Unexpected,
            failure.code.as_deref().unwrap_or("unknown"),
            failure.message.clone(),
        )
    }
}

/// Table-driven per-backend policy.
///
/// A failure whose native code appears in the table maps to the listed kind.
/// A failure that carries a code the table does not know is still a
/// recognized database failure and maps to [`ErrorKind::Database`]. A
/// failure with no code at all falls through to [`ErrorKind::Unexpected`].
#[derive(Debug, Clone, Default)]
pub struct CodeTableClassifier {
    table: HashMap<String, ErrorKind>,
}

impl CodeTableClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a classifier from `(code, kind)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, ErrorKind)>,
        S: Into<String>,
    {
        Self {
            table: pairs
                .into_iter()
                .map(|(code, kind)| (code.into(), kind))
                .collect(),
        }
    }

    /// Add or replace a single code mapping.
    #[must_use]
    pub fn with(mut self, code: impl Into<String>, kind: ErrorKind) -> Self {
        self.table.insert(code.into(), kind);
        self
    }
}

impl ErrorClassifier for CodeTableClassifier {
    fn classify(&self, failure: &DriverFailure) -> DbError {
        match failure.code.as_deref() {
            Some(code) => {
                let kind = self.table.get(code).copied().unwrap_or(ErrorKind::Database);
                DbError::new(kind, code, failure.message.clone())
            }
            None => DbError::new(ErrorKind::Unexpected, "unknown", failure.message.clone()),
        }
    }
}
