use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

/// Values that can travel through a command parameter, a scalar result, or a
/// result-set cell.
///
/// One enum shared across backends so caller code never branches on driver
/// types:
/// ```rust
/// use sql_session::prelude::*;
///
/// let row = vec![
///     SqlValue::Int(42),
///     SqlValue::Null,
///     SqlValue::Json(serde_json::json!({ "qty": 3 })),
/// ];
/// assert!(row[1].is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        match self {
            Self::Int(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Integer-backed booleans (0/1) also count; several backends store
    /// booleans that way.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            _ => None,
        }
    }

    /// Timestamps stored as text parse on the fly, with or without
    /// fractional seconds.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(value) => Some(*value),
            Self::Text(text) => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
                .ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_accessor_accepts_zero_and_one() {
        assert_eq!(SqlValue::Bool(true).as_bool(), Some(true));
        assert_eq!(SqlValue::Int(0).as_bool(), Some(false));
        assert_eq!(SqlValue::Int(1).as_bool(), Some(true));
        assert_eq!(SqlValue::Int(2).as_bool(), None);
        assert_eq!(SqlValue::Text("true".into()).as_bool(), None);
    }

    #[test]
    fn timestamp_accessor_parses_text_forms() {
        let plain = SqlValue::Text("2026-08-27 09:30:00".into());
        assert!(plain.as_timestamp().is_some());

        let fractional = SqlValue::Text("2026-08-27 09:30:00.125".into());
        assert!(fractional.as_timestamp().is_some());

        assert_eq!(SqlValue::Text("not a date".into()).as_timestamp(), None);
        assert_eq!(SqlValue::Int(0).as_timestamp(), None);
    }
}
