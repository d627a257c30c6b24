//! `inolink-types` – shared vocabulary for the inolink crates.
//!
//! Holds the value objects that cross crate boundaries ([`Reading`],
//! [`Value`], [`LifecycleEvent`]), the unit system in [`units`], and the
//! single error type [`InoError`] used by every layer.

pub mod units;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use units::{Dimension, Quantity, Unit};

/// A decoded instrument value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Quantity(Quantity),
    Bool(bool),
}

impl Value {
    /// Unit tag of the value; booleans are dimensionless.
    pub fn unit(&self) -> Unit {
        match self {
            Value::Quantity(q) => q.unit,
            Value::Bool(_) => Unit::Dimensionless,
        }
    }

    /// Numeric view of the value (`true` → 1.0) for plotting.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Quantity(q) => q.magnitude,
            Value::Bool(b) => f64::from(u8::from(*b)),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Quantity(_) => None,
        }
    }

    pub fn as_quantity(&self) -> Option<Quantity> {
        match self {
            Value::Quantity(q) => Some(*q),
            Value::Bool(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Quantity(q) => q.fmt(f),
            Value::Bool(b) => b.fmt(f),
        }
    }
}

impl From<Quantity> for Value {
    fn from(q: Quantity) -> Self {
        Value::Quantity(q)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// One timestamped sample of a feature.
///
/// Produced once per successful poller tick and handed to subscribers behind
/// an `Arc`; it is never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Polling session that produced this sample.
    pub session: Uuid,
    pub feature: String,
    pub value: Value,
    /// Monotonic offset from the start of the session.
    pub elapsed: Duration,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    pub fn unit(&self) -> Unit {
        self.value.unit()
    }
}

/// Why a poller left the `Running` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The device went away mid-session.
    Disconnected(String),
    /// The feature table rejected the polled feature.
    Fault(String),
}

/// Poller state transitions, as seen by UI-side consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Started { session: Uuid },
    Stopped { session: Uuid, reason: StopReason },
}

/// Error taxonomy shared by the link, proxy, bus, and poller.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InoError {
    #[error("Timeout: no response to '{command}' within {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Malformed response to '{command}': {details}")]
    MalformedResponse { command: String, details: String },

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Invalid operation on '{feature}': {details}")]
    InvalidOperation { feature: String, details: String },

    #[error("Unit error: {0}")]
    Unit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl InoError {
    /// Errors that cost one sample but leave the session usable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InoError::Timeout { .. } | InoError::MalformedResponse { .. }
        )
    }

    /// Errors that end the current session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, InoError::Disconnected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_roundtrip() {
        let reading = Reading {
            session: Uuid::new_v4(),
            feature: "temperature".to_string(),
            value: Value::Quantity(Quantity::new(21.5, Unit::DegC)),
            elapsed: Duration::from_millis(1500),
            captured_at: Utc::now(),
        };
        let json = serde_json::to_string(&reading).unwrap();
        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
        assert_eq!(back.unit(), Unit::DegC);
    }

    #[test]
    fn lifecycle_event_roundtrip() {
        let event = LifecycleEvent::Stopped {
            session: Uuid::new_v4(),
            reason: StopReason::Disconnected("unplugged".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: LifecycleEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn error_classification() {
        let timeout = InoError::Timeout {
            command: "TEMP".to_string(),
            timeout_ms: 1000,
        };
        assert!(timeout.is_transient());
        assert!(!timeout.is_fatal());

        let gone = InoError::Disconnected("eof".to_string());
        assert!(gone.is_fatal());
        assert!(!gone.is_transient());

        let unknown = InoError::UnknownFeature("humidity".to_string());
        assert!(!unknown.is_transient());
        assert!(!unknown.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = InoError::InvalidOperation {
            feature: "temperature".to_string(),
            details: "feature is read-only".to_string(),
        };
        assert!(err.to_string().contains("temperature"));
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn bool_value_is_dimensionless() {
        let v = Value::from(true);
        assert_eq!(v.unit(), Unit::Dimensionless);
        assert_eq!(v.as_f64(), 1.0);
        assert_eq!(v.as_bool(), Some(true));
        assert!(v.as_quantity().is_none());
    }
}
