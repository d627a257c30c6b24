//! [`SeriesRecorder`] – the chart buffer.
//!
//! Subscribe it to both lanes of the bus.  It keeps the current session's
//! samples of one feature as `(t, value)` points, `t` in seconds since the
//! session started and `value` in the configured display unit.  A new
//! `Started` clears the buffer; `Stopped` leaves it in place for export.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use inolink_middleware::Observer;
use inolink_types::{InoError, LifecycleEvent, Reading, Unit, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of points kept per session.
pub const DEFAULT_MAX_POINTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Seconds since the session started.
    pub t: f64,
    pub value: f64,
}

/// A recorded session, ready for plotting or export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub feature: String,
    pub unit: Unit,
    pub session: Option<Uuid>,
    pub points: Vec<Point>,
}

impl Series {
    pub fn last(&self) -> Option<Point> {
        self.points.last().copied()
    }

    /// Smallest and largest value, if any.
    pub fn range(&self) -> Option<(f64, f64)> {
        let mut values = self.points.iter().map(|p| p.value);
        let first = values.next()?;
        Some(values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

struct Buffer {
    session: Option<Uuid>,
    points: VecDeque<Point>,
}

pub struct SeriesRecorder {
    feature: String,
    unit: Unit,
    max_points: usize,
    buffer: Mutex<Buffer>,
}

impl SeriesRecorder {
    /// Record `feature`, converting quantities to `unit`.
    pub fn new(feature: impl Into<String>, unit: Unit) -> Arc<Self> {
        Self::with_capacity(feature, unit, DEFAULT_MAX_POINTS)
    }

    /// Like [`new`](Self::new), keeping at most `max_points` (oldest dropped
    /// first).
    pub fn with_capacity(feature: impl Into<String>, unit: Unit, max_points: usize) -> Arc<Self> {
        Arc::new(Self {
            feature: feature.into(),
            unit,
            max_points: max_points.max(1),
            buffer: Mutex::new(Buffer {
                session: None,
                points: VecDeque::new(),
            }),
        })
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn len(&self) -> usize {
        self.buffer().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().points.is_empty()
    }

    pub fn snapshot(&self) -> Series {
        let buffer = self.buffer();
        Series {
            feature: self.feature.clone(),
            unit: self.unit,
            session: buffer.session,
            points: buffer.points.iter().copied().collect(),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn display_value(&self, value: &Value) -> Result<f64, InoError> {
        match value {
            Value::Quantity(q) => Ok(q.to(self.unit)?.magnitude),
            Value::Bool(_) => Ok(value.as_f64()),
        }
    }
}

impl Observer<Reading> for SeriesRecorder {
    fn notify(&self, reading: &Arc<Reading>) -> Result<(), InoError> {
        if reading.feature != self.feature {
            return Ok(());
        }
        let value = self.display_value(&reading.value)?;
        let mut buffer = self.buffer();
        // Late samples from an earlier session are not part of this chart.
        if buffer.session.is_some_and(|s| s != reading.session) {
            return Ok(());
        }
        buffer.session = Some(reading.session);
        if buffer.points.len() == self.max_points {
            buffer.points.pop_front();
        }
        buffer.points.push_back(Point {
            t: reading.elapsed.as_secs_f64(),
            value,
        });
        Ok(())
    }
}

impl Observer<LifecycleEvent> for SeriesRecorder {
    fn notify(&self, event: &Arc<LifecycleEvent>) -> Result<(), InoError> {
        if let LifecycleEvent::Started { session } = **event {
            let mut buffer = self.buffer();
            buffer.session = Some(session);
            buffer.points.clear();
        }
        Ok(())
    }
}
