//! Physical units and unit-tagged magnitudes.
//!
//! A [`Quantity`] pairs an `f64` magnitude with an explicit [`Unit`].  There
//! is no implicit coercion: converting between units always goes through
//! [`Quantity::to`], which fails when the two units measure different
//! dimensions (e.g. seconds to degrees Celsius).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::InoError;

/// The physical dimension a [`Unit`] measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Temperature,
    Time,
    /// Plain numbers and booleans.
    None,
}

/// Unit tags understood by the instrument layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    DegC,
    DegF,
    Kelvin,
    Millisecond,
    Second,
    Minute,
    #[default]
    Dimensionless,
}

impl Unit {
    /// Dimension measured by this unit.
    pub fn dimension(self) -> Dimension {
        match self {
            Unit::DegC | Unit::DegF | Unit::Kelvin => Dimension::Temperature,
            Unit::Millisecond | Unit::Second | Unit::Minute => Dimension::Time,
            Unit::Dimensionless => Dimension::None,
        }
    }

    /// Short display symbol, e.g. `"°C"` or `"ms"`.
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::DegC => "°C",
            Unit::DegF => "°F",
            Unit::Kelvin => "K",
            Unit::Millisecond => "ms",
            Unit::Second => "s",
            Unit::Minute => "min",
            Unit::Dimensionless => "",
        }
    }

    // Map a magnitude in this unit onto the dimension's base unit
    // (kelvin for temperature, milliseconds for time).
    fn to_base(self, v: f64) -> f64 {
        match self {
            Unit::DegC => v + 273.15,
            Unit::DegF => (v - 32.0) * 5.0 / 9.0 + 273.15,
            Unit::Kelvin => v,
            Unit::Millisecond => v,
            Unit::Second => v * 1_000.0,
            Unit::Minute => v * 60_000.0,
            Unit::Dimensionless => v,
        }
    }

    fn from_base(self, v: f64) -> f64 {
        match self {
            Unit::DegC => v - 273.15,
            Unit::DegF => (v - 273.15) * 9.0 / 5.0 + 32.0,
            Unit::Kelvin => v,
            Unit::Millisecond => v,
            Unit::Second => v / 1_000.0,
            Unit::Minute => v / 60_000.0,
            Unit::Dimensionless => v,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = InoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degc" | "°c" | "celsius" => Ok(Unit::DegC),
            "degf" | "°f" | "fahrenheit" => Ok(Unit::DegF),
            "k" | "kelvin" => Ok(Unit::Kelvin),
            "ms" | "millisecond" | "milliseconds" => Ok(Unit::Millisecond),
            "s" | "sec" | "second" | "seconds" => Ok(Unit::Second),
            "min" | "minute" | "minutes" => Ok(Unit::Minute),
            "" => Ok(Unit::Dimensionless),
            other => Err(InoError::Unit(format!("unrecognised unit '{other}'"))),
        }
    }
}

/// A magnitude tagged with its [`Unit`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub magnitude: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(magnitude: f64, unit: Unit) -> Self {
        Self { magnitude, unit }
    }

    /// Convert to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`InoError::Unit`] when `target` measures a different
    /// dimension than `self.unit`.
    pub fn to(&self, target: Unit) -> Result<Quantity, InoError> {
        if self.unit.dimension() != target.dimension() {
            return Err(InoError::Unit(format!(
                "cannot convert {} to {}",
                describe(self.unit),
                describe(target)
            )));
        }
        if self.unit == target {
            return Ok(*self);
        }
        Ok(Quantity::new(
            target.from_base(self.unit.to_base(self.magnitude)),
            target,
        ))
    }
}

fn describe(unit: Unit) -> &'static str {
    match unit {
        Unit::Dimensionless => "a dimensionless value",
        other => other.symbol(),
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Unit::Dimensionless => write!(f, "{}", self.magnitude),
            unit => write!(f, "{} {}", self.magnitude, unit),
        }
    }
}

impl FromStr for Quantity {
    type Err = InoError;

    /// Parse `"5 s"`, `"250ms"`, `"21.5 degC"` or a bare number
    /// (dimensionless).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let magnitude: f64 = number
            .parse()
            .map_err(|_| InoError::Unit(format!("'{s}' does not start with a number")))?;
        Ok(Quantity::new(magnitude, unit.parse()?))
    }
}
