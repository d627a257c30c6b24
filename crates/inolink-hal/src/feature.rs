//! Instrument features: named, typed, direction-constrained properties.
//!
//! A [`Feature`] knows its wire mnemonic and how to turn a [`Value`] into a
//! command argument and a response frame back into a [`Value`].  Features
//! are collected into a [`FeatureTable`] that is fixed once built.

use inolink_types::{InoError, Quantity, Unit, Value};

/// Which directions a feature supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn can_read(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// How values travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Decimal magnitude in the feature's unit, e.g. `21.50`.
    Quantity,
    /// `0` or `1`.
    Bool,
}

/// A single instrument property.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    name: String,
    command: String,
    unit: Unit,
    access: Access,
    kind: ValueKind,
}

impl Feature {
    /// A read-write numeric feature measured in `unit`.
    pub fn quantity(name: impl Into<String>, command: impl Into<String>, unit: Unit) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            unit,
            access: Access::ReadWrite,
            kind: ValueKind::Quantity,
        }
    }

    /// A read-write boolean feature.
    pub fn boolean(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            unit: Unit::Dimensionless,
            access: Access::ReadWrite,
            kind: ValueKind::Bool,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.access = Access::WriteOnly;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Build the `<CMD> <ARG>` frame body for writing `value`.
    ///
    /// Quantities are converted to the feature's unit first.
    ///
    /// # Errors
    ///
    /// [`InoError::InvalidOperation`] if the value has the wrong kind or a
    /// unit that cannot be converted.
    pub fn encode_write(&self, value: &Value) -> Result<String, InoError> {
        let arg = match (self.kind, value) {
            (ValueKind::Bool, Value::Bool(b)) => (if *b { "1" } else { "0" }).to_string(),
            (ValueKind::Quantity, Value::Quantity(q)) => {
                let converted = q.to(self.unit).map_err(|e| self.invalid(e.to_string()))?;
                converted.magnitude.to_string()
            }
            (kind, other) => {
                return Err(self.invalid(format!("expected a {kind:?} value, got {other}")));
            }
        };
        Ok(format!("{} {arg}", self.command))
    }

    /// Parse a response frame into a value of this feature's kind.
    ///
    /// # Errors
    ///
    /// [`InoError::MalformedResponse`] when the frame does not hold a value of
    /// the expected kind.
    pub fn decode(&self, response: &str) -> Result<Value, InoError> {
        let text = response.trim();
        match self.kind {
            ValueKind::Bool => match text {
                "0" => Ok(Value::Bool(false)),
                "1" => Ok(Value::Bool(true)),
                _ => Err(self.malformed(format!("expected 0 or 1, got '{text}'"))),
            },
            ValueKind::Quantity => text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| Value::Quantity(Quantity::new(v, self.unit)))
                .ok_or_else(|| self.malformed(format!("expected a decimal number, got '{text}'"))),
        }
    }

    fn invalid(&self, details: String) -> InoError {
        InoError::InvalidOperation {
            feature: self.name.clone(),
            details,
        }
    }

    fn malformed(&self, details: String) -> InoError {
        InoError::MalformedResponse {
            command: self.command.clone(),
            details,
        }
    }
}

/// Immutable set of features keyed by name.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    features: Vec<Feature>,
}

impl FeatureTable {
    /// Build a table, rejecting duplicate names and mnemonics that cannot be
    /// sent as a single ASCII word.
    pub fn new(features: Vec<Feature>) -> Result<Self, InoError> {
        for (i, f) in features.iter().enumerate() {
            let valid_mnemonic = !f.command.is_empty()
                && f.command.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'?');
            if !valid_mnemonic {
                return Err(InoError::Config(format!(
                    "feature '{}' has an invalid command mnemonic '{}'",
                    f.name, f.command
                )));
            }
            if features[..i].iter().any(|other| other.name == f.name) {
                return Err(InoError::Config(format!("feature '{}' is declared twice", f.name)));
            }
        }
        Ok(Self { features })
    }

    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Result<&Feature, InoError> {
        self.features
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| InoError::UnknownFeature(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp() -> Feature {
        Feature::quantity("temperature", "TEMP", Unit::DegC).read_only()
    }

    #[test]
    fn access_flags() {
        assert!(Access::ReadOnly.can_read());
        assert!(!Access::ReadOnly.can_write());
        assert!(Access::WriteOnly.can_write());
        assert!(!Access::WriteOnly.can_read());
        assert!(Access::ReadWrite.can_read() && Access::ReadWrite.can_write());
    }

    #[test]
    fn bool_encodes_as_digit() {
        let led = Feature::boolean("led", "LED");
        assert_eq!(led.encode_write(&Value::Bool(true)).unwrap(), "LED 1");
        assert_eq!(led.encode_write(&Value::Bool(false)).unwrap(), "LED 0");
    }

    #[test]
    fn quantity_is_converted_before_encoding() {
        let period = Feature::quantity("blink_period", "BLNK", Unit::Millisecond);
        let cmd = period
            .encode_write(&Value::Quantity(Quantity::new(2.0, Unit::Second)))
            .unwrap();
        assert_eq!(cmd, "BLNK 2000");
    }

    #[test]
    fn wrong_kind_is_invalid_operation() {
        let led = Feature::boolean("led", "LED");
        let err = led
            .encode_write(&Value::Quantity(Quantity::new(1.0, Unit::Dimensionless)))
            .unwrap_err();
        assert!(matches!(err, InoError::InvalidOperation { .. }));

        let err = temp()
            .encode_write(&Value::Quantity(Quantity::new(5.0, Unit::Second)))
            .unwrap_err();
        assert!(matches!(err, InoError::InvalidOperation { .. }));
    }

    #[test]
    fn decode_quantity() {
        let v = temp().decode(" 23.75 ").unwrap();
        assert_eq!(v, Value::Quantity(Quantity::new(23.75, Unit::DegC)));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            temp().decode("hot"),
            Err(InoError::MalformedResponse { .. })
        ));
        assert!(matches!(
            temp().decode("NaN"),
            Err(InoError::MalformedResponse { .. })
        ));
        assert!(matches!(
            Feature::boolean("led", "LED").decode("2"),
            Err(InoError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn table_lookup_and_unknown() {
        let table = FeatureTable::new(vec![temp(), Feature::boolean("led", "LED")]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("led").unwrap().command(), "LED");
        assert!(matches!(table.get("humidity"), Err(InoError::UnknownFeature(_))));
    }

    #[test]
    fn table_rejects_duplicates_and_bad_mnemonics() {
        assert!(FeatureTable::new(vec![temp(), temp()]).is_err());
        assert!(FeatureTable::new(vec![Feature::boolean("led", "LED ON")]).is_err());
        assert!(FeatureTable::new(vec![Feature::boolean("led", "")]).is_err());
    }
}
