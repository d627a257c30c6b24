//! [`InstrumentProxy`] – typed access to a board's features.
//!
//! Each `read` or `write` is exactly one [`SerialLink`] exchange.  The feature
//! name and direction are checked first; a misconfigured call fails with
//! [`InoError::UnknownFeature`] or [`InoError::InvalidOperation`] without a
//! single byte reaching the wire.

use inolink_types::{InoError, Value};
use tracing::{debug, instrument};

use crate::feature::{Feature, FeatureTable};
use crate::link::SerialLink;

/// Acknowledgement frame the firmware sends after a successful write.
pub const WRITE_ACK: &str = "OK";

/// Typed front end to one board.
pub struct InstrumentProxy {
    name: String,
    features: FeatureTable,
    link: SerialLink,
}

impl InstrumentProxy {
    pub fn new(name: impl Into<String>, features: FeatureTable, link: SerialLink) -> Self {
        Self {
            name: name.into(),
            features,
            link,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    pub fn link(&self) -> &SerialLink {
        &self.link
    }

    /// Resolve `name` and make sure it can be read.
    pub fn readable(&self, name: &str) -> Result<&Feature, InoError> {
        let feature = self.features.get(name)?;
        if feature.access().can_read() {
            Ok(feature)
        } else {
            Err(InoError::InvalidOperation {
                feature: name.to_string(),
                details: "feature is write-only".to_string(),
            })
        }
    }

    /// Resolve `name` and make sure it can be written.
    pub fn writable(&self, name: &str) -> Result<&Feature, InoError> {
        let feature = self.features.get(name)?;
        if feature.access().can_write() {
            Ok(feature)
        } else {
            Err(InoError::InvalidOperation {
                feature: name.to_string(),
                details: "feature is read-only".to_string(),
            })
        }
    }

    /// Query the current value of `feature`.
    #[instrument(skip(self), fields(instrument = %self.name))]
    pub async fn read(&self, feature: &str) -> Result<Value, InoError> {
        let f = self.readable(feature)?;
        let response = self.link.send(f.command()).await?;
        let value = f.decode(&response)?;
        debug!(%value, "read");
        Ok(value)
    }

    /// Set `feature` to `value` and wait for the board's acknowledgement.
    #[instrument(skip(self, value), fields(instrument = %self.name))]
    pub async fn write(&self, feature: &str, value: impl Into<Value>) -> Result<(), InoError> {
        let f = self.writable(feature)?;
        let value = value.into();
        let command = f.encode_write(&value)?;
        let response = self.link.send(&command).await?;
        if response.trim() == WRITE_ACK {
            debug!(%value, "written");
            Ok(())
        } else {
            Err(InoError::MalformedResponse {
                command,
                details: format!("expected '{WRITE_ACK}', got '{}'", response.trim()),
            })
        }
    }

    /// Close the underlying link.  See [`SerialLink::close`].
    pub async fn close(&self) -> Result<bool, InoError> {
        self.link.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{self, LED, TEMPERATURE};
    use crate::link::LinkSettings;
    use crate::sim::SimulatedBoard;
    use inolink_types::{Quantity, Unit};
    use std::time::Duration;

    fn settings() -> LinkSettings {
        LinkSettings {
            timeout: Duration::from_millis(200),
            retries: 0,
            settle: Duration::ZERO,
        }
    }

    fn proxy_for(board: &SimulatedBoard) -> InstrumentProxy {
        let link = SerialLink::new(board.connect(), settings());
        InstrumentProxy::new("uno", drivers::combined_board().unwrap(), link)
    }

    #[tokio::test]
    async fn reads_temperature_in_celsius() -> Result<(), Box<dyn std::error::Error>> {
        let board = SimulatedBoard::new();
        board.set_temperature(24.25);
        let proxy = proxy_for(&board);

        let value = proxy.read(TEMPERATURE).await?;
        assert_eq!(value, Value::Quantity(Quantity::new(24.25, Unit::DegC)));
        Ok(())
    }

    #[tokio::test]
    async fn led_write_then_read_back() -> Result<(), Box<dyn std::error::Error>> {
        let board = SimulatedBoard::new();
        let proxy = proxy_for(&board);

        proxy.write(LED, true).await?;
        assert_eq!(proxy.read(LED).await?, Value::Bool(true));

        proxy.write(LED, false).await?;
        assert_eq!(proxy.read(LED).await?, Value::Bool(false));
        assert!(!board.led());
        Ok(())
    }

    #[tokio::test]
    async fn writing_read_only_feature_sends_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let board = SimulatedBoard::new();
        let proxy = proxy_for(&board);

        let err = proxy
            .write(TEMPERATURE, Quantity::new(30.0, Unit::DegC))
            .await
            .unwrap_err();
        assert!(matches!(err, InoError::InvalidOperation { .. }), "got {err:?}");

        // The next exchange is the first thing the board ever sees.
        proxy.read(TEMPERATURE).await?;
        assert_eq!(board.commands(), vec!["TEMP".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_feature_fails_fast() {
        let board = SimulatedBoard::new();
        let proxy = proxy_for(&board);
        assert!(matches!(
            proxy.read("humidity").await,
            Err(InoError::UnknownFeature(_))
        ));
        assert!(matches!(
            proxy.write("humidity", true).await,
            Err(InoError::UnknownFeature(_))
        ));
    }

    #[tokio::test]
    async fn reading_write_only_feature_is_rejected() {
        let board = SimulatedBoard::new();
        let table = FeatureTable::new(vec![drivers::led_feature().write_only()]).unwrap();
        let proxy = InstrumentProxy::new("uno", table, SerialLink::new(board.connect(), settings()));
        assert!(matches!(
            proxy.read(LED).await,
            Err(InoError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn garbage_reply_is_malformed() {
        let board = SimulatedBoard::new();
        let proxy = proxy_for(&board);
        board.send_garbage(1);
        assert!(matches!(
            proxy.read(TEMPERATURE).await,
            Err(InoError::MalformedResponse { .. })
        ));
        // The session survives a bad frame.
        assert!(proxy.read(TEMPERATURE).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_write_is_malformed() {
        let board = SimulatedBoard::new();
        let table = FeatureTable::new(vec![drivers::led_feature(), Feature::boolean("relay", "RLY")]).unwrap();
        let proxy = InstrumentProxy::new("uno", table, SerialLink::new(board.connect(), settings()));
        let err = proxy.write("relay", true).await.unwrap_err();
        assert!(matches!(err, InoError::MalformedResponse { .. }), "got {err:?}");
    }
}
