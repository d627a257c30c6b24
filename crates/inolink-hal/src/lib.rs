//! `inolink-hal` – talking to the board.
//!
//! Everything below the poller that touches the wire lives here.
//!
//! # Modules
//!
//! - [`transport`] – the byte-stream seam ([`Transport`]) and opening real
//!   serial ports through `tokio-serial`.
//! - [`link`] – [`Connection`] (exclusive owner of one open port) and
//!   [`SerialLink`], which runs strictly request/response `\n`-framed
//!   exchanges with a bounded timeout and retry budget.
//! - [`feature`] – [`Feature`] declarations and the immutable
//!   [`FeatureTable`]; value encoding and response decoding.
//! - [`proxy`] – [`InstrumentProxy`]: typed `read`/`write` by feature name,
//!   validated before any byte is sent.
//! - [`drivers`] – stock feature tables for the Arduino sketches.
//! - [`sim`] – [`SimulatedBoard`], an in-process stand-in for the firmware
//!   used by tests and the `sim` port.

pub mod drivers;
pub mod feature;
pub mod link;
pub mod proxy;
pub mod sim;
pub mod transport;

pub use feature::{Access, Feature, FeatureTable, ValueKind};
pub use link::{Connection, LinkSettings, SerialLink};
pub use proxy::InstrumentProxy;
pub use sim::SimulatedBoard;
pub use transport::{SIM_PORT, Transport};
