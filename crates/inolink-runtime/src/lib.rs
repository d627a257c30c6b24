//! `inolink-runtime` – the acquisition loop.
//!
//! # Modules
//!
//! - [`poller`] – [`Poller`][poller::Poller]: reads one feature on a fixed
//!   [`PollInterval`][poller::PollInterval] and publishes every sample on the
//!   [`EventBus`][inolink_middleware::EventBus].  Transient link errors cost a
//!   sample; a disconnect ends the session.
//! - [`lifecycle`] – [`LifecycleController`][lifecycle::LifecycleController]:
//!   maps the on/off toggle onto `start`/`stop` and mirrors the running state
//!   into a `watch` channel.
//! - [`recorder`] – [`SeriesRecorder`][recorder::SeriesRecorder]: buffers the
//!   current session's samples in display units for charting and export.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod lifecycle;
pub mod poller;
pub mod recorder;
pub mod telemetry;

pub use lifecycle::LifecycleController;
pub use poller::{PollInterval, Poller, PollerState, PollerStats};
pub use recorder::{Point, Series, SeriesRecorder};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
