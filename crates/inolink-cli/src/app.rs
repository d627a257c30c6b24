//! Wiring: board → link → proxy → poller → controller, plus the shell's own
//! subscribers.

use std::sync::Arc;

use colored::Colorize;
use inolink_hal::{InstrumentProxy, SerialLink, SimulatedBoard, drivers};
use inolink_middleware::{EventBus, QueueReceiver};
use inolink_runtime::{LifecycleController, Poller, SeriesRecorder};
use inolink_types::{InoError, LifecycleEvent, Reading, StopReason, Unit, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;

/// Everything a running shell session holds on to.
pub struct App {
    pub proxy: Arc<InstrumentProxy>,
    pub controller: LifecycleController,
    pub recorder: Arc<SeriesRecorder>,
    pub chart_unit: Unit,
    // Keeps the simulated firmware plugged in for the life of the session.
    _board: Option<SimulatedBoard>,
    printers: Vec<JoinHandle<()>>,
}

impl App {
    /// Open the configured port and assemble the session.
    ///
    /// # Errors
    ///
    /// [`InoError::Config`] for invalid settings, [`InoError::Disconnected`]
    /// when the port cannot be opened, [`InoError::UnknownFeature`] /
    /// [`InoError::InvalidOperation`] when the configured feature cannot be
    /// polled.
    pub async fn connect(cfg: &Config) -> Result<Self, InoError> {
        cfg.validate()?;
        let interval = cfg.poll_interval()?;
        let chart_unit = cfg.chart_unit()?;

        let (link, board) = if cfg.is_simulated() {
            let board = SimulatedBoard::new().with_wobble(0.4);
            (SerialLink::new(board.connect(), cfg.link_settings()), Some(board))
        } else {
            (SerialLink::open(&cfg.port, cfg.baud_rate, cfg.link_settings()).await?, None)
        };
        let proxy = Arc::new(InstrumentProxy::new(cfg.port.clone(), drivers::combined_board()?, link));

        let bus = EventBus::new();
        let recorder = SeriesRecorder::new(cfg.feature.clone(), chart_unit);
        bus.readings.subscribe(&recorder);
        bus.lifecycle.subscribe(&recorder);
        let (_, readings) = bus.readings.subscribe_queue(cfg.queue_capacity);

        let poller = match Poller::new(Arc::clone(&proxy), cfg.feature.clone(), interval, bus) {
            Ok(poller) => poller,
            Err(e) => {
                close_quietly(&proxy).await;
                return Err(e);
            }
        };
        let controller = LifecycleController::new(Arc::new(poller));
        let (_, events) = controller.events().subscribe_queue(16);

        let printers = vec![
            tokio::spawn(print_readings(readings, chart_unit)),
            tokio::spawn(print_lifecycle(events)),
        ];
        info!(port = %cfg.port, feature = %cfg.feature, %interval, "session ready");

        Ok(Self {
            proxy,
            controller,
            recorder,
            chart_unit,
            _board: board,
            printers,
        })
    }

    /// Stop polling and release the port.
    pub async fn shutdown(self) {
        self.controller.set_running(false).await;
        close_quietly(&self.proxy).await;
        for printer in self.printers {
            printer.abort();
        }
    }
}

async fn close_quietly(proxy: &InstrumentProxy) {
    if let Err(e) = proxy.close().await {
        warn!(error = %e, "error while closing the link");
    }
}

/// Render `value` in `unit` when the dimensions agree, otherwise as is.
pub fn display_value(value: &Value, unit: Unit) -> String {
    match value {
        Value::Quantity(q) => match q.to(unit) {
            Ok(converted) => format!("{:.2} {}", converted.magnitude, converted.unit),
            Err(_) => q.to_string(),
        },
        Value::Bool(b) => (if *b { "on" } else { "off" }).to_string(),
    }
}

async fn print_readings(mut rx: QueueReceiver<Reading>, unit: Unit) {
    while let Some(reading) = rx.recv().await {
        println!(
            "  {} {} = {}",
            format!("[{:>8.2}s]", reading.elapsed.as_secs_f64()).dimmed(),
            reading.feature,
            display_value(&reading.value, unit).bold()
        );
    }
}

async fn print_lifecycle(mut rx: QueueReceiver<LifecycleEvent>) {
    while let Some(event) = rx.recv().await {
        match &*event {
            LifecycleEvent::Started { session } => {
                println!("  {} polling started (session {})", "●".green(), session.to_string().dimmed());
            }
            LifecycleEvent::Stopped { reason, .. } => match reason {
                StopReason::Requested => println!("  {} polling stopped", "■".yellow()),
                StopReason::Disconnected(why) => {
                    println!("  {} device disconnected: {}", "✗".red().bold(), why);
                }
                StopReason::Fault(why) => println!("  {} polling fault: {}", "✗".red().bold(), why),
            },
        }
    }
}
