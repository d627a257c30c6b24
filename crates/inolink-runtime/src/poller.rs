//! [`Poller`] – periodic sampling of one feature.
//!
//! # State machine
//!
//! ```text
//!           start()                 stop() / disconnect / fault
//!   Idle ───────────▶ Running ───────────────────────────────▶ Idle
//!         Started                        Stopped { reason }
//! ```
//!
//! `start` and `stop` are no-ops that return `false` in the wrong state, so
//! each transition emits its [`LifecycleEvent`] exactly once.  A `stop()`
//! racing a disconnect is settled by the session generation: whichever side
//! retires the generation first emits `Stopped`, the other does nothing.
//!
//! # Ticks
//!
//! The first tick fires one interval after `start`.  Each tick performs a
//! single `read`; ticks never overlap, and ticks missed while a slow read was
//! in flight are skipped and counted as overruns.
//!
//! | Read outcome | Effect |
//! |---|---|
//! | value | [`Reading`] published on the readings lane |
//! | `Timeout` / `MalformedResponse` | sample skipped, still `Running` |
//! | `Disconnected` | `Idle`, `Stopped { Disconnected }` |
//! | anything else | `Idle`, `Stopped { Fault }` |

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use inolink_hal::InstrumentProxy;
use inolink_middleware::EventBus;
use inolink_types::{Dimension, InoError, LifecycleEvent, Quantity, Reading, StopReason, Unit};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// PollInterval
// ─────────────────────────────────────────────────────────────────────────────

/// A validated, strictly positive sampling period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval(Duration);

impl PollInterval {
    pub fn new(period: Duration) -> Result<Self, InoError> {
        if period.is_zero() {
            return Err(InoError::Config("poll interval must be positive".to_string()));
        }
        Ok(Self(period))
    }

    pub fn from_millis(ms: u64) -> Result<Self, InoError> {
        Self::new(Duration::from_millis(ms))
    }

    /// Accept any time quantity; a dimensionless magnitude is read as
    /// milliseconds.
    pub fn from_quantity(q: Quantity) -> Result<Self, InoError> {
        let q = match q.unit.dimension() {
            Dimension::Time => q,
            Dimension::None => Quantity::new(q.magnitude, Unit::Millisecond),
            Dimension::Temperature => {
                return Err(InoError::Config(format!(
                    "poll interval must be a time, got '{q}'"
                )));
            }
        };
        let ms = q
            .to(Unit::Millisecond)
            .map_err(|e| InoError::Config(e.to_string()))?
            .magnitude;
        if !ms.is_finite() || ms <= 0.0 {
            return Err(InoError::Config(format!(
                "poll interval must be positive, got '{q}'"
            )));
        }
        let period = Duration::try_from_secs_f64(ms / 1_000.0)
            .map_err(|e| InoError::Config(format!("poll interval '{q}' is out of range: {e}")))?;
        Self::new(period)
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self(Duration::from_secs(1))
    }
}

impl TryFrom<Duration> for PollInterval {
    type Error = InoError;

    fn try_from(period: Duration) -> Result<Self, Self::Error> {
        Self::new(period)
    }
}

impl TryFrom<Quantity> for PollInterval {
    type Error = InoError;

    fn try_from(q: Quantity) -> Result<Self, Self::Error> {
        Self::from_quantity(q)
    }
}

impl FromStr for PollInterval {
    type Err = InoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let q: Quantity = s
            .parse()
            .map_err(|e: InoError| InoError::Config(format!("invalid poll interval '{s}': {e}")))?;
        Self::from_quantity(q)
    }
}

impl fmt::Display for PollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ms", self.0.as_millis())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State and statistics
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollerState {
    Idle,
    Running,
}

/// Counters for the current (or most recent) session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    /// Ticks that performed a read.
    pub ticks: u64,
    /// Readings published.
    pub readings: u64,
    /// Ticks lost to a timeout or malformed response.
    pub skipped: u64,
    /// Timer periods missed because a read outlasted the interval.
    pub overruns: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    readings: AtomicU64,
    skipped: AtomicU64,
    overruns: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for c in [&self.ticks, &self.readings, &self.skipped, &self.overruns] {
            c.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> PollerStats {
        PollerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            readings: self.readings.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct RunState {
    generation: u64,
    session: Option<Uuid>,
}

struct Shared {
    run: Mutex<RunState>,
    counters: Counters,
    bus: EventBus,
}

impl Shared {
    fn run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retire `generation` and emit its `Stopped`.  Returns `false` if the
    /// session was already retired by someone else.
    fn finish(&self, generation: u64, reason: StopReason) -> bool {
        let session = {
            let mut run = self.run();
            if run.generation != generation {
                return false;
            }
            match run.session.take() {
                Some(session) => session,
                None => return false,
            }
        };
        match &reason {
            StopReason::Requested => info!(%session, "polling stopped"),
            StopReason::Disconnected(why) => error!(%session, reason = %why, "polling stopped: device disconnected"),
            StopReason::Fault(why) => error!(%session, reason = %why, "polling stopped: fault"),
        }
        self.bus.lifecycle.publish(LifecycleEvent::Stopped { session, reason });
        true
    }
}

struct RunHandle {
    generation: u64,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Poller
// ─────────────────────────────────────────────────────────────────────────────

/// Samples one readable feature of an [`InstrumentProxy`] at a fixed
/// interval.
pub struct Poller {
    proxy: Arc<InstrumentProxy>,
    feature: String,
    interval: PollInterval,
    shared: Arc<Shared>,
    // Serialises start/stop; the poll task never takes it.
    control: tokio::sync::Mutex<Option<RunHandle>>,
}

impl Poller {
    /// Build an idle poller.
    ///
    /// # Errors
    ///
    /// [`InoError::UnknownFeature`] or [`InoError::InvalidOperation`] when
    /// `feature` does not exist or cannot be read.
    pub fn new(
        proxy: Arc<InstrumentProxy>,
        feature: impl Into<String>,
        interval: PollInterval,
        bus: EventBus,
    ) -> Result<Self, InoError> {
        let feature = feature.into();
        proxy.readable(&feature)?;
        Ok(Self {
            proxy,
            feature,
            interval,
            shared: Arc::new(Shared {
                run: Mutex::new(RunState::default()),
                counters: Counters::default(),
                bus,
            }),
            control: tokio::sync::Mutex::new(None),
        })
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn interval(&self) -> PollInterval {
        self.interval
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn proxy(&self) -> &Arc<InstrumentProxy> {
        &self.proxy
    }

    pub fn state(&self) -> PollerState {
        if self.shared.run().session.is_some() {
            PollerState::Running
        } else {
            PollerState::Idle
        }
    }

    /// Id of the running session, if any.
    pub fn session(&self) -> Option<Uuid> {
        self.shared.run().session
    }

    pub fn stats(&self) -> PollerStats {
        self.shared.counters.snapshot()
    }

    /// `Idle → Running`.  Emits `Started` before the first tick can run.
    ///
    /// Returns `false` if already running.
    pub async fn start(&self) -> bool {
        let mut slot = self.control.lock().await;
        if self.state() == PollerState::Running {
            return false;
        }
        // A session that ended on its own leaves its handle behind; reap it so
        // its `Stopped` is out before the next `Started`.
        if let Some(old) = slot.take()
            && let Err(e) = old.task.await
        {
            error!(error = %e, "previous poll task did not exit cleanly");
        }

        let session = Uuid::new_v4();
        let generation = {
            let mut run = self.shared.run();
            run.generation += 1;
            run.session = Some(session);
            run.generation
        };
        self.shared.counters.reset();
        info!(%session, feature = %self.feature, interval = %self.interval, "polling started");
        self.shared.bus.lifecycle.publish(LifecycleEvent::Started { session });

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.proxy),
            self.feature.clone(),
            self.interval.as_duration(),
            Arc::clone(&self.shared),
            Session {
                id: session,
                generation,
                epoch: Instant::now(),
            },
            stop_rx,
        ));
        *slot = Some(RunHandle { generation, stop, task });
        true
    }

    /// `Running → Idle`.  Waits for an in-flight tick to finish, then emits
    /// `Stopped { Requested }`.
    ///
    /// Returns `false` if already idle, including after a disconnect.
    pub async fn stop(&self) -> bool {
        let mut slot = self.control.lock().await;
        let Some(handle) = slot.take() else {
            return false;
        };
        // The task may already be gone after a disconnect.
        let _ = handle.stop.send(());
        if let Err(e) = handle.task.await {
            error!(error = %e, "poll task did not exit cleanly");
        }
        self.shared.finish(handle.generation, StopReason::Requested)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(handle) = self.control.get_mut().take() {
            handle.task.abort();
        }
    }
}

enum Tick {
    Continue,
    Stop(StopReason),
}

#[derive(Clone, Copy)]
struct Session {
    id: Uuid,
    generation: u64,
    epoch: Instant,
}

async fn poll_loop(
    proxy: Arc<InstrumentProxy>,
    feature: String,
    period: Duration,
    shared: Arc<Shared>,
    Session { id: session, generation, epoch }: Session,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(epoch + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        let began = Instant::now();
        let outcome = tick(&proxy, &feature, &shared, session, epoch).await;

        let took = began.elapsed();
        if took > period {
            let missed = (took.as_nanos() / period.as_nanos()) as u64;
            let total = shared.counters.overruns.fetch_add(missed, Ordering::Relaxed) + missed;
            warn!(%session, took_ms = took.as_millis() as u64, missed, overruns = total, "tick overran the poll interval");
        }

        if let Tick::Stop(reason) = outcome {
            shared.finish(generation, reason);
            break;
        }
    }
    debug!(%session, "poll loop exited");
}

async fn tick(
    proxy: &InstrumentProxy,
    feature: &str,
    shared: &Shared,
    session: Uuid,
    epoch: Instant,
) -> Tick {
    let counters = &shared.counters;
    counters.ticks.fetch_add(1, Ordering::Relaxed);

    match proxy.read(feature).await {
        Ok(value) => {
            let reading = Reading {
                session,
                feature: feature.to_string(),
                value,
                elapsed: epoch.elapsed(),
                captured_at: Utc::now(),
            };
            debug!(%session, feature, %value, elapsed_ms = reading.elapsed.as_millis() as u64, "sample");
            shared.bus.readings.publish(reading);
            counters.readings.fetch_add(1, Ordering::Relaxed);
            Tick::Continue
        }
        Err(e) if e.is_transient() => {
            let skipped = counters.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(%session, feature, error = %e, skipped, "sample skipped");
            Tick::Continue
        }
        Err(e) if e.is_fatal() => Tick::Stop(StopReason::Disconnected(e.to_string())),
        Err(e) => Tick::Stop(StopReason::Fault(e.to_string())),
    }
}
