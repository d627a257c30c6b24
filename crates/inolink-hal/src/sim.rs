//! [`SimulatedBoard`] – an in-process stand-in for an Arduino running the
//! stock sketches.
//!
//! [`SimulatedBoard::connect`] hands out a [`Connection`] backed by an
//! in-memory duplex pipe; a firmware task on the other end answers the same
//! line protocol as the real board.  The handle stays with the caller so
//! tests (and the `sim` port in the CLI) can inject faults while a session
//! is running.
//!
//! | Command | Reply |
//! |---|---|
//! | `TEMP` | temperature in °C, two decimals |
//! | `LED` | `0` or `1` |
//! | `LED 0` / `LED 1` | `OK` |
//! | anything else | `ERR unknown command` |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::link::Connection;
use crate::transport::SIM_PORT;

const PIPE_CAPACITY: usize = 1024;
const GARBAGE: &str = "#?~garbage~?#";

#[derive(Debug)]
struct SimState {
    temperature: f64,
    wobble: f64,
    led: bool,
    latency: Duration,
    silent: u32,
    garbage: u32,
    unplug_after: Option<u32>,
    temp_reads: u64,
    commands: Vec<String>,
    bytes_received: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            temperature: 21.5,
            wobble: 0.0,
            led: false,
            latency: Duration::ZERO,
            silent: 0,
            garbage: 0,
            unplug_after: None,
            temp_reads: 0,
            commands: Vec::new(),
            bytes_received: 0,
        }
    }
}

/// Cloneable handle to the simulated board.
#[derive(Clone)]
pub struct SimulatedBoard {
    state: Arc<Mutex<SimState>>,
    plugged: watch::Sender<bool>,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBoard")
            .field("state", &*self.lock())
            .field("plugged", &*self.plugged.borrow())
            .finish()
    }
}

impl SimulatedBoard {
    pub fn new() -> Self {
        let (plugged, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            plugged,
        }
    }

    /// Make successive temperature readings oscillate by up to `amplitude`
    /// around the set point.
    pub fn with_wobble(self, amplitude: f64) -> Self {
        self.lock().wobble = amplitude.abs();
        self
    }

    /// Open a session.  Must be called from within a Tokio runtime.
    ///
    /// Connecting again after [`unplug`](Self::unplug) plugs the board back in.
    /// Dropping the last handle unplugs it.
    pub fn connect(&self) -> Connection {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        self.plugged.send_replace(true);
        let unplugged = self.plugged.subscribe();
        tokio::spawn(firmware(Arc::clone(&self.state), device, unplugged));
        info!(port = SIM_PORT, "simulated board connected");
        Connection::from_transport(SIM_PORT, Box::new(host))
    }

    pub fn set_temperature(&self, celsius: f64) {
        self.lock().temperature = celsius;
    }

    pub fn led(&self) -> bool {
        self.lock().led
    }

    /// Ignore the next `n` commands without replying.
    pub fn go_silent(&self, n: u32) {
        self.lock().silent = n;
    }

    /// Answer the next `n` commands with an unparseable frame.
    pub fn send_garbage(&self, n: u32) {
        self.lock().garbage = n;
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Pull the cable: every open session sees end of stream.
    pub fn unplug(&self) {
        self.plugged.send_replace(false);
    }

    /// Answer `n` more commands, then unplug.
    pub fn unplug_after(&self, n: u32) {
        if n == 0 {
            self.unplug();
        } else {
            self.lock().unplug_after = Some(n);
        }
    }

    /// Every command line received so far, without terminators.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn bytes_received(&self) -> usize {
        self.lock().bytes_received
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Step {
    reply: Option<String>,
    latency: Duration,
    unplug: bool,
}

impl SimState {
    fn handle(&mut self, line: &str) -> Step {
        self.commands.push(line.to_string());

        let unplug = match self.unplug_after.as_mut() {
            Some(left) => {
                *left = left.saturating_sub(1);
                *left == 0
            }
            None => false,
        };
        if unplug {
            self.unplug_after = None;
        }

        let reply = if self.silent > 0 {
            self.silent -= 1;
            None
        } else if self.garbage > 0 {
            self.garbage -= 1;
            Some(GARBAGE.to_string())
        } else {
            Some(self.respond(line))
        };

        Step {
            reply,
            latency: self.latency,
            unplug,
        }
    }

    fn respond(&mut self, line: &str) -> String {
        match line.split_once(' ') {
            None if line == "TEMP" => {
                let phase = self.temp_reads as f64 * 0.7;
                self.temp_reads += 1;
                format!("{:.2}", self.temperature + self.wobble * phase.sin())
            }
            None if line == "LED" => (if self.led { "1" } else { "0" }).to_string(),
            Some(("LED", "0")) => {
                self.led = false;
                "OK".to_string()
            }
            Some(("LED", "1")) => {
                self.led = true;
                "OK".to_string()
            }
            _ => "ERR unknown command".to_string(),
        }
    }
}

async fn firmware(state: Arc<Mutex<SimState>>, device: DuplexStream, mut plugged: watch::Receiver<bool>) {
    let (rd, mut wr) = tokio::io::split(device);
    let mut rd = BufReader::new(rd);
    loop {
        let mut line = String::new();
        let read = tokio::select! {
            _ = async { let _ = plugged.wait_for(|p| !*p).await; } => break,
            read = rd.read_line(&mut line) => read,
        };
        let n = match read {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        let step = {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.bytes_received += n;
            state.handle(line.trim_end_matches(['\r', '\n']))
        };

        if !step.latency.is_zero() {
            tokio::time::sleep(step.latency).await;
        }
        if let Some(reply) = step.reply
            && wr.write_all(format!("{reply}\n").as_bytes()).await.is_err()
        {
            break;
        }
        if step.unplug {
            break;
        }
    }
    debug!(port = SIM_PORT, "simulated firmware stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkSettings, SerialLink};
    use inolink_types::InoError;

    fn link(board: &SimulatedBoard) -> SerialLink {
        let settings = LinkSettings {
            timeout: Duration::from_millis(100),
            retries: 0,
            settle: Duration::ZERO,
        };
        SerialLink::new(board.connect(), settings)
    }

    #[tokio::test]
    async fn answers_the_stock_protocol() -> Result<(), Box<dyn std::error::Error>> {
        let board = SimulatedBoard::new();
        board.set_temperature(19.0);
        let link = link(&board);

        assert_eq!(link.send("TEMP").await?, "19.00");
        assert_eq!(link.send("LED").await?, "0");
        assert_eq!(link.send("LED 1").await?, "OK");
        assert_eq!(link.send("LED").await?, "1");
        assert_eq!(link.send("FAN 1").await?, "ERR unknown command");
        assert_eq!(board.bytes_received(), "TEMP\nLED\nLED 1\nLED\nFAN 1\n".len());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out() {
        let board = SimulatedBoard::new();
        let link = link(&board);
        board.go_silent(1);
        assert!(matches!(link.send("TEMP").await, Err(InoError::Timeout { .. })));
        assert!(link.send("TEMP").await.is_ok());
    }

    #[tokio::test]
    async fn unplug_after_counts_commands() -> Result<(), Box<dyn std::error::Error>> {
        let board = SimulatedBoard::new();
        let link = link(&board);
        board.unplug_after(2);
        link.send("TEMP").await?;
        link.send("TEMP").await?;
        let err = link.send("TEMP").await.unwrap_err();
        assert!(err.is_fatal(), "got {err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn wobble_stays_within_amplitude() -> Result<(), Box<dyn std::error::Error>> {
        let board = SimulatedBoard::new().with_wobble(0.5);
        board.set_temperature(20.0);
        let link = link(&board);
        for _ in 0..10 {
            let t: f64 = link.send("TEMP").await?.parse()?;
            assert!((19.49..=20.51).contains(&t), "{t}");
        }
        Ok(())
    }
}
