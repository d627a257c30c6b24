//! [`SerialLink`] – strictly request/response exchanges over one
//! [`Connection`].
//!
//! # Framing
//!
//! Commands go out as `<CMD>\n` or `<CMD> <ARG>\n`.  A response is every byte
//! up to the next `\n`; a trailing `\r` is stripped.  Responses longer than
//! [`MAX_FRAME_LEN`] or not valid UTF-8 are malformed.
//!
//! # Failure modes
//!
//! | Error | Cause | Link behaviour |
//! |---|---|---|
//! | [`InoError::Timeout`] | no full frame within `timeout` | retried `retries` times, then returned |
//! | [`InoError::Disconnected`] | EOF or a broken transport | connection released; every later call fails fast |
//! | [`InoError::MalformedResponse`] | oversized / non-UTF-8 frame | returned, session stays usable |
//!
//! Only one exchange is in flight at a time: the connection sits behind an
//! async mutex, and [`SerialLink::close`] waits for the current exchange to
//! finish before releasing the port.

use std::io::ErrorKind;
use std::time::Duration;

use futures_util::FutureExt;
use inolink_types::InoError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::transport::{self, Transport};

/// Longest response accepted before the frame is declared malformed.
pub const MAX_FRAME_LEN: usize = 256;

const READ_CHUNK: usize = 64;

/// Timing knobs for a [`SerialLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Deadline for one command/response exchange.
    pub timeout: Duration,
    /// Extra attempts after a timeout before giving up.
    pub retries: u32,
    /// Pause after opening a real port.  Most Arduino boards reset when the
    /// port opens and ignore input until the sketch is running again.
    pub settle: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1_000),
            retries: 1,
            settle: Duration::from_millis(2_000),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────────────────

/// An open session with the board.  Owns its transport exclusively.
///
/// Close it with [`Connection::close`]; a connection that is dropped without
/// being closed still releases the transport, and logs that it did.
pub struct Connection {
    port: String,
    io: Box<dyn Transport>,
    rx: Vec<u8>,
    closed: bool,
}

impl Connection {
    /// Wrap an already-open transport.
    pub fn from_transport(port: impl Into<String>, io: Box<dyn Transport>) -> Self {
        Self {
            port: port.into(),
            io,
            rx: Vec::with_capacity(MAX_FRAME_LEN),
            closed: false,
        }
    }

    /// Open a real serial port and wait `settle` for the board to boot.
    pub async fn open(port: &str, baud_rate: u32, settle: Duration) -> Result<Self, InoError> {
        let io = transport::open_serial(port, baud_rate)?;
        if !settle.is_zero() {
            debug!(port, settle_ms = settle.as_millis() as u64, "waiting for board to settle");
            tokio::time::sleep(settle).await;
        }
        Ok(Self::from_transport(port, io))
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Shut the transport down.  Consumes the connection, so it can only
    /// happen once.
    pub async fn close(mut self) -> Result<(), InoError> {
        self.closed = true;
        let result = self.io.shutdown().await;
        info!(port = %self.port, "connection closed");
        result.map_err(|e| InoError::Disconnected(format!("{}: error while closing: {e}", self.port)))
    }

    // Drop partial frames left behind by a timed-out exchange, plus anything
    // already sitting in the transport, so a late reply cannot be mistaken
    // for the answer to the next command.
    fn discard_stale(&mut self) {
        let mut discarded = self.rx.len();
        self.rx.clear();
        let mut chunk = [0u8; READ_CHUNK];
        while let Some(Ok(n)) = self.io.read(&mut chunk).now_or_never() {
            if n == 0 {
                break;
            }
            discarded += n;
        }
        if discarded > 0 {
            debug!(port = %self.port, discarded, "discarded stale input");
        }
    }

    async fn write_frame(&mut self, frame: &str) -> Result<(), InoError> {
        self.io
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        self.io.flush().await.map_err(|e| self.io_error(e))
    }

    // Cancel safe: bytes read so far stay in `self.rx`.
    async fn read_frame(&mut self, command: &str) -> Result<String, InoError> {
        loop {
            if let Some(pos) = self.rx.iter().position(|&b| b == b'\n') {
                if pos > MAX_FRAME_LEN {
                    self.rx.drain(..=pos);
                    return Err(InoError::MalformedResponse {
                        command: command.to_string(),
                        details: format!("response longer than {MAX_FRAME_LEN} bytes"),
                    });
                }
                let mut frame: Vec<u8> = self.rx.drain(..=pos).collect();
                frame.pop();
                if frame.last() == Some(&b'\r') {
                    frame.pop();
                }
                return String::from_utf8(frame).map_err(|_| InoError::MalformedResponse {
                    command: command.to_string(),
                    details: "response is not valid UTF-8".to_string(),
                });
            }
            if self.rx.len() > MAX_FRAME_LEN {
                self.rx.clear();
                return Err(InoError::MalformedResponse {
                    command: command.to_string(),
                    details: format!("no frame delimiter within {MAX_FRAME_LEN} bytes"),
                });
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.io.read(&mut chunk).await {
                Ok(0) => {
                    return Err(InoError::Disconnected(format!("{}: end of stream", self.port)));
                }
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    continue;
                }
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    fn io_error(&self, e: std::io::Error) -> InoError {
        InoError::Disconnected(format!("{}: {e}", self.port))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            warn!(port = %self.port, "connection dropped without close; releasing transport");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SerialLink
// ─────────────────────────────────────────────────────────────────────────────

/// Serialised command/response channel to one board.
pub struct SerialLink {
    port: String,
    settings: LinkSettings,
    conn: Mutex<Option<Connection>>,
}

impl SerialLink {
    /// Drive an already-open connection.
    pub fn new(conn: Connection, settings: LinkSettings) -> Self {
        Self {
            port: conn.port().to_string(),
            settings,
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Open a real serial port and wrap it.
    pub async fn open(port: &str, baud_rate: u32, settings: LinkSettings) -> Result<Self, InoError> {
        let conn = Connection::open(port, baud_rate, settings.settle).await?;
        Ok(Self::new(conn, settings))
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// `true` until the link is closed or the device goes away.
    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Send `command` (without terminator) and return the response frame.
    ///
    /// # Errors
    ///
    /// * [`InoError::InvalidOperation`] – `command` is empty or contains a
    ///   frame delimiter or non-ASCII byte; nothing is sent.
    /// * [`InoError::Timeout`] – no response after `1 + retries` attempts.
    /// * [`InoError::Disconnected`] – the transport is gone; the connection is
    ///   released and every later call fails the same way.
    /// * [`InoError::MalformedResponse`] – the frame could not be read as text.
    #[instrument(skip(self), fields(port = %self.port))]
    pub async fn send(&self, command: &str) -> Result<String, InoError> {
        validate_command(command)?;

        let mut guard = self.conn.lock().await;
        let result = match guard.as_mut() {
            Some(conn) => self.exchange_with_retries(conn, command).await,
            None => Err(InoError::Disconnected(format!("link to {} is closed", self.port))),
        };

        if let Err(InoError::Disconnected(reason)) = &result
            && let Some(dead) = guard.take()
        {
            warn!(reason = %reason, "device disconnected; releasing connection");
            if let Err(e) = dead.close().await {
                debug!(error = %e, "close after disconnect reported an error");
            }
        }
        result
    }

    /// Close the connection.  Waits for an in-flight exchange first.
    ///
    /// Returns `Ok(false)` if the link was already closed.
    pub async fn close(&self) -> Result<bool, InoError> {
        let conn = self.conn.lock().await.take();
        match conn {
            Some(conn) => conn.close().await.map(|()| true),
            None => Ok(false),
        }
    }

    async fn exchange_with_retries(&self, conn: &mut Connection, command: &str) -> Result<String, InoError> {
        let mut attempt = 0;
        loop {
            match exchange(conn, command, self.settings.timeout).await {
                Err(e @ InoError::Timeout { .. }) if attempt < self.settings.retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, retries = self.settings.retries, "timed out; retrying");
                }
                other => return other,
            }
        }
    }
}

async fn exchange(conn: &mut Connection, command: &str, timeout: Duration) -> Result<String, InoError> {
    conn.discard_stale();
    let frame = format!("{command}\n");
    let outcome = tokio::time::timeout(timeout, async move {
        conn.write_frame(&frame).await?;
        conn.read_frame(command).await
    })
    .await;

    match outcome {
        Ok(Ok(response)) => {
            debug!(command, response = %response, "exchange complete");
            Ok(response)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(InoError::Timeout {
            command: command.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn validate_command(command: &str) -> Result<(), InoError> {
    let well_formed = !command.is_empty()
        && command.is_ascii()
        && !command.contains(['\n', '\r']);
    if well_formed {
        Ok(())
    } else {
        Err(InoError::InvalidOperation {
            feature: command.escape_default().to_string(),
            details: "command must be non-empty ASCII without line terminators".to_string(),
        })
    }
}
