//! Sensor reader tasks.
//!
//! A reader owns one serial device: it opens the port, pushes the bytes
//! through the sensor's decoder, publishes what comes out on the
//! [`SensorFusionBus`], and reconnects with exponential backoff when the
//! device goes away. Every wait is raced against a [`CancellationToken`] so a
//! stopping session never waits on a silent device.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fusion::SensorFusionBus;
use crate::gps::{GpsSentenceParser, SentenceError};
use crate::radar::protocol::{encode_request, packet};
use crate::radar::{ProtocolVariant, RadarEvent, RadarFrameDecoder};

/// Longest NMEA line we buffer before giving up on it.
const MAX_LINE_LEN: usize = 1024;

/// How long a cancelled reader may spend saying goodbye to the device.
const FAREWELL_TIMEOUT: Duration = Duration::from_millis(500);

/// The kind of sensor behind a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Radar detector speaking ESP.
    Radar,
    /// GPS receiver speaking NMEA.
    Gps,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radar => write!(f, "radar"),
            Self::Gps => write!(f, "gps"),
        }
    }
}

/// Backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up (0 = never give up).
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }

    /// Whether `failures` consecutive failures exhaust the budget.
    #[must_use]
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

/// Point-in-time view of a reader's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReaderStatus {
    /// Sensor kind.
    pub kind: DeviceKind,
    /// Device description.
    pub device: String,
    /// Whether the device is currently open.
    pub connected: bool,
    /// Events published to the bus.
    pub events: u64,
    /// Frames or sentences dropped as corrupt.
    pub errors: u64,
    /// Successful reconnects after a failure.
    pub reconnects: u64,
}

/// Counters shared between a reader task and whoever watches it.
#[derive(Debug, Default)]
pub struct ReaderStats {
    connected: AtomicBool,
    events: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
}

impl ReaderStats {
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Count one published event.
    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one dropped frame or sentence.
    pub fn record_error(&self, err: &Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if err.is_recoverable() {
            debug!(error = %err, "dropped input");
        } else {
            warn!(error = %err, "reader error");
        }
    }

    fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the device is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Events published so far.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Corrupt input dropped so far.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Reconnects so far.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// A bidirectional byte stream to a device.
pub trait DeviceStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DeviceStream for T {}

/// Opens the device behind a reader.
#[async_trait::async_trait]
pub trait DeviceOpener: Send + Sync + fmt::Debug {
    /// Human-readable device name for logs and errors.
    fn describe(&self) -> String;

    /// Open the device.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the operating system.
    async fn open(&self) -> io::Result<Box<dyn DeviceStream>>;
}

/// A serial port.
#[derive(Debug, Clone)]
pub struct SerialDevice {
    path: String,
    baud: u32,
}

impl SerialDevice {
    /// Describe a serial port at the given path and baud rate.
    #[must_use]
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
        }
    }
}

#[async_trait::async_trait]
impl DeviceOpener for SerialDevice {
    fn describe(&self) -> String {
        self.path.clone()
    }

    async fn open(&self) -> io::Result<Box<dyn DeviceStream>> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(&self.path, self.baud)
            .open_native_async()
            .map_err(io::Error::other)?;
        Ok(Box::new(stream))
    }
}

/// Turns a device's bytes into bus updates.
pub trait StreamHandler: Send + fmt::Debug {
    /// Bytes to send right after the device opens.
    fn handshake(&self) -> Option<Vec<u8>> {
        None
    }

    /// Bytes to send before a cancelled reader releases the device.
    fn farewell(&self) -> Option<Vec<u8>> {
        None
    }

    /// Drop partial input, e.g. after a reconnect.
    fn reset(&mut self);

    /// Process freshly read bytes.
    fn on_bytes(&mut self, bytes: &[u8], bus: &SensorFusionBus, stats: &ReaderStats);
}

/// ESP decoding for the radar detector.
#[derive(Debug)]
pub struct RadarHandler {
    decoder: RadarFrameDecoder,
}

impl RadarHandler {
    /// Create a handler for the given protocol generation.
    #[must_use]
    pub fn new(variant: ProtocolVariant) -> Self {
        Self {
            decoder: RadarFrameDecoder::new(variant),
        }
    }
}

impl StreamHandler for RadarHandler {
    fn handshake(&self) -> Option<Vec<u8>> {
        Some(encode_request(
            self.decoder.variant(),
            packet::REQ_START_ALERT_DATA,
            &[],
        ))
    }

    fn farewell(&self) -> Option<Vec<u8>> {
        Some(encode_request(
            self.decoder.variant(),
            packet::REQ_STOP_ALERT_DATA,
            &[],
        ))
    }

    fn reset(&mut self) {
        self.decoder.reset();
    }

    fn on_bytes(&mut self, bytes: &[u8], bus: &SensorFusionBus, stats: &ReaderStats) {
        self.decoder.feed(bytes);
        for event in self.decoder.events() {
            match event {
                Ok(RadarEvent::Alert(alert)) => {
                    bus.publish_radar(alert);
                    stats.record_event();
                }
                Ok(RadarEvent::AlertsCleared) => {
                    bus.publish_radar_cleared();
                    stats.record_event();
                }
                Ok(RadarEvent::Display(display)) => bus.publish_detector_mode(display.mode),
                Err(err) => stats.record_error(&Error::CorruptFrame(err)),
            }
        }
    }
}

/// NMEA line splitting and parsing for the GPS receiver.
#[derive(Debug, Default)]
pub struct GpsHandler {
    parser: GpsSentenceParser,
    line: Vec<u8>,
}

impl GpsHandler {
    /// Create a handler with an empty line buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamHandler for GpsHandler {
    fn reset(&mut self) {
        self.parser.reset();
        self.line.clear();
    }

    fn on_bytes(&mut self, bytes: &[u8], bus: &SensorFusionBus, stats: &ReaderStats) {
        self.line.extend_from_slice(bytes);
        while let Some(end) = self.line.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.line.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw);
            match self.parser.parse_line(&text) {
                Ok(Some(fix)) => {
                    bus.publish_gps(fix);
                    stats.record_event();
                }
                Ok(None) => {}
                Err(err) => stats.record_error(&Error::CorruptSentence(err)),
            }
        }
        if self.line.len() > MAX_LINE_LEN {
            stats.record_error(&Error::CorruptSentence(SentenceError::Malformed(format!(
                "line longer than {MAX_LINE_LEN} bytes"
            ))));
            self.line.clear();
        }
    }
}

/// A long-running reader task.
#[async_trait::async_trait]
pub trait SensorReader: Send + fmt::Debug {
    /// The sensor kind.
    fn kind(&self) -> DeviceKind;

    /// Current counters.
    fn status(&self) -> ReaderStatus;

    /// Read until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceDisconnected`] once the reconnect budget is
    /// exhausted.
    async fn run(&mut self, bus: &SensorFusionBus, cancel: &CancellationToken) -> Result<()>;
}

/// How a connection ended.
enum Pump {
    Cancelled,
    Lost(String),
}

/// Reader for a device opened by a [`DeviceOpener`] and decoded by a
/// [`StreamHandler`].
#[derive(Debug)]
pub struct DeviceReader<H> {
    kind: DeviceKind,
    opener: Box<dyn DeviceOpener>,
    handler: H,
    policy: ReconnectPolicy,
    stats: Arc<ReaderStats>,
}

impl<H: StreamHandler> DeviceReader<H> {
    /// Assemble a reader.
    #[must_use]
    pub fn new(
        kind: DeviceKind,
        opener: Box<dyn DeviceOpener>,
        handler: H,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            kind,
            opener,
            handler,
            policy,
            stats: Arc::new(ReaderStats::default()),
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    async fn say_farewell(&self, stream: &mut Box<dyn DeviceStream>) {
        let Some(bye) = self.handler.farewell() else {
            return;
        };
        let written = tokio::time::timeout(FAREWELL_TIMEOUT, async {
            stream.write_all(&bye).await?;
            stream.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(kind = %self.kind, error = %err, "farewell write failed"),
            Err(_) => debug!(kind = %self.kind, "farewell write timed out"),
        }
    }

    async fn pump(
        &mut self,
        stream: &mut Box<dyn DeviceStream>,
        bus: &SensorFusionBus,
        cancel: &CancellationToken,
    ) -> Pump {
        let mut buf = [0u8; 512];
        loop {
            let read = tokio::select! {
                () = cancel.cancelled() => return Pump::Cancelled,
                read = stream.read(&mut buf) => read,
            };
            match read {
                Ok(0) => return Pump::Lost("end of stream".to_string()),
                Ok(n) => self.handler.on_bytes(&buf[..n], bus, &self.stats),
                Err(err) => return Pump::Lost(err.to_string()),
            }
        }
    }
}

impl DeviceReader<RadarHandler> {
    /// Radar detector on a serial port.
    #[must_use]
    pub fn radar(device: SerialDevice, variant: ProtocolVariant, policy: ReconnectPolicy) -> Self {
        Self::new(
            DeviceKind::Radar,
            Box::new(device),
            RadarHandler::new(variant),
            policy,
        )
    }
}

impl DeviceReader<GpsHandler> {
    /// GPS receiver on a serial port.
    #[must_use]
    pub fn gps(device: SerialDevice, policy: ReconnectPolicy) -> Self {
        Self::new(DeviceKind::Gps, Box::new(device), GpsHandler::new(), policy)
    }
}

#[async_trait::async_trait]
impl<H: StreamHandler + Sync> SensorReader for DeviceReader<H> {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn status(&self) -> ReaderStatus {
        ReaderStatus {
            kind: self.kind,
            device: self.opener.describe(),
            connected: self.stats.is_connected(),
            events: self.stats.events(),
            errors: self.stats.errors(),
            reconnects: self.stats.reconnects(),
        }
    }

    async fn run(&mut self, bus: &SensorFusionBus, cancel: &CancellationToken) -> Result<()> {
        let device = self.opener.describe();
        let kind = self.kind;
        let mut failures: u32 = 0;

        loop {
            let opened = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                opened = self.opener.open() => opened,
            };

            match opened {
                Ok(mut stream) => {
                    info!(%kind, %device, "device connected");
                    if failures > 0 {
                        self.stats.record_reconnect();
                    }
                    failures = 0;
                    self.handler.reset();
                    self.stats.set_connected(true);

                    if let Some(hello) = self.handler.handshake() {
                        tokio::select! {
                            () = cancel.cancelled() => {
                                self.stats.set_connected(false);
                                debug!(%kind, %device, "reader cancelled during handshake");
                                return Ok(());
                            }
                            written = stream.write_all(&hello) => {
                                if let Err(err) = written {
                                    warn!(%kind, %device, error = %err, "handshake write failed");
                                }
                            }
                        }
                    }

                    let outcome = self.pump(&mut stream, bus, cancel).await;
                    if matches!(outcome, Pump::Cancelled) {
                        self.say_farewell(&mut stream).await;
                    }
                    self.stats.set_connected(false);
                    match outcome {
                        Pump::Cancelled => {
                            debug!(%kind, %device, "reader cancelled");
                            return Ok(());
                        }
                        Pump::Lost(reason) => {
                            warn!(%kind, %device, %reason, "device lost");
                        }
                    }
                }
                Err(source) => {
                    let err = Error::DeviceOpen {
                        device: device.clone(),
                        source,
                    };
                    warn!(%kind, attempt = failures + 1, error = %err, "open failed");
                }
            }

            failures += 1;
            if self.policy.exhausted(failures) {
                return Err(Error::DeviceDisconnected {
                    device,
                    attempts: failures,
                });
            }

            let delay = self.policy.delay_for(failures);
            debug!(%kind, %device, delay_ms = delay.as_millis(), "reconnecting after delay");
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
