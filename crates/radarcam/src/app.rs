//! Wiring between configuration and the recording pipeline, plus the offline
//! decoders behind `radarcam decode`.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::encoder::FfmpegEncoder;
use crate::error::{Error, Result};
use crate::fusion::SensorFusionBus;
use crate::gps::{GpsSentenceParser, ParserStats};
use crate::overlay::{OverlaySink, StatusFileOverlay, TelemetryLog};
use crate::radar::{DecoderStats, ProtocolVariant, RadarEvent, RadarFrameDecoder};
use crate::reader::{DeviceReader, SensorReader, SerialDevice};
use crate::session::RecordingOrchestrator;
use crate::storage::Storage;
use crate::telemetry::{DetectorMode, GpsFix, RadarAlert};

/// Open the telemetry database and drop sessions past the retention age.
///
/// # Errors
///
/// Returns an error if the database can't be opened or pruned.
pub fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::open(config.database_path())?;
    if let Some(max_age) = config.max_age() {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|_| Error::config("storage.max_age_days is out of range"))?;
        storage.prune_older_than(max_age)?;
    }
    Ok(storage)
}

/// Build an idle orchestrator from configuration.
///
/// Writes the initial overlay file and opens the telemetry database, but
/// touches neither the camera nor the serial ports until `start()`.
///
/// # Errors
///
/// Returns an error if the overlay file or database can't be prepared.
pub fn build_orchestrator(config: &Config) -> Result<RecordingOrchestrator> {
    let bus = SensorFusionBus::new(config.fusion_config());
    let encoder = Arc::new(FfmpegEncoder::new(
        config.encoder.program.clone(),
        config.encoder.args.clone(),
    ));

    let mut sinks: Vec<Box<dyn OverlaySink>> = vec![Box::new(StatusFileOverlay::new(
        config.overlay_path(),
        config.overlay_options(),
    )?)];
    if config.storage.telemetry_log {
        sinks.push(Box::new(TelemetryLog::new(open_storage(config)?)));
    }

    let policy = config.reconnect_policy();
    let mut readers: Vec<Box<dyn SensorReader>> = Vec::new();
    if config.radar.enabled {
        readers.push(Box::new(DeviceReader::radar(
            SerialDevice::new(config.radar.port.clone(), config.radar.baud),
            config.radar.variant,
            policy,
        )));
    } else {
        warn!("radar detector disabled");
    }
    if config.gps.enabled {
        readers.push(Box::new(DeviceReader::gps(
            SerialDevice::new(config.gps.port.clone(), config.gps.baud),
            policy,
        )));
    } else {
        warn!("gps receiver disabled");
    }

    info!(
        sinks = sinks.len(),
        readers = readers.len(),
        output = %config.output_dir().display(),
        "recorder ready"
    );
    Ok(RecordingOrchestrator::new(
        config.session_config(),
        bus,
        encoder,
        sinks,
        readers,
    ))
}

/// A line or frame the offline decoders rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejected {
    /// 1-based line number (NMEA) or event position (radar).
    pub position: usize,
    /// Why it was rejected.
    pub error: String,
}

/// Result of decoding a captured radar byte stream.
#[derive(Debug, Default, Serialize)]
pub struct RadarDumpReport {
    /// Alerts in arrival order.
    pub alerts: Vec<RadarAlert>,
    /// Number of empty alert tables.
    pub clears: usize,
    /// Detector mode changes.
    pub modes: Vec<DetectorMode>,
    /// Frames that failed integrity checks.
    pub rejected: Vec<Rejected>,
    /// Decoder counters.
    pub stats: DecoderStats,
}

/// Decode a captured radar byte stream.
#[must_use]
pub fn decode_radar_dump(bytes: &[u8], variant: ProtocolVariant) -> RadarDumpReport {
    let mut decoder = RadarFrameDecoder::new(variant);
    decoder.feed(bytes);

    let mut report = RadarDumpReport::default();
    for (position, event) in decoder.events().enumerate() {
        match event {
            Ok(RadarEvent::Alert(alert)) => report.alerts.push(alert),
            Ok(RadarEvent::AlertsCleared) => report.clears += 1,
            Ok(RadarEvent::Display(display)) => {
                if display.mode != DetectorMode::Unknown
                    && report.modes.last() != Some(&display.mode)
                {
                    report.modes.push(display.mode);
                }
            }
            Err(err) => report.rejected.push(Rejected {
                position: position + 1,
                error: err.to_string(),
            }),
        }
    }
    report.stats = decoder.stats();
    report
}

/// Result of decoding an NMEA log.
#[derive(Debug, Default, Serialize)]
pub struct NmeaLogReport {
    /// Fixes in order.
    pub fixes: Vec<GpsFix>,
    /// Lines that failed validation.
    pub rejected: Vec<Rejected>,
    /// Parser counters.
    pub stats: ParserStats,
}

/// Decode an NMEA log, one sentence per line.
#[must_use]
pub fn decode_nmea_log(text: &str) -> NmeaLogReport {
    let mut parser = GpsSentenceParser::new();
    let mut report = NmeaLogReport::default();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parser.parse_line(line) {
            Ok(Some(fix)) => report.fixes.push(fix),
            Ok(None) => {}
            Err(err) => report.rejected.push(Rejected {
                position: index + 1,
                error: err.to_string(),
            }),
        }
    }
    report.stats = parser.stats();
    report
}
