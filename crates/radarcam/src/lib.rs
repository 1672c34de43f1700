//! `radarcam` - Dashcam recorder with radar-detector and GPS telemetry
//!
//! This library decodes a radar detector's serial protocol and a GPS
//! receiver's NMEA stream, fuses both into snapshots, and drives a segmented
//! recording session whose overlay and telemetry log are fed from those
//! snapshots.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod app;
pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod fusion;
pub mod gps;
pub mod logging;
pub mod overlay;
pub mod radar;
pub mod reader;
pub mod session;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};
pub use fusion::{FusionConfig, SensorFusionBus};
pub use gps::GpsSentenceParser;
pub use logging::init_logging;
pub use overlay::{OverlaySink, StatusFileOverlay, TelemetryLog};
pub use radar::{ProtocolVariant, RadarFrameDecoder};
pub use session::{RecordingOrchestrator, SessionState};
pub use storage::{Storage, StorageStats};
pub use telemetry::{FusedSnapshot, GpsFix, RadarAlert, RadarBand};
