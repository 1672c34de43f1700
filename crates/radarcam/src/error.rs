//! Error types for radarcam.
//!
//! This module defines the error taxonomy shared by the decoders, the sensor
//! readers, the recording session and the storage layer. Per-message decode
//! errors are recovered locally; only encoder death and permanently lost
//! devices end a session.

use std::path::PathBuf;
use thiserror::Error;

use crate::gps::SentenceError;
use crate::radar::FrameError;

/// The main error type for radarcam operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Device Errors ===
    /// A sensor device could not be opened.
    #[error("failed to open device {device}: {source}")]
    DeviceOpen {
        /// Device description (usually the port path).
        device: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A sensor device went away and the reconnect budget is exhausted.
    #[error("device {device} disconnected (gave up after {attempts} reconnect attempts)")]
    DeviceDisconnected {
        /// Device description (usually the port path).
        device: String,
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    // === Decode Errors ===
    /// A radar-detector frame failed integrity checks.
    #[error("corrupt radar frame: {0}")]
    CorruptFrame(#[from] FrameError),

    /// A GPS sentence failed its checksum or could not be parsed.
    #[error("corrupt GPS sentence: {0}")]
    CorruptSentence(#[from] SentenceError),

    // === Session Errors ===
    /// The encoder process failed to start or exited unexpectedly.
    #[error("encoder failure in segment {segment}: {message}")]
    EncoderProcessFailure {
        /// Index of the segment being recorded.
        segment: u32,
        /// Description of what went wrong.
        message: String,
    },

    /// A session is already active.
    #[error("a recording session is already active ({state})")]
    SessionActive {
        /// State of the active session.
        state: crate::session::SessionState,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for radarcam operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create an encoder failure for the given segment.
    #[must_use]
    pub fn encoder(segment: u32, message: impl Into<String>) -> Self {
        Self::EncoderProcessFailure {
            segment,
            message: message.into(),
        }
    }

    /// Check if this error ends the recording session.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::EncoderProcessFailure { .. } | Self::DeviceDisconnected { .. }
        )
    }

    /// Check if this error is handled locally (drop, resync or retry).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CorruptFrame(_) | Self::CorruptSentence(_) | Self::DeviceOpen { .. }
        )
    }
}
