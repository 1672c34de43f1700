//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::radar::ProtocolVariant;

/// Record command arguments.
#[derive(Debug, Args)]
pub struct RecordCommand {
    /// Stop after this many seconds (runs until Ctrl-C when omitted)
    #[arg(short, long, value_name = "SECONDS")]
    pub duration: Option<u64>,

    /// Directory for segment files (overrides recording.output_dir)
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Segment length in seconds (overrides recording.segment_seconds)
    #[arg(short, long, value_name = "SECONDS")]
    pub segment_seconds: Option<u64>,

    /// Record without the radar detector
    #[arg(long)]
    pub no_radar: bool,

    /// Record without the GPS receiver
    #[arg(long)]
    pub no_gps: bool,

    /// Do not write the telemetry log
    #[arg(long)]
    pub no_log: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Segments command arguments.
#[derive(Debug, Args)]
pub struct SegmentsCommand {
    /// Only list segments of this session
    #[arg(short, long, value_name = "ID")]
    pub session: Option<String>,

    /// Maximum number of results
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Samples command arguments.
#[derive(Debug, Args)]
pub struct SamplesCommand {
    /// Session to export
    pub session: String,

    /// Only export this segment
    #[arg(long, value_name = "INDEX")]
    pub segment: Option<u32>,

    /// Maximum number of samples
    #[arg(short, long, default_value = "1000")]
    pub limit: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Offline decoding of captured device data.
#[derive(Debug, Subcommand)]
pub enum DecodeCommand {
    /// Decode a raw byte capture from the radar detector
    Radar {
        /// Capture file
        file: PathBuf,

        /// Protocol generation of the detector
        #[arg(long, value_enum, default_value = "checksummed")]
        variant: VariantArg,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Decode an NMEA log, one sentence per line
    Gps {
        /// Log file
        file: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Also check that the configured serial devices exist
        #[arg(long)]
        devices: bool,
    },
}

/// Radar protocol variant argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VariantArg {
    /// Detectors that append a checksum byte
    Checksummed,
    /// Older detectors without checksums
    Legacy,
}

impl From<VariantArg> for ProtocolVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Checksummed => Self::Checksummed,
            VariantArg::Legacy => Self::Legacy,
        }
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Formatted table
    #[default]
    Table,
    /// JSON output
    Json,
    /// Comma-separated values with a header row
    Csv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_arg_conversion() {
        assert_eq!(
            ProtocolVariant::from(VariantArg::Checksummed),
            ProtocolVariant::Checksummed
        );
        assert_eq!(
            ProtocolVariant::from(VariantArg::Legacy),
            ProtocolVariant::Legacy
        );
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_record_command_debug() {
        let cmd = RecordCommand {
            duration: Some(60),
            output_dir: None,
            segment_seconds: None,
            no_radar: true,
            no_gps: false,
            no_log: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("duration"));
        assert!(debug_str.contains("no_radar: true"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
