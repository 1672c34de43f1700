//! Command-line interface for radarcam.
//!
//! This module provides the CLI structure for the `radarcam` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DecodeCommand, OutputFormat, RecordCommand, SamplesCommand, SegmentsCommand,
    StatusCommand, VariantArg,
};

/// radarcam - Dashcam recorder with radar and GPS overlay
///
/// Records the camera in fixed-length segments while burning radar-detector
/// alerts and GPS position into the video, and logs the telemetry to SQLite.
#[derive(Debug, Parser)]
#[command(name = "radarcam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record until Ctrl-C or the requested duration
    Record(RecordCommand),

    /// Show the most recent session and database statistics
    Status(StatusCommand),

    /// List recorded segments
    Segments(SegmentsCommand),

    /// Export the telemetry log of a session
    Samples(SamplesCommand),

    /// Decode captured device data offline
    #[command(subcommand)]
    Decode(DecodeCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn status_cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            verbose,
            quiet,
            command: Command::Status(StatusCommand { json: false }),
        }
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "radarcam");
    }

    #[test]
    fn test_verbosity() {
        use crate::logging::Verbosity;
        assert_eq!(status_cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(status_cli(3, true).verbosity(), Verbosity::Quiet);
        assert_eq!(status_cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(status_cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(status_cli(2, false).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_record() {
        let args = [
            "radarcam",
            "record",
            "--duration",
            "600",
            "--no-gps",
            "-o",
            "/mnt/usb",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        let Command::Record(record) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(record.duration, Some(600));
        assert!(record.no_gps);
        assert!(!record.no_radar);
        assert_eq!(record.output_dir, Some(PathBuf::from("/mnt/usb")));
    }

    #[test]
    fn test_parse_samples() {
        let args = [
            "radarcam",
            "samples",
            "20240115_083000",
            "--segment",
            "2",
            "-f",
            "csv",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        let Command::Samples(samples) = cli.command else {
            panic!("expected samples");
        };
        assert_eq!(samples.session, "20240115_083000");
        assert_eq!(samples.segment, Some(2));
        assert_eq!(samples.format, OutputFormat::Csv);
        assert_eq!(samples.limit, 1000);
    }

    #[test]
    fn test_parse_decode_radar() {
        let args = ["radarcam", "decode", "radar", "dump.bin", "--variant", "legacy"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Command::Decode(DecodeCommand::Radar {
                variant: VariantArg::Legacy,
                json: false,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_decode_rejects_unknown_variant() {
        let args = ["radarcam", "decode", "radar", "dump.bin", "--variant", "v2"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_config_validate() {
        let args = ["radarcam", "config", "validate", "--devices"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate {
                file: None,
                devices: true
            })
        ));
    }

    #[test]
    fn test_parse_global_flags() {
        let args = ["radarcam", "-c", "/custom/config.toml", "-vv", "status"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["radarcam", "segments", "-q"]).unwrap();
        assert!(cli.quiet);
    }
}
