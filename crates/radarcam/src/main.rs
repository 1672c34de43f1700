//! `radarcam` - CLI for the dashcam recorder
//!
//! This binary records segmented video with a radar and GPS overlay and gives
//! access to the telemetry log and the offline decoders.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use radarcam::app::{self, NmeaLogReport, RadarDumpReport};
use radarcam::cli::{
    Cli, Command, ConfigCommand, DecodeCommand, OutputFormat, RecordCommand, SamplesCommand,
    SegmentsCommand,
};
use radarcam::session::{SegmentInfo, SessionEvent, SessionState};
use radarcam::storage::TelemetrySample;
use radarcam::{init_logging, Config, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // `config validate` reports load errors itself
    if let Command::Config(ConfigCommand::Validate { file, devices }) = &cli.command {
        return handle_validate(file.clone().or_else(|| cli.config.clone()), *devices);
    }

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Record(cmd) => handle_record(config, cmd).await,
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Segments(cmd) => handle_segments(&config, &cmd),
        Command::Samples(cmd) => handle_samples(&config, &cmd),
        Command::Decode(cmd) => handle_decode(cmd).await,
        Command::Config(cmd) => handle_config(&config, &cmd),
    }
}

async fn handle_record(mut config: Config, cmd: RecordCommand) -> anyhow::Result<()> {
    let duration = cmd.duration.map(Duration::from_secs);
    if let Some(dir) = cmd.output_dir {
        config.recording.output_dir = Some(dir);
    }
    if let Some(seconds) = cmd.segment_seconds {
        config.recording.segment_seconds = seconds;
    }
    if cmd.no_radar {
        config.radar.enabled = false;
    }
    if cmd.no_gps {
        config.gps.enabled = false;
    }
    if cmd.no_log {
        config.storage.telemetry_log = false;
    }
    config.validate()?;
    config.check_devices()?;

    let recorder = app::build_orchestrator(&config)?;
    let mut state = recorder.subscribe_state();
    let mut events = recorder.subscribe_events();
    recorder.start().await?;

    let limit = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(limit);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                info!("interrupted, stopping");
                break;
            }
            () = &mut limit => {
                info!("duration reached, stopping");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SessionState::Stopped {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::SegmentClosed(segment)) => {
                    println!("{}", segment.path.display());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    recorder.stop().await?;
    // The final segment is closed during stop.
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::SegmentClosed(segment) = event {
            println!("{}", segment.path.display());
        }
    }

    if let Some(err) = recorder.last_error() {
        bail!("recording stopped: {err}");
    }
    if let Some(session) = recorder.session() {
        info!(
            session = %session.session_id,
            segments = session.current_segment_index + 1,
            "recording finished"
        );
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "output_dir": config.output_dir(),
            "overlay_path": config.overlay_path(),
            "storage": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("radarcam status");
    println!("---------------");
    println!("Database:      {}", config.database_path().display());
    println!("Recordings:    {}", config.output_dir().display());
    println!("Overlay file:  {}", config.overlay_path().display());
    println!("Sessions:      {}", stats.total_sessions);
    println!("Segments:      {}", stats.total_segments);
    println!("Samples:       {}", stats.total_samples);
    println!("DB size:       {} bytes", stats.db_size_bytes);
    if let Some(latest) = stats.latest_session {
        println!();
        println!("Latest session {}", latest.session_id);
        println!("  Started:     {}", latest.started_at.to_rfc3339());
        if let Some(ended) = latest.ended_at {
            println!("  Ended:       {}", ended.to_rfc3339());
        }
        println!("  State:       {}", latest.state);
        if let Some(err) = latest.last_error {
            println!("  Error:       {err}");
        }
    }
    Ok(())
}

fn handle_segments(config: &Config, cmd: &SegmentsCommand) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;
    let segments = match &cmd.session {
        Some(session) => {
            let mut segments = storage.segments_for_session(session)?;
            segments.truncate(cmd.limit);
            segments
        }
        None => storage.recent_segments(cmd.limit)?,
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&segments)?);
    } else {
        print_segments(&segments);
    }
    Ok(())
}

fn print_segments(segments: &[SegmentInfo]) {
    if segments.is_empty() {
        println!("No segments recorded.");
        return;
    }
    println!(
        "{:<16} {:>5}  {:<20} {:>8}  PATH",
        "SESSION", "INDEX", "STARTED", "LENGTH"
    );
    for segment in segments {
        let length = segment.ended_at.map_or_else(
            || "open".to_string(),
            |ended| format!("{}s", (ended - segment.started_at).num_seconds()),
        );
        println!(
            "{:<16} {:>5}  {:<20} {:>8}  {}",
            segment.session_id,
            segment.index,
            segment.started_at.format("%Y-%m-%d %H:%M:%S"),
            length,
            segment.path.display()
        );
    }
}

fn handle_samples(config: &Config, cmd: &SamplesCommand) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;
    if storage.get_session(&cmd.session)?.is_none() {
        bail!("no session {}", cmd.session);
    }
    let samples = storage.samples(&cmd.session, cmd.segment, cmd.limit)?;

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&samples)?),
        OutputFormat::Csv => {
            println!("{SAMPLE_CSV_HEADER}");
            for sample in &samples {
                println!("{}", sample_csv_row(sample));
            }
        }
        OutputFormat::Table => print_samples(&samples),
    }
    Ok(())
}

const SAMPLE_CSV_HEADER: &str = "timestamp,segment,elapsed_ms,latitude,longitude,altitude_m,\
satellites,speed_kph,fix_quality,gps_stale,in_alert,alert_count,band,frequency_ghz,direction,\
strength,detector_mode,radar_stale";

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn sample_csv_row(sample: &TelemetrySample) -> String {
    [
        sample.timestamp.to_rfc3339(),
        sample.segment_index.to_string(),
        sample.elapsed_ms.to_string(),
        opt(sample.latitude),
        opt(sample.longitude),
        opt(sample.altitude_m),
        opt(sample.satellites),
        opt(sample.speed_kph),
        opt(sample.fix_quality.as_deref()),
        sample.gps_stale.to_string(),
        sample.in_alert.to_string(),
        sample.alert_count.to_string(),
        opt(sample.band.as_deref()),
        opt(sample.frequency_ghz),
        opt(sample.direction.as_deref()),
        opt(sample.strength),
        opt(sample.detector_mode.as_deref()),
        sample.radar_stale.to_string(),
    ]
    .join(",")
}

fn print_samples(samples: &[TelemetrySample]) {
    if samples.is_empty() {
        println!("No samples.");
        return;
    }
    println!(
        "{:<8} {:>3} {:>10} {:>11} {:>7} {:<6} {:<6} {:>10} {:<6}",
        "TIME", "SEG", "LAT", "LON", "KPH", "FIX", "BAND", "GHZ", "DIR"
    );
    for sample in samples {
        println!(
            "{:<8} {:>3} {:>10} {:>11} {:>7} {:<6} {:<6} {:>10} {:<6}",
            sample.timestamp.format("%H:%M:%S"),
            sample.segment_index,
            sample.latitude.map_or_else(String::new, |v| format!("{v:.5}")),
            sample.longitude.map_or_else(String::new, |v| format!("{v:.5}")),
            sample.speed_kph.map_or_else(String::new, |v| format!("{v:.1}")),
            sample.fix_quality.as_deref().unwrap_or("-"),
            sample.band.as_deref().unwrap_or("-"),
            sample
                .frequency_ghz
                .map_or_else(String::new, |v| format!("{v:.3}")),
            sample.direction.as_deref().unwrap_or("-"),
        );
    }
}

async fn handle_decode(cmd: DecodeCommand) -> anyhow::Result<()> {
    match cmd {
        DecodeCommand::Radar {
            file,
            variant,
            json,
        } => {
            let bytes = read_capture(&file).await?;
            let report = app::decode_radar_dump(&bytes, variant.into());
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_radar_report(&report);
            }
        }
        DecodeCommand::Gps { file, json } => {
            let bytes = read_capture(&file).await?;
            let report = app::decode_nmea_log(&String::from_utf8_lossy(&bytes));
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_nmea_report(&report);
            }
        }
    }
    Ok(())
}

async fn read_capture(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

fn print_radar_report(report: &RadarDumpReport) {
    for alert in &report.alerts {
        let frequency = alert
            .frequency_ghz()
            .map_or_else(String::new, |ghz| format!(" {ghz:.3} GHz"));
        println!(
            "{}{} {} strength {}{}",
            alert.band,
            frequency,
            alert.direction,
            alert.strength_percent,
            if alert.priority { " (priority)" } else { "" }
        );
    }
    for mode in &report.modes {
        println!("mode: {mode}");
    }
    for rejected in &report.rejected {
        println!("rejected #{}: {}", rejected.position, rejected.error);
    }
    let stats = report.stats;
    println!();
    println!(
        "{} alerts, {} clears, {} frames ok, {} corrupt, {} skipped, {} bytes discarded",
        report.alerts.len(),
        report.clears,
        stats.frames_ok,
        stats.frames_corrupt,
        stats.frames_skipped,
        stats.bytes_discarded
    );
}

fn print_nmea_report(report: &NmeaLogReport) {
    for fix in &report.fixes {
        println!(
            "{:.6}, {:.6}  {:.1} km/h  {:.0}°  {}  sats {}",
            fix.latitude_deg,
            fix.longitude_deg,
            fix.speed_kph,
            fix.heading_deg,
            fix.fix_quality,
            fix.satellite_count
        );
    }
    for rejected in &report.rejected {
        println!("line {}: {}", rejected.position, rejected.error);
    }
    let stats = report.stats;
    println!();
    println!(
        "{} fixes, {} sentences ok, {} rejected",
        stats.fixes, stats.sentences_ok, stats.sentences_rejected
    );
}

fn handle_config(config: &Config, cmd: &ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                print_config(config);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file, devices } => {
            handle_validate(file.clone(), *devices)?;
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Radar]");
    println!("  Enabled:            {}", config.radar.enabled);
    println!("  Port:               {}", config.radar.port);
    println!("  Baud:               {}", config.radar.baud);
    println!("  Variant:            {}", config.radar.variant);
    println!();
    println!("[GPS]");
    println!("  Enabled:            {}", config.gps.enabled);
    println!("  Port:               {}", config.gps.port);
    println!("  Baud:               {}", config.gps.baud);
    println!();
    println!("[Recording]");
    println!("  Output dir:         {}", config.output_dir().display());
    println!("  Segment (s):        {}", config.recording.segment_seconds);
    println!("  Tick (ms):          {}", config.recording.tick_ms);
    println!("  Encoder:            {}", config.encoder.program);
    println!();
    println!("[Overlay]");
    println!("  Path:               {}", config.overlay_path().display());
    println!("  Show GPS:           {}", config.overlay.show_gps);
    println!("  Show radar:         {}", config.overlay.show_radar);
    println!("  Speed unit:         {:?}", config.overlay.speed_unit);
    println!();
    println!("[Storage]");
    println!("  Telemetry log:      {}", config.storage.telemetry_log);
    println!("  Database path:      {}", config.database_path().display());
    println!("  Max age (days):     {}", config.storage.max_age_days);
}

fn handle_validate(file: Option<std::path::PathBuf>, devices: bool) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    let config = match Config::load_from(Some(path)) {
        Ok(config) => config,
        Err(e) => bail!("configuration error: {e}"),
    };
    if devices {
        config.check_devices()?;
        println!("Devices present.");
    }
    println!("Configuration is valid.");
    Ok(())
}
