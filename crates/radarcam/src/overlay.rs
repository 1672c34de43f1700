//! Overlay sinks.
//!
//! Every overlay tick the session hands the latest [`FusedSnapshot`] to each
//! sink. [`StatusFileOverlay`] keeps the text file that `ffmpeg`'s `drawtext`
//! filter re-reads; [`TelemetryLog`] appends a row per tick to the database.

use std::fmt;
use std::fmt::Write as _;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::{RecordingSession, SegmentInfo, SessionState};
use crate::storage::{Storage, TelemetrySample};
use crate::telemetry::FusedSnapshot;

/// Receives snapshots in step with the recording.
#[async_trait::async_trait]
pub trait OverlaySink: Send + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// A new segment started recording.
    ///
    /// # Errors
    ///
    /// Sink errors are logged by the session and never stop recording.
    async fn begin_segment(&mut self, _segment: &SegmentInfo) -> Result<()> {
        Ok(())
    }

    /// Render one tick.
    ///
    /// # Errors
    ///
    /// Sink errors are logged by the session and never stop recording.
    async fn render(&mut self, snapshot: &FusedSnapshot, elapsed: Duration) -> Result<()>;

    /// The segment was closed; `ended_at` is set.
    ///
    /// # Errors
    ///
    /// Sink errors are logged by the session and never stop recording.
    async fn end_segment(&mut self, _segment: &SegmentInfo) -> Result<()> {
        Ok(())
    }

    /// The session reached `Stopped`, with the error that ended it, if any.
    ///
    /// # Errors
    ///
    /// Sink errors are logged by the session.
    async fn session_ended(
        &mut self,
        _session: &RecordingSession,
        _error: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Unit for the speed readout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    /// Miles per hour.
    #[default]
    Mph,
    /// Kilometers per hour.
    Kph,
}

/// What the overlay shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayOptions {
    /// Speed unit.
    pub speed_unit: SpeedUnit,
    /// Show the GPS line.
    pub show_gps: bool,
    /// Show the radar line.
    pub show_radar: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            speed_unit: SpeedUnit::Mph,
            show_gps: true,
            show_radar: true,
        }
    }
}

/// Render a snapshot as overlay text, one line per readout.
#[must_use]
pub fn render_overlay_text(
    snapshot: &FusedSnapshot,
    elapsed: Duration,
    options: &OverlayOptions,
) -> String {
    let mut lines = vec![format!(
        "{} | REC {}",
        snapshot
            .captured_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        format_elapsed(elapsed)
    )];
    if options.show_gps {
        lines.push(gps_line(snapshot, options.speed_unit));
    }
    if options.show_radar {
        lines.push(radar_line(snapshot));
    }
    lines.join("\n")
}

/// `HH:MM:SS`.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn gps_line(snapshot: &FusedSnapshot, unit: SpeedUnit) -> String {
    let Some(fix) = snapshot.latest_gps.as_ref() else {
        return "GPS: no fix".to_string();
    };

    let mut line = if fix.fix_quality.has_fix() {
        let speed = match unit {
            SpeedUnit::Mph => format!("{:.0} MPH", fix.speed_mph()),
            SpeedUnit::Kph => format!("{:.0} KM/H", fix.speed_kph),
        };
        format!(
            "GPS: {:.5}, {:.5} | Sats: {} | {speed}",
            fix.latitude_deg, fix.longitude_deg, fix.satellite_count
        )
    } else {
        format!("GPS: no fix | Sats: {}", fix.satellite_count)
    };
    if snapshot.staleness.gps_stale {
        line.push_str(" (stale)");
    }
    line
}

fn radar_line(snapshot: &FusedSnapshot) -> String {
    let stale = snapshot.staleness.radar_stale;
    let mut line = match snapshot.featured_alert() {
        Some(alert) => {
            let mut line = format!("RADAR: {}", alert.band);
            if let Some(ghz) = alert.frequency_ghz() {
                let _ = write!(line, " {ghz:.3} GHz");
            }
            let _ = write!(
                line,
                " | Dir: {} | Str: {}",
                alert.direction, alert.strength_percent
            );
            let others = snapshot.latest_radar_alerts.len() - 1;
            if others > 0 {
                let _ = write!(line, " (+{others})");
            }
            if stale {
                line.push_str(" (stale)");
            }
            line
        }
        None if stale => "RADAR: offline".to_string(),
        None => "RADAR: clear".to_string(),
    };
    if let Some(mode) = snapshot.detector_mode {
        let _ = write!(line, " | Mode: {mode}");
    }
    line
}

/// Keeps the overlay text file the encoder reads.
///
/// Each tick writes a temporary sibling and renames it over the target, so
/// the encoder never sees a half-written file.
#[derive(Debug)]
pub struct StatusFileOverlay {
    path: PathBuf,
    tmp_path: PathBuf,
    options: OverlayOptions,
}

impl StatusFileOverlay {
    /// Create the sink and write an initial overlay, so the file exists
    /// before the first encoder starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file can't be written.
    pub fn new(path: impl Into<PathBuf>, options: OverlayOptions) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut name = path
            .file_name()
            .map_or_else(|| OsString::from("overlay"), ToOwned::to_owned);
        name.push(".tmp");
        let tmp_path = path.with_file_name(name);

        let initial = render_overlay_text(
            &FusedSnapshot::empty(tokio::time::Instant::now()),
            Duration::ZERO,
            &options,
        );
        std::fs::write(&tmp_path, &initial)?;
        std::fs::rename(&tmp_path, &path)?;

        Ok(Self {
            path,
            tmp_path,
            options,
        })
    }

    /// The overlay file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl OverlaySink for StatusFileOverlay {
    fn name(&self) -> &str {
        "status-file"
    }

    async fn render(&mut self, snapshot: &FusedSnapshot, elapsed: Duration) -> Result<()> {
        let text = render_overlay_text(snapshot, elapsed, &self.options);
        tokio::fs::write(&self.tmp_path, text).await?;
        tokio::fs::rename(&self.tmp_path, &self.path).await?;
        Ok(())
    }
}

/// Appends sessions, segments and per-tick samples to the database.
#[derive(Debug)]
pub struct TelemetryLog {
    storage: Arc<Mutex<Storage>>,
    current: Option<(String, u32)>,
}

impl TelemetryLog {
    /// Log into `storage`.
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self::shared(Arc::new(Mutex::new(storage)))
    }

    /// Log into storage that is also used elsewhere.
    #[must_use]
    pub fn shared(storage: Arc<Mutex<Storage>>) -> Self {
        Self {
            storage,
            current: None,
        }
    }

    /// The underlying storage.
    #[must_use]
    pub fn storage(&self) -> Arc<Mutex<Storage>> {
        Arc::clone(&self.storage)
    }

    async fn with_storage<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || {
            let storage = storage.lock().unwrap_or_else(PoisonError::into_inner);
            op(&storage)
        })
        .await
        .map_err(|err| Error::internal(format!("telemetry log task failed: {err}")))?
    }
}

#[async_trait::async_trait]
impl OverlaySink for TelemetryLog {
    fn name(&self) -> &str {
        "telemetry-log"
    }

    async fn begin_segment(&mut self, segment: &SegmentInfo) -> Result<()> {
        self.current = Some((segment.session_id.clone(), segment.index));
        let segment = segment.clone();
        self.with_storage(move |storage| {
            if segment.index == 0 {
                storage.insert_session(&RecordingSession {
                    session_id: segment.session_id.clone(),
                    started_at: segment.started_at,
                    current_segment_index: 0,
                    segment_started_at: segment.started_at,
                    state: SessionState::Recording,
                })?;
            }
            storage.insert_segment(&segment).map(|_| ())
        })
        .await
    }

    async fn render(&mut self, snapshot: &FusedSnapshot, elapsed: Duration) -> Result<()> {
        let Some((session_id, index)) = &self.current else {
            return Ok(());
        };
        let sample = TelemetrySample::from_snapshot(session_id, *index, snapshot, elapsed);
        self.with_storage(move |storage| storage.insert_sample(&sample).map(|_| ()))
            .await
    }

    async fn end_segment(&mut self, segment: &SegmentInfo) -> Result<()> {
        self.current = None;
        let segment = segment.clone();
        let closed = self
            .with_storage(move |storage| storage.close_segment(&segment))
            .await?;
        if !closed {
            debug!("closed a segment the log never saw start");
        }
        Ok(())
    }

    async fn session_ended(
        &mut self,
        session: &RecordingSession,
        error: Option<&str>,
    ) -> Result<()> {
        let session_id = session.session_id.clone();
        let state = session.state;
        let error = error.map(ToOwned::to_owned);
        self.with_storage(move |storage| {
            storage
                .finish_session(&session_id, Utc::now(), state, error.as_deref())
                .map(|_| ())
        })
        .await
    }
}
