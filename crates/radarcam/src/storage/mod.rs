//! Storage layer for radarcam.
//!
//! This module provides the `SQLite` telemetry log: one row per recording
//! session, one per segment, and one per overlay tick.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{RecordingSession, SegmentInfo, SessionState};
use crate::telemetry::FusedSnapshot;

/// A stored recording session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    /// Session identifier.
    pub session_id: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Last known state.
    pub state: SessionState,
    /// Error that ended the session, if any.
    pub last_error: Option<String>,
}

/// One overlay tick, flattened for the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Owning session.
    pub session_id: String,
    /// Segment being recorded when the sample was taken.
    pub segment_index: u32,
    /// Wall-clock time of the snapshot.
    pub timestamp: DateTime<Utc>,
    /// Recording time since the session started.
    pub elapsed_ms: u64,
    /// Latitude, when a fix was available.
    pub latitude: Option<f64>,
    /// Longitude, when a fix was available.
    pub longitude: Option<f64>,
    /// Altitude in meters.
    pub altitude_m: Option<f64>,
    /// Satellites in use.
    pub satellites: Option<u8>,
    /// Ground speed in km/h.
    pub speed_kph: Option<f64>,
    /// Fix quality (`no_fix`, `2d`, `3d`).
    pub fix_quality: Option<String>,
    /// GPS data was stale.
    pub gps_stale: bool,
    /// At least one radar alert was visible.
    pub in_alert: bool,
    /// Number of visible alerts.
    pub alert_count: u32,
    /// Band of the featured alert.
    pub band: Option<String>,
    /// Frequency of the featured alert in GHz.
    pub frequency_ghz: Option<f64>,
    /// Direction of the featured alert.
    pub direction: Option<String>,
    /// Strength of the featured alert in percent.
    pub strength: Option<u8>,
    /// Detector mode.
    pub detector_mode: Option<String>,
    /// Radar data was stale.
    pub radar_stale: bool,
}

impl TelemetrySample {
    /// Flatten a snapshot.
    #[must_use]
    pub fn from_snapshot(
        session_id: &str,
        segment_index: u32,
        snapshot: &FusedSnapshot,
        elapsed: StdDuration,
    ) -> Self {
        let fix = snapshot.latest_gps.as_ref();
        let located = fix.filter(|f| f.fix_quality.has_fix());
        let alert = snapshot.featured_alert();
        Self {
            session_id: session_id.to_string(),
            segment_index,
            timestamp: snapshot.captured_at,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            latitude: located.map(|f| f.latitude_deg),
            longitude: located.map(|f| f.longitude_deg),
            altitude_m: located.and_then(|f| f.altitude_m),
            satellites: fix.map(|f| f.satellite_count),
            speed_kph: located.map(|f| f.speed_kph),
            fix_quality: fix.map(|f| f.fix_quality.to_string()),
            gps_stale: snapshot.staleness.gps_stale,
            in_alert: alert.is_some(),
            alert_count: u32::try_from(snapshot.latest_radar_alerts.len()).unwrap_or(u32::MAX),
            band: alert.map(|a| a.band.to_string()),
            frequency_ghz: alert.and_then(crate::telemetry::RadarAlert::frequency_ghz),
            direction: alert.map(|a| a.direction.to_string()),
            strength: alert.map(|a| a.strength_percent),
            detector_mode: snapshot.detector_mode.map(|m| m.to_string()),
            radar_stale: snapshot.staleness.radar_stale,
        }
    }
}

/// Storage engine for the telemetry log.
///
/// Provides persistent storage using `SQLite` with support for:
/// - Session and segment bookkeeping
/// - Per-tick telemetry samples
/// - Pruning of old sessions
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

const SAMPLE_COLUMNS: &str = r"
    session_id, segment_index, timestamp, elapsed_ms, latitude, longitude,
    altitude_m, satellites, speed_kph, fix_quality, gps_stale, in_alert,
    alert_count, band, frequency_ghz, direction, strength, detector_mode,
    radar_stale
";

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!(path = %path.display(), "opening telemetry database");
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets `radarcam status` read while a session is writing.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!(path = %path.display(), "telemetry database opened");
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the start of a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_session(&self, session: &RecordingSession) -> Result<()> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO sessions (id, started_at, ended_at, state, last_error)
            VALUES (?1, ?2, NULL, ?3, NULL)
            ",
            params![
                session.session_id,
                session.started_at.to_rfc3339(),
                session.state.to_string(),
            ],
        )?;
        debug!(session = %session.session_id, "session recorded");
        Ok(())
    }

    /// Record the end of a session.
    ///
    /// Returns `false` if the session is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn finish_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        state: SessionState,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE sessions SET ended_at = ?2, state = ?3, last_error = ?4 WHERE id = ?1",
            params![
                session_id,
                ended_at.to_rfc3339(),
                state.to_string(),
                last_error
            ],
        )?;
        Ok(affected > 0)
    }

    /// Get a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let result = self
            .conn
            .query_row(
                r"
                SELECT id, started_at, ended_at, state, last_error
                FROM sessions WHERE id = ?1
                ",
                [session_id],
                Self::row_to_session,
            )
            .optional()?;
        Ok(result)
    }

    /// Get the most recent sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, started_at, ended_at, state, last_error
            FROM sessions ORDER BY started_at DESC LIMIT ?1
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let sessions = stmt
            .query_map([limit_i64], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Record that a segment started.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_segment(&self, segment: &SegmentInfo) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO segments (session_id, segment_index, path, started_at, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                segment.session_id,
                segment.index,
                segment.path.to_string_lossy(),
                segment.started_at.to_rfc3339(),
                segment.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(session = %segment.session_id, segment = segment.index, id, "segment recorded");
        Ok(id)
    }

    /// Record that a segment was closed.
    ///
    /// Returns `false` if the segment is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn close_segment(&self, segment: &SegmentInfo) -> Result<bool> {
        let ended_at = segment.ended_at.unwrap_or_else(Utc::now);
        let affected = self.conn.execute(
            "UPDATE segments SET ended_at = ?3 WHERE session_id = ?1 AND segment_index = ?2",
            params![segment.session_id, segment.index, ended_at.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Segments of one session, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn segments_for_session(&self, session_id: &str) -> Result<Vec<SegmentInfo>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT session_id, segment_index, path, started_at, ended_at
            FROM segments WHERE session_id = ?1
            ORDER BY segment_index ASC
            ",
        )?;

        let segments = stmt
            .query_map([session_id], Self::row_to_segment)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(segments)
    }

    /// The most recent segments across all sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_segments(&self, limit: usize) -> Result<Vec<SegmentInfo>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT session_id, segment_index, path, started_at, ended_at
            FROM segments ORDER BY started_at DESC, segment_index DESC LIMIT ?1
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let segments = stmt
            .query_map([limit_i64], Self::row_to_segment)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(segments)
    }

    /// Append one telemetry sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_sample(&self, sample: &TelemetrySample) -> Result<i64> {
        self.conn.execute(
            &format!(
                "INSERT INTO samples ({SAMPLE_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                sample.session_id,
                sample.segment_index,
                sample.timestamp.to_rfc3339(),
                i64::try_from(sample.elapsed_ms).unwrap_or(i64::MAX),
                sample.latitude,
                sample.longitude,
                sample.altitude_m,
                sample.satellites,
                sample.speed_kph,
                sample.fix_quality,
                sample.gps_stale,
                sample.in_alert,
                sample.alert_count,
                sample.band,
                sample.frequency_ghz,
                sample.direction,
                sample.strength,
                sample.detector_mode,
                sample.radar_stale,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Samples of a session, oldest first, optionally limited to one segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn samples(
        &self,
        session_id: &str,
        segment_index: Option<u32>,
        limit: usize,
    ) -> Result<Vec<TelemetrySample>> {
        let mut stmt = self.conn.prepare(&format!(
            r"
            SELECT {SAMPLE_COLUMNS}
            FROM samples
            WHERE session_id = ?1 AND (?2 IS NULL OR segment_index = ?2)
            ORDER BY id ASC LIMIT ?3
            "
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let samples = stmt
            .query_map(
                params![session_id, segment_index, limit_i64],
                Self::row_to_sample,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    /// Delete sessions that started before `now - max_age`, with their
    /// segments and samples.
    ///
    /// Returns the number of sessions deleted. Segment video files are left
    /// on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM samples WHERE session_id IN (SELECT id FROM sessions WHERE started_at < ?1)",
            [&cutoff],
        )?;
        tx.execute(
            "DELETE FROM segments WHERE session_id IN (SELECT id FROM sessions WHERE started_at < ?1)",
            [&cutoff],
        )?;
        let affected = tx.execute("DELETE FROM sessions WHERE started_at < ?1", [&cutoff])?;
        tx.commit()?;

        if affected > 0 {
            info!(sessions = affected, "pruned old sessions");
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };

        let latest_session = self.recent_sessions(1)?.into_iter().next();

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_sessions: count("sessions")?,
            total_segments: count("segments")?,
            total_samples: count("samples")?,
            latest_session,
            db_size_bytes,
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
        let state_str: String = row.get(3)?;
        let state = match state_str.as_str() {
            "idle" => SessionState::Idle,
            "recording" => SessionState::Recording,
            "rotating_segment" => SessionState::RotatingSegment,
            "stopping" => SessionState::Stopping,
            "stopped" => SessionState::Stopped,
            _ => {
                warn!(state = %state_str, "unknown session state, treating as stopped");
                SessionState::Stopped
            }
        };

        Ok(SessionRecord {
            session_id: row.get(0)?,
            started_at: parse_time(&row.get::<_, String>(1)?),
            ended_at: row.get::<_, Option<String>>(2)?.map(|s| parse_time(&s)),
            state,
            last_error: row.get(4)?,
        })
    }

    fn row_to_segment(row: &rusqlite::Row) -> rusqlite::Result<SegmentInfo> {
        Ok(SegmentInfo {
            session_id: row.get(0)?,
            index: row.get(1)?,
            path: PathBuf::from(row.get::<_, String>(2)?),
            started_at: parse_time(&row.get::<_, String>(3)?),
            ended_at: row.get::<_, Option<String>>(4)?.map(|s| parse_time(&s)),
        })
    }

    fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<TelemetrySample> {
        let elapsed_ms: i64 = row.get(3)?;
        Ok(TelemetrySample {
            session_id: row.get(0)?,
            segment_index: row.get(1)?,
            timestamp: parse_time(&row.get::<_, String>(2)?),
            elapsed_ms: u64::try_from(elapsed_ms).unwrap_or(0),
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            altitude_m: row.get(6)?,
            satellites: row.get(7)?,
            speed_kph: row.get(8)?,
            fix_quality: row.get(9)?,
            gps_stale: row.get(10)?,
            in_alert: row.get(11)?,
            alert_count: row.get(12)?,
            band: row.get(13)?,
            frequency_ghz: row.get(14)?,
            direction: row.get(15)?,
            strength: row.get(16)?,
            detector_mode: row.get(17)?,
            radar_stale: row.get(18)?,
        })
    }
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or_else(
        |_| {
            warn!(value, "unparseable timestamp in database");
            DateTime::<Utc>::default()
        },
        |dt| dt.with_timezone(&Utc),
    )
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of sessions stored.
    pub total_sessions: i64,
    /// Total number of segments stored.
    pub total_segments: i64,
    /// Total number of samples stored.
    pub total_samples: i64,
    /// The most recently started session.
    pub latest_session: Option<SessionRecord>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
