//! `SQLite` schema definitions for the telemetry log.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the sessions table.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    state TEXT NOT NULL,
    last_error TEXT
)
";

/// SQL statement to create the segments table.
pub const CREATE_SEGMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS segments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    segment_index INTEGER NOT NULL,
    path TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    UNIQUE (session_id, segment_index)
)
";

/// SQL statement to create the per-tick samples table.
pub const CREATE_SAMPLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    segment_index INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    latitude REAL,
    longitude REAL,
    altitude_m REAL,
    satellites INTEGER,
    speed_kph REAL,
    fix_quality TEXT,
    gps_stale INTEGER NOT NULL,
    in_alert INTEGER NOT NULL,
    alert_count INTEGER NOT NULL,
    band TEXT,
    frequency_ghz REAL,
    direction TEXT,
    strength INTEGER,
    detector_mode TEXT,
    radar_stale INTEGER NOT NULL
)
";

/// SQL statement to create an index on session start time.
pub const CREATE_SESSIONS_STARTED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at DESC)
";

/// SQL statement to create an index on segments by session.
pub const CREATE_SEGMENTS_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_segments_session ON segments(session_id, segment_index)
";

/// SQL statement to create an index on samples by segment.
pub const CREATE_SAMPLES_SEGMENT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_samples_segment ON samples(session_id, segment_index)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SESSIONS_TABLE,
    CREATE_SEGMENTS_TABLE,
    CREATE_SAMPLES_TABLE,
    CREATE_SESSIONS_STARTED_INDEX,
    CREATE_SEGMENTS_SESSION_INDEX,
    CREATE_SAMPLES_SEGMENT_INDEX,
    CREATE_METADATA_TABLE,
];
