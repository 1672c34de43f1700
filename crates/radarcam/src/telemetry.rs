//! Core telemetry types for radarcam.
//!
//! This module defines the records produced by the radar and GPS decoders and
//! the fused view handed to the overlay stage.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A point in time on both the monotonic and the wall clock.
///
/// The monotonic part orders events and drives staleness; the wall part is
/// what gets displayed and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timestamp {
    /// Monotonic instant (follows tokio's clock, so it can be paused in tests).
    #[serde(skip)]
    pub monotonic: Instant,
    /// Wall-clock time.
    pub wall: DateTime<Utc>,
}

impl Timestamp {
    /// Capture the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// Radar band of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadarBand {
    /// Laser (lidar) gun.
    Laser,
    /// Ka band, 33.4–36.0 GHz.
    Ka,
    /// K band, 24.05–24.25 GHz.
    K,
    /// X band, 10.50–10.55 GHz.
    X,
}

impl RadarBand {
    /// Rank used to break ties between alerts decoded at the same instant.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Laser => 3,
            Self::Ka => 2,
            Self::K => 1,
            Self::X => 0,
        }
    }

    /// Classify a frequency in MHz.
    ///
    /// A zero frequency is how the detector reports laser.
    #[must_use]
    pub fn from_frequency_mhz(mhz: u16) -> Option<Self> {
        match mhz {
            0 => Some(Self::Laser),
            10_500..=10_550 => Some(Self::X),
            24_050..=24_250 => Some(Self::K),
            33_400..=36_000 => Some(Self::Ka),
            _ => None,
        }
    }
}

impl std::fmt::Display for RadarBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Laser => write!(f, "Laser"),
            Self::Ka => write!(f, "Ka"),
            Self::K => write!(f, "K"),
            Self::X => write!(f, "X"),
        }
    }
}

/// Direction arrow lit for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertDirection {
    /// Source ahead of the vehicle.
    Front,
    /// Source beside the vehicle.
    Side,
    /// Source behind the vehicle.
    Rear,
    /// Direction could not be determined.
    Unknown,
}

impl std::fmt::Display for AlertDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Front => write!(f, "front"),
            Self::Side => write!(f, "side"),
            Self::Rear => write!(f, "rear"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single decoded radar-detector alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RadarAlert {
    /// Band of the threat.
    pub band: RadarBand,
    /// Frequency in MHz; `None` for laser.
    pub frequency_mhz: Option<f64>,
    /// Signal strength, 0–100.
    pub strength_percent: u8,
    /// Direction arrow.
    pub direction: AlertDirection,
    /// Whether the detector flagged this as its priority alert.
    pub priority: bool,
    /// When the alert was decoded.
    pub timestamp: Timestamp,
}

impl RadarAlert {
    /// Identity of the alert across repeated alert tables.
    ///
    /// The detector re-sends its whole table continuously; two records with the
    /// same slot describe the same threat.
    #[must_use]
    pub fn slot(&self) -> (RadarBand, Option<u64>) {
        (self.band, self.frequency_mhz.map(f64::to_bits))
    }

    /// Frequency in GHz, for display.
    #[must_use]
    pub fn frequency_ghz(&self) -> Option<f64> {
        self.frequency_mhz.map(|mhz| mhz / 1000.0)
    }
}

/// Operating mode reported on the detector's display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorMode {
    /// All Bogeys mode.
    AllBogeys,
    /// Logic mode.
    Logic,
    /// Advanced Logic mode.
    AdvancedLogic,
    /// Mode not recognized.
    Unknown,
}

impl std::fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllBogeys => write!(f, "All Bogeys"),
            Self::Logic => write!(f, "Logic"),
            Self::AdvancedLogic => write!(f, "Adv. Logic"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// GPS fix quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixQuality {
    /// No satellite lock.
    NoFix,
    /// Two-dimensional fix.
    #[serde(rename = "2d")]
    TwoD,
    /// Three-dimensional fix.
    #[serde(rename = "3d")]
    ThreeD,
}

impl FixQuality {
    /// Whether the position fields carry a real position.
    #[must_use]
    pub fn has_fix(self) -> bool {
        !matches!(self, Self::NoFix)
    }
}

impl std::fmt::Display for FixQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFix => write!(f, "no_fix"),
            Self::TwoD => write!(f, "2d"),
            Self::ThreeD => write!(f, "3d"),
        }
    }
}

/// A complete GPS fix assembled from one sentence cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsFix {
    /// Latitude in decimal degrees, north positive.
    pub latitude_deg: f64,
    /// Longitude in decimal degrees, east positive.
    pub longitude_deg: f64,
    /// Altitude above mean sea level in meters, if reported.
    pub altitude_m: Option<f64>,
    /// Ground speed in km/h.
    pub speed_kph: f64,
    /// Course over ground in degrees, `[0, 360)`.
    pub heading_deg: f64,
    /// Fix quality.
    pub fix_quality: FixQuality,
    /// Satellites used in the solution.
    pub satellite_count: u8,
    /// When the fix was completed.
    pub timestamp: Timestamp,
}

impl GpsFix {
    /// Ground speed in miles per hour.
    #[must_use]
    pub fn speed_mph(&self) -> f64 {
        self.speed_kph / 1.609_344
    }
}

/// Per-sensor staleness of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StalenessFlags {
    /// Radar data is older than the radar freshness threshold (or absent).
    pub radar_stale: bool,
    /// GPS data is older than the GPS freshness threshold (or absent).
    pub gps_stale: bool,
}

/// A point-in-time fused view of the latest sensor state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedSnapshot {
    /// Latest radar alerts, most recent first.
    pub latest_radar_alerts: Vec<RadarAlert>,
    /// Latest GPS fix, if any has been received.
    pub latest_gps: Option<GpsFix>,
    /// Latest detector mode, if any has been received.
    pub detector_mode: Option<DetectorMode>,
    /// Monotonic time the snapshot was taken at.
    #[serde(skip)]
    pub snapshot_time: Instant,
    /// Wall-clock time the snapshot was taken at.
    pub captured_at: DateTime<Utc>,
    /// Staleness per sensor.
    pub staleness: StalenessFlags,
}

impl FusedSnapshot {
    /// An empty, all-stale snapshot.
    #[must_use]
    pub fn empty(now: Instant) -> Self {
        Self {
            latest_radar_alerts: Vec::new(),
            latest_gps: None,
            detector_mode: None,
            snapshot_time: now,
            captured_at: Utc::now(),
            staleness: StalenessFlags {
                radar_stale: true,
                gps_stale: true,
            },
        }
    }

    /// The alert to feature on the overlay: the first priority alert, else the
    /// most recent one.
    #[must_use]
    pub fn featured_alert(&self) -> Option<&RadarAlert> {
        self.latest_radar_alerts
            .iter()
            .find(|a| a.priority)
            .or_else(|| self.latest_radar_alerts.first())
    }
}

/// Sort alerts most-recent-first, breaking ties by band rank.
pub fn order_alerts(alerts: &mut [RadarAlert]) {
    alerts.sort_by_key(|a| (Reverse(a.timestamp.monotonic), Reverse(a.band.rank())));
}
