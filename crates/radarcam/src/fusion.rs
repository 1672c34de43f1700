//! Sensor fusion bus.
//!
//! Holds the latest known state of each sensor and produces point-in-time
//! [`FusedSnapshot`]s for the overlay stage. Producers (reader tasks) and the
//! consumer (the session tick loop) share a cloneable [`SensorFusionBus`]
//! handle. Every lock is held only long enough to copy a few values, and no
//! two locks are ever held together.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::trace;

use crate::telemetry::{
    order_alerts, DetectorMode, FusedSnapshot, GpsFix, RadarAlert, StalenessFlags,
};

/// Tuning for the fusion bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionConfig {
    /// Maximum number of radar alerts kept.
    pub radar_capacity: usize,
    /// Radar data older than this is stale.
    pub radar_stale: Duration,
    /// A GPS fix older than this is stale.
    pub gps_stale: Duration,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            radar_capacity: 5,
            radar_stale: Duration::from_millis(2000),
            gps_stale: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Default)]
struct RadarState {
    /// Oldest first.
    alerts: VecDeque<RadarAlert>,
    last_activity: Option<Instant>,
    mode: Option<DetectorMode>,
}

#[derive(Debug)]
struct Shared {
    config: FusionConfig,
    radar: Mutex<RadarState>,
    gps: Mutex<Option<GpsFix>>,
}

/// Shared latest-state store for both sensors.
#[derive(Debug, Clone)]
pub struct SensorFusionBus {
    shared: Arc<Shared>,
}

/// Lock, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl SensorFusionBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new(config: FusionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                radar: Mutex::new(RadarState::default()),
                gps: Mutex::new(None),
            }),
        }
    }

    /// The bus configuration.
    #[must_use]
    pub fn config(&self) -> FusionConfig {
        self.shared.config
    }

    /// Record a decoded radar alert.
    ///
    /// An alert already held for the same band and frequency is replaced;
    /// beyond capacity the oldest alert is evicted.
    pub fn publish_radar(&self, alert: RadarAlert) {
        let capacity = self.shared.config.radar_capacity.max(1);
        let mut radar = lock(&self.shared.radar);
        let slot = alert.slot();
        radar.alerts.retain(|held| held.slot() != slot);
        radar.alerts.push_back(alert);
        while radar.alerts.len() > capacity {
            radar.alerts.pop_front();
        }
        radar.last_activity = Some(
            radar
                .last_activity
                .map_or(alert.timestamp.monotonic, |t| t.max(alert.timestamp.monotonic)),
        );
    }

    /// Record that the detector reported an empty alert table.
    pub fn publish_radar_cleared(&self) {
        let mut radar = lock(&self.shared.radar);
        radar.alerts.clear();
        radar.last_activity = Some(Instant::now());
    }

    /// Record the detector's operating mode. `Unknown` is ignored.
    pub fn publish_detector_mode(&self, mode: DetectorMode) {
        if mode == DetectorMode::Unknown {
            trace!("ignoring unknown detector mode");
            return;
        }
        lock(&self.shared.radar).mode = Some(mode);
    }

    /// Record a new GPS fix, superseding the previous one.
    pub fn publish_gps(&self, fix: GpsFix) {
        *lock(&self.shared.gps) = Some(fix);
    }

    /// Take a point-in-time view of both sensors.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> FusedSnapshot {
        let config = self.shared.config;
        let is_older =
            |at: Instant, threshold: Duration| now.saturating_duration_since(at) > threshold;

        let (mut alerts, radar_stale, detector_mode) = {
            let radar = lock(&self.shared.radar);
            let radar_stale = radar
                .last_activity
                .map_or(true, |at| is_older(at, config.radar_stale));
            let alerts: Vec<RadarAlert> = radar
                .alerts
                .iter()
                .filter(|a| radar_stale || !is_older(a.timestamp.monotonic, config.radar_stale))
                .copied()
                .collect();
            (alerts, radar_stale, radar.mode)
        };
        order_alerts(&mut alerts);

        let latest_gps = *lock(&self.shared.gps);
        let gps_stale =
            latest_gps.map_or(true, |fix| is_older(fix.timestamp.monotonic, config.gps_stale));

        FusedSnapshot {
            latest_radar_alerts: alerts,
            latest_gps,
            detector_mode,
            snapshot_time: now,
            captured_at: Utc::now(),
            staleness: StalenessFlags {
                radar_stale,
                gps_stale,
            },
        }
    }
}

impl Default for SensorFusionBus {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}
