//! ESP wire-format definitions.
//!
//! Frame layout shared by both protocol generations:
//!
//! ```text
//! 0xAA | 0xD0|dst | 0xE0|org | packet id | len | payload … | [checksum] | 0xAB
//! ```
//!
//! The generations differ in whether a checksum byte is present, what the
//! length byte counts, and which device id the detector answers on.

use serde::{Deserialize, Serialize};

use crate::telemetry::{AlertDirection, DetectorMode, RadarAlert, RadarBand, Timestamp};

/// Start-of-frame marker.
pub const START_OF_FRAME: u8 = 0xAA;
/// End-of-frame marker.
pub const END_OF_FRAME: u8 = 0xAB;
/// High nibble of the destination byte.
pub const DESTINATION_BASE: u8 = 0xD0;
/// High nibble of the origin byte.
pub const ORIGIN_BASE: u8 = 0xE0;
/// Bytes before the payload: sync, destination, origin, packet id, length.
pub const HEADER_LEN: usize = 5;

/// ESP device ids (low nibble of the address bytes).
pub mod device {
    /// Host adapter (this program speaks as the V1connection).
    pub const HOST: u8 = 0x06;
    /// Broadcast to every device on the bus.
    pub const GENERAL_BROADCAST: u8 = 0x08;
    /// Detector without checksum support.
    pub const DETECTOR_LEGACY: u8 = 0x09;
    /// Detector with checksum support.
    pub const DETECTOR: u8 = 0x0A;
}

/// ESP packet ids this program sends or understands.
pub mod packet {
    /// Firmware version response.
    pub const RESP_VERSION: u8 = 0x02;
    /// Periodic display data.
    pub const INF_DISPLAY_DATA: u8 = 0x31;
    /// Ask the detector to start streaming its alert table.
    pub const REQ_START_ALERT_DATA: u8 = 0x41;
    /// Ask the detector to stop streaming its alert table.
    pub const REQ_STOP_ALERT_DATA: u8 = 0x42;
    /// One alert-table record.
    pub const RESP_ALERT_DATA: u8 = 0x43;
}

/// Radar-detector protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// Current generation: one checksum byte before the end marker, counted in
    /// the length byte.
    #[default]
    Checksummed,
    /// Older generation: no checksum byte.
    Legacy,
}

impl ProtocolVariant {
    /// Total frame length for a given header length byte.
    ///
    /// Returns `None` if the length byte cannot describe a frame in this
    /// variant (a checksummed frame always counts at least its checksum).
    #[must_use]
    pub fn frame_len(self, length_byte: u8) -> Option<usize> {
        let declared = usize::from(length_byte);
        match self {
            Self::Checksummed if declared == 0 => None,
            Self::Checksummed | Self::Legacy => Some(HEADER_LEN + declared + 1),
        }
    }

    /// Payload length for a given header length byte.
    #[must_use]
    pub fn payload_len(self, length_byte: u8) -> usize {
        let declared = usize::from(length_byte);
        match self {
            Self::Checksummed => declared.saturating_sub(1),
            Self::Legacy => declared,
        }
    }

    /// Whether frames carry a checksum byte.
    #[must_use]
    pub fn has_checksum(self) -> bool {
        matches!(self, Self::Checksummed)
    }

    /// Device id the detector uses on this generation.
    #[must_use]
    pub fn detector_id(self) -> u8 {
        match self {
            Self::Checksummed => device::DETECTOR,
            Self::Legacy => device::DETECTOR_LEGACY,
        }
    }
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Checksummed => write!(f, "checksummed"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// 8-bit sum of the given bytes.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a complete frame.
///
/// `destination` and `origin` are device ids; the address nibbles are added
/// here.
///
/// # Panics
///
/// Panics if the payload does not fit in a single frame (more than 254 bytes).
#[must_use]
pub fn build_frame(
    variant: ProtocolVariant,
    destination: u8,
    origin: u8,
    packet_id: u8,
    payload: &[u8],
) -> Vec<u8> {
    assert!(payload.len() < 255, "ESP payload too long");
    let mut length = payload.len();
    if variant.has_checksum() {
        length += 1;
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + length + 1);
    frame.push(START_OF_FRAME);
    frame.push(DESTINATION_BASE | (destination & 0x0F));
    frame.push(ORIGIN_BASE | (origin & 0x0F));
    frame.push(packet_id);
    #[allow(clippy::cast_possible_truncation)]
    frame.push(length as u8);
    frame.extend_from_slice(payload);
    if variant.has_checksum() {
        frame.push(checksum(&frame));
    }
    frame.push(END_OF_FRAME);
    frame
}

/// Build a host request addressed to the detector.
#[must_use]
pub fn encode_request(variant: ProtocolVariant, packet_id: u8, payload: &[u8]) -> Vec<u8> {
    build_frame(variant, variant.detector_id(), device::HOST, packet_id, payload)
}

/// One record of the detector's alert table (`respAlertData`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertRecord {
    /// 1-based position of this record in the table.
    pub index: u8,
    /// Number of records in the table; 0 means no alerts.
    pub count: u8,
    /// Frequency in MHz (0 for laser).
    pub frequency_mhz: u16,
    /// Raw front signal strength.
    pub front_strength: u8,
    /// Raw rear signal strength.
    pub rear_strength: u8,
    /// Band and arrow bits.
    pub band_arrow: u8,
    /// Auxiliary bits (bit 7 = priority).
    pub aux: u8,
}

/// Size of an alert record payload.
pub const ALERT_RECORD_LEN: usize = 7;

const BAND_LASER: u8 = 0x01;
const BAND_KA: u8 = 0x02;
const BAND_K: u8 = 0x04;
const BAND_X: u8 = 0x08;
const ARROW_FRONT: u8 = 0x20;
const ARROW_SIDE: u8 = 0x40;
const ARROW_REAR: u8 = 0x80;
const AUX_PRIORITY: u8 = 0x80;

impl AlertRecord {
    /// Parse an alert record payload.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < ALERT_RECORD_LEN {
            return None;
        }
        Some(Self {
            index: payload[0] >> 4,
            count: payload[0] & 0x0F,
            frequency_mhz: u16::from_be_bytes([payload[1], payload[2]]),
            front_strength: payload[3],
            rear_strength: payload[4],
            band_arrow: payload[5],
            aux: payload[6],
        })
    }

    /// Band from the band bits, falling back to the frequency.
    #[must_use]
    pub fn band(&self) -> Option<RadarBand> {
        let bits = self.band_arrow;
        if bits & BAND_LASER != 0 {
            Some(RadarBand::Laser)
        } else if bits & BAND_KA != 0 {
            Some(RadarBand::Ka)
        } else if bits & BAND_K != 0 {
            Some(RadarBand::K)
        } else if bits & BAND_X != 0 {
            Some(RadarBand::X)
        } else {
            RadarBand::from_frequency_mhz(self.frequency_mhz)
        }
    }

    /// Direction from the arrow bits, falling back to front/rear strength.
    #[must_use]
    pub fn direction(&self) -> AlertDirection {
        let bits = self.band_arrow;
        if bits & ARROW_FRONT != 0 {
            AlertDirection::Front
        } else if bits & ARROW_SIDE != 0 {
            AlertDirection::Side
        } else if bits & ARROW_REAR != 0 {
            AlertDirection::Rear
        } else if self.front_strength > self.rear_strength {
            AlertDirection::Front
        } else if self.rear_strength > self.front_strength {
            AlertDirection::Rear
        } else if self.front_strength > 0 {
            AlertDirection::Side
        } else {
            AlertDirection::Unknown
        }
    }

    /// Strongest of the two raw strengths scaled to 0–100.
    #[must_use]
    pub fn strength_percent(&self) -> u8 {
        let raw = u16::from(self.front_strength.max(self.rear_strength));
        #[allow(clippy::cast_possible_truncation)]
        let percent = (raw * 100 / 255) as u8;
        percent
    }

    /// Whether the detector marks this record as its priority alert.
    #[must_use]
    pub fn is_priority(&self) -> bool {
        self.aux & AUX_PRIORITY != 0
    }

    /// Convert into an alert stamped with `timestamp`.
    ///
    /// Returns `None` when the band cannot be determined.
    #[must_use]
    pub fn to_alert(&self, timestamp: Timestamp) -> Option<RadarAlert> {
        let band = self.band()?;
        let frequency_mhz = match band {
            RadarBand::Laser => None,
            _ => Some(f64::from(self.frequency_mhz)),
        };
        Some(RadarAlert {
            band,
            frequency_mhz,
            strength_percent: self.strength_percent(),
            direction: self.direction(),
            priority: self.is_priority(),
            timestamp,
        })
    }
}

/// Decoded `infDisplayData` content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayState {
    /// Mode shown on the bogey counter; `Unknown` while it shows a count.
    pub mode: DetectorMode,
    /// Laser indicator lit.
    pub laser: bool,
    /// Detector asks hosts to hold off sending (time-slice hold-off).
    pub time_slice_holdoff: bool,
    /// System-status bit; band indicators are only meaningful when set.
    pub system_active: bool,
}

/// Minimum `infDisplayData` payload length.
pub const DISPLAY_DATA_LEN: usize = 6;

const BOGEY_SEGMENTS_MASK: u8 = 0x7F;
const SEGMENTS_ALL_BOGEYS: u8 = 0x77;
const SEGMENTS_LOGIC: u8 = 0x18;
const SEGMENTS_ADVANCED_LOGIC: u8 = 0x38;
const AUX0_HOLDOFF: u8 = 0x02;
const AUX0_SYSTEM_STATUS: u8 = 0x04;

impl DisplayState {
    /// Parse an `infDisplayData` payload.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < DISPLAY_DATA_LEN {
            return None;
        }
        let mode = match payload[0] & BOGEY_SEGMENTS_MASK {
            SEGMENTS_ALL_BOGEYS => DetectorMode::AllBogeys,
            SEGMENTS_LOGIC => DetectorMode::Logic,
            SEGMENTS_ADVANCED_LOGIC => DetectorMode::AdvancedLogic,
            _ => DetectorMode::Unknown,
        };
        let aux0 = payload[5];
        let system_active = aux0 & AUX0_SYSTEM_STATUS != 0;
        Some(Self {
            mode,
            laser: system_active && payload[3] & BAND_LASER != 0,
            time_slice_holdoff: aux0 & AUX0_HOLDOFF != 0,
            system_active,
        })
    }
}
