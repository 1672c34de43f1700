//! Radar-detector frame decoder.
//!
//! Turns the detector's unframed byte stream into [`RadarEvent`]s. The decoder
//! is a small state machine:
//!
//! ```text
//! SeekSync -> ReadLength -> ReadPayload -> VerifyChecksum -> Emit
//! ```
//!
//! Whenever a candidate frame fails an integrity check, only its sync byte is
//! discarded and the scan restarts right after it, so a corrupted frame never
//! swallows a valid frame that follows it.

pub mod protocol;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::telemetry::Timestamp;

pub use protocol::{AlertRecord, DisplayState, ProtocolVariant};

use protocol::{
    checksum, device, packet, DESTINATION_BASE, END_OF_FRAME, HEADER_LEN, ORIGIN_BASE,
    START_OF_FRAME,
};

/// An integrity failure of a candidate frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Address bytes after the sync byte do not carry the ESP nibbles.
    #[error("bad address bytes {destination:#04x} {origin:#04x}")]
    BadAddress {
        /// Destination byte seen.
        destination: u8,
        /// Origin byte seen.
        origin: u8,
    },

    /// Length byte is impossible for the configured variant.
    #[error("invalid length byte {0}")]
    BadLength(u8),

    /// Checksum mismatch.
    #[error("checksum mismatch (expected {expected:#04x}, found {found:#04x})")]
    BadChecksum {
        /// Checksum computed over the frame.
        expected: u8,
        /// Checksum byte carried by the frame.
        found: u8,
    },

    /// The declared frame does not end with the end-of-frame marker.
    #[error("missing end-of-frame marker (found {0:#04x})")]
    MissingEndOfFrame(u8),
}

/// Something the detector told us.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RadarEvent {
    /// One alert-table record.
    Alert(crate::telemetry::RadarAlert),
    /// The detector reported an empty alert table.
    AlertsCleared,
    /// Periodic display data.
    Display(DisplayState),
}

/// Decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Scanning for the start-of-frame byte.
    SeekSync,
    /// Waiting for the complete header.
    ReadLength,
    /// Waiting for the declared payload (and trailer).
    ReadPayload {
        /// Total frame length.
        frame_len: usize,
    },
    /// Checking checksum and end marker.
    VerifyChecksum {
        /// Total frame length.
        frame_len: usize,
    },
    /// A verified frame sits at the front of the buffer.
    Emit {
        /// Total frame length.
        frame_len: usize,
    },
}

/// Counters kept by the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    /// Frames that passed integrity checks.
    pub frames_ok: u64,
    /// Candidate frames rejected by integrity checks.
    pub frames_corrupt: u64,
    /// Valid frames ignored (housekeeping, host echoes, malformed payloads).
    pub frames_skipped: u64,
    /// Bytes discarded while hunting for sync.
    pub bytes_discarded: u64,
}

/// Streaming decoder for one radar-detector connection.
#[derive(Debug)]
pub struct RadarFrameDecoder {
    variant: ProtocolVariant,
    state: DecoderState,
    buffer: Vec<u8>,
    stats: DecoderStats,
}

impl RadarFrameDecoder {
    /// Create a decoder for the given protocol generation.
    #[must_use]
    pub fn new(variant: ProtocolVariant) -> Self {
        Self {
            variant,
            state: DecoderState::SeekSync,
            buffer: Vec::with_capacity(512),
            stats: DecoderStats::default(),
        }
    }

    /// The configured protocol generation.
    #[must_use]
    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Current state of the state machine.
    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Decoder counters.
    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes buffered but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame, e.g. after the device reconnects.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = DecoderState::SeekSync;
    }

    /// Append bytes read from the device.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Iterate over everything decodable from the buffered bytes.
    pub fn events(&mut self) -> impl Iterator<Item = Result<RadarEvent, FrameError>> + '_ {
        std::iter::from_fn(move || self.decode_next())
    }

    /// Decode the next event.
    ///
    /// Returns `None` when more bytes are needed. Integrity failures are
    /// returned as `Some(Err(_))` after the decoder has already resynchronized,
    /// so callers just log them and keep going.
    pub fn decode_next(&mut self) -> Option<Result<RadarEvent, FrameError>> {
        loop {
            match self.state {
                DecoderState::SeekSync => {
                    let Some(pos) = self.buffer.iter().position(|b| *b == START_OF_FRAME) else {
                        self.stats.bytes_discarded += self.buffer.len() as u64;
                        self.buffer.clear();
                        return None;
                    };
                    if pos > 0 {
                        trace!(discarded = pos, "skipping bytes before sync");
                        self.stats.bytes_discarded += pos as u64;
                        self.buffer.drain(..pos);
                    }
                    self.state = DecoderState::ReadLength;
                }
                DecoderState::ReadLength => {
                    if self.buffer.len() < HEADER_LEN {
                        return None;
                    }
                    let destination = self.buffer[1];
                    let origin = self.buffer[2];
                    if destination & 0xF0 != DESTINATION_BASE || origin & 0xF0 != ORIGIN_BASE {
                        return Some(Err(self.resync(FrameError::BadAddress {
                            destination,
                            origin,
                        })));
                    }
                    let length = self.buffer[4];
                    let Some(frame_len) = self.variant.frame_len(length) else {
                        return Some(Err(self.resync(FrameError::BadLength(length))));
                    };
                    self.state = DecoderState::ReadPayload { frame_len };
                }
                DecoderState::ReadPayload { frame_len } => {
                    if self.buffer.len() < frame_len {
                        return None;
                    }
                    self.state = DecoderState::VerifyChecksum { frame_len };
                }
                DecoderState::VerifyChecksum { frame_len } => {
                    if let Err(err) = self.verify(frame_len) {
                        return Some(Err(self.resync(err)));
                    }
                    self.state = DecoderState::Emit { frame_len };
                }
                DecoderState::Emit { frame_len } => {
                    let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();
                    self.state = DecoderState::SeekSync;
                    self.stats.frames_ok += 1;
                    if let Some(event) = self.interpret(&frame) {
                        return Some(Ok(event));
                    }
                    self.stats.frames_skipped += 1;
                }
            }
        }
    }

    fn verify(&self, frame_len: usize) -> Result<(), FrameError> {
        let eof = self.buffer[frame_len - 1];
        if self.variant.has_checksum() {
            let expected = checksum(&self.buffer[..frame_len - 2]);
            let found = self.buffer[frame_len - 2];
            if expected != found {
                return Err(FrameError::BadChecksum { expected, found });
            }
        }
        if eof != END_OF_FRAME {
            return Err(FrameError::MissingEndOfFrame(eof));
        }
        Ok(())
    }

    /// Discard the sync byte of the current candidate and restart the scan.
    fn resync(&mut self, err: FrameError) -> FrameError {
        debug!(error = %err, "radar frame rejected, resynchronizing");
        self.buffer.drain(..1);
        self.stats.frames_corrupt += 1;
        self.stats.bytes_discarded += 1;
        self.state = DecoderState::SeekSync;
        err
    }

    fn interpret(&self, frame: &[u8]) -> Option<RadarEvent> {
        let origin = frame[2] & 0x0F;
        let packet_id = frame[3];
        if origin == device::HOST {
            trace!(packet_id, "ignoring frame sent by a host adapter");
            return None;
        }
        let payload_len = self.variant.payload_len(frame[4]);
        let payload = &frame[HEADER_LEN..HEADER_LEN + payload_len];

        match packet_id {
            packet::RESP_ALERT_DATA => {
                let Some(record) = AlertRecord::parse(payload) else {
                    debug!(len = payload.len(), "short alert record skipped");
                    return None;
                };
                if record.count == 0 {
                    return Some(RadarEvent::AlertsCleared);
                }
                match record.to_alert(Timestamp::now()) {
                    Some(alert) => Some(RadarEvent::Alert(alert)),
                    None => {
                        debug!(
                            frequency_mhz = record.frequency_mhz,
                            band_arrow = record.band_arrow,
                            "alert with unsupported band skipped"
                        );
                        None
                    }
                }
            }
            packet::INF_DISPLAY_DATA => {
                let state = DisplayState::parse(payload);
                if state.is_none() {
                    debug!(len = payload.len(), "short display data skipped");
                }
                state.map(RadarEvent::Display)
            }
            other => {
                debug!(packet_id = other, "unhandled radar packet skipped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::protocol::build_frame;
    use super::*;
    use crate::telemetry::{AlertDirection, DetectorMode, RadarBand};

    const V: ProtocolVariant = ProtocolVariant::Checksummed;

    fn alert_frame(variant: ProtocolVariant, frequency: u16, front: u8, band_arrow: u8) -> Vec<u8> {
        let [hi, lo] = frequency.to_be_bytes();
        build_frame(
            variant,
            device::HOST,
            variant.detector_id(),
            packet::RESP_ALERT_DATA,
            &[0x11, hi, lo, front, 0, band_arrow, 0x80],
        )
    }

    fn collect(decoder: &mut RadarFrameDecoder) -> Vec<Result<RadarEvent, FrameError>> {
        decoder.events().collect()
    }

    fn alerts(events: &[Result<RadarEvent, FrameError>]) -> Vec<crate::telemetry::RadarAlert> {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(RadarEvent::Alert(a)) => Some(*a),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_decode_single_ka_alert() {
        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&alert_frame(V, 34_700, 204, 0x22));
        let events = collect(&mut decoder);

        assert_eq!(events.len(), 1);
        let Ok(RadarEvent::Alert(alert)) = events[0] else {
            panic!("expected an alert, got {:?}", events[0]);
        };
        assert_eq!(alert.band, RadarBand::Ka);
        assert_eq!(alert.frequency_mhz, Some(34_700.0));
        assert_eq!(alert.strength_percent, 80);
        assert_eq!(alert.direction, AlertDirection::Front);
        assert!(alert.priority);
        assert_eq!(decoder.state(), DecoderState::SeekSync);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frames_interleaved_with_noise() {
        let frequencies = [34_700u16, 24_150, 10_525, 35_500, 24_125];
        let noise: [&[u8]; 5] = [
            &[0x00, 0x13, 0xFF],
            &[0xAA, 0x00, 0x01],
            &[0xAB, 0xAB, 0xAA, 0xD0, 0x33],
            &[],
            &[0x55; 17],
        ];

        let mut stream = Vec::new();
        for (freq, junk) in frequencies.iter().zip(noise.iter()) {
            stream.extend_from_slice(junk);
            stream.extend_from_slice(&alert_frame(V, *freq, 120, 0));
        }
        stream.extend_from_slice(&[0x42, 0x17]);

        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&stream);
        let events = collect(&mut decoder);
        let decoded: Vec<_> = alerts(&events)
            .iter()
            .map(|a| a.frequency_mhz.unwrap())
            .collect();

        let expected: Vec<f64> = frequencies.iter().map(|f| f64::from(*f)).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_byte_at_a_time_feed() {
        let mut stream = vec![0x01, 0x02];
        stream.extend_from_slice(&alert_frame(V, 24_150, 90, 0x44));
        stream.push(0x99);
        stream.extend_from_slice(&alert_frame(V, 10_525, 30, 0x88));

        let mut decoder = RadarFrameDecoder::new(V);
        let mut events = Vec::new();
        for byte in stream {
            decoder.feed(&[byte]);
            events.extend(decoder.events());
        }
        let decoded = alerts(&events);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].band, RadarBand::K);
        assert_eq!(decoded[0].direction, AlertDirection::Side);
        assert_eq!(decoded[1].band, RadarBand::X);
        assert_eq!(decoded[1].direction, AlertDirection::Rear);
    }

    #[test]
    fn test_bad_checksum_discards_only_sync_byte() {
        let mut corrupt = alert_frame(V, 34_700, 204, 0x22);
        let chk = corrupt.len() - 2;
        corrupt[chk] ^= 0xFF;

        let mut stream = corrupt;
        stream.extend_from_slice(&alert_frame(V, 24_150, 100, 0x24));

        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&stream);
        let events = collect(&mut decoder);

        assert!(matches!(events[0], Err(FrameError::BadChecksum { .. })));
        let decoded = alerts(&events);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].band, RadarBand::K);
        assert_eq!(decoder.stats().frames_corrupt, 1);
        assert_eq!(decoder.stats().frames_ok, 1);
    }

    #[test]
    fn test_truncated_frame_followed_by_valid_frame() {
        // The truncated frame's declared length swallows part of the next
        // frame; resync must still find it.
        let full = alert_frame(V, 34_700, 204, 0x22);
        let mut stream = full[..6].to_vec();
        stream.extend_from_slice(&alert_frame(V, 35_500, 150, 0x22));

        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&stream);
        let decoded = alerts(&collect(&mut decoder));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].frequency_mhz, Some(35_500.0));
    }

    #[test]
    fn test_legacy_variant() {
        let variant = ProtocolVariant::Legacy;
        let frame = alert_frame(variant, 24_150, 255, 0x24);
        assert_eq!(frame.len(), HEADER_LEN + 7 + 1);

        let mut decoder = RadarFrameDecoder::new(variant);
        decoder.feed(&frame);
        let decoded = alerts(&collect(&mut decoder));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].strength_percent, 100);

        // A legacy frame fails the checksummed decoder's integrity check.
        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&frame);
        let events = collect(&mut decoder);
        assert!(alerts(&events).is_empty());
        assert!(matches!(events[0], Err(FrameError::BadChecksum { .. })));
    }

    #[test]
    fn test_empty_table_clears_alerts() {
        let frame = build_frame(
            V,
            device::HOST,
            device::DETECTOR,
            packet::RESP_ALERT_DATA,
            &[0x00, 0, 0, 0, 0, 0, 0],
        );
        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&frame);
        assert_eq!(collect(&mut decoder), vec![Ok(RadarEvent::AlertsCleared)]);
    }

    #[test]
    fn test_display_data() {
        let frame = build_frame(
            V,
            device::GENERAL_BROADCAST,
            device::DETECTOR,
            packet::INF_DISPLAY_DATA,
            &[0x77, 0x77, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00],
        );
        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&frame);
        let events = collect(&mut decoder);
        let Ok(RadarEvent::Display(state)) = events[0] else {
            panic!("expected display data, got {:?}", events[0]);
        };
        assert_eq!(state.mode, DetectorMode::AllBogeys);
    }

    #[test]
    fn test_housekeeping_frames_are_skipped() {
        let version = build_frame(
            V,
            device::HOST,
            device::DETECTOR,
            packet::RESP_VERSION,
            b"V4.1032",
        );
        let echo = protocol::encode_request(V, packet::REQ_START_ALERT_DATA, &[]);
        let short_alert = build_frame(
            V,
            device::HOST,
            device::DETECTOR,
            packet::RESP_ALERT_DATA,
            &[0x11, 0x87],
        );

        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&version);
        decoder.feed(&echo);
        decoder.feed(&short_alert);
        decoder.feed(&alert_frame(V, 34_700, 204, 0x22));

        let events = collect(&mut decoder);
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.stats().frames_skipped, 3);
        assert_eq!(decoder.stats().frames_ok, 4);
    }

    #[test]
    fn test_noise_does_not_accumulate() {
        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&[0x10; 1000]);
        assert!(collect(&mut decoder).is_empty());
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.stats().bytes_discarded, 1000);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let frame = alert_frame(V, 34_700, 204, 0x22);
        let mut decoder = RadarFrameDecoder::new(V);
        decoder.feed(&frame[..8]);
        assert!(collect(&mut decoder).is_empty());
        assert!(matches!(decoder.state(), DecoderState::ReadPayload { .. }));

        decoder.reset();
        assert_eq!(decoder.state(), DecoderState::SeekSync);
        assert_eq!(decoder.buffered(), 0);

        decoder.feed(&frame);
        assert_eq!(alerts(&collect(&mut decoder)).len(), 1);
    }
}
