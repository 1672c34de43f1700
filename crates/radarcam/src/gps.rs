//! NMEA 0183 sentence parser.
//!
//! GPS receivers emit a burst of sentences once per second. The parser
//! validates each line, keeps the fields that matter, and assembles one
//! [`GpsFix`] per burst:
//!
//! - `RMC` opens a cycle, keyed by its UTC time when it has one.
//! - `VTG` and `GSA` enrich the open cycle (`GSA` mode is also remembered for
//!   later cycles).
//! - `GGA` completes the cycle and the fix is emitted.
//!
//! A `GGA` without a matching `RMC` still yields a fix from its own fields.

use chrono::NaiveTime;
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

use crate::telemetry::{FixQuality, GpsFix, Timestamp};

const KNOTS_TO_KPH: f64 = 1.852;

/// Why a line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SentenceError {
    /// The checksum after `*` does not match the sentence body.
    #[error("checksum mismatch (expected {expected:02X}, found {found:02X})")]
    CorruptSentence {
        /// Checksum computed over the body.
        expected: u8,
        /// Checksum carried by the line.
        found: u8,
    },

    /// The line is not shaped like an NMEA sentence.
    #[error("malformed sentence: {0}")]
    Malformed(String),

    /// A field of a known sentence could not be parsed.
    #[error("invalid {field} field in {sentence} sentence")]
    InvalidField {
        /// Sentence type (`RMC`, `GGA`, ...).
        sentence: &'static str,
        /// Field name.
        field: &'static str,
    },
}

/// `RMC`: recommended minimum data.
#[derive(Debug, Clone, PartialEq)]
pub struct Rmc {
    /// UTC time of the fix.
    pub time: Option<NaiveTime>,
    /// Status `A` (valid) vs `V` (void).
    pub valid: bool,
    /// Latitude in decimal degrees.
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees.
    pub longitude: Option<f64>,
    /// Speed over ground in knots.
    pub speed_knots: Option<f64>,
    /// Course over ground in degrees.
    pub course_deg: Option<f64>,
}

/// `GGA`: fix data.
#[derive(Debug, Clone, PartialEq)]
pub struct Gga {
    /// UTC time of the fix.
    pub time: Option<NaiveTime>,
    /// Latitude in decimal degrees.
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees.
    pub longitude: Option<f64>,
    /// Fix quality indicator (0 = invalid).
    pub quality: u8,
    /// Satellites in use.
    pub satellites: u8,
    /// Altitude above mean sea level in meters.
    pub altitude_m: Option<f64>,
}

/// `VTG`: track and ground speed.
#[derive(Debug, Clone, PartialEq)]
pub struct Vtg {
    /// True course in degrees.
    pub course_deg: Option<f64>,
    /// Speed over ground in km/h.
    pub speed_kph: Option<f64>,
}

/// `GSA`: DOP and active satellites.
#[derive(Debug, Clone, PartialEq)]
pub struct Gsa {
    /// Fix mode: 1 = none, 2 = 2D, 3 = 3D.
    pub mode: u8,
}

/// One validated sentence.
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    /// Recommended minimum data.
    Rmc(Rmc),
    /// Fix data.
    Gga(Gga),
    /// Track and ground speed.
    Vtg(Vtg),
    /// Fix mode.
    Gsa(Gsa),
    /// A well-formed sentence of a type we don't use.
    Other(String),
}

/// XOR of every byte in `body` (the text between `$` and `*`).
#[must_use]
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Validate and parse a single line.
pub fn parse_sentence(line: &str) -> Result<Sentence, SentenceError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('$') else {
        return Err(SentenceError::Malformed("missing '$'".to_string()));
    };
    let Some((body, tail)) = rest.split_once('*') else {
        return Err(SentenceError::Malformed("missing checksum".to_string()));
    };
    let found = tail
        .get(..2)
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        .ok_or_else(|| SentenceError::Malformed(format!("bad checksum digits {tail:?}")))?;
    let expected = nmea_checksum(body);
    if expected != found {
        return Err(SentenceError::CorruptSentence { expected, found });
    }

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields[0];
    if address.len() < 5 || !address.is_ascii() {
        return Err(SentenceError::Malformed(format!(
            "bad address field {address:?}"
        )));
    }
    let values = &fields[1..];
    let fields = |kind| Fields { kind, values };

    Ok(match &address[address.len() - 3..] {
        "RMC" => Sentence::Rmc(parse_rmc(fields("RMC"))?),
        "GGA" => Sentence::Gga(parse_gga(fields("GGA"))?),
        "VTG" => Sentence::Vtg(parse_vtg(fields("VTG"))?),
        "GSA" => Sentence::Gsa(parse_gsa(fields("GSA"))?),
        _ => Sentence::Other(address.to_string()),
    })
}

/// Positional field access for one sentence.
#[derive(Clone, Copy)]
struct Fields<'a> {
    kind: &'static str,
    values: &'a [&'a str],
}

impl<'a> Fields<'a> {
    fn raw(&self, index: usize) -> &'a str {
        self.values.get(index).copied().unwrap_or("").trim()
    }

    fn invalid(&self, field: &'static str) -> SentenceError {
        SentenceError::InvalidField {
            sentence: self.kind,
            field,
        }
    }

    fn float(&self, index: usize, field: &'static str) -> Result<Option<f64>, SentenceError> {
        match self.raw(index) {
            "" => Ok(None),
            raw => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| self.invalid(field)),
        }
    }

    fn int(&self, index: usize, field: &'static str) -> Result<u8, SentenceError> {
        match self.raw(index) {
            "" => Ok(0),
            raw => raw.parse::<u8>().map_err(|_| self.invalid(field)),
        }
    }

    fn time(&self, index: usize) -> Result<Option<NaiveTime>, SentenceError> {
        match self.raw(index) {
            "" => Ok(None),
            raw => parse_utc_time(raw).map(Some).ok_or_else(|| self.invalid("time")),
        }
    }

    /// `ddmm.mmmm` + hemisphere, converted to signed decimal degrees.
    fn coordinate(
        &self,
        index: usize,
        field: &'static str,
        negative: char,
    ) -> Result<Option<f64>, SentenceError> {
        let Some(value) = self.float(index, field)? else {
            return Ok(None);
        };
        let degrees = (value / 100.0).trunc();
        let minutes = value - degrees * 100.0;
        if minutes >= 60.0 || value < 0.0 {
            return Err(self.invalid(field));
        }
        let decimal = degrees + minutes / 60.0;
        let hemisphere = self.raw(index + 1);
        Ok(Some(if hemisphere.starts_with(negative) {
            -decimal
        } else {
            decimal
        }))
    }
}

/// `hhmmss[.sss]`.
fn parse_utc_time(raw: &str) -> Option<NaiveTime> {
    if raw.len() < 6 || !raw.is_ascii() {
        return None;
    }
    let (hms, fraction) = raw.split_at(6);
    let hour = hms[0..2].parse().ok()?;
    let minute = hms[2..4].parse().ok()?;
    let second = hms[4..6].parse().ok()?;
    let milli = match fraction.strip_prefix('.') {
        None if fraction.is_empty() => 0,
        None => return None,
        Some(digits) => {
            if !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let padded = format!("{digits:0<3}");
            padded[..3].parse().ok()?
        }
    };
    NaiveTime::from_hms_milli_opt(hour, minute, second, milli)
}

fn parse_rmc(f: Fields<'_>) -> Result<Rmc, SentenceError> {
    Ok(Rmc {
        time: f.time(0)?,
        valid: f.raw(1) == "A",
        latitude: f.coordinate(2, "latitude", 'S')?,
        longitude: f.coordinate(4, "longitude", 'W')?,
        speed_knots: f.float(6, "speed")?,
        course_deg: f.float(7, "course")?,
    })
}

fn parse_gga(f: Fields<'_>) -> Result<Gga, SentenceError> {
    Ok(Gga {
        time: f.time(0)?,
        latitude: f.coordinate(1, "latitude", 'S')?,
        longitude: f.coordinate(3, "longitude", 'W')?,
        quality: f.int(5, "quality")?,
        satellites: f.int(6, "satellites")?,
        altitude_m: f.float(8, "altitude")?,
    })
}

fn parse_vtg(f: Fields<'_>) -> Result<Vtg, SentenceError> {
    Ok(Vtg {
        course_deg: f.float(0, "course")?,
        speed_kph: f.float(6, "speed")?,
    })
}

fn parse_gsa(f: Fields<'_>) -> Result<Gsa, SentenceError> {
    Ok(Gsa {
        mode: f.int(1, "mode")?,
    })
}

/// Fields gathered for the current cycle.
#[derive(Debug, Clone, Default)]
struct CycleBuilder {
    time: Option<NaiveTime>,
    valid: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
    speed_kph: Option<f64>,
    course_deg: Option<f64>,
    emitted: bool,
}

/// Counters kept by the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    /// Sentences that passed validation.
    pub sentences_ok: u64,
    /// Lines rejected (checksum, shape or field errors).
    pub sentences_rejected: u64,
    /// Fixes emitted.
    pub fixes: u64,
}

/// Stateful parser for one GPS connection.
#[derive(Debug, Default)]
pub struct GpsSentenceParser {
    cycle: Option<CycleBuilder>,
    gsa_mode: Option<FixQuality>,
    stats: ParserStats,
}

impl GpsSentenceParser {
    /// Create a parser with no open cycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser counters.
    #[must_use]
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Forget the open cycle and the remembered fix mode.
    pub fn reset(&mut self) {
        self.cycle = None;
        self.gsa_mode = None;
    }

    /// Feed one line; returns a fix when the line completes a cycle.
    ///
    /// Blank lines are ignored. A rejected line never touches the open cycle.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<GpsFix>, SentenceError> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let sentence = match parse_sentence(line) {
            Ok(sentence) => sentence,
            Err(err) => {
                self.stats.sentences_rejected += 1;
                return Err(err);
            }
        };
        self.stats.sentences_ok += 1;

        let fix = self.apply(sentence);
        if fix.is_some() {
            self.stats.fixes += 1;
        }
        Ok(fix)
    }

    fn apply(&mut self, sentence: Sentence) -> Option<GpsFix> {
        match sentence {
            Sentence::Rmc(rmc) => {
                if let Some(cycle) = &self.cycle {
                    if cycle.emitted && cycle.time.is_some() && cycle.time == rmc.time {
                        trace!("duplicate RMC for completed cycle");
                        return None;
                    }
                }
                self.cycle = Some(CycleBuilder {
                    time: rmc.time,
                    valid: rmc.valid,
                    latitude: rmc.latitude,
                    longitude: rmc.longitude,
                    speed_kph: rmc.speed_knots.map(|knots| knots * KNOTS_TO_KPH),
                    course_deg: rmc.course_deg,
                    emitted: false,
                });
                None
            }
            Sentence::Vtg(vtg) => {
                if let Some(cycle) = self.cycle.as_mut().filter(|c| !c.emitted) {
                    if vtg.speed_kph.is_some() {
                        cycle.speed_kph = vtg.speed_kph;
                    }
                    if vtg.course_deg.is_some() {
                        cycle.course_deg = vtg.course_deg;
                    }
                }
                None
            }
            Sentence::Gsa(gsa) => {
                self.gsa_mode = match gsa.mode {
                    2 => Some(FixQuality::TwoD),
                    3 => Some(FixQuality::ThreeD),
                    _ => None,
                };
                None
            }
            Sentence::Gga(gga) => self.complete(&gga),
            Sentence::Other(address) => {
                trace!(%address, "ignoring sentence");
                None
            }
        }
    }

    fn complete(&mut self, gga: &Gga) -> Option<GpsFix> {
        // Receivers without a fix leave the time empty; those cycles are
        // matched by order instead.
        let cycle = match self.cycle.as_mut() {
            Some(cycle) if cycle.time.is_some() && cycle.time == gga.time => {
                if cycle.emitted {
                    trace!("duplicate GGA for completed cycle");
                    return None;
                }
                cycle.emitted = true;
                cycle.clone()
            }
            Some(cycle) if gga.time.is_none() && !cycle.emitted => {
                cycle.emitted = true;
                cycle.clone()
            }
            _ => {
                // No RMC for this cycle: the GGA stands alone.
                self.cycle = Some(CycleBuilder {
                    time: gga.time,
                    valid: true,
                    emitted: true,
                    ..CycleBuilder::default()
                });
                CycleBuilder {
                    valid: true,
                    speed_kph: Some(0.0),
                    ..CycleBuilder::default()
                }
            }
        };

        let latitude = gga.latitude.or(cycle.latitude);
        let longitude = gga.longitude.or(cycle.longitude);
        let has_position = latitude.is_some() && longitude.is_some();

        let fix_quality = if gga.quality == 0 || !cycle.valid || !has_position {
            FixQuality::NoFix
        } else {
            self.gsa_mode.unwrap_or(if gga.satellites >= 4 {
                FixQuality::ThreeD
            } else {
                FixQuality::TwoD
            })
        };

        Some(GpsFix {
            latitude_deg: latitude.unwrap_or(0.0),
            longitude_deg: longitude.unwrap_or(0.0),
            altitude_m: gga.altitude_m,
            speed_kph: cycle.speed_kph.unwrap_or(0.0).max(0.0),
            heading_deg: cycle.course_deg.unwrap_or(0.0).rem_euclid(360.0),
            fix_quality,
            satellite_count: gga.satellites,
            timestamp: Timestamp::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
    const VTG: &str = "$GPVTG,084.4,T,,M,056.5,N,104.6,K,A*00";
    const GSA_3D: &str = "$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39";
    const GSA_2D: &str = "$GPGSA,A,2,04,05,09,,,,,,,,,,3.1,2.0,2.4*3D";
    const GSV: &str = "$GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00*74";

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_checksum() {
        assert_eq!(
            nmea_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            0x47
        );
    }

    #[test]
    fn test_parse_gga_fields() {
        let Sentence::Gga(gga) = parse_sentence(GGA).unwrap() else {
            panic!("expected GGA");
        };
        assert_eq!(gga.time, NaiveTime::from_hms_opt(12, 35, 19));
        assert!(approx(gga.latitude.unwrap(), 48.0 + 7.038 / 60.0));
        assert!(approx(gga.longitude.unwrap(), 11.0 + 31.0 / 60.0));
        assert_eq!(gga.quality, 1);
        assert_eq!(gga.satellites, 8);
        assert_eq!(gga.altitude_m, Some(545.4));
    }

    #[test]
    fn test_southern_western_hemisphere() {
        let line = "$GPGGA,123521,3348.500,S,15112.250,W,1,03,2.0,12.0,M,46.9,M,,*7A";
        let Sentence::Gga(gga) = parse_sentence(line).unwrap() else {
            panic!("expected GGA");
        };
        assert!(approx(gga.latitude.unwrap(), -(33.0 + 48.5 / 60.0)));
        assert!(approx(gga.longitude.unwrap(), -(151.0 + 12.25 / 60.0)));
    }

    #[test]
    fn test_fractional_time() {
        let line = "$GNGGA,123522.00,4807.038,N,01131.000,E,2,05,1.1,545.4,M,46.9,M,,*78";
        let Sentence::Gga(gga) = parse_sentence(line).unwrap() else {
            panic!("expected GGA");
        };
        assert_eq!(gga.time, NaiveTime::from_hms_opt(12, 35, 22));
    }

    #[test]
    fn test_corrupt_checksum() {
        let corrupt = GGA.replace("545.4", "545.5");
        let err = parse_sentence(&corrupt).unwrap_err();
        assert_eq!(
            err,
            SentenceError::CorruptSentence {
                expected: 0x46,
                found: 0x47
            }
        );
    }

    #[test]
    fn test_malformed_lines() {
        for line in [
            "GPGGA,123519*47",
            "$GPGGA,123519,4807.038,N",
            "$GPGGA,123519*4",
            "$GPGGA,123519*ZZ",
            "$GP*17",
        ] {
            assert!(
                matches!(parse_sentence(line), Err(SentenceError::Malformed(_))),
                "{line} should be malformed"
            );
        }
    }

    #[test]
    fn test_invalid_fields() {
        let bad_time = "$GPGGA,1235xx,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*4F";
        assert_eq!(
            parse_sentence(bad_time).unwrap_err(),
            SentenceError::InvalidField {
                sentence: "GGA",
                field: "time"
            }
        );

        let bad_lat = "$GPGGA,123525,48x7.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00";
        assert!(matches!(
            parse_sentence(bad_lat),
            Err(SentenceError::InvalidField {
                field: "latitude",
                ..
            })
        ));
    }

    #[test]
    fn test_full_cycle_emits_once() {
        let mut parser = GpsSentenceParser::new();
        assert_eq!(parser.parse_line(RMC).unwrap(), None);
        assert_eq!(parser.parse_line(VTG).unwrap(), None);
        assert_eq!(parser.parse_line(GSA_3D).unwrap(), None);
        let fix = parser.parse_line(GGA).unwrap().expect("GGA completes the cycle");

        assert!(approx(fix.speed_kph, 104.6));
        assert!(approx(fix.heading_deg, 84.4));
        assert_eq!(fix.fix_quality, FixQuality::ThreeD);
        assert_eq!(fix.satellite_count, 8);
        assert_eq!(fix.altitude_m, Some(545.4));

        // Repeating the GGA does not emit a second fix for the same cycle.
        assert_eq!(parser.parse_line(GGA).unwrap(), None);
        assert_eq!(parser.parse_line(RMC).unwrap(), None);
        assert_eq!(parser.parse_line(GGA).unwrap(), None);
        assert_eq!(parser.stats().fixes, 1);
    }

    #[test]
    fn test_rmc_speed_in_knots() {
        let mut parser = GpsSentenceParser::new();
        parser.parse_line(RMC).unwrap();
        let fix = parser.parse_line(GGA).unwrap().unwrap();
        assert!(approx(fix.speed_kph, 22.4 * 1.852));
    }

    #[test]
    fn test_gga_without_rmc() {
        let mut parser = GpsSentenceParser::new();
        let fix = parser.parse_line(GGA).unwrap().unwrap();
        assert_eq!(fix.speed_kph, 0.0);
        assert_eq!(fix.fix_quality, FixQuality::ThreeD);
        assert!(approx(fix.latitude_deg, 48.0 + 7.038 / 60.0));
    }

    #[test]
    fn test_gga_with_stale_rmc_stands_alone() {
        let mut parser = GpsSentenceParser::new();
        parser.parse_line(RMC).unwrap();
        let line = "$GPGGA,123524,4807.038,N,01131.000,E,1,04,1.0,545.4,M,46.9,M,,*4D";
        let fix = parser.parse_line(line).unwrap().unwrap();
        assert_eq!(fix.speed_kph, 0.0);
        assert_eq!(fix.satellite_count, 4);
    }

    #[test]
    fn test_no_fix_is_not_an_error() {
        let mut parser = GpsSentenceParser::new();
        parser.parse_line("$GNRMC,123520,V,,,,,,,230394,,,N*45").unwrap();
        let fix = parser
            .parse_line("$GNGGA,123520,,,,,0,00,99.99,,,,,,*51")
            .unwrap()
            .unwrap();
        assert_eq!(fix.fix_quality, FixQuality::NoFix);
        assert_eq!(fix.satellite_count, 0);
        assert_eq!(fix.altitude_m, None);
    }

    #[test]
    fn test_cycles_without_time_keep_emitting() {
        fn line(body: &str) -> String {
            format!("${body}*{:02X}", nmea_checksum(body))
        }
        let rmc = line("GPRMC,,V,,,,,,,,,,N");
        let gga = line("GPGGA,,,,,,0,00,99.99,,,,,,");

        let mut parser = GpsSentenceParser::new();
        for _ in 0..3 {
            assert_eq!(parser.parse_line(&rmc).unwrap(), None);
            let fix = parser.parse_line(&gga).unwrap().expect("one fix per cycle");
            assert_eq!(fix.fix_quality, FixQuality::NoFix);
        }
        assert_eq!(parser.stats().fixes, 3);
    }

    #[test]
    fn test_fix_mode_from_satellites_without_gsa() {
        let mut parser = GpsSentenceParser::new();
        let line = "$GPGGA,123521,3348.500,S,15112.250,W,1,03,2.0,12.0,M,46.9,M,,*7A";
        let fix = parser.parse_line(line).unwrap().unwrap();
        assert_eq!(fix.fix_quality, FixQuality::TwoD);
    }

    #[test]
    fn test_gsa_mode_is_remembered() {
        let mut parser = GpsSentenceParser::new();
        parser.parse_line(GSA_2D).unwrap();
        parser.parse_line(RMC).unwrap();
        let fix = parser.parse_line(GGA).unwrap().unwrap();
        assert_eq!(fix.fix_quality, FixQuality::TwoD);

        // Next cycle: no GSA, the 2D mode still applies.
        parser
            .parse_line("$GNRMC,123522.00,A,4807.038,N,01131.000,E,000.0,,230394,,,A*66")
            .unwrap();
        let fix = parser
            .parse_line("$GNGGA,123522.00,4807.038,N,01131.000,E,2,05,1.1,545.4,M,46.9,M,,*78")
            .unwrap()
            .unwrap();
        assert_eq!(fix.fix_quality, FixQuality::TwoD);

        parser.reset();
        let fix = parser.parse_line(GGA).unwrap().unwrap();
        assert_eq!(fix.fix_quality, FixQuality::ThreeD);
    }

    #[test]
    fn test_corrupt_line_does_not_touch_cycle() {
        let mut parser = GpsSentenceParser::new();
        parser.parse_line(RMC).unwrap();
        let corrupt_vtg = VTG.replace("104.6", "999.9");
        assert!(parser.parse_line(&corrupt_vtg).is_err());
        let fix = parser.parse_line(GGA).unwrap().unwrap();
        assert!(approx(fix.speed_kph, 22.4 * 1.852));
        assert_eq!(parser.stats().sentences_rejected, 1);
    }

    #[test]
    fn test_ignores_other_sentences_and_blank_lines() {
        let mut parser = GpsSentenceParser::new();
        assert_eq!(parser.parse_line(GSV).unwrap(), None);
        assert_eq!(parser.parse_line("\r\n").unwrap(), None);
        assert_eq!(parser.parse_line("").unwrap(), None);
        assert_eq!(parser.stats().sentences_ok, 1);
    }

    #[test]
    fn test_heading_normalized() {
        let mut parser = GpsSentenceParser::new();
        parser
            .parse_line("$GPRMC,123523,A,4807.038,N,01131.000,E,056.5,359.9,230394,,,A*79")
            .unwrap();
        let line = "$GPGGA,123523,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*4E";
        let fix = parser.parse_line(line).unwrap().unwrap();
        assert!(fix.heading_deg >= 0.0 && fix.heading_deg < 360.0);
        assert!(approx(fix.heading_deg, 359.9));
    }
}
