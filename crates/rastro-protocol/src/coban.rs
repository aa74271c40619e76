//! Coban TK102 compact text codes, as delivered over SMS or inside
//! `##`-prefixed GPRS frames on the TCP stream.
//!
//! Three independent sub-formats are probed in priority order:
//! 1. `GSM: <pct>% ... BATTERY: <pct>%` — signal/battery status, no position
//! 2. text containing both `lac` and `mnc` — cell tower triangulation request
//! 3. `lat:<v> long:<v> speed:<v>` — inline GPS fix
//!
//! Field values are extracted through a small declarative grammar (label,
//! separator, terminator) instead of hand-counted string offsets, so the
//! three sub-formats cannot drift apart.

use rastro_domain::{CellTowerRef, ReportParser, TrackerReport};

use crate::error::{ProtocolError, Result};

/// One labeled field: the value follows `label` + `separator` and runs until
/// the terminator.
struct FieldSpec {
    label: &'static str,
    separator: char,
    terminator: Terminator,
}

enum Terminator {
    /// Value is the digit run immediately after the separator.
    NonDigit,
    /// Value runs until the given character (or end of text).
    Until(char),
}

impl FieldSpec {
    const fn digits(label: &'static str, separator: char) -> Self {
        Self {
            label,
            separator,
            terminator: Terminator::NonDigit,
        }
    }

    const fn until(label: &'static str, separator: char, terminator: char) -> Self {
        Self {
            label,
            separator,
            terminator: Terminator::Until(terminator),
        }
    }

    fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        let after_label = &text[text.find(self.label)? + self.label.len()..];
        let after_separator = &after_label[after_label.find(self.separator)? + 1..];
        let value = match self.terminator {
            Terminator::NonDigit => {
                let end = after_separator
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(after_separator.len());
                &after_separator[..end]
            }
            Terminator::Until(terminator) => {
                let end = after_separator
                    .find(terminator)
                    .unwrap_or(after_separator.len());
                &after_separator[..end]
            }
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

const SIGNAL: FieldSpec = FieldSpec::until("GSM", ' ', '%');
const BATTERY: FieldSpec = FieldSpec::until("BATTERY", ' ', '%');
const LAC: FieldSpec = FieldSpec::digits("lac", ':');
const CID: FieldSpec = FieldSpec::digits("cid", ':');
const MCC: FieldSpec = FieldSpec::digits("mcc", '=');
const MNC: FieldSpec = FieldSpec::digits("mnc", '=');
const LATITUDE: FieldSpec = FieldSpec::until("lat", ':', ' ');
const LONGITUDE: FieldSpec = FieldSpec::until("long", ':', ' ');
const SPEED: FieldSpec = FieldSpec::until("speed", ':', ' ');

fn parse_status(text: &str) -> Option<TrackerReport> {
    let signal = SIGNAL.extract(text)?.trim().parse::<f64>().ok()?;
    let battery = BATTERY.extract(text)?.trim().parse::<f64>().ok()?;
    Some(TrackerReport::Status { signal, battery })
}

fn parse_cell(text: &str) -> Option<TrackerReport> {
    Some(TrackerReport::CellFix(CellTowerRef {
        lac: LAC.extract(text)?.parse().ok()?,
        cid: CID.extract(text)?.parse().ok()?,
        mcc: MCC.extract(text)?.parse().ok()?,
        mnc: MNC.extract(text)?.parse().ok()?,
    }))
}

fn parse_position(text: &str) -> Option<TrackerReport> {
    Some(TrackerReport::Position {
        latitude: LATITUDE.extract(text)?.parse().ok()?,
        longitude: LONGITUDE.extract(text)?.parse().ok()?,
        speed: SPEED.extract(text)?.parse().ok()?,
    })
}

/// Decoder for the TK102 report vocabulary. Never fails: anything that does
/// not match a sub-format is `Unrecognized` and the caller drops it with a
/// warning.
#[derive(Debug, Default)]
pub struct CobanParser;

impl CobanParser {
    pub fn new() -> Self {
        Self
    }
}

impl ReportParser for CobanParser {
    fn parse(&self, text: &str) -> TrackerReport {
        let text = text.replace('\0', "");

        if text.starts_with("GSM: ") {
            return parse_status(&text).unwrap_or(TrackerReport::Unrecognized);
        }
        if text.contains("lac") && text.contains("mnc") {
            return parse_cell(&text).unwrap_or(TrackerReport::Unrecognized);
        }
        if text.starts_with("lat") {
            return parse_position(&text).unwrap_or(TrackerReport::Unrecognized);
        }
        TrackerReport::Unrecognized
    }
}

/// A `##`-prefixed Coban GPRS frame from the TCP stream: the second
/// comma-delimited field identifies the device (`imei:<digits>`); the report
/// body is probed with the same sub-format grammar as SMS text.
#[derive(Debug, Clone, PartialEq)]
pub struct CobanFrame {
    pub identification: String,
    pub body: String,
}

pub fn parse_tcp_frame(frame: &str) -> Result<CobanFrame> {
    let frame = frame.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = frame.split(',').collect();
    if fields.len() < 2 {
        return Err(ProtocolError::TruncatedFrame {
            expected: 2,
            actual: fields.len(),
        });
    }

    let identification = fields[1]
        .trim()
        .strip_prefix("imei:")
        .unwrap_or(fields[1].trim())
        .to_string();
    if identification.is_empty() {
        return Err(ProtocolError::InvalidField {
            field: "identification",
            value: fields[1].to_string(),
        });
    }

    Ok(CobanFrame {
        identification,
        body: frame.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> TrackerReport {
        CobanParser::new().parse(text)
    }

    #[test]
    fn test_status_message() {
        assert_eq!(
            parse("GSM: 87% ... BATTERY: 64%"),
            TrackerReport::Status {
                signal: 87.0,
                battery: 64.0
            }
        );
    }

    #[test]
    fn test_status_message_with_null_bytes() {
        assert_eq!(
            parse("GSM: 87%\0 ... BATTERY: 64%\0"),
            TrackerReport::Status {
                signal: 87.0,
                battery: 64.0
            }
        );
    }

    #[test]
    fn test_cell_triangulation_request() {
        assert_eq!(
            parse("no gps signal lac:4312 cid:8222 mcc=724 mnc=31"),
            TrackerReport::CellFix(CellTowerRef {
                mcc: 724,
                mnc: 31,
                lac: 4312,
                cid: 8222,
            })
        );
    }

    #[test]
    fn test_cell_request_beats_position_probe() {
        // The cell sub-format is probed before the `lat` prefix.
        assert_eq!(
            parse("lac:1 cid:2 mcc=3 mnc=4 lat:1.0"),
            TrackerReport::CellFix(CellTowerRef {
                mcc: 3,
                mnc: 4,
                lac: 1,
                cid: 2,
            })
        );
    }

    #[test]
    fn test_inline_position() {
        assert_eq!(
            parse("lat:-23.449732 long:-51.923538 speed:12.50 T:21/02/06 14:05"),
            TrackerReport::Position {
                latitude: -23.449732,
                longitude: -51.923538,
                speed: 12.5
            }
        );
    }

    #[test]
    fn test_position_at_end_of_text() {
        // The last value has no trailing space; it runs to end of text.
        assert_eq!(
            parse("lat:-23.4 long:-51.9 speed:0.0"),
            TrackerReport::Position {
                latitude: -23.4,
                longitude: -51.9,
                speed: 0.0
            }
        );
    }

    #[test]
    fn test_garbage_is_unrecognized() {
        assert_eq!(parse("help me"), TrackerReport::Unrecognized);
        assert_eq!(parse(""), TrackerReport::Unrecognized);
    }

    #[test]
    fn test_malformed_cell_values_are_unrecognized() {
        assert_eq!(
            parse("lac:xyz cid:8222 mcc=724 mnc=31"),
            TrackerReport::Unrecognized
        );
    }

    #[test]
    fn test_tcp_frame_identification() {
        let frame = parse_tcp_frame("##,imei:359586015829802,A\r\n").unwrap();
        assert_eq!(frame.identification, "359586015829802");
        assert!(frame.body.starts_with("##"));
    }

    #[test]
    fn test_tcp_frame_without_imei_prefix() {
        let frame = parse_tcp_frame("##,359586015829802,A").unwrap();
        assert_eq!(frame.identification, "359586015829802");
    }

    #[test]
    fn test_tcp_frame_missing_fields() {
        assert!(matches!(
            parse_tcp_frame("##"),
            Err(ProtocolError::TruncatedFrame { .. })
        ));
    }
}
