//! Suntech ST910/ST940 semicolon-delimited frame decoder.
//!
//! Positional layout:
//! `model;type;device_id;seq;YYYYMMDD;hh;mm;ss;lat;lon;speed;voltage;...`
//! (the device reports time as three separate `;`-delimited fields).
//!
//! Only `Emergency`, `Alert` and `Location` frames carry a position; every
//! other frame type (keepalives, command responses) is ignored. Emergency
//! frames must be acknowledged on the same connection with
//! `AT^<model>;ACK;<device_id>`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rastro_domain::{CoordinateSource, LocationSample, Position};

use crate::error::{ProtocolError, Result};

/// Battery is approximated linearly from the reported cell voltage. The
/// curve is not clamped, so extreme voltages yield out-of-range percentages.
pub const BATTERY_MIN_VOLTAGE: f64 = 2.8;
pub const BATTERY_PCT_PER_VOLT: f64 = 71.0;

const MIN_FIELDS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuntechMessageType {
    Emergency,
    Alert,
    Location,
}

impl SuntechMessageType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "Emergency" => Some(SuntechMessageType::Emergency),
            "Alert" => Some(SuntechMessageType::Alert),
            "Location" => Some(SuntechMessageType::Location),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuntechFrame {
    pub model: String,
    pub message_type: SuntechMessageType,
    pub device_id: String,
    pub sample: LocationSample,
}

impl SuntechFrame {
    /// Emergency frames are the only ones acknowledged back to the device.
    pub fn requires_ack(&self) -> bool {
        self.message_type == SuntechMessageType::Emergency
    }

    pub fn ack(&self) -> String {
        ack_frame(&self.model, &self.device_id)
    }
}

/// The exact acknowledgment literal written back on the originating
/// connection.
pub fn ack_frame(model: &str, device_id: &str) -> String {
    format!("AT^{model};ACK;{device_id}")
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64> {
    value.parse::<f64>().map_err(|_| ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Decode one frame. Returns `Ok(None)` for frames of an unaccepted message
/// type (dropped quietly, not an error).
pub fn parse_frame(frame: &str) -> Result<Option<SuntechFrame>> {
    let frame = frame.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = frame.split(';').collect();
    if fields.len() < 2 {
        return Err(ProtocolError::TruncatedFrame {
            expected: MIN_FIELDS,
            actual: fields.len(),
        });
    }

    if fields[0] != "ST910" {
        return Ok(None);
    }
    let Some(message_type) = SuntechMessageType::parse(fields[1]) else {
        return Ok(None);
    };

    if fields.len() < MIN_FIELDS {
        return Err(ProtocolError::TruncatedFrame {
            expected: MIN_FIELDS,
            actual: fields.len(),
        });
    }

    let device_id = fields[2].to_string();
    let seq = fields[3];

    let date = NaiveDate::parse_from_str(fields[4], "%Y%m%d")
        .map_err(|_| ProtocolError::InvalidTimestamp(fields[4].to_string()))?;
    let time = NaiveTime::from_hms_opt(
        parse_u32("hour", fields[5])?,
        parse_u32("minute", fields[6])?,
        parse_u32("second", fields[7])?,
    )
    .ok_or_else(|| {
        ProtocolError::InvalidTimestamp(format!("{};{};{}", fields[5], fields[6], fields[7]))
    })?;
    let timestamp = DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(time), Utc);

    let latitude = parse_f64("latitude", fields[8])?;
    let longitude = parse_f64("longitude", fields[9])?;
    let speed = parse_f64("speed", fields[10])?;
    let voltage = parse_f64("voltage", fields[11])?;
    let battery = (voltage - BATTERY_MIN_VOLTAGE) * BATTERY_PCT_PER_VOLT;

    Ok(Some(SuntechFrame {
        model: fields[0].to_string(),
        message_type,
        device_id: device_id.clone(),
        sample: LocationSample {
            timestamp,
            position: Position::new(latitude, longitude),
            speed,
            battery_level: Some(battery),
            // These devices do not report GSM signal strength.
            signal_level: Some(0.0),
            source: CoordinateSource::Gps,
            external_id: Some(format!("{}_{}", fields[4], seq)),
        },
    }))
}
