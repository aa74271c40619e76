//! SPOT Trace public feed decoder. The vendor serves an XML document with
//! the device's recent report entries, newest first.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use rastro_domain::{FeedEntry, Position};

use crate::error::{ProtocolError, Result};

// The feed timestamp carries a `-0000` offset suffix which is ignored; the
// value is already UTC.
const FEED_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const FEED_DATETIME_LEN: usize = 19;

#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(rename = "feedMessageResponse")]
    feed: Option<FeedMessageResponse>,
    errors: Option<FeedErrors>,
}

#[derive(Debug, Deserialize)]
struct FeedMessageResponse {
    messages: Messages,
}

#[derive(Debug, Deserialize)]
struct Messages {
    #[serde(rename = "message", default)]
    entries: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    latitude: f64,
    longitude: f64,
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "messageType")]
    message_type: String,
    #[serde(rename = "batteryState")]
    battery_state: String,
}

#[derive(Debug, Deserialize)]
struct FeedErrors {
    error: Option<FeedError>,
}

#[derive(Debug, Deserialize)]
struct FeedError {
    #[serde(default)]
    description: String,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = if value.len() > FEED_DATETIME_LEN {
        &value[..FEED_DATETIME_LEN]
    } else {
        value
    };
    let naive = NaiveDateTime::parse_from_str(trimmed, FEED_DATETIME_FORMAT)
        .map_err(|_| ProtocolError::InvalidTimestamp(value.to_string()))?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Decode a feed document into entries, preserving the vendor's newest-first
/// order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let document: FeedDocument = quick_xml::de::from_str(xml)
        .map_err(|e| ProtocolError::MalformedFeed(e.to_string()))?;

    if let Some(errors) = document.errors {
        let description = errors
            .error
            .map(|error| error.description)
            .unwrap_or_else(|| "unspecified feed error".to_string());
        return Err(ProtocolError::MalformedFeed(description));
    }

    let feed = document
        .feed
        .ok_or_else(|| ProtocolError::MalformedFeed("missing feedMessageResponse".to_string()))?;

    feed.messages
        .entries
        .into_iter()
        .map(|message| {
            Ok(FeedEntry {
                timestamp: parse_timestamp(&message.date_time)?,
                position: Position::new(message.latitude, message.longitude),
                moving: message.message_type == "NEWMOVEMENT",
                battery_good: message.battery_state == "GOOD",
                id: message.id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<response>
  <feedMessageResponse>
    <count>2</count>
    <messages>
      <message clientUnixTime="0">
        <id>901135</id>
        <messengerId>0-8888888</messengerId>
        <unixTime>1517488015</unixTime>
        <messageType>NEWMOVEMENT</messageType>
        <latitude>-23.44973</latitude>
        <longitude>-51.92353</longitude>
        <dateTime>2018-02-01T12:26:55-0000</dateTime>
        <batteryState>GOOD</batteryState>
      </message>
      <message clientUnixTime="0">
        <id>901134</id>
        <messengerId>0-8888888</messengerId>
        <unixTime>1517487715</unixTime>
        <messageType>UNLIMITED-TRACK</messageType>
        <latitude>-23.44011</latitude>
        <longitude>-51.91202</longitude>
        <dateTime>2018-02-01T12:21:55-0000</dateTime>
        <batteryState>LOW</batteryState>
      </message>
    </messages>
  </feedMessageResponse>
</response>"#;

    #[test]
    fn test_feed_entries_decoded_newest_first() {
        let entries = parse_feed(FEED_XML).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].id, "901135");
        assert!(entries[0].moving);
        assert!(entries[0].battery_good);
        assert_eq!(
            entries[0].timestamp,
            Utc.with_ymd_and_hms(2018, 2, 1, 12, 26, 55).unwrap()
        );
        assert_eq!(entries[0].position.latitude, -23.44973);

        assert_eq!(entries[1].id, "901134");
        assert!(!entries[1].moving);
        assert!(!entries[1].battery_good);
    }

    #[test]
    fn test_empty_feed() {
        let xml = r#"<response><feedMessageResponse><count>0</count><messages></messages></feedMessageResponse></response>"#;
        assert_eq!(parse_feed(xml).unwrap(), Vec::new());
    }

    #[test]
    fn test_error_document() {
        let xml = r#"<response><errors><error><code>E-0195</code><description>No displayable messages found</description></error></errors></response>"#;
        let result = parse_feed(xml);
        assert!(
            matches!(result, Err(ProtocolError::MalformedFeed(ref description)) if description.contains("No displayable")),
        );
    }

    #[test]
    fn test_not_xml_at_all() {
        assert!(matches!(
            parse_feed("{\"status\": 503}"),
            Err(ProtocolError::MalformedFeed(_))
        ));
    }

    #[test]
    fn test_bad_timestamp() {
        let xml = FEED_XML.replace("2018-02-01T12:26:55-0000", "yesterday");
        assert!(matches!(
            parse_feed(&xml),
            Err(ProtocolError::InvalidTimestamp(_))
        ));
    }
}
