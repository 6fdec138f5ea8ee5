use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const SHORT_ID_LEN: usize = 12;
pub const MAX_STATION_KEY_LEN: usize = 128;

pub const SUSTAINED_FIELD: &str = "last_10m_sustained";
pub const GUST_FIELD: &str = "last_10m_gust";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationIdentity {
    pub uuid: String,
    pub station_name: String,
}

impl StationIdentity {
    pub fn new(uuid: impl Into<String>, station_name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            station_name: station_name.into(),
        }
    }

    pub fn short_id(&self) -> String {
        short_id(&self.uuid)
    }
}

/// Public handle for a station: the last twelve characters of the uuid with
/// dashes removed. Two stations may share one; collisions are not detected.
pub fn short_id(uuid: &str) -> String {
    let compact: Vec<char> = uuid.chars().filter(|char| *char != '-').collect();
    let start = compact.len().saturating_sub(SHORT_ID_LEN);
    compact[start..].iter().collect()
}

pub fn is_valid_station_key(uuid: &str) -> bool {
    !uuid.is_empty()
        && uuid.len() <= MAX_STATION_KEY_LEN
        && uuid
            .chars()
            .all(|char| char.is_ascii_alphanumeric() || char == '-' || char == '_')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: String,
    pub windspeed_mps: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetrySample {
    pub fn new(timestamp: impl Into<String>, windspeed_mps: impl Into<Value>) -> Self {
        Self {
            timestamp: timestamp.into(),
            windspeed_mps: windspeed_mps.into(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    pub fn windspeed(&self) -> Option<f64> {
        parse_number(&self.windspeed_mps)
    }

    pub fn field_number(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(parse_number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub identity: StationIdentity,
    pub source_addr: String,
    pub connected_at: DateTime<Utc>,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentConnectionRecord {
    pub station_name: String,
    pub connected_at: DateTime<Utc>,
    pub lastseen: DateTime<Utc>,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationSummary {
    pub uuid: String,
    pub short_id: String,
    pub station_name: String,
    pub online: bool,
    pub connected_at: DateTime<Utc>,
    pub lastseen: DateTime<Utc>,
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

pub fn to_iso8601(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{
        TelemetrySample, is_valid_station_key, parse_number, parse_timestamp, short_id,
        to_iso8601,
    };

    #[test]
    fn short_id_takes_last_twelve_characters_without_dashes() {
        assert_eq!(
            short_id("3f2b8c1e-9d4a-4b7e-8f21-0a1b2c3d4e5f"),
            "0a1b2c3d4e5f"
        );
        assert_eq!(short_id("abc-def"), "abcdef");
    }

    #[test]
    fn station_keys_reject_path_components() {
        assert!(is_valid_station_key("3f2b8c1e-9d4a-4b7e-8f21-0a1b2c3d4e5f"));
        assert!(!is_valid_station_key(""));
        assert!(!is_valid_station_key("../etc"));
        assert!(!is_valid_station_key("a/b"));
        assert!(!is_valid_station_key(&"a".repeat(129)));
    }

    #[test]
    fn parses_rfc3339_and_naive_timestamps_as_utc() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap();

        assert_eq!(parse_timestamp("2026-03-01T12:00:05.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T13:00:05+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T12:00:05"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn parses_numbers_from_json_numbers_and_strings() {
        assert_eq!(parse_number(&json!(4.5)), Some(4.5));
        assert_eq!(parse_number(&json!(" 3.25 ")), Some(3.25));
        assert_eq!(parse_number(&json!("calm")), None);
        assert_eq!(parse_number(&json!(null)), None);
    }

    #[test]
    fn sample_round_trips_extra_fields_verbatim() {
        let raw = json!({
            "timestamp": "2026-03-01T12:00:05.000Z",
            "windspeed_mps": 4.2,
            "last_10m_gust": "7.1",
            "battery": {"volts": 3.7}
        });

        let sample: TelemetrySample = serde_json::from_value(raw.clone()).expect("sample parses");

        assert_eq!(sample.field_number("last_10m_gust"), Some(7.1));
        assert_eq!(serde_json::to_value(&sample).expect("serializes"), raw);
    }

    #[test]
    fn formats_iso8601_with_millis() {
        let timestamp = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        assert_eq!(to_iso8601(timestamp), "2023-11-14T22:13:20.000Z");
    }
}
