use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::models::{StationIdentity, TelemetrySample, to_iso8601};

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload must be a JSON object")]
    InvalidPayloadType,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field {0} has an unsupported type")]
    InvalidField(&'static str),
}

const UUID_KEYS: &[&str] = &["uuid"];
const STATION_NAME_KEYS: &[&str] = &["station_name", "station"];
const TIMESTAMP_KEY: &str = "timestamp";
const WINDSPEED_KEY: &str = "windspeed_mps";

pub fn decode_message(raw: &[u8]) -> Result<Value, ParseError> {
    serde_json::from_slice(raw).map_err(|error| ParseError::InvalidJson(error.to_string()))
}

/// Returns the identity carried by a handshake, or `None` when the payload is
/// anything else. Both `station_name` and the older `station` key are accepted.
pub fn handshake_identity(payload: &Value) -> Option<StationIdentity> {
    let object = payload.as_object()?;
    let uuid = find_text(object, UUID_KEYS)?;
    let station_name = find_text(object, STATION_NAME_KEYS)?;

    Some(StationIdentity::new(uuid, station_name))
}

pub fn sample_from_payload(
    payload: Value,
    received_at: DateTime<Utc>,
) -> Result<TelemetrySample, ParseError> {
    let Value::Object(mut object) = payload else {
        return Err(ParseError::InvalidPayloadType);
    };

    let windspeed_mps = match object.remove(WINDSPEED_KEY) {
        Some(Value::Null) | None => return Err(ParseError::MissingField(WINDSPEED_KEY)),
        Some(value) => value,
    };

    let timestamp = match object.remove(TIMESTAMP_KEY) {
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        Some(Value::Null) | Some(Value::String(_)) | None => to_iso8601(received_at),
        Some(_) => return Err(ParseError::InvalidField(TIMESTAMP_KEY)),
    };

    Ok(TelemetrySample {
        timestamp,
        windspeed_mps,
        extra: object,
    })
}

fn find_text(object: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| match object.get(*alias) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    })
}
