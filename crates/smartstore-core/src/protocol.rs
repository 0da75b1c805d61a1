//! Tagged structured-text encoding for store values
//!
//! Values are written as JSON. JSON has no timestamp or pattern type, so
//! those travel as strings carrying a 3-character tag:
//!
//! ```text
//!   timestamp:  "|d| <epoch-millis>"
//!   pattern:    "|r| <flags>|<source>"
//! ```
//!
//! An ordinary string that happens to begin with a tag is escaped by
//! inserting one `|` right after the tag (`"|d| x"` -> `"|d|| x"`). Reading
//! strips exactly one level, so strings with any number of stacked escapes
//! round-trip intact.

use chrono::{TimeZone, Utc};

use crate::error::{StoreError, StoreResult};
use crate::value::{Pattern, Value};

/// Tag introducing a timestamp
pub const TIMESTAMP_TAG: &str = "|d|";

/// Tag introducing a pattern
pub const PATTERN_TAG: &str = "|r|";

const TAG_LEN: usize = 3;
const ESCAPE: u8 = b'|';
const PAYLOAD_SEPARATOR: u8 = b' ';

fn tag_of(s: &str) -> Option<&'static str> {
    [TIMESTAMP_TAG, PATTERN_TAG].into_iter().find(|tag| s.starts_with(tag))
}

/// Encode a value as JSON text.
///
/// Returns `None` for [`Value::Undefined`], which has no persisted form.
pub fn serialize(value: &Value) -> Option<String> {
    to_json(value).map(|json| json.to_string())
}

/// Decode JSON text produced by [`serialize`].
pub fn deserialize(text: &str) -> StoreResult<Value> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    revive(json)
}

/// Lower a value into plain JSON, tagging extended types.
pub(crate) fn to_json(value: &Value) -> Option<serde_json::Value> {
    use serde_json::Value as Json;

    let json = match value {
        Value::Undefined => return None,
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(escape(s)),
        Value::Array(items) => Json::Array(
            items
                .iter()
                .map(|item| to_json(item).unwrap_or(Json::Null))
                .collect(),
        ),
        Value::Object(map) => Json::Object(
            map.iter()
                .filter_map(|(k, v)| to_json(v).map(|json| (k.clone(), json)))
                .collect(),
        ),
        Value::Timestamp(t) => Json::String(format!("{} {}", TIMESTAMP_TAG, t.timestamp_millis())),
        Value::Pattern(p) => Json::String(format!("{} {}|{}", PATTERN_TAG, p.flags(), p.source())),
    };
    Some(json)
}

/// Raise plain JSON back into a value, decoding tagged strings.
pub(crate) fn revive(json: serde_json::Value) -> StoreResult<Value> {
    use serde_json::Value as Json;

    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n),
        Json::String(s) => decode_string(s)?,
        Json::Array(items) => Value::Array(
            items
                .into_iter()
                .map(revive)
                .collect::<StoreResult<Vec<_>>>()?,
        ),
        Json::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| revive(v).map(|v| (k, v)))
                .collect::<StoreResult<_>>()?,
        ),
    })
}

fn escape(s: &str) -> String {
    match tag_of(s) {
        Some(tag) => {
            let mut out = String::with_capacity(s.len() + 1);
            out.push_str(tag);
            out.push(ESCAPE as char);
            out.push_str(&s[TAG_LEN..]);
            out
        }
        None => s.to_string(),
    }
}

fn decode_string(s: String) -> StoreResult<Value> {
    let Some(tag) = tag_of(&s) else {
        return Ok(Value::String(s));
    };

    match s.as_bytes().get(TAG_LEN) {
        Some(&ESCAPE) => {
            let mut out = String::with_capacity(s.len() - 1);
            out.push_str(tag);
            out.push_str(&s[TAG_LEN + 1..]);
            Ok(Value::String(out))
        }
        Some(&PAYLOAD_SEPARATOR) => {
            let payload = &s[TAG_LEN + 1..];
            if tag == TIMESTAMP_TAG {
                decode_timestamp(payload)
            } else {
                decode_pattern(payload)
            }
        }
        _ => Err(StoreError::protocol(format!("malformed tagged value {:?}", s))),
    }
}

fn decode_timestamp(payload: &str) -> StoreResult<Value> {
    let millis = match payload.parse::<i64>() {
        Ok(ms) => ms,
        Err(_) => match payload.parse::<f64>() {
            Ok(ms) if ms.is_finite() => ms.trunc() as i64,
            _ => {
                return Err(StoreError::protocol(format!(
                    "invalid timestamp payload {:?}",
                    payload
                )))
            }
        },
    };
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(Value::Timestamp)
        .ok_or_else(|| StoreError::protocol(format!("timestamp {} out of range", millis)))
}

fn decode_pattern(payload: &str) -> StoreResult<Value> {
    let (flags, source) = payload
        .split_once(ESCAPE as char)
        .ok_or_else(|| {
            StoreError::protocol(format!("pattern payload {:?} has no flags separator", payload))
        })?;
    Pattern::new(source, flags).map(Value::Pattern)
}
