//! Privacy transforms applied to JSON payloads before they leave the gateway

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static MASKED_CONTENT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\(\*\*\*...\)").ok());

/// Letters become `X`, digits 1-9 become `9`
pub fn anonymize_str(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphabetic() => 'X',
            '1'..='9' => '9',
            c => c,
        })
        .collect()
}

/// Same substitution on each `###` separated part
pub fn anonymize_device_id(device_id: &str) -> String {
    device_id
        .split("###")
        .map(anonymize_str)
        .collect::<Vec<_>>()
        .join("###")
}

/// Truncate toward zero to a multiple of 100000
pub fn anonymize_int(value: i64) -> i64 {
    value / 100_000 * 100_000
}

fn bucket(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Value::from(anonymize_int(i)),
            None => n
                .as_f64()
                .map(|f| Value::from(anonymize_int(f.trunc() as i64)))
                .unwrap_or_else(|| value.clone()),
        },
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => Value::String(anonymize_int(i).to_string()),
            Err(_) => value.clone(),
        },
        other => other.clone(),
    }
}

fn anonymize_entry(key: &str, value: Value) -> Value {
    match (key, value) {
        ("password", Value::String(_)) => Value::String("******".to_string()),
        (
            "uid" | "email" | "user_name" | "account" | "ping" | "token" | "access_token"
            | "refreshToken" | "refresh_token" | "vin",
            Value::String(s),
        ) => Value::String(anonymize_str(&s)),
        ("deviceId", Value::String(s)) => Value::String(anonymize_device_id(&s)),
        ("seconds" | "bindTime" | "eventCreationTime" | "latitude" | "longitude", value)
            if !value.is_object() && !value.is_array() =>
        {
            bucket(&value)
        }
        ("eventID" | "event-id" | "event_id" | "eventId" | "lastKeySeen", value)
            if !value.is_object() && !value.is_array() =>
        {
            Value::from(9999)
        }
        ("content", Value::String(s)) => match MASKED_CONTENT.as_ref() {
            Some(re) => Value::String(re.replace_all(&s, "(***XXX)").into_owned()),
            None => Value::String(s),
        },
        (_, value) => anonymize(value),
    }
}

/// Mask identifying values anywhere in a JSON document
pub fn anonymize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = anonymize_entry(&k, v);
                    (k, v)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(anonymize).collect()),
        other => other,
    }
}
