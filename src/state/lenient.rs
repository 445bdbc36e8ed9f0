//! Field-by-field decoders for remote payloads.
//!
//! Snapshots come from other clients through a store that does no validation, so a
//! malformed field falls back to its default instead of failing the whole document.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

use crate::state::combat::Team;

/// Non-negative integer; anything else becomes `0`.
pub fn u32_or_zero<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.is_finite() && *float >= 0.0)
                    .map(|float| float as u64)
            })
            .map(|wide| wide.min(u64::from(u32::MAX)) as u32),
        Value::String(raw) => raw.trim().parse::<u32>().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or(0))
}

/// Millisecond timestamp; anything else becomes `0`.
pub fn millis_or_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite())
                .map(|float| float as i64)
        }),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or(0))
}

/// Boolean; anything that is not `true` becomes `false`.
pub fn bool_or_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

/// String, with numbers accepted as their decimal form; anything else is empty.
pub fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_from_value(Value::deserialize(deserializer)?).unwrap_or_default())
}

/// Required identifier (string or number).
pub fn id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    id_from_value(Value::deserialize(deserializer)?)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| serde::de::Error::custom("expected a non-empty identifier"))
}

/// Optional identifier (string or number); other shapes are dropped.
pub fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_from_value(Value::deserialize(deserializer)?).filter(|id| !id.is_empty()))
}

/// Optional team: `null` stays unset, unrecognised values resolve to [`Team::Enemy`].
pub fn optional_team<'de, D>(deserializer: D) -> Result<Option<Team>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(raw) => Some(Team::parse_lenient(&raw)),
        _ => Some(Team::Enemy),
    })
}

/// Set of identifiers; a non-array value becomes the empty set.
pub fn id_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(id_from_value)
            .filter(|id| !id.is_empty())
            .collect(),
        _ => BTreeSet::new(),
    })
}

/// Optional nested object; an undecodable value is treated as absent.
pub fn optional<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|inner| serde_json::from_value(inner).ok()))
}

/// List whose undecodable entries are skipped; a non-array value is empty.
pub fn vec_of<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(vec_from_value(Value::deserialize(deserializer)?))
}

/// Map whose undecodable entries are skipped; a non-object value is empty.
pub fn map_of<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(entries) => entries
            .into_iter()
            .filter_map(|(key, value)| serde_json::from_value(value).ok().map(|item| (key, item)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// Map of lists, each list decoded like [`vec_of`].
pub fn map_of_vec<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(entries) => entries
            .into_iter()
            .map(|(key, value)| (key, vec_from_value(value)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

fn vec_from_value<T: DeserializeOwned>(value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
