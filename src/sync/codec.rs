//! Canonical JSON used to compare boards cheaply.
//!
//! Object keys are emitted in sorted order at every depth, so two structurally equal
//! values always serialise to the same string.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::state::{SceneId, board::{BoardSnapshot, Placement, SceneState}};

/// Serialise `value` with recursively sorted object keys.
///
/// Returns `None` when the value has no JSON form (for instance a map keyed by
/// sequences); callers treat that as "always changed".
pub fn stable_serialize<T>(value: &T) -> Option<String>
where
    T: ?Sized + Serialize,
{
    let value = serde_json::to_value(value).ok()?;
    serde_json::to_string(&canonical(value)).ok()
}

/// Change-detection key of a board; metadata is excluded.
pub fn hash(snapshot: &BoardSnapshot) -> Option<String> {
    stable_serialize(&HashView::from(snapshot))
}

/// Whether both values have a canonical form and the forms match.
pub fn values_equal<A, B>(a: &A, b: &B) -> bool
where
    A: ?Sized + Serialize,
    B: ?Sized + Serialize,
{
    match (stable_serialize(a), stable_serialize(b)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

fn canonical(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let sorted: BTreeMap<String, Value> = object
                .into_iter()
                .map(|(key, value)| (key, canonical(value)))
                .collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashView<'a> {
    active_scene_id: &'a Option<SceneId>,
    map_url: &'a Option<String>,
    placements: &'a BTreeMap<SceneId, Vec<Placement>>,
    scene_state: &'a BTreeMap<SceneId, SceneState>,
    templates: &'a [Value],
    overlay: &'a Option<Value>,
    pings: &'a [Value],
}

impl<'a> From<&'a BoardSnapshot> for HashView<'a> {
    fn from(snapshot: &'a BoardSnapshot) -> Self {
        Self {
            active_scene_id: &snapshot.active_scene_id,
            map_url: &snapshot.map_url,
            placements: &snapshot.placements,
            scene_state: &snapshot.scene_state,
            templates: &snapshot.templates,
            overlay: &snapshot.overlay,
            pings: &snapshot.pings,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::{
        combat::Team,
        identity::{Identity, SnapshotMetadata},
    };

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, {"d": 0, "c": 1}], "x": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": null, "y": [1, {"c": 1, "d": 0}]}, "b": 1}"#).unwrap();
        assert_eq!(stable_serialize(&a), stable_serialize(&b));
        assert_eq!(
            stable_serialize(&a).unwrap(),
            r#"{"a":{"x":null,"y":[1,{"c":1,"d":0}]},"b":1}"#
        );
    }

    #[test]
    fn hash_is_stable_and_ignores_metadata() {
        let mut board = BoardSnapshot {
            active_scene_id: Some("s".into()),
            templates: vec![json!({"kind": "cone", "angle": 60})],
            ..BoardSnapshot::default()
        };
        board
            .placements
            .insert("s".into(), vec![Placement::new("a", "A", Team::Ally)]);

        let copy = board.clone();
        assert_eq!(hash(&board), hash(&copy));

        let mut signed = board.clone();
        signed.metadata = Some(SnapshotMetadata::stamp(&Identity::new("gm", true), 7));
        assert_eq!(hash(&board), hash(&signed));

        let mut moved = board.clone();
        moved.active_scene_id = Some("t".into());
        assert_ne!(hash(&board), hash(&moved));
    }

    #[test]
    fn unrepresentable_values_have_no_form() {
        let mut keyed_by_lists = BTreeMap::new();
        keyed_by_lists.insert(vec![1u8, 2], "value");
        assert_eq!(stable_serialize(&keyed_by_lists), None);
        assert!(!values_equal(&keyed_by_lists, &keyed_by_lists));
    }

    #[test]
    fn values_equal_compares_structure() {
        assert!(values_equal(&json!({"mask": [1, 2]}), &json!({"mask": [1, 2]})));
        assert!(!values_equal(&json!({"mask": [1, 2]}), &json!({"mask": [2, 1]})));
    }
}
