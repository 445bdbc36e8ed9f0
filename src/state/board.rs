use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::{
    CombatantId, SceneId,
    combat::{CombatState, Team},
    identity::SnapshotMetadata,
    lenient,
};

/// A token placed on a scene. Every placement of the active scene is a combatant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    /// Stable combatant identifier.
    #[serde(deserialize_with = "lenient::id")]
    pub id: CombatantId,
    /// Display name.
    #[serde(default, deserialize_with = "lenient::string_or_empty")]
    pub name: String,
    /// Raw team label as written by the editor.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional_id")]
    pub team: Option<String>,
    /// Hidden placements are only ever seen by the GM.
    #[serde(default, deserialize_with = "lenient::bool_or_false")]
    pub hidden: bool,
    /// Stand-in for a hidden placement on a player client; only id and team are kept.
    #[serde(skip)]
    pub concealed: bool,
    /// Fields owned by the rendering layer, carried untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Placement {
    /// Build a bare placement with no rendering data.
    pub fn new(id: impl Into<CombatantId>, name: impl Into<String>, team: Team) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            team: Some(team.as_str().to_string()),
            hidden: false,
            concealed: false,
            extra: Map::new(),
        }
    }

    /// Mark the placement hidden.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Drop everything a player may not learn about this placement.
    pub fn conceal(&mut self) {
        self.name.clear();
        self.extra.clear();
        self.hidden = true;
        self.concealed = true;
    }

    /// Resolved team; anything other than `ally` counts as [`Team::Enemy`].
    pub fn team(&self) -> Team {
        self.team
            .as_deref()
            .map(Team::parse_lenient)
            .unwrap_or(Team::Enemy)
    }
}

/// GM-only per-scene state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneState {
    /// Combat bookkeeping of the scene.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional")]
    pub combat: Option<CombatState>,
    /// Fog/mask overlay payload owned by the overlay editor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<Value>,
    /// Grid settings owned by the renderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<Value>,
}

/// Transmissible view of the whole board.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    /// Scene currently shown to everyone.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional_id")]
    pub active_scene_id: Option<SceneId>,
    /// Background map (GM-only in authored snapshots).
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional_id")]
    pub map_url: Option<String>,
    /// Placements per scene.
    #[serde(default, deserialize_with = "lenient::map_of_vec")]
    pub placements: BTreeMap<SceneId, Vec<Placement>>,
    /// GM-only state per scene.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "lenient::map_of")]
    pub scene_state: BTreeMap<SceneId, SceneState>,
    /// Measurement templates, opaque here.
    #[serde(default, deserialize_with = "lenient::vec_of")]
    pub templates: Vec<Value>,
    /// Board-wide overlay (GM-only in authored snapshots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<Value>,
    /// Transient pings, opaque here.
    #[serde(default, deserialize_with = "lenient::vec_of")]
    pub pings: Vec<Value>,
    /// Authorship of the write that produced this snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional")]
    pub metadata: Option<SnapshotMetadata>,
}

impl BoardSnapshot {
    /// Placements of the active scene (empty when no scene is active).
    pub fn active_scene_placements(&self) -> &[Placement] {
        self.active_scene_id
            .as_ref()
            .and_then(|scene| self.placements.get(scene))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Combat state of `scene`, if one was ever created.
    pub fn combat(&self, scene: &str) -> Option<&CombatState> {
        self.scene_state
            .get(scene)
            .and_then(|state| state.combat.as_ref())
    }

    /// Combat state of the active scene.
    pub fn active_combat(&self) -> Option<&CombatState> {
        self.active_scene_id
            .as_deref()
            .and_then(|scene| self.combat(scene))
    }

    /// Combat state of `scene`, created on first use.
    pub fn combat_entry(&mut self, scene: &str) -> &mut CombatState {
        self.scene_state
            .entry(scene.to_string())
            .or_default()
            .combat
            .get_or_insert_with(CombatState::default)
    }

    /// Copy of the board restricted to what `is_gm` may author.
    ///
    /// Player snapshots never carry the map, scene state, overlay, hidden placements or
    /// metadata (the writer stamps fresh metadata afterwards).
    pub fn for_role(&self, is_gm: bool) -> BoardSnapshot {
        let mut snapshot = self.clone();
        snapshot.metadata = None;
        if !is_gm {
            snapshot.map_url = None;
            snapshot.scene_state.clear();
            snapshot.overlay = None;
            snapshot.strip_hidden();
        }
        snapshot
    }

    /// Remove hidden placements from every scene.
    pub fn strip_hidden(&mut self) {
        for placements in self.placements.values_mut() {
            placements.retain(|placement| !placement.hidden);
        }
    }

    /// Replace hidden placements with concealed stand-ins, so progression still counts
    /// them while renderers skip them.
    pub fn conceal_hidden(&mut self) {
        for placement in self.placements.values_mut().flatten() {
            if placement.hidden {
                placement.conceal();
            }
        }
    }

    /// Replace this board with an accepted remote snapshot.
    ///
    /// Non-GM viewers keep hidden placements only as concealed stand-ins. Each scene keeps its local combat state
    /// unless the remote one is strictly newer. Returns the scenes whose combat state
    /// was taken from the remote.
    pub fn merge_remote(&mut self, mut remote: BoardSnapshot, is_gm: bool) -> Vec<SceneId> {
        if !is_gm {
            remote.conceal_hidden();
        }

        let mut absorbed = Vec::new();
        let mut local_scenes = std::mem::take(&mut self.scene_state);
        for (scene, remote_state) in remote.scene_state.iter_mut() {
            let local_combat = local_scenes
                .get_mut(scene)
                .and_then(|state| state.combat.take());
            remote_state.combat = match (local_combat, remote_state.combat.take()) {
                (Some(mut local), Some(incoming)) => {
                    if local.absorb(incoming) {
                        absorbed.push(scene.clone());
                    }
                    Some(local)
                }
                (None, Some(incoming)) => {
                    absorbed.push(scene.clone());
                    Some(incoming)
                }
                (local, None) => local,
            };
        }

        for (scene, mut local_state) in local_scenes {
            if let Some(combat) = local_state.combat.take() {
                remote
                    .scene_state
                    .entry(scene)
                    .or_default()
                    .combat
                    .get_or_insert(combat);
            }
        }

        *self = remote;
        absorbed
    }
}
