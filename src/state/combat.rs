use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{CombatantId, lenient};

/// Side a combatant fights on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    /// Player-aligned combatants.
    Ally,
    /// Everything else, including combatants whose side is unknown.
    Enemy,
}

impl Team {
    /// The other team.
    pub fn opposite(self) -> Self {
        match self {
            Team::Ally => Team::Enemy,
            Team::Enemy => Team::Ally,
        }
    }

    /// Parse a free-form team label; only `ally` (any casing) maps to [`Team::Ally`].
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("ally") {
            Team::Ally
        } else {
            Team::Enemy
        }
    }

    /// Team offered the first turn for a d10 initiative announcement.
    pub fn from_initiative_roll(roll: u8) -> Self {
        if roll >= 6 { Team::Ally } else { Team::Enemy }
    }

    /// Lower-case label used in notices and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Team::Ally => "ally",
            Team::Enemy => "enemy",
        }
    }
}

/// Advisory marker recording who is currently taking a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnLock {
    /// Normalised user id of the holder.
    #[serde(deserialize_with = "lenient::id")]
    pub holder_id: String,
    /// Display name shown in contention prompts.
    #[serde(default, deserialize_with = "lenient::string_or_empty")]
    pub holder_name: String,
    /// Representative whose turn is being taken.
    #[serde(default, deserialize_with = "lenient::optional_id")]
    pub combatant_id: Option<CombatantId>,
    /// Acquisition time in milliseconds.
    #[serde(default, deserialize_with = "lenient::millis_or_zero")]
    pub locked_at: i64,
}

/// One-shot notification replayed once on every client that receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEffect {
    /// Effect tag, e.g. a scripted narrative trigger name.
    #[serde(rename = "type", deserialize_with = "lenient::id")]
    pub kind: String,
    /// Combatant the effect is attached to.
    #[serde(default, deserialize_with = "lenient::optional_id")]
    pub combatant_id: Option<CombatantId>,
    /// Trigger time in milliseconds.
    #[serde(default, deserialize_with = "lenient::millis_or_zero")]
    pub triggered_at: i64,
    /// Free-form data for whoever renders the effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TurnEffect {
    /// Deduplication key: `type:combatantId:triggeredAt`.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}:{}",
            self.kind,
            self.combatant_id.as_deref().unwrap_or(""),
            self.triggered_at
        )
    }
}

/// Persisted form of one combatant group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    /// Id the progression tracks for every member.
    #[serde(deserialize_with = "lenient::id")]
    pub representative_id: CombatantId,
    /// All members, representative included.
    #[serde(default, deserialize_with = "lenient::id_set")]
    pub member_ids: BTreeSet<CombatantId>,
}

/// Per-scene combat bookkeeping shared through the remote store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatState {
    /// Whether an encounter is running.
    #[serde(default, deserialize_with = "lenient::bool_or_false")]
    pub active: bool,
    /// Current round, starting at 1 once combat starts.
    #[serde(default, deserialize_with = "lenient::u32_or_zero")]
    pub round: u32,
    /// Representative currently acting, or offered the next turn.
    #[serde(default, deserialize_with = "lenient::optional_id")]
    pub active_combatant_id: Option<CombatantId>,
    /// Representatives that already acted this round.
    #[serde(default, deserialize_with = "lenient::id_set")]
    pub completed_combatant_ids: BTreeSet<CombatantId>,
    /// Team chosen by the initiative announcement.
    #[serde(default, deserialize_with = "lenient::optional_team")]
    pub starting_team: Option<Team>,
    /// Team of the combatant whose turn began last.
    #[serde(default, deserialize_with = "lenient::optional_team")]
    pub current_team: Option<Team>,
    /// Team of the combatant whose turn ended last.
    #[serde(default, deserialize_with = "lenient::optional_team")]
    pub last_team: Option<Team>,
    /// Turns completed in the current round.
    #[serde(default, deserialize_with = "lenient::u32_or_zero")]
    pub round_turn_count: u32,
    /// Holder of the active turn, if any.
    #[serde(default, deserialize_with = "lenient::optional")]
    pub turn_lock: Option<TurnLock>,
    /// Latest one-shot effect.
    #[serde(default, deserialize_with = "lenient::optional")]
    pub last_effect: Option<TurnEffect>,
    /// Combatant groups of the scene.
    #[serde(default, deserialize_with = "lenient::vec_of")]
    pub groups: Vec<GroupEntry>,
    /// Every representative completed; waiting for the GM to open the next round.
    #[serde(default, deserialize_with = "lenient::bool_or_false")]
    pub awaiting_round_confirm: bool,
    /// Version stamp in milliseconds; never regresses on a receiver.
    #[serde(default, deserialize_with = "lenient::millis_or_zero")]
    pub updated_at: i64,
}

impl CombatState {
    /// Whether `other` carries a strictly newer version than `self`.
    pub fn is_superseded_by(&self, other: &CombatState) -> bool {
        other.updated_at > self.updated_at
    }

    /// Replace `self` with `remote` when it is strictly newer.
    ///
    /// Returns whether the remote state was taken; equal or older versions are dropped,
    /// so absorbing the same state twice is a no-op.
    pub fn absorb(&mut self, remote: CombatState) -> bool {
        if !self.is_superseded_by(&remote) {
            return false;
        }
        *self = remote;
        true
    }

    /// Advance the version stamp for a local change made at `now_ms`.
    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = now_ms.max(self.updated_at.saturating_add(1));
    }
}
