use indexmap::IndexMap;

use crate::state::{CombatantId, board::Placement, combat::Team};

/// Combatant as seen by the progression logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Combatant identifier.
    pub id: CombatantId,
    /// Display name.
    pub name: String,
    /// Resolved team.
    pub team: Team,
    /// Whether the combatant is hidden from players.
    pub hidden: bool,
}

/// Combatants of the active scene, in placement order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    entries: IndexMap<CombatantId, RosterEntry>,
}

impl Roster {
    /// Build the roster from the placements of a scene; later duplicates are ignored.
    pub fn from_placements(placements: &[Placement]) -> Self {
        let mut entries = IndexMap::with_capacity(placements.len());
        for placement in placements {
            entries
                .entry(placement.id.clone())
                .or_insert_with(|| RosterEntry {
                    id: placement.id.clone(),
                    name: placement.name.clone(),
                    team: placement.team(),
                    hidden: placement.hidden,
                });
        }
        Self { entries }
    }

    /// Look up a combatant.
    pub fn get(&self, id: &str) -> Option<&RosterEntry> {
        self.entries.get(id)
    }

    /// Whether `id` is on the roster.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Team of `id`; unknown combatants count as [`Team::Enemy`].
    pub fn team_of(&self, id: &str) -> Team {
        self.get(id).map(|entry| entry.team).unwrap_or(Team::Enemy)
    }

    /// Entries in placement order.
    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }
}
