//! Combatant grouping: several combatants share one representative that the progression
//! logic locks, advances and completes as a single unit.
//!
//! The registry is a flattened disjoint set (`member -> representative`, the representative
//! mapping to itself), so disjointness holds by construction. It is persisted as a list of
//! [`GroupEntry`] inside the combat state.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::state::{
    CombatantId,
    combat::GroupEntry,
    roster::{Roster, RosterEntry},
};

/// Disjoint grouping of combatants keyed by combatant id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupRegistry {
    parent: BTreeMap<CombatantId, CombatantId>,
}

impl GroupRegistry {
    /// Rebuild a registry from persisted entries.
    ///
    /// Members already claimed by an earlier entry are dropped, groups left with fewer than
    /// two members disappear, and a representative missing from its own members is
    /// replaced by the last remaining member.
    pub fn from_entries(entries: &[GroupEntry]) -> Self {
        let mut registry = Self::default();
        for entry in entries {
            let members: Vec<CombatantId> = entry
                .member_ids
                .iter()
                .filter(|id| !registry.parent.contains_key(*id))
                .cloned()
                .collect();
            if members.len() < 2 {
                continue;
            }
            let representative = if members.contains(&entry.representative_id) {
                entry.representative_id.clone()
            } else {
                members[members.len() - 1].clone()
            };
            for member in members {
                registry.parent.insert(member, representative.clone());
            }
        }
        registry
    }

    /// Persistable form, one entry per group ordered by representative.
    pub fn to_entries(&self) -> Vec<GroupEntry> {
        self.grouped()
            .into_iter()
            .map(|(representative_id, member_ids)| GroupEntry {
                representative_id,
                member_ids,
            })
            .collect()
    }

    /// Whether no group exists.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Id the progression tracks for `id`: its group's representative, or `id` itself.
    pub fn representative_of<'a>(&'a self, id: &'a str) -> &'a str {
        self.parent.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Group `member_ids`, or dissolve the group when exactly that member set already exists.
    ///
    /// Ids missing from the roster are ignored. Members leave any previous group first. The
    /// representative is the last non-hidden member in the given order, or the last member
    /// when all are hidden. Returns the representative of the new group, `None` when a
    /// group was dissolved or fewer than two members remain.
    pub fn toggle<I, S>(&mut self, member_ids: I, roster: &Roster) -> Option<CombatantId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let requested: Vec<&RosterEntry> = member_ids
            .into_iter()
            .filter_map(|id| roster.get(id.as_ref()))
            .filter(|entry| seen.insert(entry.id.clone()))
            .collect();
        if requested.len() < 2 {
            return None;
        }

        let requested_set: BTreeSet<CombatantId> =
            requested.iter().map(|entry| entry.id.clone()).collect();
        let mut groups = self.grouped();
        if groups.values().any(|members| *members == requested_set) {
            groups.retain(|_, members| *members != requested_set);
            self.rebuild(groups, roster);
            return None;
        }

        for members in groups.values_mut() {
            members.retain(|member| !requested_set.contains(member));
        }
        self.rebuild(groups, roster);

        let representative = requested
            .iter()
            .rev()
            .find(|entry| !entry.hidden)
            .or_else(|| requested.last())
            .map(|entry| entry.id.clone())?;
        for member in requested_set {
            self.parent.insert(member, representative.clone());
        }
        Some(representative)
    }

    /// Drop members no longer on the roster; returns whether anything changed.
    pub fn prune(&mut self, roster: &Roster) -> bool {
        self.retain_members(roster, |member| roster.contains(member))
    }

    /// Drop the given combatants from their groups; returns whether anything changed.
    pub fn remove(&mut self, removed: &BTreeSet<CombatantId>, roster: &Roster) -> bool {
        self.retain_members(roster, |member| !removed.contains(member))
    }

    fn retain_members(&mut self, roster: &Roster, keep: impl Fn(&str) -> bool) -> bool {
        let before = self.parent.clone();
        let mut groups = self.grouped();
        for members in groups.values_mut() {
            members.retain(|member| keep(member));
        }
        self.rebuild(groups, roster);
        before != self.parent
    }

    /// One roster entry per representative, in roster order.
    pub fn representatives<'r>(&self, roster: &'r Roster) -> Vec<&'r RosterEntry> {
        let mut seen = HashSet::new();
        roster
            .iter()
            .filter_map(|entry| {
                let representative = roster
                    .get(self.representative_of(&entry.id))
                    .unwrap_or(entry);
                seen.insert(representative.id.clone())
                    .then_some(representative)
            })
            .collect()
    }

    fn grouped(&self) -> BTreeMap<CombatantId, BTreeSet<CombatantId>> {
        let mut groups: BTreeMap<CombatantId, BTreeSet<CombatantId>> = BTreeMap::new();
        for (member, representative) in &self.parent {
            groups
                .entry(representative.clone())
                .or_default()
                .insert(member.clone());
        }
        groups
    }

    fn rebuild(&mut self, groups: BTreeMap<CombatantId, BTreeSet<CombatantId>>, roster: &Roster) {
        self.parent.clear();
        for (representative, members) in groups {
            if members.len() < 2 {
                continue;
            }
            let representative = if members.contains(&representative) {
                representative
            } else {
                elect(&members, roster)
            };
            for member in members {
                self.parent.insert(member, representative.clone());
            }
        }
    }
}

/// Last non-hidden member in roster order, then last member in roster order.
fn elect(members: &BTreeSet<CombatantId>, roster: &Roster) -> CombatantId {
    let on_roster: Vec<&RosterEntry> = roster
        .iter()
        .filter(|entry| members.contains(&entry.id))
        .collect();
    on_roster
        .iter()
        .rev()
        .find(|entry| !entry.hidden)
        .or_else(|| on_roster.last())
        .map(|entry| entry.id.clone())
        .or_else(|| members.iter().next_back().cloned())
        .unwrap_or_default()
}
