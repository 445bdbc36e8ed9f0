use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::state::{
    CombatantId,
    combat::{CombatState, Team, TurnEffect},
    groups::GroupRegistry,
    identity::{GmCapability, Identity},
    roster::Roster,
    turn_lock::{self, AcquireMode, LockContention, ReleaseDenied},
};

/// Label shown to players while a hidden combatant acts.
pub const HIDDEN_TURN_LABEL: &str = "GM's turn";
/// Label shown to players while a hidden combatant is up next.
pub const HIDDEN_UP_NEXT_LABEL: &str = "Waiting for the GM";

/// Phases of an encounter, derived from the combat state itself so that a wholesale
/// remote overwrite always lands on a valid phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatPhase {
    /// No combat running.
    Idle,
    /// Combat (or a new round) started; nobody has acted yet.
    AwaitingFirstTurn,
    /// A combatant holds the turn lock.
    TurnActive,
    /// The last turn ended and the next combatant has not started.
    TurnCompletePendingNext,
    /// Every representative acted; the GM must confirm the next round.
    RoundConfirmPending,
}

impl CombatPhase {
    /// Phase encoded by `state`.
    pub fn of(state: &CombatState) -> Self {
        if !state.active {
            CombatPhase::Idle
        } else if state.turn_lock.is_some() {
            CombatPhase::TurnActive
        } else if state.awaiting_round_confirm {
            CombatPhase::RoundConfirmPending
        } else if state.round_turn_count == 0 {
            CombatPhase::AwaitingFirstTurn
        } else {
            CombatPhase::TurnCompletePendingNext
        }
    }
}

/// Events that drive the progression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombatEvent {
    /// Start an encounter; the d10 roll picks the team offered the first turn.
    StartCombat {
        /// Initiative announcement roll, 1 to 10.
        initiative_roll: u8,
    },
    /// Take the turn of a combatant (resolved to its representative).
    BeginTurn {
        /// Combatant the actor wants to play.
        combatant_id: CombatantId,
        /// Whether an existing lock may be taken over.
        mode: AcquireMode,
    },
    /// End the current turn and pick who is up next.
    CompleteTurn,
    /// Open the next round once everyone acted.
    ConfirmRoundEnd(GmCapability),
    /// Stop the encounter.
    EndCombat,
}

/// Error returned when an event does not apply to the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the machine was in.
    pub from: CombatPhase,
    /// Rejected event.
    pub event: CombatEvent,
}

/// Failures of combat operations. None of them mutate the state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    /// Event not valid in the current phase.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// Someone else holds the turn lock.
    #[error(transparent)]
    LockContention(#[from] LockContention),
    /// The actor may not end someone else's turn.
    #[error(transparent)]
    ReleaseDenied(#[from] ReleaseDenied),
    /// The combatant is not part of the active scene.
    #[error("unknown combatant `{0}`")]
    UnknownCombatant(CombatantId),
}

/// Turn-boundary notification produced by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnNotice {
    /// Combat started and `starting_team` is offered the first turn.
    CombatStarted {
        /// Team that acts first.
        starting_team: Team,
        /// Representative offered the first turn.
        offered: Option<CombatantId>,
    },
    /// A representative started acting.
    TurnStarted {
        /// Representative.
        combatant_id: CombatantId,
        /// Its team.
        team: Team,
    },
    /// A representative finished acting.
    TurnEnded {
        /// Representative.
        combatant_id: CombatantId,
        /// Its team.
        team: Team,
        /// Representative up next, if any remain this round.
        next: Option<CombatantId>,
    },
    /// Everyone acted in `round`.
    RoundComplete {
        /// Finished round.
        round: u32,
    },
    /// A new round opened.
    RoundStarted {
        /// New round number.
        round: u32,
        /// Representative offered the first turn.
        offered: Option<CombatantId>,
    },
    /// Combat ended.
    CombatEnded,
}

/// Result of an applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Phase after the transition.
    pub phase: CombatPhase,
    /// Notifications in the order they happened.
    pub notices: Vec<TurnNotice>,
}

/// Who acts, against which roster, and when.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    /// Acting client identity.
    pub actor: &'a Identity,
    /// Display name recorded as lock holder name.
    pub actor_name: &'a str,
    /// Combatants of the active scene.
    pub roster: &'a Roster,
    /// Current time in milliseconds.
    pub now_ms: i64,
}

/// Combat progression over one scene's [`CombatState`].
///
/// Only the client performing an action runs transitions; other clients receive the
/// resulting state through [`CombatStateMachine::absorb_remote`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombatStateMachine {
    state: CombatState,
}

impl CombatStateMachine {
    /// Create an idle machine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing combat state.
    pub fn from_state(state: CombatState) -> Self {
        Self { state }
    }

    /// Inspect the state.
    pub fn state(&self) -> &CombatState {
        &self.state
    }

    /// Unwrap the state.
    pub fn into_state(self) -> CombatState {
        self.state
    }

    /// Current phase.
    pub fn phase(&self) -> CombatPhase {
        CombatPhase::of(&self.state)
    }

    /// Overwrite the local state with a strictly newer remote one.
    pub fn absorb_remote(&mut self, remote: CombatState) -> bool {
        self.state.absorb(remote)
    }

    /// Apply `event`. On error the state is left untouched.
    pub fn apply(
        &mut self,
        event: CombatEvent,
        ctx: &TransitionContext<'_>,
    ) -> Result<TransitionOutcome, CombatError> {
        self.check_transition(&event)?;

        let mut next = self.state.clone();
        let notices = match event {
            CombatEvent::StartCombat { initiative_roll } => {
                start_combat(&mut next, initiative_roll, ctx)
            }
            CombatEvent::BeginTurn { combatant_id, mode } => {
                begin_turn(&mut next, &combatant_id, mode, ctx)?
            }
            CombatEvent::CompleteTurn => complete_turn(&mut next, ctx)?,
            CombatEvent::ConfirmRoundEnd(_) => confirm_round_end(&mut next, ctx),
            CombatEvent::EndCombat => end_combat(&mut next),
        };
        next.touch(ctx.now_ms);
        self.state = next;

        Ok(TransitionOutcome {
            phase: self.phase(),
            notices,
        })
    }

    /// Group or ungroup combatants; see [`GroupRegistry::toggle`].
    pub fn toggle_group<I, S>(&mut self, member_ids: I, roster: &Roster, now_ms: i64) -> Option<CombatantId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = GroupRegistry::from_entries(&self.state.groups);
        let representative = registry.toggle(member_ids, roster);
        let entries = registry.to_entries();
        if entries != self.state.groups {
            self.state.groups = entries;
            self.state.touch(now_ms);
        }
        representative
    }

    /// Prune group members that left the roster; returns whether anything changed.
    pub fn refresh_roster(&mut self, roster: &Roster, now_ms: i64) -> bool {
        self.edit_groups(now_ms, |registry| registry.prune(roster))
    }

    /// Drop combatants deleted from the scene from their groups.
    pub fn remove_combatants(
        &mut self,
        removed: &BTreeSet<CombatantId>,
        roster: &Roster,
        now_ms: i64,
    ) -> bool {
        self.edit_groups(now_ms, |registry| registry.remove(removed, roster))
    }

    fn edit_groups(&mut self, now_ms: i64, edit: impl FnOnce(&mut GroupRegistry) -> bool) -> bool {
        let mut registry = GroupRegistry::from_entries(&self.state.groups);
        edit(&mut registry);
        let entries = registry.to_entries();
        if entries == self.state.groups {
            return false;
        }
        self.state.groups = entries;
        self.state.touch(now_ms);
        true
    }

    /// Attach a one-shot effect to the state.
    pub fn record_effect(
        &mut self,
        kind: impl Into<String>,
        combatant_id: Option<CombatantId>,
        payload: Option<Value>,
        now_ms: i64,
    ) -> TurnEffect {
        self.state.touch(now_ms);
        let effect = TurnEffect {
            kind: kind.into(),
            combatant_id,
            triggered_at: self.state.updated_at,
            payload,
        };
        self.state.last_effect = Some(effect.clone());
        effect
    }

    /// Turn indicator text for a viewer; hidden combatants stay anonymous for players.
    pub fn turn_indicator(&self, roster: &Roster, viewer_is_gm: bool) -> Option<String> {
        let state = &self.state;
        let label = match self.phase() {
            CombatPhase::Idle => return None,
            CombatPhase::RoundConfirmPending => format!("Round {} complete", state.round),
            CombatPhase::TurnActive => {
                let subject = state
                    .turn_lock
                    .as_ref()
                    .and_then(|lock| lock.combatant_id.as_deref())
                    .or(state.active_combatant_id.as_deref());
                match subject.and_then(|id| visible_name(roster, id, viewer_is_gm)) {
                    Some(name) => format!("{name}'s turn"),
                    None => HIDDEN_TURN_LABEL.to_string(),
                }
            }
            CombatPhase::AwaitingFirstTurn | CombatPhase::TurnCompletePendingNext => {
                match state.active_combatant_id.as_deref() {
                    Some(id) => match visible_name(roster, id, viewer_is_gm) {
                        Some(name) => format!("Up next: {name}"),
                        None => HIDDEN_UP_NEXT_LABEL.to_string(),
                    },
                    None => "Waiting for the next turn".to_string(),
                }
            }
        };
        Some(label)
    }

    fn check_transition(&self, event: &CombatEvent) -> Result<(), InvalidTransition> {
        let from = self.phase();
        let valid = match (from, event) {
            (CombatPhase::Idle, CombatEvent::StartCombat { .. }) => true,
            (_, CombatEvent::EndCombat) => true,
            (CombatPhase::Idle, _) => false,
            (_, CombatEvent::BeginTurn { .. }) => true,
            (CombatPhase::TurnActive, CombatEvent::CompleteTurn) => true,
            (CombatPhase::RoundConfirmPending, CombatEvent::ConfirmRoundEnd(_)) => true,
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(InvalidTransition {
                from,
                event: event.clone(),
            })
        }
    }
}

fn start_combat(state: &mut CombatState, roll: u8, ctx: &TransitionContext<'_>) -> Vec<TurnNotice> {
    let starting_team = Team::from_initiative_roll(roll);
    *state = CombatState {
        active: true,
        round: 1,
        starting_team: Some(starting_team),
        groups: std::mem::take(&mut state.groups),
        updated_at: state.updated_at,
        ..CombatState::default()
    };
    let offered = select_next(state, ctx.roster, [starting_team, starting_team.opposite()]);
    state.active_combatant_id = offered.clone();

    vec![TurnNotice::CombatStarted {
        starting_team,
        offered,
    }]
}

fn begin_turn(
    state: &mut CombatState,
    combatant_id: &str,
    mode: AcquireMode,
    ctx: &TransitionContext<'_>,
) -> Result<Vec<TurnNotice>, CombatError> {
    if !ctx.roster.contains(combatant_id) {
        return Err(CombatError::UnknownCombatant(combatant_id.to_string()));
    }
    let registry = GroupRegistry::from_entries(&state.groups);
    let representative = registry.representative_of(combatant_id).to_string();
    let team = ctx.roster.team_of(&representative);

    turn_lock::acquire(
        &mut state.turn_lock,
        ctx.actor,
        ctx.actor_name,
        Some(&representative),
        mode,
        ctx.now_ms,
    )?;
    state.completed_combatant_ids.remove(&representative);
    state.awaiting_round_confirm = false;
    state.active_combatant_id = Some(representative.clone());
    state.current_team = Some(team);

    Ok(vec![TurnNotice::TurnStarted {
        combatant_id: representative,
        team,
    }])
}

fn complete_turn(
    state: &mut CombatState,
    ctx: &TransitionContext<'_>,
) -> Result<Vec<TurnNotice>, CombatError> {
    let finished = state
        .turn_lock
        .as_ref()
        .and_then(|lock| lock.combatant_id.clone())
        .or_else(|| state.active_combatant_id.clone());
    turn_lock::release(&mut state.turn_lock, ctx.actor, ctx.actor.gm_capability())?;

    let team = state
        .current_team
        .or_else(|| finished.as_deref().map(|id| ctx.roster.team_of(id)))
        .unwrap_or(Team::Enemy);
    if let Some(id) = &finished {
        state.completed_combatant_ids.insert(id.clone());
    }
    state.round_turn_count = state.round_turn_count.saturating_add(1);
    state.last_team = Some(team);

    let order = match state.last_team {
        Some(last) => [last.opposite(), last],
        None => [Team::Ally, Team::Enemy],
    };
    let next = select_next(state, ctx.roster, order);
    state.active_combatant_id = next.clone();

    let mut notices = Vec::with_capacity(2);
    if let Some(combatant_id) = finished {
        notices.push(TurnNotice::TurnEnded {
            combatant_id,
            team,
            next: next.clone(),
        });
    }
    if next.is_none() {
        state.awaiting_round_confirm = true;
        notices.push(TurnNotice::RoundComplete { round: state.round });
    }
    Ok(notices)
}

fn confirm_round_end(state: &mut CombatState, ctx: &TransitionContext<'_>) -> Vec<TurnNotice> {
    state.round = state.round.saturating_add(1);
    state.completed_combatant_ids.clear();
    state.round_turn_count = 0;
    state.awaiting_round_confirm = false;

    let order = match state.starting_team.or(state.current_team) {
        Some(lead) => [lead, lead.opposite()],
        None => [Team::Ally, Team::Enemy],
    };
    let offered = select_next(state, ctx.roster, order);
    state.active_combatant_id = offered.clone();

    vec![TurnNotice::RoundStarted {
        round: state.round,
        offered,
    }]
}

fn end_combat(state: &mut CombatState) -> Vec<TurnNotice> {
    *state = CombatState {
        groups: std::mem::take(&mut state.groups),
        updated_at: state.updated_at,
        ..CombatState::default()
    };
    vec![TurnNotice::CombatEnded]
}

/// First representative of `order`'s teams that has not acted this round.
fn select_next(state: &CombatState, roster: &Roster, order: [Team; 2]) -> Option<CombatantId> {
    let registry = GroupRegistry::from_entries(&state.groups);
    let representatives = registry.representatives(roster);
    order.iter().find_map(|team| {
        representatives
            .iter()
            .find(|entry| entry.team == *team && !state.completed_combatant_ids.contains(&entry.id))
            .map(|entry| entry.id.clone())
    })
}

fn visible_name(roster: &Roster, id: &str, viewer_is_gm: bool) -> Option<String> {
    match roster.get(id) {
        Some(entry) if viewer_is_gm || !entry.hidden => Some(if entry.name.is_empty() {
            entry.id.clone()
        } else {
            entry.name.clone()
        }),
        Some(_) => None,
        None if viewer_is_gm => Some(id.to_string()),
        None => None,
    }
}
