//! Per-client context tying the local board, the writer, the poller and the effect hub
//! together behind the operations a table UI needs.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::{
    dao::remote_store::RemoteStore,
    state::{
        BoardStore, CombatantId, SceneId,
        board::BoardSnapshot,
        combat::TurnEffect,
        identity::Identity,
        now_millis,
        roster::Roster,
        state_machine::{
            CombatError, CombatEvent, CombatStateMachine, TransitionContext, TransitionOutcome,
        },
        turn_lock::AcquireMode,
    },
    sync::{
        effects::EffectHub,
        persistence::{PersistenceWriter, WriteTicket},
        poller::{DEFAULT_POLL_INTERVAL, RemotePoller},
    },
};

/// Failures of session operations; none of them leave a partial local change behind.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The combat progression refused the operation.
    #[error(transparent)]
    Combat(#[from] CombatError),
    /// The board has no active scene to run combat in.
    #[error("no scene is active")]
    NoActiveScene,
    /// The operation needs the GM role.
    #[error("only the GM can {action}")]
    GmOnly {
        /// Refused action.
        action: &'static str,
    },
}

/// Tunables of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Poll period.
    pub poll_interval: Duration,
    /// Capacity of the effect broadcast channel.
    pub effect_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            effect_capacity: 16,
        }
    }
}

/// Result of a combat operation.
#[derive(Debug)]
pub struct CombatReport {
    /// Scene the operation ran in.
    pub scene_id: SceneId,
    /// Phase and notices of the transition.
    pub outcome: TransitionOutcome,
    /// Write carrying the change, `None` when no store is configured.
    pub write: Option<WriteTicket>,
}

/// Everything one client needs to take part in a shared board.
pub struct SyncSession {
    identity: Identity,
    display_name: String,
    board: Arc<BoardStore>,
    writer: PersistenceWriter,
    poller: Arc<RemotePoller>,
    effects: Arc<EffectHub>,
}

impl SyncSession {
    /// Create a session for `identity`; without a store the session stays local.
    pub fn new(
        identity: Identity,
        display_name: impl Into<String>,
        store: Option<Arc<dyn RemoteStore>>,
        settings: SessionSettings,
    ) -> Self {
        let board = Arc::new(BoardStore::default());
        let effects = Arc::new(EffectHub::new(settings.effect_capacity.max(1)));
        let writer = PersistenceWriter::new(store.clone(), identity.clone());
        let poller = Arc::new(RemotePoller::new(
            store,
            writer.clone(),
            board.clone(),
            effects.clone(),
            identity.clone(),
            settings.poll_interval,
        ));

        Self {
            identity,
            display_name: display_name.into(),
            board,
            writer,
            poller,
            effects,
        }
    }

    /// Identity driving this session.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Local board.
    pub fn board(&self) -> &Arc<BoardStore> {
        &self.board
    }

    /// Remote poller; call [`RemotePoller::spawn`] to start polling.
    pub fn poller(&self) -> Arc<RemotePoller> {
        self.poller.clone()
    }

    /// Receiver notified on every local board change.
    pub fn subscribe(&self) -> watch::Receiver<BoardSnapshot> {
        self.board.subscribe()
    }

    /// Receiver of turn effects, local and replayed.
    pub fn subscribe_effects(&self) -> broadcast::Receiver<TurnEffect> {
        self.effects.subscribe()
    }

    /// Start combat in the active scene with a fresh d10 initiative announcement.
    pub async fn start_combat(&self) -> Result<CombatReport, SyncError> {
        let roll = rand::rng().random_range(1..=10u8);
        self.start_combat_with_roll(roll).await
    }

    /// Start combat with a known initiative roll.
    pub async fn start_combat_with_roll(&self, initiative_roll: u8) -> Result<CombatReport, SyncError> {
        debug!(initiative_roll, "starting combat");
        self.transition(CombatEvent::StartCombat { initiative_roll })
            .await
    }

    /// Take the turn of `combatant_id`. `force` only has an effect for the GM.
    pub async fn begin_turn(&self, combatant_id: &str, force: bool) -> Result<CombatReport, SyncError> {
        let mode = match self.identity.gm_capability() {
            Some(capability) if force => AcquireMode::Force(capability),
            _ => AcquireMode::Normal,
        };
        self.transition(CombatEvent::BeginTurn {
            combatant_id: combatant_id.to_string(),
            mode,
        })
        .await
    }

    /// End the current turn.
    pub async fn complete_turn(&self) -> Result<CombatReport, SyncError> {
        self.transition(CombatEvent::CompleteTurn).await
    }

    /// Open the next round.
    pub async fn confirm_round_end(&self) -> Result<CombatReport, SyncError> {
        let capability = self.identity.gm_capability().ok_or(SyncError::GmOnly {
            action: "confirm the end of a round",
        })?;
        self.transition(CombatEvent::ConfirmRoundEnd(capability))
            .await
    }

    /// Stop combat in the active scene.
    pub async fn end_combat(&self) -> Result<CombatReport, SyncError> {
        self.transition(CombatEvent::EndCombat).await
    }

    /// Group or ungroup combatants of the active scene; returns the new representative.
    pub async fn toggle_group(&self, member_ids: &[&str]) -> Result<Option<CombatantId>, SyncError> {
        let roster = self.board.roster();
        let now = now_millis();
        let (scene_id, representative) = self.board.update_state(|draft| {
            let scene_id = draft.active_scene_id.clone().ok_or(SyncError::NoActiveScene)?;
            let mut machine = machine_for(draft, &scene_id);
            let representative = machine.toggle_group(member_ids.iter().copied(), &roster, now);
            *draft.combat_entry(&scene_id) = machine.into_state();
            Ok::<_, SyncError>((scene_id, representative))
        })?;
        info!(scene = %scene_id, ?representative, "toggled combatant group");
        self.persist_combat_change(&scene_id, now).await;
        Ok(representative)
    }

    /// Drop group members that left the active scene; returns whether anything changed.
    pub async fn refresh_roster(&self) -> Result<bool, SyncError> {
        let now = now_millis();
        let (scene_id, changed) = self.board.update_state(|draft| {
            let scene_id = draft.active_scene_id.clone().ok_or(SyncError::NoActiveScene)?;
            let changed = prune_groups(draft, &scene_id, now);
            Ok::<_, SyncError>((scene_id, changed))
        })?;
        if changed {
            self.persist_combat_change(&scene_id, now).await;
        }
        Ok(changed)
    }

    /// Attach a one-shot effect to the active scene and play it locally.
    pub async fn trigger_effect(
        &self,
        kind: &str,
        combatant_id: Option<&str>,
        payload: Option<Value>,
    ) -> Result<TurnEffect, SyncError> {
        let now = now_millis();
        let (scene_id, effect) = self.board.update_state(|draft| {
            let scene_id = draft.active_scene_id.clone().ok_or(SyncError::NoActiveScene)?;
            let mut machine = machine_for(draft, &scene_id);
            let effect = machine.record_effect(kind, combatant_id.map(str::to_string), payload, now);
            *draft.combat_entry(&scene_id) = machine.into_state();
            Ok::<_, SyncError>((scene_id, effect))
        })?;
        self.effects.emit_local(effect.clone());
        self.persist_combat_change(&scene_id, now).await;
        Ok(effect)
    }

    /// Apply an edit from a board collaborator and persist it.
    ///
    /// Placements the edit deleted from the active scene leave their groups in the same
    /// update; members this client cannot see are never touched.
    pub async fn update_board<F>(&self, mutator: F) -> Option<WriteTicket>
    where
        F: FnOnce(&mut BoardSnapshot),
    {
        let now = now_millis();
        self.board.update_state(|draft| {
            let scene_id = draft.active_scene_id.clone();
            let before = placement_ids(draft, scene_id.as_deref());
            mutator(draft);
            let Some(scene_id) = scene_id else {
                return;
            };
            let after = placement_ids(draft, Some(&scene_id));
            let removed: BTreeSet<CombatantId> = before.difference(&after).cloned().collect();
            if !removed.is_empty() && remove_from_groups(draft, &scene_id, &removed, now) {
                debug!(scene = %scene_id, ?removed, "dropped deleted placements from groups");
            }
        });
        self.persist_board(now).await
    }

    /// Turn indicator of the active scene for this viewer.
    pub fn turn_indicator(&self) -> Option<String> {
        let combat = self.board.combat_state()?;
        let roster = self.board.roster();
        CombatStateMachine::from_state(combat).turn_indicator(&roster, self.identity.is_gm())
    }

    async fn transition(&self, event: CombatEvent) -> Result<CombatReport, SyncError> {
        let roster = self.board.roster();
        let now = now_millis();
        let ctx = TransitionContext {
            actor: &self.identity,
            actor_name: &self.display_name,
            roster: &roster,
            now_ms: now,
        };

        let (scene_id, outcome) = self.board.update_state(|draft| {
            let scene_id = draft.active_scene_id.clone().ok_or(SyncError::NoActiveScene)?;
            let mut machine = machine_for(draft, &scene_id);
            let outcome = machine.apply(event, &ctx)?;
            *draft.combat_entry(&scene_id) = machine.into_state();
            Ok::<_, SyncError>((scene_id, outcome))
        })?;

        for notice in &outcome.notices {
            info!(scene = %scene_id, user = %self.identity.user_id(), ?notice, "turn notice");
        }
        let write = self.persist_combat_change(&scene_id, now).await;

        Ok(CombatReport {
            scene_id,
            outcome,
            write,
        })
    }

    /// GM sessions write the full board; players only the scene's combat state.
    async fn persist_combat_change(&self, scene_id: &str, now: i64) -> Option<WriteTicket> {
        if self.identity.is_gm() {
            return self.persist_board(now).await;
        }
        let combat = self.board.read(|board| board.combat(scene_id).cloned())?;
        let ticket = self.writer.persist_combat(scene_id, &combat, now).await?;
        self.board.set_metadata(ticket.metadata.clone());
        Some(ticket)
    }

    async fn persist_board(&self, now: i64) -> Option<WriteTicket> {
        let snapshot = self.board.snapshot();
        let ticket = self.writer.persist(&snapshot, now).await?;
        self.board.set_metadata(ticket.metadata.clone());
        Some(ticket)
    }
}

fn machine_for(board: &BoardSnapshot, scene_id: &str) -> CombatStateMachine {
    CombatStateMachine::from_state(board.combat(scene_id).cloned().unwrap_or_default())
}

fn placement_ids(board: &BoardSnapshot, scene_id: Option<&str>) -> BTreeSet<CombatantId> {
    scene_id
        .and_then(|scene| board.placements.get(scene))
        .map(|placements| placements.iter().map(|placement| placement.id.clone()).collect())
        .unwrap_or_default()
}

fn scene_roster(board: &BoardSnapshot, scene_id: &str) -> Roster {
    Roster::from_placements(
        board
            .placements
            .get(scene_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    )
}

fn prune_groups(board: &mut BoardSnapshot, scene_id: &str, now: i64) -> bool {
    let roster = scene_roster(board, scene_id);
    edit_scene_groups(board, scene_id, |machine| machine.refresh_roster(&roster, now))
}

fn remove_from_groups(
    board: &mut BoardSnapshot,
    scene_id: &str,
    removed: &BTreeSet<CombatantId>,
    now: i64,
) -> bool {
    let roster = scene_roster(board, scene_id);
    edit_scene_groups(board, scene_id, |machine| {
        machine.remove_combatants(removed, &roster, now)
    })
}

fn edit_scene_groups(
    board: &mut BoardSnapshot,
    scene_id: &str,
    edit: impl FnOnce(&mut CombatStateMachine) -> bool,
) -> bool {
    let Some(combat) = board.combat(scene_id).cloned() else {
        return false;
    };
    let mut machine = CombatStateMachine::from_state(combat);
    if !edit(&mut machine) {
        return false;
    }
    *board.combat_entry(scene_id) = machine.into_state();
    true
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("identity", &self.identity)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}
