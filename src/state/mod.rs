/// Board snapshot, scenes and placements.
pub mod board;
/// Per-scene combat state shared through the store.
pub mod combat;
/// Combatant groups.
pub mod groups;
/// User identity and snapshot authorship.
pub mod identity;
mod lenient;
/// Ordered combatants of the active scene.
pub mod roster;
/// Combat phases and transitions.
pub mod state_machine;
/// Turn lock acquisition and release.
pub mod turn_lock;

use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;
use tokio::sync::watch;

use crate::dao::memory::MemoryBoardStore;

use self::{
    board::{BoardSnapshot, Placement},
    combat::{CombatState, GroupEntry, TurnLock},
    identity::SnapshotMetadata,
    roster::Roster,
};

/// Identifier of a scene.
pub type SceneId = String;
/// Identifier of a combatant (a placement of the active scene).
pub type CombatantId = String;

/// Relay state shared by every request handler.
pub type SharedState = Arc<AppState>;

/// Central relay state: the stored board.
pub struct AppState {
    boards: MemoryBoardStore,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new() -> SharedState {
        Self::with_store(MemoryBoardStore::new())
    }

    /// Serve an existing store, e.g. one shared with in-process clients.
    pub fn with_store(boards: MemoryBoardStore) -> SharedState {
        Arc::new(Self { boards })
    }

    /// Stored board.
    pub fn boards(&self) -> &MemoryBoardStore {
        &self.boards
    }
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

/// Local copy of the board shared between the session, the poller and any renderer.
///
/// Renderers read through [`BoardStore::subscribe`] and mutate through
/// [`BoardStore::update_state`]; subscribers are only woken when a mutation actually
/// changed the board.
pub struct BoardStore {
    sender: watch::Sender<BoardSnapshot>,
    gate: Mutex<()>,
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new(BoardSnapshot::default())
    }
}

impl BoardStore {
    /// Create a store holding `initial`.
    pub fn new(initial: BoardSnapshot) -> Self {
        let (sender, _receiver) = watch::channel(initial);
        Self {
            sender,
            gate: Mutex::new(()),
        }
    }

    /// Receiver notified after every effective change.
    pub fn subscribe(&self) -> watch::Receiver<BoardSnapshot> {
        self.sender.subscribe()
    }

    /// Clone of the current board.
    pub fn snapshot(&self) -> BoardSnapshot {
        self.sender.borrow().clone()
    }

    /// Run `reader` against the current board without cloning it.
    pub fn read<R>(&self, reader: impl FnOnce(&BoardSnapshot) -> R) -> R {
        reader(&self.sender.borrow())
    }

    /// Mutate a draft of the board and publish it when it differs from the current one.
    ///
    /// Mutations are serialised; the draft is discarded untouched if `mutator` leaves it
    /// equal to the current board.
    pub fn update_state<R>(&self, mutator: impl FnOnce(&mut BoardSnapshot) -> R) -> R {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut draft = self.snapshot();
        let output = mutator(&mut draft);
        self.sender.send_if_modified(|current| {
            if *current == draft {
                false
            } else {
                *current = draft;
                true
            }
        });
        output
    }

    /// Active scene id.
    pub fn active_scene_id(&self) -> Option<SceneId> {
        self.read(|board| board.active_scene_id.clone())
    }

    /// Placements of the active scene a renderer may draw; concealed stand-ins are left out.
    pub fn active_scene_placements(&self) -> Vec<Placement> {
        self.read(|board| {
            board
                .active_scene_placements()
                .iter()
                .filter(|placement| !placement.concealed)
                .cloned()
                .collect()
        })
    }

    /// Roster built from the active scene, concealed combatants included.
    pub fn roster(&self) -> Roster {
        self.read(|board| Roster::from_placements(board.active_scene_placements()))
    }

    /// Combat state of the active scene.
    pub fn combat_state(&self) -> Option<CombatState> {
        self.read(|board| board.active_combat().cloned())
    }

    /// Turn lock of the active scene.
    pub fn turn_lock(&self) -> Option<TurnLock> {
        self.read(|board| board.active_combat().and_then(|combat| combat.turn_lock.clone()))
    }

    /// Combatant groups of the active scene.
    pub fn groups(&self) -> Vec<GroupEntry> {
        self.read(|board| {
            board
                .active_combat()
                .map(|combat| combat.groups.clone())
                .unwrap_or_default()
        })
    }

    /// Authorship of the last write reflected locally.
    pub fn metadata(&self) -> Option<SnapshotMetadata> {
        self.read(|board| board.metadata.clone())
    }

    /// Record `metadata` as the authorship of the local board.
    pub fn set_metadata(&self, metadata: SnapshotMetadata) {
        self.update_state(|draft| draft.metadata = Some(metadata));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::combat::Team;

    fn store() -> BoardStore {
        let mut board = BoardSnapshot {
            active_scene_id: Some("keep".into()),
            ..BoardSnapshot::default()
        };
        board
            .placements
            .insert("keep".into(), vec![Placement::new("hero", "Hero", Team::Ally)]);
        BoardStore::new(board)
    }

    #[test]
    fn subscribers_only_see_effective_changes() {
        let store = store();
        let mut receiver = store.subscribe();
        receiver.mark_unchanged();

        store.update_state(|_| ());
        assert!(!receiver.has_changed().unwrap());

        let returned = store.update_state(|draft| {
            draft.combat_entry("keep").round = 4;
            "done"
        });
        assert_eq!(returned, "done");
        assert!(receiver.has_changed().unwrap());
        assert_eq!(store.combat_state().map(|combat| combat.round), Some(4));
    }

    #[test]
    fn accessors_follow_the_active_scene() {
        let store = store();
        assert_eq!(store.active_scene_placements().len(), 1);
        assert!(store.roster().contains("hero"));
        assert!(store.turn_lock().is_none());
        assert!(store.groups().is_empty());

        store.update_state(|draft| draft.active_scene_id = Some("elsewhere".into()));
        assert!(store.active_scene_placements().is_empty());
    }

    #[test]
    fn concealed_placements_stay_on_the_roster_only() {
        let store = store();
        store.update_state(|draft| {
            let mut lurker = Placement::new("lurker", "Lurker", Team::Enemy);
            lurker.conceal();
            draft.placements.entry("keep".into()).or_default().push(lurker);
        });
        assert_eq!(store.active_scene_placements().len(), 1);
        assert!(store.roster().contains("lurker"));
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
