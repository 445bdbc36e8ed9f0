use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    dao::remote_store::{RemoteStore, StoreError},
    state::{BoardStore, SceneId, combat::TurnEffect, identity::Identity},
    sync::{
        codec,
        effects::EffectHub,
        merge::{MergeContext, MergeDecision, decide_merge},
        persistence::PersistenceWriter,
    },
};

/// Poll period used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Why a tick did not fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The previous poll has not returned yet.
    InFlight,
    /// No remote store is configured.
    Disabled,
    /// The client is not visible.
    Hidden,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nothing was fetched.
    Skipped(SkipReason),
    /// The fetch failed; logged once per failure streak.
    Failed,
    /// The store holds no board yet.
    Empty,
    /// The snapshot was fetched but not merged.
    Ignored(MergeDecision),
    /// The snapshot replaced the local board.
    Merged {
        /// Scenes whose combat state came from the remote.
        absorbed: Vec<SceneId>,
        /// Effect replayed by this merge.
        replayed: Option<TurnEffect>,
    },
}

#[derive(Debug, Default)]
struct PollState {
    last_accepted_hash: Option<String>,
    last_seen_hash: Option<String>,
    merged_once: bool,
    failing: bool,
}

/// Periodically fetches the shared board and merges foreign changes into the local one.
pub struct RemotePoller {
    store: Option<Arc<dyn RemoteStore>>,
    writer: PersistenceWriter,
    board: Arc<BoardStore>,
    effects: Arc<EffectHub>,
    identity: Identity,
    period: Duration,
    in_flight: AtomicBool,
    visible: AtomicBool,
    state: Mutex<PollState>,
}

impl RemotePoller {
    /// Build a poller merging into `board`.
    pub fn new(
        store: Option<Arc<dyn RemoteStore>>,
        writer: PersistenceWriter,
        board: Arc<BoardStore>,
        effects: Arc<EffectHub>,
        identity: Identity,
        period: Duration,
    ) -> Self {
        Self {
            store,
            writer,
            board,
            effects,
            identity,
            period,
            in_flight: AtomicBool::new(false),
            visible: AtomicBool::new(true),
            state: Mutex::new(PollState::default()),
        }
    }

    /// Pause polling while the client is hidden; checked on every tick.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Hash of the last fetched snapshot, merged or not.
    pub async fn last_seen_hash(&self) -> Option<String> {
        self.state.lock().await.last_seen_hash.clone()
    }

    /// Hash of the last merged snapshot.
    pub async fn last_accepted_hash(&self) -> Option<String> {
        self.state.lock().await.last_accepted_hash.clone()
    }

    /// Run one poll.
    pub async fn tick(&self) -> PollOutcome {
        let Some(store) = self.store.clone() else {
            return PollOutcome::Skipped(SkipReason::Disabled);
        };
        if !self.visible.load(Ordering::SeqCst) {
            return PollOutcome::Skipped(SkipReason::Hidden);
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return PollOutcome::Skipped(SkipReason::InFlight);
        }

        let outcome = self.poll_once(store.as_ref()).await;
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    /// Drive [`RemotePoller::tick`] every period until `shutdown` turns true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = self.tick().await;
                        debug!(?outcome, "poll finished");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("poller stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn poll_once(&self, store: &dyn RemoteStore) -> PollOutcome {
        let remote = match store.fetch().await {
            Ok(remote) => {
                self.record_success().await;
                remote
            }
            Err(err) => {
                self.record_failure(&err).await;
                return PollOutcome::Failed;
            }
        };
        let Some(remote) = remote else {
            return PollOutcome::Empty;
        };

        let remote_hash = codec::hash(&remote);
        let write_pending = self.writer.write_pending().await;
        let last_persisted = self.writer.last_persisted().await;
        let local_metadata = self.board.metadata();

        let mut state = self.state.lock().await;
        let decision = decide_merge(
            &remote,
            remote_hash.as_deref(),
            &MergeContext {
                last_accepted_hash: state.last_accepted_hash.as_deref(),
                write_pending,
                last_persisted: last_persisted.as_ref(),
                user_id: self.identity.user_id(),
                local_metadata: local_metadata.as_ref(),
            },
        );
        match decision {
            MergeDecision::Accept => {}
            MergeDecision::Unchanged => return PollOutcome::Ignored(decision),
            _ => {
                debug!(?decision, "fetched board not merged");
                state.last_seen_hash = remote_hash;
                return PollOutcome::Ignored(decision);
            }
        }

        // A session that never wrote nor merged is joining; the effect it finds is history.
        let joining = !state.merged_once && local_metadata.is_none();
        let is_gm = self.identity.is_gm();
        let absorbed = self
            .board
            .update_state(|draft| draft.merge_remote(remote, is_gm));
        state.merged_once = true;
        state.last_accepted_hash = remote_hash.clone();
        state.last_seen_hash = remote_hash;
        drop(state);

        let current = self
            .board
            .read(|board| board.active_combat().and_then(|combat| combat.last_effect.clone()));
        let replayed = if joining {
            self.effects.prime(current.as_ref());
            None
        } else {
            self.effects.replay(current.as_ref())
        };
        debug!(scenes = ?absorbed, "merged remote board");

        PollOutcome::Merged { absorbed, replayed }
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.failing {
            info!("board store reachable again");
            state.failing = false;
        }
    }

    async fn record_failure(&self, err: &StoreError) {
        let mut state = self.state.lock().await;
        if state.failing {
            debug!(error = %err, "board store still unreachable");
        } else {
            warn!(error = %err, "failed to fetch board state");
            state.failing = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        dao::{memory::MemoryBoardStore, remote_store::StoreResult},
        state::{
            board::{BoardSnapshot, Placement},
            combat::{CombatState, Team},
            identity::SnapshotMetadata,
        },
    };

    fn poller_for(store: Arc<dyn RemoteStore>, identity: Identity) -> (RemotePoller, Arc<BoardStore>) {
        let board = Arc::new(BoardStore::default());
        let writer = PersistenceWriter::new(Some(store.clone()), identity.clone());
        let poller = RemotePoller::new(
            Some(store),
            writer,
            board.clone(),
            Arc::new(EffectHub::new(8)),
            identity,
            DEFAULT_POLL_INTERVAL,
        );
        (poller, board)
    }

    fn gm_board() -> BoardSnapshot {
        let mut board = BoardSnapshot {
            active_scene_id: Some("s".into()),
            ..BoardSnapshot::default()
        };
        board.placements.insert(
            "s".into(),
            vec![
                Placement::new("a", "A", Team::Ally),
                Placement::new("h", "H", Team::Enemy).hidden(),
            ],
        );
        board
    }

    struct DownStore;

    impl RemoteStore for DownStore {
        fn fetch(&self) -> BoxFuture<'static, StoreResult<Option<BoardSnapshot>>> {
            Box::pin(async {
                Err(StoreError::RequestStatus {
                    path: "board-state".into(),
                    status: 503,
                })
            })
        }

        fn persist(&self, _: BoardSnapshot, _: SnapshotMetadata) -> BoxFuture<'static, StoreResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn persist_combat(
            &self,
            _: SceneId,
            _: CombatState,
            _: SnapshotMetadata,
        ) -> BoxFuture<'static, StoreResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn foreign_write_is_merged_then_unchanged() {
        let store = MemoryBoardStore::new();
        store
            .store_board(gm_board(), SnapshotMetadata::stamp(&Identity::new("gm", true), 10))
            .await;
        let (poller, board) = poller_for(Arc::new(store), Identity::new("pat", false));

        let outcome = poller.tick().await;
        assert!(matches!(outcome, PollOutcome::Merged { .. }));
        assert_eq!(board.active_scene_placements().len(), 1, "hidden placement not drawn");
        assert!(board.roster().contains("h"), "hidden placement still takes turns");

        assert_eq!(poller.tick().await, PollOutcome::Ignored(MergeDecision::Unchanged));
    }

    #[tokio::test]
    async fn own_write_polled_back_mutates_nothing() {
        let store = MemoryBoardStore::new();
        let gm = Identity::new("gm", true);
        let (poller, board) = poller_for(Arc::new(store.clone()), gm.clone());
        board.update_state(|draft| *draft = gm_board());

        let writer = PersistenceWriter::new(Some(Arc::new(store)), gm);
        let ticket = writer.persist(&board.snapshot(), 20).await.unwrap();
        board.set_metadata(ticket.metadata.clone());
        ticket.completion().await.unwrap();

        let mut receiver = board.subscribe();
        receiver.borrow_and_update();
        let before = board.snapshot();

        assert_eq!(poller.tick().await, PollOutcome::Ignored(MergeDecision::Echo));
        assert!(!receiver.has_changed().unwrap());
        assert_eq!(board.snapshot(), before);
        assert!(poller.last_seen_hash().await.is_some());
        assert!(poller.last_accepted_hash().await.is_none());
    }

    /// Memory store whose writes wait until the test opens the gate.
    #[derive(Clone)]
    struct SlowWrites {
        inner: MemoryBoardStore,
        gate: Arc<Semaphore>,
    }

    impl RemoteStore for SlowWrites {
        fn fetch(&self) -> BoxFuture<'static, StoreResult<Option<BoardSnapshot>>> {
            self.inner.fetch()
        }

        fn persist(&self, board: BoardSnapshot, metadata: SnapshotMetadata) -> BoxFuture<'static, StoreResult<()>> {
            let store = self.clone();
            Box::pin(async move {
                if let Ok(permit) = store.gate.acquire().await {
                    permit.forget();
                }
                store.inner.persist(board, metadata).await
            })
        }

        fn persist_combat(
            &self,
            scene_id: SceneId,
            combat: CombatState,
            metadata: SnapshotMetadata,
        ) -> BoxFuture<'static, StoreResult<()>> {
            self.inner.persist_combat(scene_id, combat, metadata)
        }
    }

    fn effect_board(at: i64) -> BoardSnapshot {
        let mut board = gm_board();
        let combat = board.combat_entry("s");
        combat.active = true;
        combat.updated_at = at;
        combat.last_effect = Some(TurnEffect {
            kind: "ambush".into(),
            combatant_id: Some("h".into()),
            triggered_at: at,
            payload: None,
        });
        board
    }

    #[tokio::test]
    async fn fetch_racing_an_own_write_is_deferred() {
        let memory = MemoryBoardStore::new();
        memory
            .store_board(gm_board(), SnapshotMetadata::stamp(&Identity::new("gm", true), 10))
            .await;
        let store = SlowWrites {
            inner: memory,
            gate: Arc::new(Semaphore::new(0)),
        };
        let identity = Identity::new("pat", false);
        let shared: Arc<dyn RemoteStore> = Arc::new(store.clone());
        let writer = PersistenceWriter::new(Some(shared.clone()), identity.clone());
        let board = Arc::new(BoardStore::default());
        let poller = RemotePoller::new(
            Some(shared),
            writer.clone(),
            board.clone(),
            Arc::new(EffectHub::new(4)),
            identity,
            DEFAULT_POLL_INTERVAL,
        );

        board.update_state(|draft| draft.active_scene_id = Some("mine".into()));
        let ticket = writer.persist(&board.snapshot(), 20).await.unwrap();
        let mut receiver = board.subscribe();
        receiver.borrow_and_update();
        let before = board.snapshot();

        assert_eq!(poller.tick().await, PollOutcome::Ignored(MergeDecision::Deferred));
        assert_eq!(poller.last_seen_hash().await, codec::hash(&gm_board()));
        assert!(poller.last_accepted_hash().await.is_none());
        assert!(!receiver.has_changed().unwrap());
        assert_eq!(board.snapshot(), before);

        store.gate.add_permits(1);
        ticket.completion().await.unwrap();
    }

    #[tokio::test]
    async fn effect_after_a_combat_free_merge_is_replayed() {
        let store = MemoryBoardStore::new();
        let gm = Identity::new("gm", true);
        store.store_board(gm_board(), SnapshotMetadata::stamp(&gm, 10)).await;
        let (poller, board) = poller_for(Arc::new(store.clone()), Identity::new("pat", false));
        assert!(matches!(poller.tick().await, PollOutcome::Merged { .. }));
        assert!(board.combat_state().is_none());

        store.store_board(effect_board(30), SnapshotMetadata::stamp(&gm, 30)).await;
        match poller.tick().await {
            PollOutcome::Merged { replayed, .. } => {
                assert_eq!(replayed.map(|effect| effect.triggered_at), Some(30));
            }
            other => panic!("expected a merge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn effect_found_when_joining_stays_silent() {
        let store = MemoryBoardStore::new();
        let gm = Identity::new("gm", true);
        store.store_board(effect_board(30), SnapshotMetadata::stamp(&gm, 30)).await;
        let (poller, _) = poller_for(Arc::new(store.clone()), Identity::new("pat", false));
        assert!(matches!(poller.tick().await, PollOutcome::Merged { replayed: None, .. }));

        store.store_board(effect_board(40), SnapshotMetadata::stamp(&gm, 40)).await;
        match poller.tick().await {
            PollOutcome::Merged { replayed, .. } => {
                assert_eq!(replayed.map(|effect| effect.triggered_at), Some(40));
            }
            other => panic!("expected a merge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hidden_and_disabled_clients_skip() {
        let (poller, _) = poller_for(Arc::new(MemoryBoardStore::new()), Identity::new("pat", false));
        assert_eq!(poller.tick().await, PollOutcome::Empty);
        poller.set_visible(false);
        assert_eq!(poller.tick().await, PollOutcome::Skipped(SkipReason::Hidden));

        let board = Arc::new(BoardStore::default());
        let identity = Identity::new("pat", false);
        let offline = RemotePoller::new(
            None,
            PersistenceWriter::new(None, identity.clone()),
            board,
            Arc::new(EffectHub::new(1)),
            identity,
            DEFAULT_POLL_INTERVAL,
        );
        assert_eq!(offline.tick().await, PollOutcome::Skipped(SkipReason::Disabled));
    }

    #[tokio::test]
    async fn failures_are_reported_and_recoverable() {
        let (poller, _) = poller_for(Arc::new(DownStore), Identity::new("pat", false));
        assert_eq!(poller.tick().await, PollOutcome::Failed);
        assert_eq!(poller.tick().await, PollOutcome::Failed);
        assert!(poller.state.lock().await.failing);
        poller.record_success().await;
        assert!(!poller.state.lock().await.failing);
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_shutdown() {
        let store = MemoryBoardStore::new();
        store
            .store_board(gm_board(), SnapshotMetadata::stamp(&Identity::new("gm", true), 10))
            .await;
        let (poller, board) = poller_for(Arc::new(store), Identity::new("pat", false));
        let mut receiver = board.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::new(poller).spawn(shutdown_rx);
        receiver.changed().await.unwrap();
        assert_eq!(board.active_scene_id().as_deref(), Some("s"));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
