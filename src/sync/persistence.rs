use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use futures::future::BoxFuture;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    dao::remote_store::{RemoteStore, StoreError, StoreResult},
    state::{
        board::BoardSnapshot,
        combat::CombatState,
        identity::{Identity, SnapshotMetadata},
    },
    sync::{codec, merge::PersistedMarker},
};

/// Writer-side bookkeeping consulted by the poller.
#[derive(Debug, Default)]
struct WriteTracker {
    pending_signature: Option<String>,
    last_persisted: Option<PersistedMarker>,
}

/// Handle on one dispatched write.
#[derive(Debug)]
pub struct WriteTicket {
    /// Signature stamped on the write.
    pub signature: String,
    /// Hash of the written snapshot, `None` for combat-only writes.
    pub hash: Option<String>,
    /// Full authorship stamp.
    pub metadata: SnapshotMetadata,
    handle: JoinHandle<StoreResult<()>>,
}

impl WriteTicket {
    /// Wait for the write to finish.
    pub async fn completion(self) -> StoreResult<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(StoreError::Aborted {
                message: err.to_string(),
            }),
        }
    }
}

/// Signs and dispatches snapshots of the local board to the remote store.
///
/// Only the latest write is tracked; an older write finishing late never overwrites
/// the record of the newer one. Failures are logged and not retried.
#[derive(Clone)]
pub struct PersistenceWriter {
    store: Option<Arc<dyn RemoteStore>>,
    identity: Identity,
    tracker: Arc<Mutex<WriteTracker>>,
    in_flight: Arc<AtomicUsize>,
}

impl PersistenceWriter {
    /// Writer for `identity`; with no store every write is skipped.
    pub fn new(store: Option<Arc<dyn RemoteStore>>, identity: Identity) -> Self {
        Self {
            store,
            identity,
            tracker: Arc::new(Mutex::new(WriteTracker::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Persist the board filtered for the writer's role.
    pub async fn persist(&self, board: &BoardSnapshot, now_ms: i64) -> Option<WriteTicket> {
        let store = self.store.clone()?;
        let snapshot = board.for_role(self.identity.is_gm());
        let hash = codec::hash(&snapshot);
        let metadata = SnapshotMetadata::stamp(&self.identity, now_ms);
        let write = store.persist(snapshot, metadata.clone());
        Some(self.dispatch(write, metadata, hash, "board").await)
    }

    /// Persist only the combat state of `scene_id`.
    pub async fn persist_combat(
        &self,
        scene_id: &str,
        combat: &CombatState,
        now_ms: i64,
    ) -> Option<WriteTicket> {
        let store = self.store.clone()?;
        let metadata = SnapshotMetadata::stamp(&self.identity, now_ms);
        let write = store.persist_combat(scene_id.to_string(), combat.clone(), metadata.clone());
        Some(self.dispatch(write, metadata, None, "combat").await)
    }

    /// Whether a tracked write has not completed or any write is still travelling.
    pub async fn write_pending(&self) -> bool {
        let tracker = self.tracker.lock().await;
        tracker.pending_signature.is_some() || self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Last write the store confirmed.
    pub async fn last_persisted(&self) -> Option<PersistedMarker> {
        self.tracker.lock().await.last_persisted.clone()
    }

    /// Number of writes still travelling.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn dispatch(
        &self,
        write: BoxFuture<'static, StoreResult<()>>,
        metadata: SnapshotMetadata,
        hash: Option<String>,
        kind: &'static str,
    ) -> WriteTicket {
        let signature = metadata.signature.clone();
        self.tracker.lock().await.pending_signature = Some(signature.clone());
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let tracker = self.tracker.clone();
        let in_flight = self.in_flight.clone();
        let task_signature = signature.clone();
        let task_hash = hash.clone();
        let handle = tokio::spawn(async move {
            let result = write.await;
            {
                let mut tracker = tracker.lock().await;
                let tracked = tracker.pending_signature.as_deref() == Some(task_signature.as_str());
                match &result {
                    Ok(()) if tracked => {
                        debug!(signature = %task_signature, kind, "write persisted");
                        tracker.last_persisted = Some(PersistedMarker {
                            signature: task_signature.clone(),
                            hash: task_hash,
                        });
                        tracker.pending_signature = None;
                    }
                    Ok(()) => {
                        debug!(signature = %task_signature, kind, "superseded write persisted");
                    }
                    Err(err) => {
                        warn!(signature = %task_signature, kind, error = %err, "failed to persist board");
                        if tracked {
                            tracker.pending_signature = None;
                        }
                    }
                }
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        });

        WriteTicket {
            signature,
            hash,
            metadata,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        dao::memory::MemoryBoardStore,
        state::{SceneId, board::Placement, combat::Team},
    };

    fn board() -> BoardSnapshot {
        let mut board = BoardSnapshot {
            active_scene_id: Some("s".into()),
            map_url: Some("secret.png".into()),
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

    /// Store whose writes wait for a release and can be told to fail.
    #[derive(Clone)]
    struct GatedStore {
        gate: Arc<Semaphore>,
        fail: Arc<AtomicBool>,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                fail: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl RemoteStore for GatedStore {
        fn fetch(&self) -> BoxFuture<'static, StoreResult<Option<BoardSnapshot>>> {
            Box::pin(async { Ok(None) })
        }

        fn persist(
            &self,
            _board: BoardSnapshot,
            _metadata: SnapshotMetadata,
        ) -> BoxFuture<'static, StoreResult<()>> {
            let store = self.clone();
            Box::pin(async move {
                if let Ok(permit) = store.gate.acquire().await {
                    permit.forget();
                }
                if store.fail.load(Ordering::SeqCst) {
                    Err(StoreError::Rejected {
                        message: "refused".into(),
                    })
                } else {
                    Ok(())
                }
            })
        }

        fn persist_combat(
            &self,
            _scene_id: SceneId,
            _combat: CombatState,
            _metadata: SnapshotMetadata,
        ) -> BoxFuture<'static, StoreResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn successful_write_records_marker() {
        let store = MemoryBoardStore::new();
        let writer = PersistenceWriter::new(
            Some(Arc::new(store.clone())),
            Identity::new("pat", false),
        );

        let ticket = writer.persist(&board(), 10).await.unwrap();
        let signature = ticket.signature.clone();
        let hash = ticket.hash.clone();
        ticket.completion().await.unwrap();

        assert!(!writer.write_pending().await);
        let marker = writer.last_persisted().await.unwrap();
        assert_eq!(marker.signature, signature);
        assert_eq!(marker.hash, hash);

        let stored = store.load().await.unwrap();
        assert!(stored.map_url.is_none());
        assert_eq!(stored.active_scene_placements().len(), 1);
        assert_eq!(stored.metadata.map(|meta| meta.signature), Some(signature));
    }

    #[tokio::test]
    async fn no_store_skips_writes() {
        let writer = PersistenceWriter::new(None, Identity::new("gm", true));
        assert!(writer.persist(&board(), 1).await.is_none());
        assert!(writer.persist_combat("s", &CombatState::default(), 1).await.is_none());
        assert!(!writer.write_pending().await);
    }

    #[tokio::test]
    async fn superseded_write_does_not_overwrite_marker() {
        let store = GatedStore::new();
        let writer = PersistenceWriter::new(Some(Arc::new(store.clone())), Identity::new("gm", true));

        let first = writer.persist(&board(), 1).await.unwrap();
        let second = writer.persist(&board(), 2).await.unwrap();
        assert_eq!(writer.in_flight(), 2);
        assert!(writer.write_pending().await);

        store.gate.add_permits(2);
        let first_signature = first.signature.clone();
        let second_signature = second.signature.clone();
        first.completion().await.unwrap();
        second.completion().await.unwrap();

        let marker = writer.last_persisted().await.unwrap();
        assert_eq!(marker.signature, second_signature);
        assert_ne!(marker.signature, first_signature);
        assert!(!writer.write_pending().await);
    }

    #[tokio::test]
    async fn failed_write_clears_pending_without_marker() {
        let store = GatedStore::new();
        store.fail.store(true, Ordering::SeqCst);
        let writer = PersistenceWriter::new(Some(Arc::new(store.clone())), Identity::new("gm", true));

        let ticket = writer.persist(&board(), 1).await.unwrap();
        store.gate.add_permits(1);
        assert!(ticket.completion().await.is_err());

        assert!(!writer.write_pending().await);
        assert!(writer.last_persisted().await.is_none());
    }
}
