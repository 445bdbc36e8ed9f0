use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    dao::remote_store::{RemoteStore, StoreResult},
    state::{
        SceneId, board::BoardSnapshot, combat::CombatState, identity::SnapshotMetadata,
    },
};

/// Board store kept in process memory; backs the relay server and in-process tests.
///
/// Writes follow the relay rules: a player write cannot clear GM-only fields, and a
/// scene's combat state is only replaced by a strictly newer one.
#[derive(Clone, Default)]
pub struct MemoryBoardStore {
    board: Arc<RwLock<Option<BoardSnapshot>>>,
}

impl MemoryBoardStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored board.
    pub async fn load(&self) -> Option<BoardSnapshot> {
        self.board.read().await.clone()
    }

    /// Store a full board write.
    pub async fn store_board(&self, incoming: BoardSnapshot, metadata: SnapshotMetadata) {
        let mut guard = self.board.write().await;
        apply_board(&mut guard, incoming, metadata);
    }

    /// Store a combat-only write; returns whether it replaced the stored combat state.
    pub async fn store_combat(
        &self,
        scene_id: &str,
        combat: CombatState,
        metadata: SnapshotMetadata,
    ) -> bool {
        let mut guard = self.board.write().await;
        apply_combat(&mut guard, scene_id, combat, metadata)
    }
}

fn apply_board(
    stored: &mut Option<BoardSnapshot>,
    mut incoming: BoardSnapshot,
    metadata: SnapshotMetadata,
) {
    let Some(current) = stored.as_mut() else {
        incoming.metadata = Some(metadata);
        *stored = Some(incoming);
        return;
    };

    if !metadata.author_is_gm {
        keep_gm_fields(current, &mut incoming);
    }
    let absorbed = current.merge_remote(incoming, true);
    debug!(author = %metadata.author_id, scenes = ?absorbed, "stored board write");
    current.metadata = Some(metadata);
}

fn apply_combat(
    stored: &mut Option<BoardSnapshot>,
    scene_id: &str,
    combat: CombatState,
    metadata: SnapshotMetadata,
) -> bool {
    let board = stored.get_or_insert_with(BoardSnapshot::default);
    let accepted = board.combat_entry(scene_id).absorb(combat);
    if accepted {
        board.metadata = Some(metadata);
    } else {
        debug!(scene = scene_id, author = %metadata.author_id, "kept newer stored combat state");
    }
    accepted
}

/// Carry GM-only content of `current` into a player-authored `incoming` board.
fn keep_gm_fields(current: &BoardSnapshot, incoming: &mut BoardSnapshot) {
    incoming.map_url = current.map_url.clone();
    incoming.scene_state = current.scene_state.clone();
    incoming.overlay = current.overlay.clone();

    for (scene, placements) in &current.placements {
        let target = incoming.placements.entry(scene.clone()).or_default();
        for placement in placements.iter().filter(|placement| placement.hidden) {
            if target.iter().all(|existing| existing.id != placement.id) {
                target.push(placement.clone());
            }
        }
    }
}

impl RemoteStore for MemoryBoardStore {
    fn fetch(&self) -> BoxFuture<'static, StoreResult<Option<BoardSnapshot>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.load().await) })
    }

    fn persist(
        &self,
        board: BoardSnapshot,
        metadata: SnapshotMetadata,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.store_board(board, metadata).await;
            Ok(())
        })
    }

    fn persist_combat(
        &self,
        scene_id: SceneId,
        combat: CombatState,
        metadata: SnapshotMetadata,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.store_combat(&scene_id, combat, metadata).await;
            Ok(())
        })
    }
}
