use tracing::{debug, info};
use validator::Validate;

use crate::{
    dto::board::{BoardStateEnvelope, PersistBoardRequest, PersistCombatRequest, PersistResponse},
    error::ServiceError,
    state::SharedState,
};

/// Current stored board wrapped for the wire.
pub async fn load_board(state: &SharedState) -> BoardStateEnvelope {
    BoardStateEnvelope::new(state.boards().load().await)
}

/// Store a full board write after validating its metadata.
pub async fn persist_board(
    state: &SharedState,
    request: PersistBoardRequest,
) -> Result<PersistResponse, ServiceError> {
    request.validate()?;
    let PersistBoardRequest {
        board_state,
        metadata,
    } = request;

    info!(
        author = %metadata.author_id,
        gm = metadata.author_is_gm,
        signature = %metadata.signature,
        "board write"
    );
    state.boards().store_board(board_state, metadata).await;
    Ok(PersistResponse::ok())
}

/// Store a combat-only write; an older combat state than the stored one is ignored.
pub async fn persist_combat(
    state: &SharedState,
    request: PersistCombatRequest,
) -> Result<PersistResponse, ServiceError> {
    request.validate()?;
    let PersistCombatRequest {
        scene_id,
        combat,
        metadata,
    } = request;

    let author = metadata.author_id.clone();
    let accepted = state
        .boards()
        .store_combat(&scene_id, combat, metadata)
        .await;
    if accepted {
        info!(scene = %scene_id, %author, "combat write");
    } else {
        debug!(scene = %scene_id, %author, "stale combat write ignored");
    }
    Ok(PersistResponse::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        AppState,
        board::BoardSnapshot,
        combat::CombatState,
        identity::{Identity, SnapshotMetadata},
    };

    #[tokio::test]
    async fn invalid_metadata_is_rejected() {
        let state = AppState::new();
        let request = PersistBoardRequest {
            board_state: BoardSnapshot::default(),
            metadata: SnapshotMetadata::default(),
        };
        assert!(matches!(
            persist_board(&state, request).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(load_board(&state).await.data.board_state.is_none());
    }

    #[tokio::test]
    async fn combat_write_creates_board() {
        let state = AppState::new();
        let request = PersistCombatRequest {
            scene_id: "s".into(),
            combat: CombatState {
                active: true,
                updated_at: 3,
                ..CombatState::default()
            },
            metadata: SnapshotMetadata::stamp(&Identity::new("pat", false), 3),
        };
        assert!(persist_combat(&state, request).await.unwrap().success);

        let board = load_board(&state).await.data.board_state.unwrap();
        assert!(board.combat("s").unwrap().active);
    }
}
