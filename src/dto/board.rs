//! Wire payloads of the board endpoints, shared by the relay routes and the HTTP client.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::state::{
    SceneId, board::BoardSnapshot, combat::CombatState, identity::SnapshotMetadata,
};

/// Body of `GET /board-state`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BoardStateEnvelope {
    /// Wrapped payload.
    #[serde(default)]
    pub data: BoardStateData,
}

/// Stored board, `null` until the first write.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoardStateData {
    /// Latest stored snapshot.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub board_state: Option<BoardSnapshot>,
}

impl BoardStateEnvelope {
    /// Wrap a stored board.
    pub fn new(board_state: Option<BoardSnapshot>) -> Self {
        Self {
            data: BoardStateData { board_state },
        }
    }
}

/// Body of `POST /board-state`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PersistBoardRequest {
    /// Snapshot filtered for the author's role.
    #[schema(value_type = Object)]
    pub board_state: BoardSnapshot,
    /// Authorship stamp of this write.
    #[validate(nested)]
    #[schema(value_type = Object)]
    pub metadata: SnapshotMetadata,
}

/// Body of `POST /combat-state`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PersistCombatRequest {
    /// Scene whose combat state is replaced.
    #[validate(length(min = 1))]
    pub scene_id: SceneId,
    /// New combat state.
    #[schema(value_type = Object)]
    pub combat: CombatState,
    /// Authorship stamp of this write.
    #[validate(nested)]
    #[schema(value_type = Object)]
    pub metadata: SnapshotMetadata,
}

/// Acknowledgement of a write.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PersistResponse {
    /// Whether the write was stored.
    pub success: bool,
    /// Reason of a refused write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersistResponse {
    /// Successful acknowledgement.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }
}
