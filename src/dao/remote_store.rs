use std::error::Error;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::state::{
    SceneId, board::BoardSnapshot, combat::CombatState, identity::SnapshotMetadata,
};

/// Result alias for remote store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures talking to the remote board store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request never reached the store.
    #[error("failed to reach board store at `{path}`")]
    RequestSend {
        /// Store path of the request.
        path: String,
        /// Transport error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The store answered with a non-success status.
    #[error("unexpected board store response status {status} for `{path}`")]
    RequestStatus {
        /// Store path of the request.
        path: String,
        /// HTTP status returned.
        status: u16,
    },
    /// The response body could not be decoded.
    #[error("failed to decode board store response for `{path}`")]
    DecodeResponse {
        /// Store path of the request.
        path: String,
        /// Decoding error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The store processed the request and refused it.
    #[error("board store rejected the write: {message}")]
    Rejected {
        /// Reason given by the store.
        message: String,
    },
    /// The write task ended before reporting.
    #[error("write task aborted: {message}")]
    Aborted {
        /// Join error text.
        message: String,
    },
}

/// Durable owner of the shared board.
///
/// Reads return the latest stored snapshot; writes replace it. Implementations never
/// push changes, clients have to poll.
pub trait RemoteStore: Send + Sync {
    /// Latest stored board, `None` when nothing was stored yet.
    fn fetch(&self) -> BoxFuture<'static, StoreResult<Option<BoardSnapshot>>>;

    /// Replace the board with a snapshot authored as `metadata`.
    fn persist(
        &self,
        board: BoardSnapshot,
        metadata: SnapshotMetadata,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Replace only the combat state of `scene_id`; used by players whose snapshots
    /// cannot carry scene state.
    fn persist_combat(
        &self,
        scene_id: SceneId,
        combat: CombatState,
        metadata: SnapshotMetadata,
    ) -> BoxFuture<'static, StoreResult<()>>;
}
