use axum::{
    Json, Router,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    dto::board::{BoardStateEnvelope, PersistBoardRequest, PersistCombatRequest, PersistResponse},
    error::AppError,
    services::board_service,
    state::SharedState,
};

/// Board storage endpoints polled and written by table clients.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/board-state", get(get_board_state).post(post_board_state))
        .route("/combat-state", post(post_combat_state))
}

/// Return the stored board; never cached.
#[utoipa::path(
    get,
    path = "/board-state",
    tag = "board",
    responses((status = 200, description = "Stored board, null before the first write", body = BoardStateEnvelope))
)]
pub async fn get_board_state(State(state): State<SharedState>) -> impl IntoResponse {
    let envelope = board_service::load_board(&state).await;
    ([(header::CACHE_CONTROL, "no-cache")], Json(envelope))
}

/// Replace the stored board; player writes keep GM-only content.
#[utoipa::path(
    post,
    path = "/board-state",
    tag = "board",
    request_body = PersistBoardRequest,
    responses(
        (status = 200, description = "Board stored", body = PersistResponse),
        (status = 400, description = "Missing or invalid metadata")
    )
)]
pub async fn post_board_state(
    State(state): State<SharedState>,
    Json(payload): Json<PersistBoardRequest>,
) -> Result<Json<PersistResponse>, AppError> {
    Ok(Json(board_service::persist_board(&state, payload).await?))
}

/// Replace the combat state of one scene.
#[utoipa::path(
    post,
    path = "/combat-state",
    tag = "board",
    request_body = PersistCombatRequest,
    responses(
        (status = 200, description = "Combat state stored or older than the stored one", body = PersistResponse),
        (status = 400, description = "Missing scene or invalid metadata")
    )
)]
pub async fn post_combat_state(
    State(state): State<SharedState>,
    Json(payload): Json<PersistCombatRequest>,
) -> Result<Json<PersistResponse>, AppError> {
    Ok(Json(board_service::persist_combat(&state, payload).await?))
}
