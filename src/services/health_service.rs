use crate::{dto::health::HealthResponse, state::SharedState};

/// Report the relay as healthy along with whether a board is stored.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    HealthResponse::ok(state.boards().load().await.is_some())
}
