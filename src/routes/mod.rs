use axum::Router;

use crate::state::SharedState;

pub(crate) mod board;
/// Swagger UI and OpenAPI document routes.
pub mod docs;
pub(crate) mod health;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router().merge(board::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
