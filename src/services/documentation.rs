use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the board relay.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::board::get_board_state,
        crate::routes::board::post_board_state,
        crate::routes::board::post_combat_state,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::board::BoardStateEnvelope,
            crate::dto::board::BoardStateData,
            crate::dto::board::PersistBoardRequest,
            crate::dto::board::PersistCombatRequest,
            crate::dto::board::PersistResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "board", description = "Shared board storage polled by table clients"),
    )
)]
pub struct ApiDoc;
