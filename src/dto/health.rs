use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status, always "ok" while the relay answers.
    pub status: String,
    /// Whether a board has been stored since startup.
    pub has_board: bool,
    /// RFC 3339 time of the check.
    pub checked_at: String,
}

impl HealthResponse {
    /// Create a health response indicating the relay is operational.
    pub fn ok(has_board: bool) -> Self {
        Self {
            status: "ok".to_string(),
            has_board,
            checked_at: super::format_system_time(std::time::SystemTime::now()),
        }
    }
}
