use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::ApiError, models::auth::AuthenticatedUser, routes::require_admin, AppState};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

/// GET /email-logs — most recent outbound emails for the caller's school.
pub async fn list_email_logs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<LogQuery>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let logs = state
        .store
        .list_email_logs(user.school_id, limit)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(logs)))
}
