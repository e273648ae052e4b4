use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    error::{api_error, ApiError},
    forms::validate_school_patch,
    models::{auth::AuthenticatedUser, tenant::SchoolPatch},
    routes::require_admin,
    AppState,
};

/// GET /school — the caller's own school.
pub async fn get_school(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let school = state
        .store
        .get_school(user.school_id)
        .await
        .map_err(|e| e.into_api())?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "School not found"))?;
    Ok(Json(json!(school)))
}

/// PUT /school — profile and feature flags. Administrators only.
pub async fn update_school(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(patch): Json<SchoolPatch>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    validate_school_patch(&patch).map_err(|e| e.into_api())?;
    let school = state
        .store
        .update_school(user.school_id, &patch)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(school)))
}
