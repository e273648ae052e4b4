//! Students, teachers, parents and staff. One router per page, told which
//! page it serves through an `Extension<MemberKind>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::ApiError,
    forms::UserForm,
    models::{auth::AuthenticatedUser, user::UserPatch},
    routes::{require_admin, require_admin_or_teacher},
    services::dashboard::{MemberKind, Members, Resource},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub fn router(kind: MemberKind) -> Router<AppState> {
    Router::new()
        .route("/", get(list_members).post(create_member))
        .route("/{id}", put(update_member).delete(deactivate_member))
        .layer(Extension(kind))
}

fn members(state: &AppState, user: &AuthenticatedUser, kind: MemberKind, include_inactive: bool) -> Members {
    Members {
        store: state.store.clone(),
        school_id: user.school_id,
        kind,
        include_inactive,
    }
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(kind): Extension<MemberKind>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_admin_or_teacher(&user)?;
    let rows = members(&state, &user, kind, query.include_inactive)
        .query()
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(rows)))
}

/// The new member starts `pending`; the login and welcome email follow
/// asynchronously.
pub async fn create_member(
    State(state): State<AppState>,
    Extension(kind): Extension<MemberKind>,
    user: AuthenticatedUser,
    Json(form): Json<UserForm>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_admin(&user)?;
    let created = members(&state, &user, kind, false)
        .create(form)
        .await
        .map_err(|e| e.into_api())?;
    Ok((StatusCode::CREATED, Json(json!(created))))
}

pub async fn update_member(
    State(state): State<AppState>,
    Extension(kind): Extension<MemberKind>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<UserPatch>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    let updated = members(&state, &user, kind, true)
        .edit(id, patch)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(updated)))
}

/// Soft delete: the member is deactivated, never removed.
pub async fn deactivate_member(
    State(state): State<AppState>,
    Extension(kind): Extension<MemberKind>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&user)?;
    members(&state, &user, kind, true)
        .remove(id)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!({ "success": true })))
}
