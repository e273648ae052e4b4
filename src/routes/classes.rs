use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::ApiError,
    forms::ClassForm,
    models::{auth::AuthenticatedUser, class::ClassPatch},
    routes::{members::ListQuery, require_admin_or_teacher},
    services::dashboard::{Classes, Resource},
    AppState,
};

fn classes(state: &AppState, user: &AuthenticatedUser, include_inactive: bool) -> Classes {
    Classes {
        store: state.store.clone(),
        school_id: user.school_id,
        include_inactive,
    }
}

pub async fn list_classes(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let rows = classes(&state, &user, query.include_inactive)
        .query()
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(rows)))
}

pub async fn create_class(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(form): Json<ClassForm>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_admin_or_teacher(&user)?;
    let class = classes(&state, &user, false)
        .create(form)
        .await
        .map_err(|e| e.into_api())?;
    Ok((StatusCode::CREATED, Json(json!(class))))
}

pub async fn update_class(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<ClassPatch>,
) -> Result<Json<Value>, ApiError> {
    require_admin_or_teacher(&user)?;
    let class = classes(&state, &user, true)
        .edit(id, patch)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(class)))
}

pub async fn deactivate_class(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin_or_teacher(&user)?;
    classes(&state, &user, true)
        .remove(id)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!({ "success": true })))
}
