use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::ApiError,
    forms::AttendanceForm,
    models::auth::AuthenticatedUser,
    routes::require_admin_or_teacher,
    services::attendance::AttendanceService,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct SheetQuery {
    pub class_id: Uuid,
    pub date: NaiveDate,
}

/// GET /attendance?class_id=&date=
pub async fn get_sheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<SheetQuery>,
) -> Result<Json<Value>, ApiError> {
    require_admin_or_teacher(&user)?;
    let sheet = AttendanceService::load_sheet(state.store.as_ref(), user.school_id, query.class_id, query.date)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(sheet)))
}

/// PUT /attendance — saves the marks of one class for one day.
pub async fn save_sheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(form): Json<AttendanceForm>,
) -> Result<Json<Value>, ApiError> {
    require_admin_or_teacher(&user)?;
    let summary = AttendanceService::save(state.store.as_ref(), &user, &form)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(summary)))
}
