use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::ApiError,
    forms::{AnnouncementEditForm, AnnouncementForm},
    models::{
        announcement::AnnouncementStatus,
        auth::AuthenticatedUser,
        user::UserRole,
    },
    routes::require_admin_or_teacher,
    services::dashboard::{Announcements, Resource},
    AppState,
};

fn announcements(state: &AppState, user: &AuthenticatedUser) -> Announcements {
    Announcements {
        store: state.store.clone(),
        school_id: user.school_id,
        author_id: user.user_id,
    }
}

/// GET /announcements — newest first. Administrators and teachers see every
/// announcement; everyone else sees the published ones addressed to them.
pub async fn list_announcements(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let mut rows = announcements(&state, &user)
        .query()
        .await
        .map_err(|e| e.into_api())?;
    if !(user.role.is_admin() || user.role == UserRole::Teacher) {
        rows.retain(|r| {
            r.announcement.status == AnnouncementStatus::Published
                && r.announcement.addresses(user.role)
        });
    }
    Ok(Json(json!(rows)))
}

/// POST /announcements — the email fan-out runs in the background once the
/// document is written.
pub async fn create_announcement(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(form): Json<AnnouncementForm>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_admin_or_teacher(&user)?;
    let created = announcements(&state, &user)
        .create(form)
        .await
        .map_err(|e| e.into_api())?;
    Ok((StatusCode::CREATED, Json(json!(created))))
}

pub async fn update_announcement(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(form): Json<AnnouncementEditForm>,
) -> Result<Json<Value>, ApiError> {
    require_admin_or_teacher(&user)?;
    let updated = announcements(&state, &user)
        .edit(id, form)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(updated)))
}

/// DELETE /announcements/{id} — hard delete.
pub async fn delete_announcement(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    require_admin_or_teacher(&user)?;
    announcements(&state, &user)
        .remove(id)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!({ "success": true })))
}
