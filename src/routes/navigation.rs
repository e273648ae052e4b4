use axum::Json;
use serde_json::{json, Value};

use crate::{models::auth::AuthenticatedUser, services::navigation};

/// GET /navigation — sidebar entries for the caller's role.
pub async fn get_navigation(user: AuthenticatedUser) -> Json<Value> {
    Json(json!(navigation::items_for(user.role)))
}
