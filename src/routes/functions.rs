//! Callable email functions. Bodies and replies use camelCase keys.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    error::ApiError,
    middleware::rate_limit::{check_rate_limit, email_key},
    models::auth::AuthenticatedUser,
    services::pipeline::{BulkRequest, PasswordResetRequest},
    AppState,
};

/// POST /functions/password-reset-email — `success` is false when the relay
/// rejected the message.
pub async fn password_reset_email(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<PasswordResetRequest>,
) -> Result<Json<Value>, ApiError> {
    // 3 per hour per address
    check_rate_limit(state.redis.as_ref(), &email_key("password_reset", &body.email), 3, 3600).await?;

    let sent = state
        .pipeline
        .password_reset_email(&user, &body)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!({ "success": sent })))
}

/// POST /functions/bulk-notification-email
pub async fn bulk_notification_email(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<BulkRequest>,
) -> Result<Json<Value>, ApiError> {
    let summary = state
        .pipeline
        .bulk_notification(&user, &body)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!(summary)))
}
