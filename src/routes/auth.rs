use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    error::{api_error, ApiError},
    forms::SignUpForm,
    middleware::rate_limit::{check_rate_limit, email_key},
    models::{
        auth::{AuthenticatedUser, SignInRequest},
        user::UserPatch,
    },
    services::auth::AuthService,
    AppState,
};

/// POST /auth/sign-up — registers a user and, for a school admin, the school.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(form): Json<SignUpForm>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // 5 attempts per 15 min per email
    check_rate_limit(state.redis.as_ref(), &email_key("sign_up", &form.email), 5, 900).await?;

    let response = AuthService::sign_up(
        state.store.as_ref(),
        state.identity.as_ref(),
        &state.tokens(),
        &form,
    )
    .await
    .map_err(|e| e.into_api())?;

    Ok((StatusCode::CREATED, Json(json!(response))))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<SignInRequest>,
) -> Result<Json<Value>, ApiError> {
    check_rate_limit(state.redis.as_ref(), &email_key("sign_in", &body.email), 5, 900).await?;

    let response = AuthService::sign_in(
        state.store.as_ref(),
        state.identity.as_ref(),
        &state.tokens(),
        &body.email,
        &body.password,
    )
    .await
    .map_err(|e| e.into_api())?;

    Ok(Json(json!(response)))
}

/// POST /auth/sign-out — revokes the session behind the presented token.
pub async fn sign_out(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    AuthService::sign_out(state.identity.as_ref(), user.session_id)
        .await
        .map_err(|e| e.into_api())?;
    Ok(Json(json!({ "success": true })))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let me = state
        .store
        .get_user(user.user_id)
        .await
        .map_err(|e| e.into_api())?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "User not found"))?;
    let school = state
        .store
        .get_school(me.school_id)
        .await
        .map_err(|e| e.into_api())?;

    Ok(Json(json!({ "user": me, "school": school })))
}

/// PUT /auth/profile — self-service edit of the caller's own profile.
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(patch): Json<UserPatch>,
) -> Result<Json<Value>, ApiError> {
    let updated = AuthService::update_profile(
        state.store.as_ref(),
        state.identity.as_ref(),
        user.user_id,
        patch,
    )
    .await
    .map_err(|e| e.into_api())?;
    Ok(Json(json!(updated)))
}
