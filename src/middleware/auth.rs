use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::models::auth::{AuthenticatedUser, Claims};
use crate::AppState;

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid Authorization header format"))?;

        authenticate_token(state, token).await
    }
}

/// Validates the token signature, then asks the identity provider whether the
/// session behind it is still live.
pub async fn authenticate_token(
    state: &AppState,
    token: &str,
) -> Result<AuthenticatedUser, (StatusCode, &'static str)> {
    let user = decode_access_token(token, &state.config.jwt_secret)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

    let active = state
        .identity
        .session_active(user.session_id)
        .await
        .map_err(|e| {
            tracing::error!("Session lookup failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Session lookup failed")
        })?;
    if !active {
        return Err((StatusCode::UNAUTHORIZED, "Session expired or revoked"));
    }

    Ok(user)
}

pub fn decode_access_token(token: &str, secret: &str) -> Result<AuthenticatedUser, anyhow::Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation)?;
    let claims = data.claims;

    Ok(AuthenticatedUser {
        user_id: claims.sub.parse()?,
        school_id: claims.school.parse()?,
        role: claims.role,
        session_id: claims.sid.parse()?,
    })
}
