pub mod announcements;
pub mod attendance;
pub mod auth;
pub mod classes;
pub mod email_logs;
pub mod functions;
pub mod health;
pub mod members;
pub mod metrics;
pub mod navigation;
pub mod school;
pub mod websocket;

use axum::http::StatusCode;

use crate::error::{api_error, ApiError};
use crate::models::{auth::AuthenticatedUser, user::UserRole};

pub(crate) fn require_admin(user: &AuthenticatedUser) -> Result<(), ApiError> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(api_error(StatusCode::FORBIDDEN, "Access denied"))
    }
}

/// Administrators and teachers run the classroom pages.
pub(crate) fn require_admin_or_teacher(user: &AuthenticatedUser) -> Result<(), ApiError> {
    if user.role.is_admin() || user.role == UserRole::Teacher {
        Ok(())
    } else {
        Err(api_error(StatusCode::FORBIDDEN, "Access denied"))
    }
}
