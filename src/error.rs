use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Error shape returned by every route handler.
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Unexpected(String),
}

impl StoreError {
    pub fn into_api(self) -> ApiError {
        match &self {
            StoreError::NotFound(_) => api_error(StatusCode::NOT_FOUND, &self),
            StoreError::Conflict(_) => api_error(StatusCode::CONFLICT, &self),
            StoreError::Database(e) => {
                tracing::error!("Store failure: {e}");
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
            StoreError::Unexpected(msg) => {
                tracing::error!("Store failure: {msg}");
                api_error(StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by the identity provider. Messages are shown to the
/// user as-is.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("This account has been deactivated")]
    AccountDisabled,
    #[error("The email address is already in use by another account")]
    EmailAlreadyInUse,
    #[error("Password should be at least 6 characters")]
    WeakPassword,
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Session expired or revoked")]
    SessionRevoked,
    #[error("Authentication backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Backend(e.to_string())
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Backend(e.to_string())
    }
}

impl AuthError {
    pub fn into_api(self) -> ApiError {
        let status = match self {
            AuthError::InvalidCredentials
            | AuthError::NotSignedIn
            | AuthError::SessionRevoked => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled => StatusCode::FORBIDDEN,
            AuthError::EmailAlreadyInUse => StatusCode::CONFLICT,
            AuthError::WeakPassword => StatusCode::BAD_REQUEST,
            AuthError::Backend(ref msg) => {
                tracing::error!("Identity provider failure: {msg}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        api_error(status, self)
    }
}

/// Form input rejected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn into_api(self) -> ApiError {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.message, "field": self.field })),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccountCreationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Failed to create account: {0}")]
    Store(#[from] StoreError),
}

impl AccountCreationError {
    pub fn into_api(self) -> ApiError {
        match self {
            AccountCreationError::Validation(e) => e.into_api(),
            AccountCreationError::Auth(e) => e.into_api(),
            AccountCreationError::Store(StoreError::Conflict(msg)) => {
                api_error(StatusCode::CONFLICT, format!("Failed to create account: {msg}"))
            }
            AccountCreationError::Store(e) => {
                tracing::error!("Account creation failed: {e}");
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create account")
            }
        }
    }
}

/// Errors raised by the callable email functions.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Only administrators can send bulk notifications")]
    PermissionDenied,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Email transport is not configured")]
    MailerUnavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn into_api(self) -> ApiError {
        let status = match self {
            PipelineError::PermissionDenied => StatusCode::FORBIDDEN,
            PipelineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            PipelineError::MailerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Store(e) => return e.into_api(),
        };
        api_error(status, self)
    }
}
