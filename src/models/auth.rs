use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{tenant::School, user::{User, UserRole}};

/// Claims embedded in the JWT access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,    // user UUID
    pub school: String, // school UUID
    pub role: UserRole,
    pub sid: String, // auth session UUID (to enable revocation)
    pub exp: usize,
    pub iat: usize,
}

/// Extracted from a validated JWT whose session is still live
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub role: UserRole,
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(skip_serializing)]
    pub session_id: Uuid,
    pub user: User,
    pub school: Option<School>,
}
