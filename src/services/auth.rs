use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AccountCreationError, AuthError, ValidationError},
    forms::{validate_user_patch, SignUpForm},
    models::{
        auth::{AuthResponse, Claims},
        tenant::{School, SchoolSettings, SubscriptionTier},
        user::{User, UserPatch, UserRole},
    },
    services::metrics::{SIGN_INS_COUNTER, SIGN_UPS_COUNTER},
    store::{IdentityProvider, Store},
};

/// Characters used for one-time passwords; look-alikes (0/O, 1/l/I) left out.
const TEMP_PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHJKMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789!@#$%&*";
const TEMP_PASSWORD_LEN: usize = 8;

/// Signing key and lifetime for access tokens.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub secret: String,
    pub ttl_seconds: u64,
}

impl TokenSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            ttl_seconds: config.jwt_expiry_seconds,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

pub fn generate_temp_password() -> String {
    let mut rng = rand::thread_rng();
    (0..TEMP_PASSWORD_LEN)
        .map(|_| TEMP_PASSWORD_CHARSET[rng.gen_range(0..TEMP_PASSWORD_CHARSET.len())] as char)
        .collect()
}

pub struct AuthService;

impl AuthService {
    pub async fn sign_in(
        store: &dyn Store,
        identity: &dyn IdentityProvider,
        tokens: &TokenSettings,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AuthError> {
        let result = Self::try_sign_in(store, identity, tokens, email, password).await;
        let status = if result.is_ok() { "success" } else { "failure" };
        SIGN_INS_COUNTER.with_label_values(&[status]).inc();
        result
    }

    async fn try_sign_in(
        store: &dyn Store,
        identity: &dyn IdentityProvider,
        tokens: &TokenSettings,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AuthError> {
        let account_id = identity.authenticate(email.trim(), password).await?;
        let user = store
            .get_user(account_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }
        Self::open_session(store, identity, tokens, user).await
    }

    /// Creates the login, then the user document and, for a school admin,
    /// the school it owns. Store writes are all-or-nothing; if they fail the
    /// login is removed again.
    pub async fn sign_up(
        store: &dyn Store,
        identity: &dyn IdentityProvider,
        tokens: &TokenSettings,
        form: &SignUpForm,
    ) -> Result<AuthResponse, AccountCreationError> {
        let result = Self::try_sign_up(store, identity, tokens, form).await;
        let status = if result.is_ok() { "success" } else { "failure" };
        SIGN_UPS_COUNTER.with_label_values(&[status]).inc();
        result
    }

    async fn try_sign_up(
        store: &dyn Store,
        identity: &dyn IdentityProvider,
        tokens: &TokenSettings,
        form: &SignUpForm,
    ) -> Result<AuthResponse, AccountCreationError> {
        form.validate()?;
        let role = form.role();
        let email = form.email();

        if let Some(school_id) = form.school_id.filter(|_| role != UserRole::SchoolAdmin) {
            if store.get_school(school_id).await?.is_none() {
                return Err(ValidationError::new("school_id", "School not found").into());
            }
        }

        let id = Uuid::new_v4();
        identity
            .create_account(id, &email, &form.password, &form.display_name())
            .await?;

        let now = Utc::now();
        let school = (role == UserRole::SchoolAdmin).then(|| School {
            id,
            name: form.school_name.as_deref().unwrap_or_default().trim().to_string(),
            admin_id: id,
            email: email.clone(),
            phone: form.phone.clone().filter(|p| !p.trim().is_empty()),
            address: None,
            settings: SchoolSettings::default(),
            subscription: SubscriptionTier::Free,
            created_at: now,
            updated_at: now,
        });
        let user = User {
            id,
            email,
            role,
            school_id: school.as_ref().map(|s| s.id).or(form.school_id).unwrap_or(id),
            profile: form.profile(),
            parent_ids: vec![],
            children_ids: vec![],
            employee_id: None,
            admission_number: None,
            is_active: true,
            auth_status: None,
            temp_password: None,
            error_log: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = store.register(&user, school.as_ref()).await {
            warn!("Sign-up for {} failed, removing login: {e}", user.email);
            if let Err(cleanup) = identity.delete_account(id).await {
                warn!("Could not remove orphaned login {id}: {cleanup}");
            }
            return Err(e.into());
        }
        info!("Registered {} as {}", user.email, user.role);

        Ok(Self::open_session(store, identity, tokens, user).await?)
    }

    pub async fn sign_out(identity: &dyn IdentityProvider, session_id: Uuid) -> Result<(), AuthError> {
        identity.revoke_session(session_id).await
    }

    /// Applies a self-service edit to the caller's own user document.
    /// Administrative fields are ignored.
    pub async fn update_profile(
        store: &dyn Store,
        identity: &dyn IdentityProvider,
        user_id: Uuid,
        patch: UserPatch,
    ) -> Result<User, ProfileUpdateError> {
        let patch = self_service(patch);
        validate_user_patch(&patch)?;
        let user = store.update_user(user_id, &patch).await?;
        if patch.first_name.is_some() || patch.last_name.is_some() {
            if let Err(e) = identity.update_display_name(user_id, &user.display_name()).await {
                warn!("Display name sync failed for {user_id}: {e}");
            }
        }
        Ok(user)
    }

    async fn open_session(
        store: &dyn Store,
        identity: &dyn IdentityProvider,
        tokens: &TokenSettings,
        user: User,
    ) -> Result<AuthResponse, AuthError> {
        let session_id = identity.open_session(user.id, tokens.ttl()).await?;
        let access_token = Self::issue_access_token(&user, session_id, tokens)
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        let school = store.get_school(user.school_id).await?;
        Ok(AuthResponse {
            access_token,
            session_id,
            user,
            school,
        })
    }

    pub fn issue_access_token(
        user: &User,
        session_id: Uuid,
        tokens: &TokenSettings,
    ) -> anyhow::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user.id.to_string(),
            school: user.school_id.to_string(),
            role: user.role,
            sid: session_id.to_string(),
            iat: now,
            exp: now + tokens.ttl_seconds as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(tokens.secret.as_bytes()),
        )?;
        Ok(token)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileUpdateError {
    #[error("Not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] crate::error::StoreError),
}

impl ProfileUpdateError {
    pub fn into_api(self) -> crate::error::ApiError {
        match self {
            ProfileUpdateError::NotSignedIn => crate::error::api_error(
                axum::http::StatusCode::UNAUTHORIZED,
                "Not signed in",
            ),
            ProfileUpdateError::Validation(e) => e.into_api(),
            ProfileUpdateError::Store(e) => e.into_api(),
        }
    }
}

fn self_service(patch: UserPatch) -> UserPatch {
    UserPatch {
        email: None,
        class_id: None,
        employee_id: None,
        admission_number: None,
        parent_ids: None,
        children_ids: None,
        is_active: None,
        ..patch
    }
}
