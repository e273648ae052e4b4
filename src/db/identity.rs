//! Email/password accounts backed by the `auth_accounts` and `auth_sessions`
//! tables.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{AuthError, IdentityProvider, MIN_PASSWORD_LEN};

const BCRYPT_COST: u32 = 12;

#[derive(Clone)]
pub struct PgIdentity {
    pool: PgPool,
}

impl PgIdentity {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PgIdentity {
    async fn create_account(
        &self,
        id: Uuid,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<(), AuthError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let hash = bcrypt::hash(password, BCRYPT_COST)
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        sqlx::query(
            "INSERT INTO auth_accounts (id, email, password_hash, display_name)
             VALUES ($1, LOWER($2), $3, $4)",
        )
        .bind(id)
        .bind(email)
        .bind(hash)
        .bind(display_name)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AuthError::EmailAlreadyInUse,
            _ => AuthError::from(e),
        })?;
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM auth_accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Uuid, AuthError> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, password_hash FROM auth_accounts WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        let (id, hash) = row.ok_or(AuthError::InvalidCredentials)?;
        let valid = bcrypt::verify(password, &hash).map_err(|_| AuthError::InvalidCredentials)?;
        if !valid {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(id)
    }

    async fn update_display_name(&self, id: Uuid, display_name: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE auth_accounts SET display_name = $2 WHERE id = $1")
            .bind(id)
            .bind(display_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn open_session(&self, account_id: Uuid, ttl: Duration) -> Result<Uuid, AuthError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| AuthError::Backend(e.to_string()))?;
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO auth_sessions (id, account_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(account_id)
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("UPDATE auth_sessions SET revoked = TRUE WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn session_active(&self, session_id: Uuid) -> Result<bool, AuthError> {
        let active: Option<bool> = sqlx::query_scalar(
            "SELECT NOT revoked AND expires_at > NOW() FROM auth_sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(active.unwrap_or(false))
    }
}
