//! Signed-in session state, kept in sync with the store.
//!
//! While an identity is attached, a watcher task follows the user's document
//! on the change feed. Whenever the document's `school_id` differs from the
//! one currently followed, the watcher replaces a second task that follows
//! the school document. Both tasks stop when the identity changes or the
//! context is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::{AccountCreationError, AuthError},
    forms::SignUpForm,
    models::{
        auth::AuthResponse,
        tenant::School,
        user::{User, UserPatch},
    },
    services::auth::{AuthService, ProfileUpdateError, TokenSettings},
    store::{Collection, DocumentChange, IdentityProvider, Store},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub identity: Option<Uuid>,
    pub user: Option<User>,
    pub school: Option<School>,
    /// True until the user document and, if it names one, its school have
    /// been read.
    pub loading: bool,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct ActiveSession {
    user_id: Uuid,
    session_id: Uuid,
    _watcher: AbortOnDrop,
}

pub struct SessionContext {
    store: Arc<dyn Store>,
    identity: Arc<dyn IdentityProvider>,
    tokens: TokenSettings,
    state: Arc<watch::Sender<SessionState>>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn Store>, identity: Arc<dyn IdentityProvider>, tokens: TokenSettings) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            store,
            identity,
            tokens,
            state: Arc::new(state),
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.lock().as_ref().map(|a| a.session_id)
    }

    fn user_id(&self) -> Option<Uuid> {
        self.active.lock().as_ref().map(|a| a.user_id)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        let response = AuthService::sign_in(
            self.store.as_ref(),
            self.identity.as_ref(),
            &self.tokens,
            email,
            password,
        )
        .await?;
        self.attach(response.user.id, response.session_id);
        Ok(response)
    }

    pub async fn sign_up(&self, form: &SignUpForm) -> Result<AuthResponse, AccountCreationError> {
        let response =
            AuthService::sign_up(self.store.as_ref(), self.identity.as_ref(), &self.tokens, form)
                .await?;
        self.attach(response.user.id, response.session_id);
        Ok(response)
    }

    /// Revokes the session at the provider and clears local state. Local
    /// state is cleared even if revocation fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(active) = self.active.lock().take() else {
            return Ok(());
        };
        self.state.send_replace(SessionState::default());
        AuthService::sign_out(self.identity.as_ref(), active.session_id).await
    }

    /// Writes to the caller's own user document. Local state picks the change
    /// up from the change feed.
    pub async fn update_user_profile(&self, patch: UserPatch) -> Result<(), ProfileUpdateError> {
        let user_id = self.user_id().ok_or(ProfileUpdateError::NotSignedIn)?;
        AuthService::update_profile(self.store.as_ref(), self.identity.as_ref(), user_id, patch)
            .await?;
        Ok(())
    }

    /// Follows `user_id` from now on. Re-attaching the same session is a no-op;
    /// anything else tears the previous watchers down first.
    pub fn attach(&self, user_id: Uuid, session_id: Uuid) {
        let mut active = self.active.lock();
        if matches!(&*active, Some(a) if a.user_id == user_id && a.session_id == session_id) {
            return;
        }
        *active = None;

        self.state.send_replace(SessionState {
            identity: Some(user_id),
            user: None,
            school: None,
            loading: true,
        });
        let watcher = tokio::spawn(watch_user(self.store.clone(), self.state.clone(), user_id));
        *active = Some(ActiveSession {
            user_id,
            session_id,
            _watcher: AbortOnDrop(watcher),
        });
    }
}

/// Waits for a write to one document. `false` once the feed has closed.
async fn next_change(
    changes: &mut broadcast::Receiver<DocumentChange>,
    collection: Collection,
    id: Uuid,
) -> bool {
    loop {
        match changes.recv().await {
            Ok(change) if change.is(collection, id) => return true,
            Ok(_) => continue,
            // Missed events; re-read to be safe.
            Err(RecvError::Lagged(_)) => return true,
            Err(RecvError::Closed) => return false,
        }
    }
}

async fn watch_user(store: Arc<dyn Store>, state: Arc<watch::Sender<SessionState>>, user_id: Uuid) {
    // Subscribe before the first read so no write slips between the two.
    let mut changes = store.changes();
    let mut school_stage: Option<(Uuid, AbortOnDrop)> = None;
    let mut resolved = false;

    loop {
        let user = store.get_user(user_id).await.unwrap_or_else(|e| {
            warn!("Session: user lookup for {user_id} failed: {e}");
            None
        });
        let school_id = user.as_ref().map(|u| u.school_id);
        let followed = school_stage.as_ref().map(|(id, _)| *id);
        let school_changed = followed != school_id;
        // Without a school to wait for, the first read settles loading.
        let settle = school_changed || !resolved;

        let current = state.send_if_modified(|s| {
            if s.identity != Some(user_id) {
                return false;
            }
            s.user = user;
            if school_changed {
                s.school = None;
            }
            if settle {
                s.loading = school_id.is_some();
            }
            true
        });
        if !current {
            return;
        }
        resolved = true;

        if school_changed {
            school_stage = None;
            if let Some(sid) = school_id {
                let handle = tokio::spawn(watch_school(store.clone(), state.clone(), sid));
                school_stage = Some((sid, AbortOnDrop(handle)));
            }
        }

        if !next_change(&mut changes, Collection::Users, user_id).await {
            return;
        }
    }
}

async fn watch_school(store: Arc<dyn Store>, state: Arc<watch::Sender<SessionState>>, school_id: Uuid) {
    let mut changes = store.changes();

    loop {
        let school = store.get_school(school_id).await.unwrap_or_else(|e| {
            warn!("Session: school lookup for {school_id} failed: {e}");
            None
        });
        // A stage that has been replaced must not overwrite its successor.
        state.send_if_modified(|s| {
            if s.user.as_ref().map(|u| u.school_id) != Some(school_id) {
                return false;
            }
            s.school = school;
            s.loading = false;
            true
        });

        if !next_change(&mut changes, Collection::Schools, school_id).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::tenant::SchoolPatch;
    use crate::store::memory::{MemoryIdentity, MemoryStore};

    fn context() -> (Arc<MemoryStore>, Arc<MemoryIdentity>, SessionContext) {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MemoryIdentity::new());
        let ctx = SessionContext::new(
            store.clone(),
            identity.clone(),
            TokenSettings { secret: "test".into(), ttl_seconds: 600 },
        );
        (store, identity, ctx)
    }

    fn admin_form() -> SignUpForm {
        SignUpForm {
            email: "a@x.com".into(),
            password: "secret1".into(),
            first_name: "Ada".into(),
            last_name: "Admin".into(),
            school_name: Some("Lincoln High".into()),
            ..Default::default()
        }
    }

    async fn wait_until(
        rx: &mut watch::Receiver<SessionState>,
        pred: impl FnMut(&SessionState) -> bool,
    ) -> SessionState {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
            .await
            .expect("timed out waiting for session state")
            .expect("session state channel closed")
            .clone()
    }

    #[tokio::test]
    async fn sign_up_resolves_user_then_school() {
        let (_, _, ctx) = context();
        let mut rx = ctx.subscribe();
        let resp = ctx.sign_up(&admin_form()).await.unwrap();

        let state = wait_until(&mut rx, |s| !s.loading).await;
        assert_eq!(state.identity, Some(resp.user.id));
        assert_eq!(state.user.as_ref().unwrap().email, "a@x.com");
        assert_eq!(state.school.as_ref().unwrap().name, "Lincoln High");
    }

    #[tokio::test]
    async fn profile_and_school_edits_arrive_through_the_feed() {
        let (store, identity, ctx) = context();
        let mut rx = ctx.subscribe();
        let resp = ctx.sign_up(&admin_form()).await.unwrap();
        wait_until(&mut rx, |s| !s.loading).await;

        ctx.update_user_profile(UserPatch {
            first_name: Some("Augusta".into()),
            ..Default::default()
        })
        .await
        .unwrap();
        let state = wait_until(&mut rx, |s| {
            s.user.as_ref().is_some_and(|u| u.profile.first_name == "Augusta")
        })
        .await;
        assert_eq!(state.school.as_ref().unwrap().id, resp.user.school_id);
        assert_eq!(identity.display_name(resp.user.id).as_deref(), Some("Augusta Admin"));

        store
            .update_school(
                resp.user.school_id,
                &SchoolPatch { name: Some("Lincoln Prep".into()), ..Default::default() },
            )
            .await
            .unwrap();
        wait_until(&mut rx, |s| {
            s.school.as_ref().is_some_and(|sc| sc.name == "Lincoln Prep")
        })
        .await;
    }

    #[tokio::test]
    async fn sign_out_clears_state_and_revokes_the_session() {
        let (_, identity, ctx) = context();
        ctx.sign_up(&admin_form()).await.unwrap();
        let sid = ctx.session_id().unwrap();

        ctx.sign_out().await.unwrap();
        assert_eq!(ctx.snapshot(), SessionState::default());
        assert!(!identity.session_active(sid).await.unwrap());
        assert!(matches!(
            ctx.update_user_profile(UserPatch::default()).await,
            Err(ProfileUpdateError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn unknown_user_finishes_loading_without_a_school() {
        let (_, _, ctx) = context();
        let mut rx = ctx.subscribe();
        ctx.attach(Uuid::new_v4(), Uuid::new_v4());
        let state = wait_until(&mut rx, |s| !s.loading).await;
        assert!(state.user.is_none());
        assert!(state.school.is_none());
    }
}
