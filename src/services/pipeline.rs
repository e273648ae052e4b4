//! Outbound email: welcome mail for provisioned members, announcement fan-out,
//! and the two callable functions (password reset, bulk notification).
//!
//! Every attempt appends exactly one entry to `email_logs`, whatever the
//! outcome.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{PipelineError, StoreError},
    models::{
        announcement::EmailStats,
        auth::AuthenticatedUser,
        email_log::{EmailCategory, EmailLog},
        user::{AuthStatus, User, UserFilter, UserRole},
    },
    services::{
        email::{Mailer, OutgoingEmail},
        metrics::{record_email, PROVISIONING_COUNTER},
        templates::{self, WelcomeContext, WelcomeKind},
    },
    store::{ChangeKind, Collection, DocumentChange, IdentityProvider, Store},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequest {
    pub email: String,
    pub reset_link: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRecipient {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub recipients: Vec<BulkRecipient>,
    pub subject: String,
    pub content: String,
    pub school_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total_sent: usize,
    pub successful: usize,
    pub failed: usize,
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    identity: Arc<dyn IdentityProvider>,
    mailer: Option<Arc<dyn Mailer>>,
    login_url: String,
    /// Users a provisioning run is currently working on.
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Holds a user id in `in_flight` until dropped.
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    user_id: Uuid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.user_id);
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        mailer: Option<Arc<dyn Mailer>>,
        login_url: String,
    ) -> Self {
        Self {
            store,
            identity,
            mailer,
            login_url,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, user_id: Uuid) -> Option<Claim<'_>> {
        self.in_flight.lock().insert(user_id).then(|| Claim {
            in_flight: &self.in_flight,
            user_id,
        })
    }

    /// Provisions the login of a member created from the admin panel and
    /// sends the welcome email. Anything not `pending` is left alone.
    pub async fn on_user_created(&self, user_id: Uuid) -> anyhow::Result<()> {
        // The feed and a sweep can both hand us the same user.
        let Some(_claim) = self.claim(user_id) else {
            return Ok(());
        };
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(());
        };
        if user.auth_status != Some(AuthStatus::Pending) {
            return Ok(());
        }

        let temp_password = match self.provision(&user).await {
            Ok(pw) => pw,
            Err(e) => {
                error!("Provisioning failed for {}: {e}", user.email);
                PROVISIONING_COUNTER.with_label_values(&["failure"]).inc();
                self.store.fail_provisioning(user.id, &e.to_string()).await?;
                return Ok(());
            }
        };
        PROVISIONING_COUNTER.with_label_values(&["success"]).inc();
        info!("Provisioned login for {} ({})", user.email, user.role);

        self.send_welcome(&user, &temp_password).await;
        Ok(())
    }

    /// Provisions every user still `pending`. Covers users written while no
    /// runner was listening or whose events were dropped from the feed.
    pub async fn provision_pending(&self) -> anyhow::Result<usize> {
        let pending = self.store.list_pending_users().await?;
        if !pending.is_empty() {
            info!("Provisioning {} pending user(s)", pending.len());
        }
        for user in &pending {
            if let Err(e) = self.on_user_created(user.id).await {
                error!("User trigger failed for {}: {e}", user.id);
            }
        }
        Ok(pending.len())
    }

    /// Creates the login from the one-time credential, then clears it.
    async fn provision(&self, user: &User) -> anyhow::Result<String> {
        let temp_password = user
            .temp_password
            .clone()
            .ok_or_else(|| anyhow!("No temporary password on pending user"))?;
        self.identity
            .create_account(user.id, &user.email, &temp_password, &user.display_name())
            .await?;
        self.store.complete_provisioning(user.id).await?;
        Ok(temp_password)
    }

    async fn send_welcome(&self, user: &User, temp_password: &str) {
        let mut log = EmailLog::new(EmailCategory::Welcome, &user.email);
        log.school_id = Some(user.school_id);
        log.user_id = Some(user.id);
        log.role = Some(user.role);

        let school = match self.store.get_school(user.school_id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                self.log_failure(log, "School not found").await;
                return;
            }
            Err(e) => {
                self.log_failure(log, &e.to_string()).await;
                return;
            }
        };

        let parent_emails: Vec<String> = match user.role {
            UserRole::Student => self.related(&user.parent_ids).await.into_iter().map(|p| p.email).collect(),
            _ => vec![],
        };
        let children_names: Vec<String> = match user.role {
            UserRole::Parent => self
                .related(&user.children_ids)
                .await
                .iter()
                .map(User::display_name)
                .collect(),
            _ => vec![],
        };

        let template = templates::welcome(
            WelcomeKind::for_role(user.role),
            &WelcomeContext {
                user,
                school: &school,
                temp_password: Some(temp_password),
                parent_emails: &parent_emails,
                children_names: &children_names,
                login_url: &self.login_url,
            },
        );
        let _ = self.deliver(log, OutgoingEmail::new(&user.email, template)).await;
    }

    async fn related(&self, ids: &[Uuid]) -> Vec<User> {
        if ids.is_empty() {
            return vec![];
        }
        self.store.get_users(ids).await.unwrap_or_else(|e| {
            warn!("Could not resolve linked users: {e}");
            vec![]
        })
    }

    /// Sends the announcement to every active member it addresses and
    /// records the tally on the announcement.
    pub async fn on_announcement_created(&self, announcement_id: Uuid) -> anyhow::Result<Option<EmailStats>> {
        let Some(announcement) = self.store.get_announcement(announcement_id).await? else {
            return Ok(None);
        };
        let school = self
            .store
            .get_school(announcement.school_id)
            .await?
            .ok_or_else(|| anyhow!("School {} not found", announcement.school_id))?;
        let recipients = self
            .store
            .list_users(announcement.school_id, &UserFilter::roles(&announcement.target_audience))
            .await?;

        let sends = recipients.iter().map(|member| {
            let mut log = EmailLog::new(EmailCategory::Announcement, &member.email);
            log.school_id = Some(announcement.school_id);
            log.user_id = Some(member.id);
            log.role = Some(member.role);
            log.announcement_id = Some(announcement.id);
            log.sent_by = Some(announcement.author_id);
            let template = templates::announcement(&announcement, &school, &member.display_name());
            self.deliver(log, OutgoingEmail::new(&member.email, template))
        });
        let results = join_all(sends).await;

        let successful = results.iter().filter(|r| r.is_ok()).count();
        let stats = EmailStats {
            total_sent: results.len(),
            successful,
            failed: results.len() - successful,
            sent_at: Utc::now(),
        };
        self.store.record_email_stats(announcement.id, &stats).await?;
        info!(
            "Announcement {} sent: {}/{} delivered",
            announcement.id, stats.successful, stats.total_sent
        );
        Ok(Some(stats))
    }

    /// Returns whether the relay accepted the email. A rejected send is
    /// logged, not raised.
    pub async fn password_reset_email(
        &self,
        caller: &AuthenticatedUser,
        request: &PasswordResetRequest,
    ) -> Result<bool, PipelineError> {
        let email = request.email.trim();
        if email.is_empty() || request.reset_link.trim().is_empty() {
            return Err(PipelineError::InvalidArgument(
                "Email and reset link are required".into(),
            ));
        }
        if self.mailer.is_none() {
            return Err(PipelineError::MailerUnavailable);
        }
        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or(StoreError::NotFound("User"))?;

        let mut log = EmailLog::new(EmailCategory::PasswordReset, &user.email);
        log.school_id = Some(user.school_id);
        log.user_id = Some(user.id);
        log.role = Some(user.role);
        log.sent_by = Some(caller.user_id);

        let template = templates::password_reset(&user, request.reset_link.trim());
        let sent = self
            .deliver(log, OutgoingEmail::new(&user.email, template))
            .await
            .is_ok();
        Ok(sent)
    }

    /// Administrators only, and only for their own school. A rejected call
    /// sends nothing.
    pub async fn bulk_notification(
        &self,
        caller: &AuthenticatedUser,
        request: &BulkRequest,
    ) -> Result<BulkSummary, PipelineError> {
        if !caller.role.is_admin() || request.school_id != caller.school_id {
            return Err(PipelineError::PermissionDenied);
        }
        if request.recipients.is_empty() {
            return Err(PipelineError::InvalidArgument("At least one recipient is required".into()));
        }
        if request.subject.trim().is_empty() || request.content.trim().is_empty() {
            return Err(PipelineError::InvalidArgument("Subject and content are required".into()));
        }
        if self.mailer.is_none() {
            return Err(PipelineError::MailerUnavailable);
        }
        let school = self
            .store
            .get_school(request.school_id)
            .await?
            .ok_or(StoreError::NotFound("School"))?;

        let sends = request.recipients.iter().map(|r| {
            let mut log = EmailLog::new(EmailCategory::BulkNotification, &r.email);
            log.school_id = Some(school.id);
            log.user_id = r.user_id;
            log.sent_by = Some(caller.user_id);
            let name = r.name.as_deref().unwrap_or(&r.email);
            let template = templates::bulk_notification(&school, &request.subject, &request.content, name);
            self.deliver(log, OutgoingEmail::new(&r.email, template))
        });
        let results = join_all(sends).await;

        let successful = results.iter().filter(|r| r.is_ok()).count();
        Ok(BulkSummary {
            total_sent: results.len(),
            successful,
            failed: results.len() - successful,
        })
    }

    /// Sends one email and appends its log entry. Returns the provider message
    /// id, or the failure message.
    async fn deliver(&self, mut log: EmailLog, email: OutgoingEmail) -> Result<String, String> {
        log.subject = Some(email.subject.clone());
        let to = email.to.clone();
        let result = match &self.mailer {
            Some(mailer) => mailer.send(email).await.map_err(|e| e.to_string()),
            None => Err("Email transport is not configured".to_string()),
        };
        match &result {
            Ok(message_id) => {
                log.success = true;
                log.message_id = Some(message_id.clone());
            }
            Err(e) => {
                warn!("{} email to {to} failed: {e}", log.category.as_str());
                log.error = Some(e.clone());
            }
        }
        log.sent_at = Utc::now();
        self.append_log(&log).await;
        result
    }

    async fn log_failure(&self, mut log: EmailLog, message: &str) {
        warn!("{} email to {} not sent: {message}", log.category.as_str(), log.email);
        log.error = Some(message.to_string());
        self.append_log(&log).await;
    }

    async fn append_log(&self, log: &EmailLog) {
        record_email(log.category.as_str(), log.success);
        if let Err(e) = self.store.append_email_log(log).await {
            error!("Failed to write email log for {}: {e}", log.email);
        }
    }
}

/// Runs the pipeline for every user and announcement created from now on.
/// Each event gets its own task.
pub fn start(pipeline: Arc<Pipeline>) -> JoinHandle<()> {
    // Subscribe here so events committed right after start are not missed.
    let mut changes = pipeline.store.changes();
    tokio::spawn(async move {
        sweep(pipeline.clone());
        loop {
            let change = match changes.recv().await {
                Ok(c) => c,
                Err(RecvError::Lagged(n)) => {
                    warn!("Email triggers missed {n} store events, re-checking pending users");
                    sweep(pipeline.clone());
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let DocumentChange { collection, id, kind: ChangeKind::Created } = change else {
                continue;
            };
            let pipeline = pipeline.clone();
            match collection {
                Collection::Users => {
                    tokio::spawn(async move {
                        if let Err(e) = pipeline.on_user_created(id).await {
                            error!("User trigger failed for {id}: {e}");
                        }
                    });
                }
                Collection::Announcements => {
                    tokio::spawn(async move {
                        if let Err(e) = pipeline.on_announcement_created(id).await {
                            error!("Announcement trigger failed for {id}: {e}");
                        }
                    });
                }
                _ => {}
            }
        }
        info!("Email triggers stopped");
    })
}

fn sweep(pipeline: Arc<Pipeline>) {
    tokio::spawn(async move {
        if let Err(e) = pipeline.provision_pending().await {
            error!("Pending user sweep failed: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::UserForm;
    use crate::models::announcement::{Announcement, AnnouncementStatus, Priority};
    use crate::models::tenant::{School, SchoolSettings, SubscriptionTier};
    use crate::services::email::RecordingMailer;
    use crate::store::memory::{MemoryIdentity, MemoryStore};
    use crate::store::CHANGE_FEED_CAPACITY;

    struct Fixture {
        store: Arc<MemoryStore>,
        identity: Arc<MemoryIdentity>,
        mailer: Arc<RecordingMailer>,
        pipeline: Pipeline,
        school: School,
        admin: User,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MemoryIdentity::new());
        let mailer = Arc::new(RecordingMailer::new());
        let now = Utc::now();
        let id = Uuid::new_v4();
        let school = School {
            id,
            name: "Lincoln High".into(),
            admin_id: id,
            email: "admin@lincoln.edu".into(),
            phone: None,
            address: None,
            settings: SchoolSettings::default(),
            subscription: SubscriptionTier::Free,
            created_at: now,
            updated_at: now,
        };
        let mut admin = member(id, UserRole::SchoolAdmin, "admin@lincoln.edu", id);
        admin.auth_status = None;
        admin.temp_password = None;
        store.register(&admin, Some(&school)).await.unwrap();

        let pipeline = Pipeline::new(
            store.clone(),
            identity.clone(),
            Some(mailer.clone()),
            "http://localhost:3000/auth/login".into(),
        );
        Fixture { store, identity, mailer, pipeline, school, admin }
    }

    fn member(id: Uuid, role: UserRole, email: &str, school_id: Uuid) -> User {
        UserForm {
            email: email.into(),
            first_name: "Test".into(),
            last_name: role.label().into(),
            ..Default::default()
        }
        .into_user(id, school_id, role, "Temp#Pass9".into(), Utc::now())
    }

    fn caller(user: &User) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: user.id,
            school_id: user.school_id,
            role: user.role,
            session_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn pending_teacher_is_provisioned_and_welcomed_once() {
        let f = fixture().await;
        let teacher = member(Uuid::new_v4(), UserRole::Teacher, "t@lincoln.edu", f.school.id);
        f.store.insert_user(&teacher).await.unwrap();

        f.pipeline.on_user_created(teacher.id).await.unwrap();

        let stored = f.store.get_user(teacher.id).await.unwrap().unwrap();
        assert_eq!(stored.auth_status, Some(AuthStatus::Complete));
        assert!(stored.temp_password.is_none());
        assert_eq!(
            f.identity.authenticate("t@lincoln.edu", "Temp#Pass9").await.unwrap(),
            teacher.id
        );
        let sent = f.mailer.sent_to("t@lincoln.edu");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("Teacher Portal"));
        assert!(sent[0].text.contains("Temp#Pass9"));
        assert_eq!(f.store.email_log_count(), 1);
    }

    #[tokio::test]
    async fn provisioning_failure_marks_the_user_and_drops_the_credential() {
        let f = fixture().await;
        f.identity
            .create_account(Uuid::new_v4(), "taken@lincoln.edu", "whatever1", "Someone")
            .await
            .unwrap();
        let student = member(Uuid::new_v4(), UserRole::Student, "taken@lincoln.edu", f.school.id);
        f.store.insert_user(&student).await.unwrap();

        f.pipeline.on_user_created(student.id).await.unwrap();

        let stored = f.store.get_user(student.id).await.unwrap().unwrap();
        assert_eq!(stored.auth_status, Some(AuthStatus::Error));
        assert!(stored.temp_password.is_none());
        assert!(stored.error_log.is_some());
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn users_that_are_not_pending_are_ignored() {
        let f = fixture().await;
        f.pipeline.on_user_created(f.admin.id).await.unwrap();
        f.pipeline.on_user_created(Uuid::new_v4()).await.unwrap();
        assert!(f.mailer.sent().is_empty());
        assert_eq!(f.identity.account_count(), 0);
    }

    #[tokio::test]
    async fn student_welcome_lists_parent_emails() {
        let f = fixture().await;
        let mut parent = member(Uuid::new_v4(), UserRole::Parent, "mom@home.com", f.school.id);
        parent.auth_status = None;
        parent.temp_password = None;
        f.store.insert_user(&parent).await.unwrap();
        let mut student = member(Uuid::new_v4(), UserRole::Student, "kid@lincoln.edu", f.school.id);
        student.parent_ids = vec![parent.id];
        f.store.insert_user(&student).await.unwrap();

        f.pipeline.on_user_created(student.id).await.unwrap();

        let sent = f.mailer.sent_to("kid@lincoln.edu");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("mom@home.com"));
    }

    async fn seed_active(f: &Fixture, role: UserRole, email: &str) -> User {
        let mut u = member(Uuid::new_v4(), role, email, f.school.id);
        u.auth_status = Some(AuthStatus::Complete);
        u.temp_password = None;
        f.store.insert_user(&u).await.unwrap();
        u
    }

    fn announcement(f: &Fixture, audience: Vec<UserRole>) -> Announcement {
        let now = Utc::now();
        Announcement {
            id: Uuid::new_v4(),
            school_id: f.school.id,
            author_id: f.admin.id,
            title: "Snow day".into(),
            content: "School is closed.".into(),
            target_audience: audience,
            priority: Priority::High,
            status: AnnouncementStatus::Published,
            publish_date: now,
            created_at: now,
            updated_at: now,
            email_stats: None,
        }
    }

    #[tokio::test]
    async fn announcement_reaches_only_its_audience() {
        let f = fixture().await;
        seed_active(&f, UserRole::Teacher, "t1@lincoln.edu").await;
        seed_active(&f, UserRole::Teacher, "t2@lincoln.edu").await;
        seed_active(&f, UserRole::Student, "s1@lincoln.edu").await;
        f.mailer.reject("t2@lincoln.edu");

        let a = announcement(&f, vec![UserRole::Teacher]);
        f.store.insert_announcement(&a).await.unwrap();
        let stats = f.pipeline.on_announcement_created(a.id).await.unwrap().unwrap();

        assert_eq!(stats.total_sent, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert!(f.mailer.sent_to("s1@lincoln.edu").is_empty());
        let stored = f.store.get_announcement(a.id).await.unwrap().unwrap();
        assert_eq!(stored.email_stats.unwrap().total_sent, 2);
        assert_eq!(f.store.email_log_count(), 2);
    }

    #[tokio::test]
    async fn empty_audience_means_every_active_member() {
        let f = fixture().await;
        seed_active(&f, UserRole::Teacher, "t1@lincoln.edu").await;
        seed_active(&f, UserRole::Parent, "p1@home.com").await;
        let gone = seed_active(&f, UserRole::Student, "gone@lincoln.edu").await;
        f.store.update_user(gone.id, &crate::models::user::UserPatch::deactivate()).await.unwrap();

        let a = announcement(&f, vec![]);
        f.store.insert_announcement(&a).await.unwrap();
        let stats = f.pipeline.on_announcement_created(a.id).await.unwrap().unwrap();

        // Admin, teacher and parent.
        assert_eq!(stats.total_sent, 3);
        assert!(f.mailer.sent_to("gone@lincoln.edu").is_empty());
    }

    fn bulk(school_id: Uuid) -> BulkRequest {
        BulkRequest {
            recipients: vec![
                BulkRecipient { email: "a@home.com".into(), name: Some("A".into()), user_id: None },
                BulkRecipient { email: "b@home.com".into(), name: None, user_id: None },
            ],
            subject: "Fees due".into(),
            content: "Please pay.".into(),
            school_id,
        }
    }

    #[tokio::test]
    async fn bulk_notification_is_admin_only() {
        let f = fixture().await;
        let teacher = seed_active(&f, UserRole::Teacher, "t@lincoln.edu").await;

        let err = f.pipeline.bulk_notification(&caller(&teacher), &bulk(f.school.id)).await.unwrap_err();
        assert!(matches!(err, PipelineError::PermissionDenied));
        assert!(f.mailer.sent().is_empty());
        assert_eq!(f.store.email_log_count(), 0);

        let summary = f.pipeline.bulk_notification(&caller(&f.admin), &bulk(f.school.id)).await.unwrap();
        assert_eq!(summary, BulkSummary { total_sent: 2, successful: 2, failed: 0 });
    }

    #[tokio::test]
    async fn bulk_notification_cannot_target_another_school() {
        let f = fixture().await;
        let err = f
            .pipeline
            .bulk_notification(&caller(&f.admin), &bulk(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PermissionDenied));
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn password_reset_needs_a_known_user() {
        let f = fixture().await;
        let request = PasswordResetRequest {
            email: "nobody@lincoln.edu".into(),
            reset_link: "https://x/reset".into(),
        };
        let err = f.pipeline.password_reset_email(&caller(&f.admin), &request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(StoreError::NotFound(_))));

        let request = PasswordResetRequest { email: "ADMIN@lincoln.edu".into(), ..request };
        assert!(f.pipeline.password_reset_email(&caller(&f.admin), &request).await.unwrap());
        assert_eq!(f.mailer.sent_to("admin@lincoln.edu").len(), 1);
    }

    #[tokio::test]
    async fn rejected_password_reset_reports_failure_and_is_logged() {
        let f = fixture().await;
        f.mailer.reject("admin@lincoln.edu");
        let request = PasswordResetRequest {
            email: "admin@lincoln.edu".into(),
            reset_link: "https://x/reset".into(),
        };

        let sent = f.pipeline.password_reset_email(&caller(&f.admin), &request).await.unwrap();

        assert!(!sent);
        assert_eq!(f.store.email_log_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_triggers_provision_once() {
        let f = fixture().await;
        let teacher = member(Uuid::new_v4(), UserRole::Teacher, "t@lincoln.edu", f.school.id);
        f.store.insert_user(&teacher).await.unwrap();

        let (a, b) = tokio::join!(
            f.pipeline.on_user_created(teacher.id),
            f.pipeline.on_user_created(teacher.id)
        );
        a.unwrap();
        b.unwrap();

        let stored = f.store.get_user(teacher.id).await.unwrap().unwrap();
        assert_eq!(stored.auth_status, Some(AuthStatus::Complete));
        assert_eq!(f.mailer.sent_to("t@lincoln.edu").len(), 1);
    }

    async fn wait_for_status(store: &MemoryStore, id: Uuid, status: AuthStatus) -> bool {
        for _ in 0..100 {
            let u = store.get_user(id).await.unwrap().unwrap();
            if u.auth_status == Some(status) {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn trigger_runner_reacts_to_created_users() {
        let f = fixture().await;
        let pipeline = Arc::new(f.pipeline);
        let runner = start(pipeline.clone());
        let teacher = member(Uuid::new_v4(), UserRole::Teacher, "t@lincoln.edu", f.school.id);
        f.store.insert_user(&teacher).await.unwrap();

        let mut done = false;
        for _ in 0..100 {
            let u = f.store.get_user(teacher.id).await.unwrap().unwrap();
            if u.auth_status == Some(AuthStatus::Complete) && !f.mailer.sent().is_empty() {
                done = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        runner.abort();
        assert!(done, "trigger never provisioned the user");
    }

    #[tokio::test]
    async fn runner_provisions_users_written_before_it_started() {
        let f = fixture().await;
        let teacher = member(Uuid::new_v4(), UserRole::Teacher, "t@lincoln.edu", f.school.id);
        f.store.insert_user(&teacher).await.unwrap();

        let runner = start(Arc::new(f.pipeline));
        let provisioned = wait_for_status(&f.store, teacher.id, AuthStatus::Complete).await;
        runner.abort();

        assert!(provisioned, "pending user left behind on start-up");
        let stored = f.store.get_user(teacher.id).await.unwrap().unwrap();
        assert!(stored.temp_password.is_none());
    }

    #[tokio::test]
    async fn runner_recovers_users_whose_events_were_dropped() {
        let f = fixture().await;
        let runner = start(Arc::new(f.pipeline));
        // Let the start-up sweep finish first.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let teacher = member(Uuid::new_v4(), UserRole::Teacher, "t@lincoln.edu", f.school.id);
        f.store.insert_user(&teacher).await.unwrap();
        // Overflow the feed before the runner gets to poll it.
        for i in 0..(CHANGE_FEED_CAPACITY + 100) {
            let log = EmailLog::new(EmailCategory::BulkNotification, &format!("p{i}@x.com"));
            f.store.append_email_log(&log).await.unwrap();
        }

        let provisioned = wait_for_status(&f.store, teacher.id, AuthStatus::Complete).await;
        runner.abort();
        assert!(provisioned, "pending user lost when the feed lagged");
    }
}
