//! Persistence and identity ports.
//!
//! Everything durable goes through [`Store`]; account credentials and sessions
//! go through [`IdentityProvider`]. The Postgres adapters live in `crate::db`,
//! the in-memory ones in [`memory`].

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

pub use crate::error::{AuthError, StoreError, StoreResult};
use crate::models::{
    announcement::{Announcement, AnnouncementPatch, EmailStats},
    attendance::AttendanceRecord,
    class::{Class, ClassPatch},
    email_log::EmailLog,
    tenant::{School, SchoolPatch},
    user::{User, UserFilter, UserPatch},
};

/// Capacity of the change feed; slow subscribers see `Lagged` and re-read.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Schools,
    Classes,
    Attendance,
    Announcements,
    EmailLogs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

/// One committed write, published after the write is durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentChange {
    pub collection: Collection,
    pub id: Uuid,
    pub kind: ChangeKind,
}

impl DocumentChange {
    pub fn new(collection: Collection, id: Uuid, kind: ChangeKind) -> Self {
        Self { collection, id, kind }
    }

    pub fn is(&self, collection: Collection, id: Uuid) -> bool {
        self.collection == collection && self.id == id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Subscribe to committed writes.
    fn changes(&self) -> broadcast::Receiver<DocumentChange>;

    async fn ping(&self) -> StoreResult<()>;

    // ── Users ────────────────────────────────────────────────────────────────
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn get_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Newest first.
    async fn list_users(&self, school_id: Uuid, filter: &UserFilter) -> StoreResult<Vec<User>>;
    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> StoreResult<User>;
    /// Clears the temporary credential and marks the login as provisioned,
    /// in one write.
    async fn complete_provisioning(&self, id: Uuid) -> StoreResult<()>;
    /// Marks provisioning as failed, keeps the message, drops the credential.
    async fn fail_provisioning(&self, id: Uuid, error: &str) -> StoreResult<()>;
    /// Users of every school whose login is still `pending`, oldest first.
    async fn list_pending_users(&self) -> StoreResult<Vec<User>>;

    /// Writes the new user and, if given, the school it owns, atomically.
    async fn register(&self, user: &User, school: Option<&School>) -> StoreResult<()>;

    // ── Schools ──────────────────────────────────────────────────────────────
    async fn get_school(&self, id: Uuid) -> StoreResult<Option<School>>;
    async fn update_school(&self, id: Uuid, patch: &SchoolPatch) -> StoreResult<School>;

    // ── Classes ──────────────────────────────────────────────────────────────
    async fn insert_class(&self, class: &Class) -> StoreResult<()>;
    async fn get_class(&self, id: Uuid) -> StoreResult<Option<Class>>;
    async fn list_classes(&self, school_id: Uuid, include_inactive: bool) -> StoreResult<Vec<Class>>;
    async fn update_class(&self, id: Uuid, patch: &ClassPatch) -> StoreResult<Class>;

    // ── Attendance ───────────────────────────────────────────────────────────
    async fn list_attendance(&self, class_id: Uuid, date: NaiveDate) -> StoreResult<Vec<AttendanceRecord>>;
    /// Keyed by (class_id, student_id, date). An existing row keeps its id
    /// and `created_at`.
    async fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<UpsertOutcome>;

    // ── Announcements ────────────────────────────────────────────────────────
    async fn insert_announcement(&self, announcement: &Announcement) -> StoreResult<()>;
    async fn get_announcement(&self, id: Uuid) -> StoreResult<Option<Announcement>>;
    /// Newest first.
    async fn list_announcements(&self, school_id: Uuid) -> StoreResult<Vec<Announcement>>;
    async fn update_announcement(&self, id: Uuid, patch: &AnnouncementPatch) -> StoreResult<Announcement>;
    async fn record_email_stats(&self, id: Uuid, stats: &EmailStats) -> StoreResult<()>;
    async fn delete_announcement(&self, id: Uuid) -> StoreResult<()>;

    // ── Email logs ───────────────────────────────────────────────────────────
    async fn append_email_log(&self, log: &EmailLog) -> StoreResult<()>;
    /// Newest first.
    async fn list_email_logs(&self, school_id: Uuid, limit: usize) -> StoreResult<Vec<EmailLog>>;
    /// Deletes at most `limit` entries sent before `cutoff`, oldest first.
    async fn delete_email_logs_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<usize>;
}

/// Email/password accounts and their sessions.
///
/// Account ids are chosen by the caller so that an account and its user
/// document share one id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(
        &self,
        id: Uuid,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<(), AuthError>;
    async fn delete_account(&self, id: Uuid) -> Result<(), AuthError>;
    /// Returns the account id when the credentials match.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Uuid, AuthError>;
    async fn update_display_name(&self, id: Uuid, display_name: &str) -> Result<(), AuthError>;
    async fn open_session(&self, account_id: Uuid, ttl: Duration) -> Result<Uuid, AuthError>;
    async fn revoke_session(&self, session_id: Uuid) -> Result<(), AuthError>;
    async fn session_active(&self, session_id: Uuid) -> Result<bool, AuthError>;
}

/// Minimum password length accepted by the identity providers.
pub const MIN_PASSWORD_LEN: usize = 6;
