//! In-memory adapters for tests and local development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    AuthError, ChangeKind, Collection, DocumentChange, IdentityProvider, Store, StoreError,
    StoreResult, UpsertOutcome, CHANGE_FEED_CAPACITY, MIN_PASSWORD_LEN,
};
use crate::models::{
    announcement::{Announcement, AnnouncementPatch, EmailStats},
    attendance::AttendanceRecord,
    class::{Class, ClassPatch},
    email_log::EmailLog,
    tenant::{School, SchoolPatch},
    user::{AuthStatus, User, UserFilter, UserPatch},
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    schools: HashMap<Uuid, School>,
    classes: HashMap<Uuid, Class>,
    attendance: HashMap<(Uuid, Uuid, NaiveDate), AttendanceRecord>,
    announcements: HashMap<Uuid, Announcement>,
    email_logs: Vec<EmailLog>,
}

/// Document store held in process memory.
///
/// All tables sit behind one lock, so multi-document writes are atomic.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    changes: broadcast::Sender<DocumentChange>,
    write_failure: RwLock<Option<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            tables: RwLock::new(Tables::default()),
            changes,
            write_failure: RwLock::new(None),
        }
    }

    /// While set, every write fails with this message. Reads keep working.
    pub fn fail_writes(&self, message: Option<&str>) {
        *self.write_failure.write() = message.map(str::to_string);
    }

    pub fn attendance_count(&self) -> usize {
        self.tables.read().attendance.len()
    }

    pub fn email_log_count(&self) -> usize {
        self.tables.read().email_logs.len()
    }

    fn check_writable(&self) -> StoreResult<()> {
        match self.write_failure.read().as_ref() {
            Some(msg) => Err(StoreError::Unexpected(msg.clone())),
            None => Ok(()),
        }
    }

    fn publish(&self, collection: Collection, id: Uuid, kind: ChangeKind) {
        // No subscribers is fine.
        let _ = self.changes.send(DocumentChange::new(collection, id, kind));
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn changes(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.check_writable()?;
        {
            let mut t = self.tables.write();
            if t.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
                return Err(StoreError::Conflict(format!(
                    "A user with email {} already exists",
                    user.email
                )));
            }
            t.users.insert(user.id, user.clone());
        }
        self.publish(Collection::Users, user.id, ChangeKind::Created);
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn get_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        let t = self.tables.read();
        Ok(ids.iter().filter_map(|id| t.users.get(id).cloned()).collect())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self, school_id: Uuid, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self
            .tables
            .read()
            .users
            .values()
            .filter(|u| u.school_id == school_id && filter.matches(u))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> StoreResult<User> {
        self.check_writable()?;
        let updated = {
            let mut t = self.tables.write();
            if let Some(email) = &patch.email {
                if t.users.values().any(|u| u.id != id && u.email.eq_ignore_ascii_case(email)) {
                    return Err(StoreError::Conflict(format!(
                        "A user with email {email} already exists"
                    )));
                }
            }
            let user = t.users.get_mut(&id).ok_or(StoreError::NotFound("User"))?;
            patch.apply(user, Utc::now());
            user.clone()
        };
        self.publish(Collection::Users, id, ChangeKind::Updated);
        Ok(updated)
    }

    async fn complete_provisioning(&self, id: Uuid) -> StoreResult<()> {
        self.check_writable()?;
        {
            let mut t = self.tables.write();
            let user = t.users.get_mut(&id).ok_or(StoreError::NotFound("User"))?;
            user.temp_password = None;
            user.auth_status = Some(AuthStatus::Complete);
            user.updated_at = Utc::now();
        }
        self.publish(Collection::Users, id, ChangeKind::Updated);
        Ok(())
    }

    async fn fail_provisioning(&self, id: Uuid, error: &str) -> StoreResult<()> {
        self.check_writable()?;
        {
            let mut t = self.tables.write();
            let user = t.users.get_mut(&id).ok_or(StoreError::NotFound("User"))?;
            user.temp_password = None;
            user.auth_status = Some(AuthStatus::Error);
            user.error_log = Some(error.to_string());
            user.updated_at = Utc::now();
        }
        self.publish(Collection::Users, id, ChangeKind::Updated);
        Ok(())
    }

    async fn list_pending_users(&self) -> StoreResult<Vec<User>> {
        let mut pending: Vec<User> = self
            .tables
            .read()
            .users
            .values()
            .filter(|u| u.auth_status == Some(AuthStatus::Pending))
            .cloned()
            .collect();
        pending.sort_by_key(|u| u.created_at);
        Ok(pending)
    }

    async fn register(&self, user: &User, school: Option<&School>) -> StoreResult<()> {
        self.check_writable()?;
        {
            let mut t = self.tables.write();
            // Validate everything before touching either table.
            if t.users.contains_key(&user.id)
                || t.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email))
            {
                return Err(StoreError::Conflict(format!(
                    "A user with email {} already exists",
                    user.email
                )));
            }
            match school {
                Some(s) if t.schools.contains_key(&s.id) => {
                    return Err(StoreError::Conflict(format!("School {} already exists", s.id)));
                }
                None if !t.schools.contains_key(&user.school_id) => {
                    return Err(StoreError::NotFound("School"));
                }
                _ => {}
            }
            if let Some(s) = school {
                t.schools.insert(s.id, s.clone());
            }
            t.users.insert(user.id, user.clone());
        }
        if let Some(s) = school {
            self.publish(Collection::Schools, s.id, ChangeKind::Created);
        }
        self.publish(Collection::Users, user.id, ChangeKind::Created);
        Ok(())
    }

    async fn get_school(&self, id: Uuid) -> StoreResult<Option<School>> {
        Ok(self.tables.read().schools.get(&id).cloned())
    }

    async fn update_school(&self, id: Uuid, patch: &SchoolPatch) -> StoreResult<School> {
        self.check_writable()?;
        let updated = {
            let mut t = self.tables.write();
            let school = t.schools.get_mut(&id).ok_or(StoreError::NotFound("School"))?;
            patch.apply(school, Utc::now());
            school.clone()
        };
        self.publish(Collection::Schools, id, ChangeKind::Updated);
        Ok(updated)
    }

    async fn insert_class(&self, class: &Class) -> StoreResult<()> {
        self.check_writable()?;
        self.tables.write().classes.insert(class.id, class.clone());
        self.publish(Collection::Classes, class.id, ChangeKind::Created);
        Ok(())
    }

    async fn get_class(&self, id: Uuid) -> StoreResult<Option<Class>> {
        Ok(self.tables.read().classes.get(&id).cloned())
    }

    async fn list_classes(&self, school_id: Uuid, include_inactive: bool) -> StoreResult<Vec<Class>> {
        let mut classes: Vec<Class> = self
            .tables
            .read()
            .classes
            .values()
            .filter(|c| c.school_id == school_id && (include_inactive || c.is_active))
            .cloned()
            .collect();
        classes.sort_by(|a, b| a.grade.cmp(&b.grade).then_with(|| a.name.cmp(&b.name)));
        Ok(classes)
    }

    async fn update_class(&self, id: Uuid, patch: &ClassPatch) -> StoreResult<Class> {
        self.check_writable()?;
        let updated = {
            let mut t = self.tables.write();
            let class = t.classes.get_mut(&id).ok_or(StoreError::NotFound("Class"))?;
            patch.apply(class, Utc::now());
            class.clone()
        };
        self.publish(Collection::Classes, id, ChangeKind::Updated);
        Ok(updated)
    }

    async fn list_attendance(&self, class_id: Uuid, date: NaiveDate) -> StoreResult<Vec<AttendanceRecord>> {
        Ok(self
            .tables
            .read()
            .attendance
            .values()
            .filter(|r| r.class_id == class_id && r.date == date)
            .cloned()
            .collect())
    }

    async fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<UpsertOutcome> {
        self.check_writable()?;
        let (id, outcome) = {
            let mut t = self.tables.write();
            match t.attendance.get_mut(&record.key()) {
                Some(existing) => {
                    existing.status = record.status;
                    existing.notes = record.notes.clone();
                    existing.marked_by = record.marked_by;
                    existing.marked_at = record.marked_at;
                    existing.updated_at = record.updated_at;
                    (existing.id, UpsertOutcome::Updated)
                }
                None => {
                    t.attendance.insert(record.key(), record.clone());
                    (record.id, UpsertOutcome::Inserted)
                }
            }
        };
        let kind = match outcome {
            UpsertOutcome::Inserted => ChangeKind::Created,
            UpsertOutcome::Updated => ChangeKind::Updated,
        };
        self.publish(Collection::Attendance, id, kind);
        Ok(outcome)
    }

    async fn insert_announcement(&self, announcement: &Announcement) -> StoreResult<()> {
        self.check_writable()?;
        self.tables
            .write()
            .announcements
            .insert(announcement.id, announcement.clone());
        self.publish(Collection::Announcements, announcement.id, ChangeKind::Created);
        Ok(())
    }

    async fn get_announcement(&self, id: Uuid) -> StoreResult<Option<Announcement>> {
        Ok(self.tables.read().announcements.get(&id).cloned())
    }

    async fn list_announcements(&self, school_id: Uuid) -> StoreResult<Vec<Announcement>> {
        let mut list: Vec<Announcement> = self
            .tables
            .read()
            .announcements
            .values()
            .filter(|a| a.school_id == school_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn update_announcement(&self, id: Uuid, patch: &AnnouncementPatch) -> StoreResult<Announcement> {
        self.check_writable()?;
        let updated = {
            let mut t = self.tables.write();
            let a = t
                .announcements
                .get_mut(&id)
                .ok_or(StoreError::NotFound("Announcement"))?;
            patch.apply(a, Utc::now());
            a.clone()
        };
        self.publish(Collection::Announcements, id, ChangeKind::Updated);
        Ok(updated)
    }

    async fn record_email_stats(&self, id: Uuid, stats: &EmailStats) -> StoreResult<()> {
        self.check_writable()?;
        {
            let mut t = self.tables.write();
            let a = t
                .announcements
                .get_mut(&id)
                .ok_or(StoreError::NotFound("Announcement"))?;
            a.email_stats = Some(*stats);
        }
        self.publish(Collection::Announcements, id, ChangeKind::Updated);
        Ok(())
    }

    async fn delete_announcement(&self, id: Uuid) -> StoreResult<()> {
        self.check_writable()?;
        self.tables
            .write()
            .announcements
            .remove(&id)
            .ok_or(StoreError::NotFound("Announcement"))?;
        self.publish(Collection::Announcements, id, ChangeKind::Removed);
        Ok(())
    }

    async fn append_email_log(&self, log: &EmailLog) -> StoreResult<()> {
        self.check_writable()?;
        self.tables.write().email_logs.push(log.clone());
        self.publish(Collection::EmailLogs, log.id, ChangeKind::Created);
        Ok(())
    }

    async fn list_email_logs(&self, school_id: Uuid, limit: usize) -> StoreResult<Vec<EmailLog>> {
        let mut logs: Vec<EmailLog> = self
            .tables
            .read()
            .email_logs
            .iter()
            .filter(|l| l.school_id == Some(school_id))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn delete_email_logs_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<usize> {
        self.check_writable()?;
        let mut t = self.tables.write();
        let mut expired: Vec<(DateTime<Utc>, Uuid)> = t
            .email_logs
            .iter()
            .filter(|l| l.sent_at < cutoff)
            .map(|l| (l.sent_at, l.id))
            .collect();
        expired.sort();
        expired.truncate(limit);
        let doomed: std::collections::HashSet<Uuid> = expired.into_iter().map(|(_, id)| id).collect();
        t.email_logs.retain(|l| !doomed.contains(&l.id));
        Ok(doomed.len())
    }
}

struct Account {
    email: String,
    password_hash: String,
    display_name: String,
}

struct Session {
    account_id: Uuid,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

/// Identity provider held in process memory. Passwords are still bcrypt-hashed,
/// at the minimum cost.
#[derive(Default)]
pub struct MemoryIdentity {
    accounts: RwLock<HashMap<Uuid, Account>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_account(&self, id: Uuid) -> bool {
        self.accounts.read().contains_key(&id)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn display_name(&self, id: Uuid) -> Option<String> {
        self.accounts.read().get(&id).map(|a| a.display_name.clone())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
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
        let password_hash =
            bcrypt::hash(password, 4).map_err(|e| AuthError::Backend(e.to_string()))?;

        let mut accounts = self.accounts.write();
        if accounts.contains_key(&id)
            || accounts.values().any(|a| a.email.eq_ignore_ascii_case(email))
        {
            return Err(AuthError::EmailAlreadyInUse);
        }
        accounts.insert(
            id,
            Account {
                email: email.to_lowercase(),
                password_hash,
                display_name: display_name.to_string(),
            },
        );
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> Result<(), AuthError> {
        self.accounts.write().remove(&id);
        self.sessions.write().retain(|_, s| s.account_id != id);
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Uuid, AuthError> {
        let found = self
            .accounts
            .read()
            .iter()
            .find(|(_, a)| a.email.eq_ignore_ascii_case(email))
            .map(|(id, a)| (*id, a.password_hash.clone()));
        let (id, hash) = found.ok_or(AuthError::InvalidCredentials)?;
        match bcrypt::verify(password, &hash) {
            Ok(true) => Ok(id),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn update_display_name(&self, id: Uuid, display_name: &str) -> Result<(), AuthError> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| AuthError::Backend(format!("No account {id}")))?;
        account.display_name = display_name.to_string();
        Ok(())
    }

    async fn open_session(&self, account_id: Uuid, ttl: Duration) -> Result<Uuid, AuthError> {
        if !self.has_account(account_id) {
            return Err(AuthError::InvalidCredentials);
        }
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| AuthError::Backend(e.to_string()))?;
        let id = Uuid::new_v4();
        self.sessions.write().insert(
            id,
            Session {
                account_id,
                expires_at: Utc::now() + ttl,
                revoked: false,
            },
        );
        Ok(id)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<(), AuthError> {
        if let Some(s) = self.sessions.write().get_mut(&session_id) {
            s.revoked = true;
        }
        Ok(())
    }

    async fn session_active(&self, session_id: Uuid) -> Result<bool, AuthError> {
        Ok(self
            .sessions
            .read()
            .get(&session_id)
            .is_some_and(|s| !s.revoked && s.expires_at > Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attendance::AttendanceStatus;

    fn record(class_id: Uuid, student_id: Uuid, date: NaiveDate, status: AttendanceStatus) -> AttendanceRecord {
        let now = Utc::now();
        AttendanceRecord {
            id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            class_id,
            student_id,
            date,
            status,
            notes: String::new(),
            marked_by: Uuid::new_v4(),
            marked_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_student_and_day() {
        let store = MemoryStore::new();
        let (class, student) = (Uuid::new_v4(), Uuid::new_v4());
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let first = record(class, student, date, AttendanceStatus::Present);
        assert_eq!(store.upsert_attendance(&first).await.unwrap(), UpsertOutcome::Inserted);
        let second = record(class, student, date, AttendanceStatus::Late);
        assert_eq!(store.upsert_attendance(&second).await.unwrap(), UpsertOutcome::Updated);

        let rows = store.list_attendance(class, date).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, first.id);
        assert_eq!(rows[0].status, AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn write_failure_leaves_reads_working() {
        let store = MemoryStore::new();
        store.fail_writes(Some("disk on fire"));
        let err = store.delete_announcement(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unexpected(ref m) if m == "disk on fire"));
        assert!(store.list_announcements(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoked_sessions_are_inactive() {
        let identity = MemoryIdentity::new();
        let id = Uuid::new_v4();
        identity.create_account(id, "a@x.com", "secret1", "A").await.unwrap();
        assert_eq!(identity.authenticate("A@X.com", "secret1").await.unwrap(), id);
        assert!(matches!(
            identity.authenticate("a@x.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));

        let sid = identity.open_session(id, Duration::from_secs(60)).await.unwrap();
        assert!(identity.session_active(sid).await.unwrap());
        identity.revoke_session(sid).await.unwrap();
        assert!(!identity.session_active(sid).await.unwrap());
    }

    #[tokio::test]
    async fn short_passwords_are_rejected() {
        let identity = MemoryIdentity::new();
        let err = identity
            .create_account(Uuid::new_v4(), "a@x.com", "12345", "A")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword));
    }
}
