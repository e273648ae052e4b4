//! PostgreSQL implementation of [`Store`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{types::Json, FromRow, PgPool, Postgres, Transaction};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{
    announcement::{Announcement, AnnouncementPatch, EmailStats},
    attendance::AttendanceRecord,
    class::{Class, ClassPatch},
    email_log::EmailLog,
    tenant::{School, SchoolPatch, SchoolSettings},
    user::{Profile, User, UserFilter, UserPatch},
};
use crate::store::{
    ChangeKind, Collection, DocumentChange, Store, StoreError, StoreResult, UpsertOutcome,
    CHANGE_FEED_CAPACITY,
};

const USER_COLUMNS: &str = "id, email, role, school_id, profile, parent_ids, children_ids,
    employee_id, admission_number, is_active, auth_status, temp_password, error_log,
    created_at, updated_at";

const CLASS_COLUMNS: &str = "id, school_id, name, section, grade, capacity, room, description,
    academic_year, subjects, class_teacher_id, is_active, created_at, updated_at";

const ANNOUNCEMENT_COLUMNS: &str = "id, school_id, author_id, title, content, target_audience,
    priority, status, publish_date, email_stats, created_at, updated_at";

const EMAIL_LOG_COLUMNS: &str = "id, school_id, user_id, email, category, role, announcement_id,
    subject, success, message_id, error, sent_by, sent_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<DocumentChange>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn publish(&self, collection: Collection, id: Uuid, kind: ChangeKind) {
        let _ = self.changes.send(DocumentChange::new(collection, id, kind));
    }

    async fn lock_user(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> StoreResult<User> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::NotFound("User"))?
        .to_domain()
    }

    async fn write_user(tx: &mut Transaction<'_, Postgres>, user: &User) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users
             SET email = $2, profile = $3, parent_ids = $4, children_ids = $5,
                 employee_id = $6, admission_number = $7, is_active = $8,
                 auth_status = $9, temp_password = $10, error_log = $11, updated_at = $12
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(Json(&user.profile))
        .bind(&user.parent_ids)
        .bind(&user.children_ids)
        .bind(&user.employee_id)
        .bind(&user.admission_number)
        .bind(user.is_active)
        .bind(user.auth_status.map(|s| s.as_str()))
        .bind(&user.temp_password)
        .bind(&user.error_log)
        .bind(user.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| conflict_on_unique(e, &user.email))?;
        Ok(())
    }
}

fn conflict_on_unique(e: sqlx::Error, email: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("A user with email {email} already exists"))
        }
        _ => StoreError::Database(e),
    }
}

fn parse<T: std::str::FromStr<Err = anyhow::Error>>(value: &str) -> StoreResult<T> {
    value
        .parse()
        .map_err(|e: anyhow::Error| StoreError::Unexpected(e.to_string()))
}

// ── Row records ─────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    role: String,
    school_id: Uuid,
    profile: Json<Profile>,
    parent_ids: Vec<Uuid>,
    children_ids: Vec<Uuid>,
    employee_id: Option<String>,
    admission_number: Option<String>,
    is_active: bool,
    auth_status: Option<String>,
    temp_password: Option<String>,
    error_log: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRecord {
    fn to_domain(self) -> StoreResult<User> {
        Ok(User {
            id: self.id,
            email: self.email,
            role: parse(&self.role)?,
            school_id: self.school_id,
            profile: self.profile.0,
            parent_ids: self.parent_ids,
            children_ids: self.children_ids,
            employee_id: self.employee_id,
            admission_number: self.admission_number,
            is_active: self.is_active,
            auth_status: self.auth_status.as_deref().map(parse).transpose()?,
            temp_password: self.temp_password,
            error_log: self.error_log,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SchoolRecord {
    id: Uuid,
    name: String,
    admin_id: Uuid,
    email: String,
    phone: Option<String>,
    address: Option<String>,
    settings: Json<SchoolSettings>,
    subscription: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SchoolRecord {
    fn to_domain(self) -> StoreResult<School> {
        Ok(School {
            id: self.id,
            name: self.name,
            admin_id: self.admin_id,
            email: self.email,
            phone: self.phone,
            address: self.address,
            settings: self.settings.0,
            subscription: parse(&self.subscription)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ClassRecord {
    id: Uuid,
    school_id: Uuid,
    name: String,
    section: String,
    grade: String,
    capacity: i32,
    room: Option<String>,
    description: Option<String>,
    academic_year: String,
    subjects: Vec<String>,
    class_teacher_id: Option<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ClassRecord {
    fn to_domain(self) -> Class {
        Class {
            id: self.id,
            school_id: self.school_id,
            name: self.name,
            section: self.section,
            grade: self.grade,
            capacity: self.capacity,
            room: self.room,
            description: self.description,
            academic_year: self.academic_year,
            subjects: self.subjects,
            class_teacher_id: self.class_teacher_id,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AttendanceRow {
    id: Uuid,
    school_id: Uuid,
    class_id: Uuid,
    student_id: Uuid,
    date: NaiveDate,
    status: String,
    notes: String,
    marked_by: Uuid,
    marked_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AttendanceRow {
    fn to_domain(self) -> StoreResult<AttendanceRecord> {
        Ok(AttendanceRecord {
            id: self.id,
            school_id: self.school_id,
            class_id: self.class_id,
            student_id: self.student_id,
            date: self.date,
            status: parse(&self.status)?,
            notes: self.notes,
            marked_by: self.marked_by,
            marked_at: self.marked_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct AnnouncementRecord {
    id: Uuid,
    school_id: Uuid,
    author_id: Uuid,
    title: String,
    content: String,
    target_audience: Vec<String>,
    priority: String,
    status: String,
    publish_date: DateTime<Utc>,
    email_stats: Option<Json<EmailStats>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AnnouncementRecord {
    fn to_domain(self) -> StoreResult<Announcement> {
        Ok(Announcement {
            id: self.id,
            school_id: self.school_id,
            author_id: self.author_id,
            title: self.title,
            content: self.content,
            target_audience: self
                .target_audience
                .iter()
                .map(|r| parse(r))
                .collect::<StoreResult<_>>()?,
            priority: parse(&self.priority)?,
            status: parse(&self.status)?,
            publish_date: self.publish_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            email_stats: self.email_stats.map(|j| j.0),
        })
    }
}

#[derive(FromRow)]
struct EmailLogRecord {
    id: Uuid,
    school_id: Option<Uuid>,
    user_id: Option<Uuid>,
    email: String,
    category: String,
    role: Option<String>,
    announcement_id: Option<Uuid>,
    subject: Option<String>,
    success: bool,
    message_id: Option<String>,
    error: Option<String>,
    sent_by: Option<Uuid>,
    sent_at: DateTime<Utc>,
}

impl EmailLogRecord {
    fn to_domain(self) -> StoreResult<EmailLog> {
        Ok(EmailLog {
            id: self.id,
            school_id: self.school_id,
            user_id: self.user_id,
            email: self.email,
            category: parse(&self.category)?,
            role: self.role.as_deref().map(parse).transpose()?,
            announcement_id: self.announcement_id,
            subject: self.subject,
            success: self.success,
            message_id: self.message_id,
            error: self.error,
            sent_by: self.sent_by,
            sent_at: self.sent_at,
        })
    }
}

fn users(rows: Vec<UserRecord>) -> StoreResult<Vec<User>> {
    rows.into_iter().map(UserRecord::to_domain).collect()
}

// ── Port implementation ─────────────────────────────────────────────────────

#[async_trait]
impl Store for PgStore {
    fn changes(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_user_row(&mut tx, user).await?;
        tx.commit().await?;
        self.publish(Collection::Users, user.id, ChangeKind::Created);
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRecord>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(UserRecord::to_domain)
            .transpose()
    }

    async fn get_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let rows = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        users(rows)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(UserRecord::to_domain)
        .transpose()
    }

    async fn list_users(&self, school_id: Uuid, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let roles: Vec<&str> = filter.roles.iter().map(|r| r.as_str()).collect();
        let rows = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE school_id = $1
               AND ($2 OR is_active)
               AND (cardinality($3::TEXT[]) = 0 OR role = ANY($3))
               AND ($4::TEXT IS NULL OR profile->>'class_id' = $4)
             ORDER BY created_at DESC"
        ))
        .bind(school_id)
        .bind(filter.include_inactive)
        .bind(&roles)
        .bind(filter.class_id.map(|c| c.to_string()))
        .fetch_all(&self.pool)
        .await?;
        users(rows)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let mut user = Self::lock_user(&mut tx, id).await?;
        patch.apply(&mut user, Utc::now());
        Self::write_user(&mut tx, &user).await?;
        tx.commit().await?;
        self.publish(Collection::Users, id, ChangeKind::Updated);
        Ok(user)
    }

    async fn complete_provisioning(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users
             SET temp_password = NULL, auth_status = 'complete', updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("User"));
        }
        self.publish(Collection::Users, id, ChangeKind::Updated);
        Ok(())
    }

    async fn fail_provisioning(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users
             SET temp_password = NULL, auth_status = 'error', error_log = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("User"));
        }
        self.publish(Collection::Users, id, ChangeKind::Updated);
        Ok(())
    }

    async fn list_pending_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE auth_status = 'pending'
             ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        users(rows)
    }

    async fn register(&self, user: &User, school: Option<&School>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(s) = school {
            sqlx::query(
                "INSERT INTO schools
                     (id, name, admin_id, email, phone, address, settings, subscription,
                      created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(s.id)
            .bind(&s.name)
            .bind(s.admin_id)
            .bind(&s.email)
            .bind(&s.phone)
            .bind(&s.address)
            .bind(Json(&s.settings))
            .bind(s.subscription.as_str())
            .bind(s.created_at)
            .bind(s.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!("School {} already exists", s.id))
                }
                _ => StoreError::Database(e),
            })?;
        }
        insert_user_row(&mut tx, user).await?;
        // Dropping `tx` on any early return above rolls both inserts back.
        tx.commit().await?;

        if let Some(s) = school {
            self.publish(Collection::Schools, s.id, ChangeKind::Created);
        }
        self.publish(Collection::Users, user.id, ChangeKind::Created);
        Ok(())
    }

    async fn get_school(&self, id: Uuid) -> StoreResult<Option<School>> {
        sqlx::query_as::<_, SchoolRecord>("SELECT * FROM schools WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(SchoolRecord::to_domain)
            .transpose()
    }

    async fn update_school(&self, id: Uuid, patch: &SchoolPatch) -> StoreResult<School> {
        let mut tx = self.pool.begin().await?;
        let mut school = sqlx::query_as::<_, SchoolRecord>(
            "SELECT * FROM schools WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("School"))?
        .to_domain()?;

        patch.apply(&mut school, Utc::now());
        sqlx::query(
            "UPDATE schools
             SET name = $2, email = $3, phone = $4, address = $5, settings = $6, updated_at = $7
             WHERE id = $1",
        )
        .bind(id)
        .bind(&school.name)
        .bind(&school.email)
        .bind(&school.phone)
        .bind(&school.address)
        .bind(Json(&school.settings))
        .bind(school.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.publish(Collection::Schools, id, ChangeKind::Updated);
        Ok(school)
    }

    async fn insert_class(&self, class: &Class) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO classes ({CLASS_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(class.id)
        .bind(class.school_id)
        .bind(&class.name)
        .bind(&class.section)
        .bind(&class.grade)
        .bind(class.capacity)
        .bind(&class.room)
        .bind(&class.description)
        .bind(&class.academic_year)
        .bind(&class.subjects)
        .bind(class.class_teacher_id)
        .bind(class.is_active)
        .bind(class.created_at)
        .bind(class.updated_at)
        .execute(&self.pool)
        .await?;
        self.publish(Collection::Classes, class.id, ChangeKind::Created);
        Ok(())
    }

    async fn get_class(&self, id: Uuid) -> StoreResult<Option<Class>> {
        Ok(sqlx::query_as::<_, ClassRecord>(&format!(
            "SELECT {CLASS_COLUMNS} FROM classes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(ClassRecord::to_domain))
    }

    async fn list_classes(&self, school_id: Uuid, include_inactive: bool) -> StoreResult<Vec<Class>> {
        let rows = sqlx::query_as::<_, ClassRecord>(&format!(
            "SELECT {CLASS_COLUMNS} FROM classes
             WHERE school_id = $1 AND ($2 OR is_active)
             ORDER BY grade, name"
        ))
        .bind(school_id)
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ClassRecord::to_domain).collect())
    }

    async fn update_class(&self, id: Uuid, patch: &ClassPatch) -> StoreResult<Class> {
        let mut tx = self.pool.begin().await?;
        let mut class = sqlx::query_as::<_, ClassRecord>(&format!(
            "SELECT {CLASS_COLUMNS} FROM classes WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("Class"))?
        .to_domain();

        patch.apply(&mut class, Utc::now());
        sqlx::query(
            "UPDATE classes
             SET name = $2, section = $3, grade = $4, capacity = $5, room = $6,
                 description = $7, academic_year = $8, subjects = $9,
                 class_teacher_id = $10, is_active = $11, updated_at = $12
             WHERE id = $1",
        )
        .bind(id)
        .bind(&class.name)
        .bind(&class.section)
        .bind(&class.grade)
        .bind(class.capacity)
        .bind(&class.room)
        .bind(&class.description)
        .bind(&class.academic_year)
        .bind(&class.subjects)
        .bind(class.class_teacher_id)
        .bind(class.is_active)
        .bind(class.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.publish(Collection::Classes, id, ChangeKind::Updated);
        Ok(class)
    }

    async fn list_attendance(&self, class_id: Uuid, date: NaiveDate) -> StoreResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query_as::<_, AttendanceRow>(
            "SELECT * FROM attendance WHERE class_id = $1 AND date = $2",
        )
        .bind(class_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AttendanceRow::to_domain).collect()
    }

    async fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<UpsertOutcome> {
        // xmax is 0 only for a freshly inserted tuple.
        let (id, inserted): (Uuid, bool) = sqlx::query_as(
            "INSERT INTO attendance
                 (id, school_id, class_id, student_id, date, status, notes,
                  marked_by, marked_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (class_id, student_id, date) DO UPDATE
             SET status     = EXCLUDED.status,
                 notes      = EXCLUDED.notes,
                 marked_by  = EXCLUDED.marked_by,
                 marked_at  = EXCLUDED.marked_at,
                 updated_at = EXCLUDED.updated_at
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(record.id)
        .bind(record.school_id)
        .bind(record.class_id)
        .bind(record.student_id)
        .bind(record.date)
        .bind(record.status.as_str())
        .bind(&record.notes)
        .bind(record.marked_by)
        .bind(record.marked_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;

        let (outcome, kind) = if inserted {
            (UpsertOutcome::Inserted, ChangeKind::Created)
        } else {
            (UpsertOutcome::Updated, ChangeKind::Updated)
        };
        self.publish(Collection::Attendance, id, kind);
        Ok(outcome)
    }

    async fn insert_announcement(&self, a: &Announcement) -> StoreResult<()> {
        let audience: Vec<&str> = a.target_audience.iter().map(|r| r.as_str()).collect();
        sqlx::query(&format!(
            "INSERT INTO announcements ({ANNOUNCEMENT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(a.id)
        .bind(a.school_id)
        .bind(a.author_id)
        .bind(&a.title)
        .bind(&a.content)
        .bind(&audience)
        .bind(a.priority.as_str())
        .bind(a.status.as_str())
        .bind(a.publish_date)
        .bind(a.email_stats.map(Json))
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(&self.pool)
        .await?;
        self.publish(Collection::Announcements, a.id, ChangeKind::Created);
        Ok(())
    }

    async fn get_announcement(&self, id: Uuid) -> StoreResult<Option<Announcement>> {
        sqlx::query_as::<_, AnnouncementRecord>(&format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(AnnouncementRecord::to_domain)
        .transpose()
    }

    async fn list_announcements(&self, school_id: Uuid) -> StoreResult<Vec<Announcement>> {
        let rows = sqlx::query_as::<_, AnnouncementRecord>(&format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements
             WHERE school_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(school_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AnnouncementRecord::to_domain).collect()
    }

    async fn update_announcement(&self, id: Uuid, patch: &AnnouncementPatch) -> StoreResult<Announcement> {
        let mut tx = self.pool.begin().await?;
        let mut a = sqlx::query_as::<_, AnnouncementRecord>(&format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("Announcement"))?
        .to_domain()?;

        patch.apply(&mut a, Utc::now());
        let audience: Vec<&str> = a.target_audience.iter().map(|r| r.as_str()).collect();
        sqlx::query(
            "UPDATE announcements
             SET title = $2, content = $3, target_audience = $4, priority = $5,
                 status = $6, updated_at = $7
             WHERE id = $1",
        )
        .bind(id)
        .bind(&a.title)
        .bind(&a.content)
        .bind(&audience)
        .bind(a.priority.as_str())
        .bind(a.status.as_str())
        .bind(a.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.publish(Collection::Announcements, id, ChangeKind::Updated);
        Ok(a)
    }

    async fn record_email_stats(&self, id: Uuid, stats: &EmailStats) -> StoreResult<()> {
        let result = sqlx::query("UPDATE announcements SET email_stats = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(stats))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Announcement"));
        }
        self.publish(Collection::Announcements, id, ChangeKind::Updated);
        Ok(())
    }

    async fn delete_announcement(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM announcements WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Announcement"));
        }
        self.publish(Collection::Announcements, id, ChangeKind::Removed);
        Ok(())
    }

    async fn append_email_log(&self, log: &EmailLog) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO email_logs ({EMAIL_LOG_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(log.id)
        .bind(log.school_id)
        .bind(log.user_id)
        .bind(&log.email)
        .bind(log.category.as_str())
        .bind(log.role.map(|r| r.as_str()))
        .bind(log.announcement_id)
        .bind(&log.subject)
        .bind(log.success)
        .bind(&log.message_id)
        .bind(&log.error)
        .bind(log.sent_by)
        .bind(log.sent_at)
        .execute(&self.pool)
        .await?;
        self.publish(Collection::EmailLogs, log.id, ChangeKind::Created);
        Ok(())
    }

    async fn list_email_logs(&self, school_id: Uuid, limit: usize) -> StoreResult<Vec<EmailLog>> {
        let rows = sqlx::query_as::<_, EmailLogRecord>(&format!(
            "SELECT {EMAIL_LOG_COLUMNS} FROM email_logs
             WHERE school_id = $1
             ORDER BY sent_at DESC
             LIMIT $2"
        ))
        .bind(school_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EmailLogRecord::to_domain).collect()
    }

    async fn delete_email_logs_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<usize> {
        let result = sqlx::query(
            "DELETE FROM email_logs
             WHERE id IN (
                 SELECT id FROM email_logs
                 WHERE sent_at < $1
                 ORDER BY sent_at
                 LIMIT $2
             )",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

async fn insert_user_row(tx: &mut Transaction<'_, Postgres>, user: &User) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO users ({USER_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
    ))
    .bind(user.id)
    .bind(&user.email)
    .bind(user.role.as_str())
    .bind(user.school_id)
    .bind(Json(&user.profile))
    .bind(&user.parent_ids)
    .bind(&user.children_ids)
    .bind(&user.employee_id)
    .bind(&user.admission_number)
    .bind(user.is_active)
    .bind(user.auth_status.map(|s| s.as_str()))
    .bind(&user.temp_password)
    .bind(&user.error_log)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| conflict_on_unique(e, &user.email))?;
    Ok(())
}
