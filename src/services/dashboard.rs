//! Tenant-scoped collections behind the dashboard pages, and the list
//! controller those pages share.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{ApiError, StoreError, ValidationError},
    forms::{validate_class_patch, validate_user_patch, AnnouncementEditForm, AnnouncementForm, ClassForm, UserForm},
    models::{
        announcement::{Announcement, AnnouncementWithAuthor},
        class::{Class, ClassPatch},
        user::{User, UserFilter, UserPatch, UserRole},
    },
    services::auth::generate_temp_password,
    store::Store,
};

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MutationError {
    pub fn into_api(self) -> ApiError {
        match self {
            MutationError::Validation(e) => e.into_api(),
            MutationError::Store(e) => e.into_api(),
        }
    }
}

/// Member pages. Each one manages a fixed set of roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Students,
    Teachers,
    Parents,
    Staff,
}

impl MemberKind {
    pub const ALL: [MemberKind; 4] = [
        MemberKind::Students,
        MemberKind::Teachers,
        MemberKind::Parents,
        MemberKind::Staff,
    ];

    pub fn roles(self) -> &'static [UserRole] {
        match self {
            MemberKind::Students => &[UserRole::Student],
            MemberKind::Teachers => &[UserRole::Teacher],
            MemberKind::Parents => &[UserRole::Parent],
            MemberKind::Staff => &UserRole::STAFF,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            MemberKind::Students => "/students",
            MemberKind::Teachers => "/teachers",
            MemberKind::Parents => "/parents",
            MemberKind::Staff => "/staff",
        }
    }
}

/// A tenant-filtered collection the dashboard can list and mutate.
#[async_trait]
pub trait Resource: Send + Sync {
    type Item: Clone + Send + Sync;
    type Draft: Send;
    type Patch: Send;

    fn id(item: &Self::Item) -> Uuid;

    async fn query(&self) -> Result<Vec<Self::Item>, MutationError>;
    async fn create(&self, draft: Self::Draft) -> Result<Self::Item, MutationError>;
    async fn edit(&self, id: Uuid, patch: Self::Patch) -> Result<Self::Item, MutationError>;
    /// Deactivates, or deletes where the collection allows it.
    async fn remove(&self, id: Uuid) -> Result<(), MutationError>;
}

// ── Members ──────────────────────────────────────────────────────────────────

pub struct Members {
    pub store: Arc<dyn Store>,
    pub school_id: Uuid,
    pub kind: MemberKind,
    pub include_inactive: bool,
}

impl Members {
    /// A member of this page's roles in this school, or not found.
    async fn owned(&self, id: Uuid) -> Result<User, MutationError> {
        match self.store.get_user(id).await? {
            Some(u) if u.school_id == self.school_id && self.kind.roles().contains(&u.role) => Ok(u),
            _ => Err(StoreError::NotFound("User").into()),
        }
    }
}

#[async_trait]
impl Resource for Members {
    type Item = User;
    type Draft = UserForm;
    type Patch = UserPatch;

    fn id(item: &User) -> Uuid {
        item.id
    }

    async fn query(&self) -> Result<Vec<User>, MutationError> {
        let filter = UserFilter {
            roles: self.kind.roles().to_vec(),
            class_id: None,
            include_inactive: self.include_inactive,
        };
        Ok(self.store.list_users(self.school_id, &filter).await?)
    }

    /// Writes a pending member; the login is provisioned by the email
    /// pipeline once the document lands.
    async fn create(&self, form: UserForm) -> Result<User, MutationError> {
        let role = form.validate(self.kind.roles())?;
        if let Some(class_id) = form.class_id.filter(|_| role == UserRole::Student) {
            match self.store.get_class(class_id).await? {
                Some(c) if c.school_id == self.school_id => {}
                _ => return Err(ValidationError::new("class_id", "Class not found").into()),
            }
        }
        let user = form.into_user(
            Uuid::new_v4(),
            self.school_id,
            role,
            generate_temp_password(),
            Utc::now(),
        );
        self.store.insert_user(&user).await?;
        info!("Created {} {} in school {}", user.role, user.email, self.school_id);
        Ok(user)
    }

    async fn edit(&self, id: Uuid, patch: UserPatch) -> Result<User, MutationError> {
        validate_user_patch(&patch)?;
        self.owned(id).await?;
        let patch = UserPatch {
            email: patch.email.map(|e| e.trim().to_lowercase()),
            ..patch
        };
        Ok(self.store.update_user(id, &patch).await?)
    }

    async fn remove(&self, id: Uuid) -> Result<(), MutationError> {
        self.owned(id).await?;
        self.store.update_user(id, &UserPatch::deactivate()).await?;
        Ok(())
    }
}

// ── Classes ──────────────────────────────────────────────────────────────────

pub struct Classes {
    pub store: Arc<dyn Store>,
    pub school_id: Uuid,
    pub include_inactive: bool,
}

impl Classes {
    async fn owned(&self, id: Uuid) -> Result<Class, MutationError> {
        match self.store.get_class(id).await? {
            Some(c) if c.school_id == self.school_id => Ok(c),
            _ => Err(StoreError::NotFound("Class").into()),
        }
    }

    async fn check_teacher(&self, teacher_id: Option<Uuid>) -> Result<(), MutationError> {
        let Some(id) = teacher_id else {
            return Ok(());
        };
        match self.store.get_user(id).await? {
            Some(u) if u.school_id == self.school_id && u.role == UserRole::Teacher && u.is_active => Ok(()),
            _ => Err(ValidationError::new("class_teacher_id", "Teacher not found").into()),
        }
    }
}

#[async_trait]
impl Resource for Classes {
    type Item = Class;
    type Draft = ClassForm;
    type Patch = ClassPatch;

    fn id(item: &Class) -> Uuid {
        item.id
    }

    async fn query(&self) -> Result<Vec<Class>, MutationError> {
        Ok(self.store.list_classes(self.school_id, self.include_inactive).await?)
    }

    async fn create(&self, form: ClassForm) -> Result<Class, MutationError> {
        form.validate()?;
        self.check_teacher(form.class_teacher_id).await?;
        let class = form.into_class(Uuid::new_v4(), self.school_id, Utc::now());
        self.store.insert_class(&class).await?;
        Ok(class)
    }

    async fn edit(&self, id: Uuid, patch: ClassPatch) -> Result<Class, MutationError> {
        validate_class_patch(&patch)?;
        self.owned(id).await?;
        self.check_teacher(patch.class_teacher_id).await?;
        Ok(self.store.update_class(id, &patch).await?)
    }

    async fn remove(&self, id: Uuid) -> Result<(), MutationError> {
        self.owned(id).await?;
        self.store.update_class(id, &ClassPatch::deactivate()).await?;
        Ok(())
    }
}

// ── Announcements ────────────────────────────────────────────────────────────

pub struct Announcements {
    pub store: Arc<dyn Store>,
    pub school_id: Uuid,
    /// Author of anything created through this handle.
    pub author_id: Uuid,
}

impl Announcements {
    async fn owned(&self, id: Uuid) -> Result<Announcement, MutationError> {
        match self.store.get_announcement(id).await? {
            Some(a) if a.school_id == self.school_id => Ok(a),
            _ => Err(StoreError::NotFound("Announcement").into()),
        }
    }

    async fn with_author(&self, announcement: Announcement) -> Result<AnnouncementWithAuthor, MutationError> {
        let author_name = self
            .store
            .get_user(announcement.author_id)
            .await?
            .map(|u| u.display_name());
        Ok(AnnouncementWithAuthor { announcement, author_name })
    }
}

#[async_trait]
impl Resource for Announcements {
    type Item = AnnouncementWithAuthor;
    type Draft = AnnouncementForm;
    type Patch = AnnouncementEditForm;

    fn id(item: &AnnouncementWithAuthor) -> Uuid {
        item.announcement.id
    }

    async fn query(&self) -> Result<Vec<AnnouncementWithAuthor>, MutationError> {
        let list = self.store.list_announcements(self.school_id).await?;
        let mut author_ids: Vec<Uuid> = list.iter().map(|a| a.author_id).collect();
        author_ids.sort();
        author_ids.dedup();
        let authors = self.store.get_users(&author_ids).await?;

        Ok(list
            .into_iter()
            .map(|announcement| {
                let author_name = authors
                    .iter()
                    .find(|u| u.id == announcement.author_id)
                    .map(User::display_name);
                AnnouncementWithAuthor { announcement, author_name }
            })
            .collect())
    }

    async fn create(&self, form: AnnouncementForm) -> Result<AnnouncementWithAuthor, MutationError> {
        let audience = form.validate()?;
        let announcement =
            form.into_announcement(Uuid::new_v4(), self.school_id, self.author_id, audience, Utc::now());
        self.store.insert_announcement(&announcement).await?;
        self.with_author(announcement).await
    }

    async fn edit(&self, id: Uuid, form: AnnouncementEditForm) -> Result<AnnouncementWithAuthor, MutationError> {
        let patch = form.into_patch()?;
        self.owned(id).await?;
        let updated = self.store.update_announcement(id, &patch).await?;
        self.with_author(updated).await
    }

    async fn remove(&self, id: Uuid) -> Result<(), MutationError> {
        self.owned(id).await?;
        Ok(self.store.delete_announcement(id).await?)
    }
}

// ── List controller ──────────────────────────────────────────────────────────

/// Rows shown on one dashboard page.
///
/// Successful mutations are applied to the rows directly. A failed one sets
/// a notice and re-queries; if the re-query fails too, the rows stay as they
/// were before the mutation.
///
/// This is the client-side list controller for dashboards that embed the
/// library. The HTTP routes are stateless and call the [`Resource`] directly.
pub struct ListPage<R: Resource> {
    resource: R,
    rows: Vec<R::Item>,
    notice: Option<String>,
}

impl<R: Resource> ListPage<R> {
    pub async fn load(resource: R) -> Self {
        let mut page = Self {
            resource,
            rows: vec![],
            notice: None,
        };
        page.refresh().await;
        page
    }

    pub fn rows(&self) -> &[R::Item] {
        &self.rows
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    pub async fn refresh(&mut self) {
        match self.resource.query().await {
            Ok(rows) => self.rows = rows,
            Err(e) => {
                warn!("List query failed: {e}");
                self.notice = Some(e.to_string());
            }
        }
    }

    pub async fn create(&mut self, draft: R::Draft) -> bool {
        match self.resource.create(draft).await {
            Ok(item) => {
                self.rows.insert(0, item);
                true
            }
            Err(e) => {
                self.recover(e).await;
                false
            }
        }
    }

    pub async fn edit(&mut self, id: Uuid, patch: R::Patch) -> bool {
        match self.resource.edit(id, patch).await {
            Ok(item) => {
                if let Some(row) = self.rows.iter_mut().find(|r| R::id(r) == id) {
                    *row = item;
                }
                true
            }
            Err(e) => {
                self.recover(e).await;
                false
            }
        }
    }

    pub async fn remove(&mut self, id: Uuid) -> bool {
        match self.resource.remove(id).await {
            Ok(()) => {
                self.rows.retain(|r| R::id(r) != id);
                true
            }
            Err(e) => {
                self.recover(e).await;
                false
            }
        }
    }

    async fn recover(&mut self, error: MutationError) {
        warn!("Mutation failed: {error}");
        self.notice = Some(error.to_string());
        match self.resource.query().await {
            Ok(rows) => self.rows = rows,
            Err(e) => warn!("Re-query after failed mutation also failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn members(store: &Arc<MemoryStore>, school_id: Uuid, kind: MemberKind) -> Members {
        Members {
            store: store.clone(),
            school_id,
            kind,
            include_inactive: false,
        }
    }

    fn teacher_form(email: &str) -> UserForm {
        UserForm {
            email: email.into(),
            first_name: "Tess".into(),
            last_name: "Teacher".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn created_members_are_prepended_and_deactivated_ones_drop_out() {
        let store = Arc::new(MemoryStore::new());
        let school = Uuid::new_v4();
        let mut page = ListPage::load(members(&store, school, MemberKind::Teachers)).await;
        assert!(page.rows().is_empty());

        assert!(page.create(teacher_form("t1@x.com")).await);
        assert!(page.create(teacher_form("t2@x.com")).await);
        assert_eq!(page.rows()[0].email, "t2@x.com");
        assert!(page.rows().iter().all(|u| u.temp_password.is_some()));

        let id = page.rows()[1].id;
        assert!(page.remove(id).await);
        assert_eq!(page.rows().len(), 1);

        let stored = store.get_user(id).await.unwrap().unwrap();
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn failed_mutation_sets_a_notice_and_requeries() {
        let store = Arc::new(MemoryStore::new());
        let school = Uuid::new_v4();
        let mut page = ListPage::load(members(&store, school, MemberKind::Teachers)).await;
        page.create(teacher_form("t1@x.com")).await;

        store.fail_writes(Some("quota exceeded"));
        assert!(!page.create(teacher_form("t2@x.com")).await);
        assert_eq!(page.notice(), Some("quota exceeded"));
        assert_eq!(page.rows().len(), 1);

        let id = page.rows()[0].id;
        assert!(!page.edit(id, UserPatch { first_name: Some("X".into()), ..Default::default() }).await);
        assert_eq!(page.rows()[0].profile.first_name, "Tess");
    }

    #[tokio::test]
    async fn members_of_other_pages_and_schools_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let school = Uuid::new_v4();
        let teachers = members(&store, school, MemberKind::Teachers);
        let t = teachers.create(teacher_form("t@x.com")).await.unwrap();

        let students = members(&store, school, MemberKind::Students);
        assert!(matches!(
            students.remove(t.id).await,
            Err(MutationError::Store(StoreError::NotFound(_)))
        ));
        let elsewhere = members(&store, Uuid::new_v4(), MemberKind::Teachers);
        assert!(elsewhere.edit(t.id, UserPatch::default()).await.is_err());
        assert!(store.get_user(t.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn staff_page_rejects_teacher_role() {
        let store = Arc::new(MemoryStore::new());
        let staff = members(&store, Uuid::new_v4(), MemberKind::Staff);
        let form = UserForm { role: Some(UserRole::Teacher), ..teacher_form("t@x.com") };
        assert!(matches!(staff.create(form).await, Err(MutationError::Validation(_))));

        let form = UserForm { role: Some(UserRole::Librarian), ..teacher_form("l@x.com") };
        assert_eq!(staff.create(form).await.unwrap().role, UserRole::Librarian);
    }

    #[tokio::test]
    async fn class_teacher_must_be_a_teacher_in_the_school() {
        let store = Arc::new(MemoryStore::new());
        let school = Uuid::new_v4();
        let classes = Classes { store: store.clone(), school_id: school, include_inactive: false };
        let form = ClassForm {
            name: "5A".into(),
            grade: "5".into(),
            class_teacher_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(matches!(classes.create(form.clone()).await, Err(MutationError::Validation(_))));

        let t = members(&store, school, MemberKind::Teachers)
            .create(teacher_form("t@x.com"))
            .await
            .unwrap();
        let class = classes
            .create(ClassForm { class_teacher_id: Some(t.id), ..form })
            .await
            .unwrap();
        assert_eq!(class.class_teacher_id, Some(t.id));

        classes.remove(class.id).await.unwrap();
        assert!(classes.query().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn announcements_are_listed_with_author_names() {
        let store = Arc::new(MemoryStore::new());
        let school = Uuid::new_v4();
        let author = members(&store, school, MemberKind::Teachers)
            .create(teacher_form("t@x.com"))
            .await
            .unwrap();
        let announcements = Announcements { store: store.clone(), school_id: school, author_id: author.id };
        let created = announcements
            .create(AnnouncementForm {
                title: "Trip".into(),
                content: "Bring lunch".into(),
                target_audience: vec!["parents".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(created.author_name.as_deref(), Some("Tess Teacher"));

        let list = announcements.query().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].announcement.target_audience, vec![UserRole::Parent]);

        announcements.remove(created.announcement.id).await.unwrap();
        assert!(store.get_announcement(created.announcement.id).await.unwrap().is_none());
    }
}
