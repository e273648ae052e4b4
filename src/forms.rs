//! Request bodies for the create/edit screens, with the checks that run
//! before anything is written.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::{
    announcement::{Announcement, AnnouncementPatch, AnnouncementStatus, Priority},
    attendance::AttendanceStatus,
    class::{Class, ClassPatch},
    tenant::SchoolPatch,
    user::{Address, AuthStatus, Profile, User, UserPatch, UserRole},
};
use crate::store::MIN_PASSWORD_LEN;

fn required(field: &'static str, label: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, format!("{label} is required")));
    }
    Ok(())
}

fn valid_email(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    required(field, "Email", value)?;
    let valid = match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !value.contains(' ')
        }
        None => false,
    };
    if !valid {
        return Err(ValidationError::new(field, "Please enter a valid email address"));
    }
    Ok(())
}

fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ── Sign-up ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Required when registering a new school.
    #[serde(default)]
    pub school_name: Option<String>,
    /// Defaults to `school_admin`.
    #[serde(default)]
    pub role: Option<UserRole>,
    /// Required for every role except `school_admin`.
    #[serde(default)]
    pub school_id: Option<Uuid>,
}

impl SignUpForm {
    pub fn role(&self) -> UserRole {
        self.role.unwrap_or(UserRole::SchoolAdmin)
    }

    pub fn email(&self) -> String {
        normalize_email(&self.email)
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        required("first_name", "First name", &self.first_name)?;
        required("last_name", "Last name", &self.last_name)?;
        valid_email("email", &self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::new(
                "password",
                format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            ));
        }
        if let Some(confirm) = &self.confirm_password {
            if confirm != &self.password {
                return Err(ValidationError::new("confirm_password", "Passwords do not match"));
            }
        }
        match self.role() {
            UserRole::SchoolAdmin => {
                required("school_name", "School name", self.school_name.as_deref().unwrap_or(""))?;
            }
            _ if self.school_id.is_none() => {
                return Err(ValidationError::new("school_id", "School is required"));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn profile(&self) -> Profile {
        Profile {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            phone: non_blank(self.phone.clone()),
            ..Default::default()
        }
    }
}

// ── School ───────────────────────────────────────────────────────────────────

pub fn validate_school_patch(patch: &SchoolPatch) -> Result<(), ValidationError> {
    if let Some(v) = &patch.name {
        required("name", "School name", v)?;
    }
    if let Some(v) = &patch.email {
        valid_email("email", v)?;
    }
    Ok(())
}

// ── Members ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserForm {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub class_id: Option<Uuid>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub roll_number: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub admission_number: Option<String>,
    #[serde(default)]
    pub parent_ids: Vec<Uuid>,
    #[serde(default)]
    pub children_ids: Vec<Uuid>,
}

const GENDERS: [&str; 3] = ["male", "female", "other"];

impl UserForm {
    /// Resolves the role against the roles a screen may create.
    pub fn resolve_role(&self, allowed: &[UserRole]) -> Result<UserRole, ValidationError> {
        match self.role {
            Some(role) if allowed.contains(&role) => Ok(role),
            Some(role) => Err(ValidationError::new(
                "role",
                format!("Role {role} cannot be created here"),
            )),
            None => allowed
                .first()
                .copied()
                .ok_or_else(|| ValidationError::new("role", "Role is required")),
        }
    }

    pub fn validate(&self, allowed: &[UserRole]) -> Result<UserRole, ValidationError> {
        required("first_name", "First name", &self.first_name)?;
        required("last_name", "Last name", &self.last_name)?;
        valid_email("email", &self.email)?;
        if let Some(g) = self.gender.as_deref().filter(|g| !g.is_empty()) {
            if !GENDERS.contains(&g) {
                return Err(ValidationError::new("gender", "Gender must be male, female or other"));
            }
        }
        if let Some(dob) = self.date_of_birth {
            if dob > Utc::now().date_naive() {
                return Err(ValidationError::new("date_of_birth", "Date of birth cannot be in the future"));
            }
        }
        self.resolve_role(allowed)
    }

    /// Builds a pending member document carrying a one-time credential.
    pub fn into_user(
        self,
        id: Uuid,
        school_id: Uuid,
        role: UserRole,
        temp_password: String,
        now: DateTime<Utc>,
    ) -> User {
        User {
            id,
            email: normalize_email(&self.email),
            role,
            school_id,
            profile: Profile {
                first_name: self.first_name.trim().to_string(),
                last_name: self.last_name.trim().to_string(),
                phone: non_blank(self.phone),
                date_of_birth: self.date_of_birth,
                gender: non_blank(self.gender),
                address: self.address.unwrap_or_default(),
                // Only students sit in a class.
                class_id: self.class_id.filter(|_| role == UserRole::Student),
                avatar: non_blank(self.avatar),
                roll_number: non_blank(self.roll_number),
            },
            parent_ids: self.parent_ids,
            children_ids: self.children_ids,
            employee_id: non_blank(self.employee_id),
            admission_number: non_blank(self.admission_number),
            is_active: true,
            auth_status: Some(AuthStatus::Pending),
            temp_password: Some(temp_password),
            error_log: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Checks the fields of an edit that carry constraints.
pub fn validate_user_patch(patch: &UserPatch) -> Result<(), ValidationError> {
    if let Some(email) = &patch.email {
        valid_email("email", email)?;
    }
    if let Some(v) = &patch.first_name {
        required("first_name", "First name", v)?;
    }
    if let Some(v) = &patch.last_name {
        required("last_name", "Last name", v)?;
    }
    if let Some(g) = patch.gender.as_deref().filter(|g| !g.is_empty()) {
        if !GENDERS.contains(&g) {
            return Err(ValidationError::new("gender", "Gender must be male, female or other"));
        }
    }
    Ok(())
}

// ── Classes ──────────────────────────────────────────────────────────────────

pub const DEFAULT_CLASS_CAPACITY: i32 = 30;
const MAX_CLASS_CAPACITY: i32 = 200;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassForm {
    pub name: String,
    pub grade: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub capacity: Option<i32>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub class_teacher_id: Option<Uuid>,
}

pub fn validate_capacity(capacity: i32) -> Result<(), ValidationError> {
    if !(1..=MAX_CLASS_CAPACITY).contains(&capacity) {
        return Err(ValidationError::new(
            "capacity",
            format!("Capacity must be between 1 and {MAX_CLASS_CAPACITY}"),
        ));
    }
    Ok(())
}

impl ClassForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        required("name", "Class name", &self.name)?;
        required("grade", "Grade", &self.grade)?;
        validate_capacity(self.capacity.unwrap_or(DEFAULT_CLASS_CAPACITY))
    }

    pub fn into_class(self, id: Uuid, school_id: Uuid, now: DateTime<Utc>) -> Class {
        // Trimmed, blank-free, first occurrence wins.
        let mut seen = HashSet::new();
        let subjects = self
            .subjects
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();

        Class {
            id,
            school_id,
            name: self.name.trim().to_string(),
            section: self.section.trim().to_string(),
            grade: self.grade.trim().to_string(),
            capacity: self.capacity.unwrap_or(DEFAULT_CLASS_CAPACITY),
            room: non_blank(self.room),
            description: non_blank(self.description),
            academic_year: non_blank(self.academic_year)
                .unwrap_or_else(|| now.year().to_string()),
            subjects,
            class_teacher_id: self.class_teacher_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn validate_class_patch(patch: &ClassPatch) -> Result<(), ValidationError> {
    if let Some(v) = &patch.name {
        required("name", "Class name", v)?;
    }
    if let Some(v) = &patch.grade {
        required("grade", "Grade", v)?;
    }
    if let Some(capacity) = patch.capacity {
        validate_capacity(capacity)?;
    }
    Ok(())
}

// ── Announcements ────────────────────────────────────────────────────────────

/// Parses audience entries as written on the announcement screen.
/// `all` (or nothing) means everyone; plural and singular role names are
/// both accepted, and `staff` expands to the staff sub-roles.
pub fn parse_audience(entries: &[String]) -> Result<Vec<UserRole>, ValidationError> {
    let mut roles: Vec<UserRole> = Vec::new();
    for entry in entries {
        let entry = entry.trim().to_lowercase();
        let expanded: Vec<UserRole> = match entry.as_str() {
            "all" => return Ok(vec![]),
            "teachers" => vec![UserRole::Teacher],
            "students" => vec![UserRole::Student],
            "parents" => vec![UserRole::Parent],
            "admins" => vec![UserRole::SchoolAdmin, UserRole::SubAdmin],
            "staff" => UserRole::STAFF.to_vec(),
            other => vec![other.parse().map_err(|_| {
                ValidationError::new("target_audience", format!("Unknown audience: {other}"))
            })?],
        };
        for role in expanded {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
    }
    Ok(roles)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnouncementForm {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub target_audience: Vec<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<AnnouncementStatus>,
}

impl AnnouncementForm {
    pub fn validate(&self) -> Result<Vec<UserRole>, ValidationError> {
        required("title", "Title", &self.title)?;
        required("content", "Content", &self.content)?;
        parse_audience(&self.target_audience)
    }

    pub fn into_announcement(
        self,
        id: Uuid,
        school_id: Uuid,
        author_id: Uuid,
        audience: Vec<UserRole>,
        now: DateTime<Utc>,
    ) -> Announcement {
        Announcement {
            id,
            school_id,
            author_id,
            title: self.title.trim().to_string(),
            content: self.content,
            target_audience: audience,
            priority: self.priority.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            publish_date: now,
            created_at: now,
            updated_at: now,
            email_stats: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnouncementEditForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub target_audience: Option<Vec<String>>,
    pub priority: Option<Priority>,
    pub status: Option<AnnouncementStatus>,
}

impl AnnouncementEditForm {
    pub fn into_patch(self) -> Result<AnnouncementPatch, ValidationError> {
        if let Some(v) = &self.title {
            required("title", "Title", v)?;
        }
        if let Some(v) = &self.content {
            required("content", "Content", v)?;
        }
        let target_audience = match &self.target_audience {
            Some(entries) => Some(parse_audience(entries)?),
            None => None,
        };
        Ok(AnnouncementPatch {
            title: self.title.map(|t| t.trim().to_string()),
            content: self.content,
            target_audience,
            priority: self.priority,
            status: self.status,
        })
    }
}

// ── Attendance ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceMark {
    pub student_id: Uuid,
    /// `None` leaves the student unmarked.
    #[serde(default)]
    pub status: Option<AttendanceStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceForm {
    pub class_id: Uuid,
    pub date: NaiveDate,
    #[serde(default)]
    pub marks: Vec<AttendanceMark>,
}

impl AttendanceForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for mark in &self.marks {
            if !seen.insert(mark.student_id) {
                return Err(ValidationError::new(
                    "marks",
                    format!("Student {} is marked more than once", mark.student_id),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_up() -> SignUpForm {
        SignUpForm {
            email: "A@X.com".into(),
            password: "secret1".into(),
            confirm_password: Some("secret1".into()),
            first_name: "Ada".into(),
            last_name: "Admin".into(),
            school_name: Some("Lincoln High".into()),
            ..Default::default()
        }
    }

    #[test]
    fn sign_up_requires_matching_passwords_of_six_chars() {
        assert!(sign_up().validate().is_ok());
        assert_eq!(sign_up().email(), "a@x.com");

        let short = SignUpForm { password: "abc".into(), confirm_password: None, ..sign_up() };
        assert_eq!(short.validate().unwrap_err().field, "password");

        let mismatch = SignUpForm { confirm_password: Some("secret2".into()), ..sign_up() };
        assert_eq!(mismatch.validate().unwrap_err().field, "confirm_password");
    }

    #[test]
    fn admin_sign_up_needs_a_school_name_and_others_need_a_school() {
        let nameless = SignUpForm { school_name: Some("  ".into()), ..sign_up() };
        assert_eq!(nameless.validate().unwrap_err().field, "school_name");

        let teacher = SignUpForm { role: Some(UserRole::Teacher), school_name: None, ..sign_up() };
        assert_eq!(teacher.validate().unwrap_err().field, "school_id");
    }

    #[test]
    fn email_shape_is_checked() {
        for bad in ["", "nobody", "a@b", "@x.com", "a b@x.com"] {
            assert!(valid_email("email", bad).is_err(), "{bad} accepted");
        }
        assert!(valid_email("email", "a@x.com").is_ok());
    }

    #[test]
    fn audience_accepts_plurals_and_all() {
        let parse = |v: &[&str]| parse_audience(&v.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        assert_eq!(parse(&["all"]).unwrap(), vec![]);
        assert_eq!(parse(&[]).unwrap(), vec![]);
        assert_eq!(parse(&["teachers", "teacher"]).unwrap(), vec![UserRole::Teacher]);
        assert_eq!(parse(&["staff"]).unwrap(), UserRole::STAFF.to_vec());
        assert!(parse(&["aliens"]).is_err());
    }

    #[test]
    fn user_form_role_must_be_allowed_on_the_screen() {
        let form = UserForm {
            email: "t@x.com".into(),
            first_name: "T".into(),
            last_name: "Teacher".into(),
            ..Default::default()
        };
        assert_eq!(form.validate(&[UserRole::Teacher]).unwrap(), UserRole::Teacher);

        let admin = UserForm { role: Some(UserRole::SchoolAdmin), ..form };
        assert_eq!(admin.validate(&[UserRole::Teacher]).unwrap_err().field, "role");
    }

    #[test]
    fn new_member_is_pending_with_a_credential() {
        let now = Utc::now();
        let form = UserForm {
            email: " S@X.com ".into(),
            first_name: "Sam".into(),
            last_name: "Student".into(),
            class_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let user = form.into_user(Uuid::new_v4(), Uuid::new_v4(), UserRole::Student, "pw".into(), now);
        assert_eq!(user.email, "s@x.com");
        assert_eq!(user.auth_status, Some(AuthStatus::Pending));
        assert_eq!(user.temp_password.as_deref(), Some("pw"));
        assert!(user.profile.class_id.is_some());
        assert!(user.is_active);
    }

    #[test]
    fn class_subjects_are_deduplicated() {
        let form = ClassForm {
            name: "5A".into(),
            grade: "5".into(),
            subjects: vec!["Math".into(), " Math ".into(), "".into(), "Art".into()],
            ..Default::default()
        };
        assert!(form.validate().is_ok());
        let class = form.into_class(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        assert_eq!(class.subjects, vec!["Math".to_string(), "Art".to_string()]);
        assert_eq!(class.capacity, DEFAULT_CLASS_CAPACITY);
        assert!(validate_capacity(0).is_err());
    }

    #[test]
    fn announcement_edit_parses_audience_and_rejects_blank_titles() {
        let patch = AnnouncementEditForm {
            target_audience: Some(vec!["parents".into()]),
            ..Default::default()
        }
        .into_patch()
        .unwrap();
        assert_eq!(patch.target_audience, Some(vec![UserRole::Parent]));
        assert!(patch.title.is_none());

        let blank = AnnouncementEditForm { title: Some(" ".into()), ..Default::default() };
        assert_eq!(blank.into_patch().unwrap_err().field, "title");
    }

    #[test]
    fn duplicate_attendance_marks_are_rejected() {
        let student = Uuid::new_v4();
        let mark = AttendanceMark { student_id: student, status: Some(AttendanceStatus::Present), notes: None };
        let form = AttendanceForm {
            class_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
            marks: vec![mark.clone(), mark],
        };
        assert_eq!(form.validate().unwrap_err().field, "marks");
    }
}
