use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SchoolAdmin,
    SubAdmin,
    Teacher,
    Student,
    Parent,
    Receptionist,
    Accountant,
    Librarian,
}

impl UserRole {
    pub const ALL: [UserRole; 8] = [
        UserRole::SchoolAdmin,
        UserRole::SubAdmin,
        UserRole::Teacher,
        UserRole::Student,
        UserRole::Parent,
        UserRole::Receptionist,
        UserRole::Accountant,
        UserRole::Librarian,
    ];

    /// Staff sub-roles managed from the staff page.
    pub const STAFF: [UserRole; 3] = [
        UserRole::Receptionist,
        UserRole::Accountant,
        UserRole::Librarian,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SchoolAdmin => "school_admin",
            UserRole::SubAdmin => "sub_admin",
            UserRole::Teacher => "teacher",
            UserRole::Student => "student",
            UserRole::Parent => "parent",
            UserRole::Receptionist => "receptionist",
            UserRole::Accountant => "accountant",
            UserRole::Librarian => "librarian",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UserRole::SchoolAdmin => "School Administrator",
            UserRole::SubAdmin => "Sub Administrator",
            UserRole::Teacher => "Teacher",
            UserRole::Student => "Student",
            UserRole::Parent => "Parent/Guardian",
            UserRole::Receptionist => "Receptionist",
            UserRole::Accountant => "Accountant",
            UserRole::Librarian => "Librarian",
        }
    }

    /// Roles allowed to run tenant-wide administrative operations.
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::SchoolAdmin | UserRole::SubAdmin)
    }

    pub fn is_staff(&self) -> bool {
        Self::STAFF.contains(self)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserRole::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown role: {s}"))
    }
}

/// Provisioning state of a user created from the admin panel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Pending,
    Complete,
    Error,
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Pending => "pending",
            AuthStatus::Complete => "complete",
            AuthStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for AuthStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AuthStatus::Pending),
            "complete" => Ok(AuthStatus::Complete),
            "error" => Ok(AuthStatus::Error),
            _ => Err(anyhow::anyhow!("Unknown auth status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub zip_code: String,
}

/// Embedded profile document, stored as JSONB.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Address,
    /// Class reference, students only.
    #[serde(default)]
    pub class_id: Option<Uuid>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub roll_number: Option<String>,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub school_id: Uuid,
    pub profile: Profile,
    #[serde(default)]
    pub parent_ids: Vec<Uuid>,
    #[serde(default)]
    pub children_ids: Vec<Uuid>,
    pub employee_id: Option<String>,
    pub admission_number: Option<String>,
    pub is_active: bool,
    pub auth_status: Option<AuthStatus>,
    /// One-time credential, cleared once the login has been provisioned.
    #[serde(skip_serializing)]
    pub temp_password: Option<String>,
    pub error_log: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        self.profile.full_name()
    }
}

/// Partial update of a user document. Only provided fields are merged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<Address>,
    pub class_id: Option<Uuid>,
    pub avatar: Option<String>,
    pub roll_number: Option<String>,
    pub employee_id: Option<String>,
    pub admission_number: Option<String>,
    pub parent_ids: Option<Vec<Uuid>>,
    pub children_ids: Option<Vec<Uuid>>,
    pub is_active: Option<bool>,
}

impl UserPatch {
    pub fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone.is_none()
            && self.date_of_birth.is_none()
            && self.gender.is_none()
            && self.address.is_none()
            && self.class_id.is_none()
            && self.avatar.is_none()
            && self.roll_number.is_none()
            && self.employee_id.is_none()
            && self.admission_number.is_none()
            && self.parent_ids.is_none()
            && self.children_ids.is_none()
            && self.is_active.is_none()
    }

    /// Merge into `user` and bump `updated_at`.
    pub fn apply(&self, user: &mut User, now: DateTime<Utc>) {
        if let Some(v) = &self.email {
            user.email = v.clone();
        }
        let p = &mut user.profile;
        if let Some(v) = &self.first_name {
            p.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            p.last_name = v.clone();
        }
        if let Some(v) = &self.phone {
            p.phone = Some(v.clone());
        }
        if let Some(v) = self.date_of_birth {
            p.date_of_birth = Some(v);
        }
        if let Some(v) = &self.gender {
            p.gender = Some(v.clone());
        }
        if let Some(v) = &self.address {
            p.address = v.clone();
        }
        if let Some(v) = self.class_id {
            p.class_id = Some(v);
        }
        if let Some(v) = &self.avatar {
            p.avatar = Some(v.clone());
        }
        if let Some(v) = &self.roll_number {
            p.roll_number = Some(v.clone());
        }
        if let Some(v) = &self.employee_id {
            user.employee_id = Some(v.clone());
        }
        if let Some(v) = &self.admission_number {
            user.admission_number = Some(v.clone());
        }
        if let Some(v) = &self.parent_ids {
            user.parent_ids = v.clone();
        }
        if let Some(v) = &self.children_ids {
            user.children_ids = v.clone();
        }
        if let Some(v) = self.is_active {
            user.is_active = v;
        }
        user.updated_at = now;
    }
}

/// Query filter for tenant member lists.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Empty means every role.
    pub roles: Vec<UserRole>,
    pub class_id: Option<Uuid>,
    pub include_inactive: bool,
}

impl UserFilter {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn roles(roles: &[UserRole]) -> Self {
        Self {
            roles: roles.to_vec(),
            ..Default::default()
        }
    }

    pub fn matches(&self, user: &User) -> bool {
        (self.include_inactive || user.is_active)
            && (self.roles.is_empty() || self.roles.contains(&user.role))
            && self
                .class_id
                .map_or(true, |c| user.profile.class_id == Some(c))
    }
}
