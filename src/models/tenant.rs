use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Basic,
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Premium => "premium",
        }
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "basic" => Ok(SubscriptionTier::Basic),
            "premium" => Ok(SubscriptionTier::Premium),
            _ => Err(anyhow::anyhow!("Unknown subscription tier: {s}")),
        }
    }
}

/// Per-school feature flags, stored as JSONB.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchoolSettings {
    pub attendance_enabled: bool,
    pub announcements_enabled: bool,
    pub email_notifications: bool,
    pub parent_portal: bool,
}

impl Default for SchoolSettings {
    fn default() -> Self {
        Self {
            attendance_enabled: true,
            announcements_enabled: true,
            email_notifications: true,
            parent_portal: true,
        }
    }
}

/// The tenant record. `id` is the identity of the admin who registered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct School {
    pub id: Uuid,
    pub name: String,
    pub admin_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub settings: SchoolSettings,
    pub subscription: SubscriptionTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchoolPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub settings: Option<SchoolSettings>,
}

impl SchoolPatch {
    pub fn apply(&self, school: &mut School, now: DateTime<Utc>) {
        if let Some(v) = &self.name {
            school.name = v.trim().to_string();
        }
        if let Some(v) = &self.email {
            school.email = v.clone();
        }
        if let Some(v) = &self.phone {
            school.phone = Some(v.clone()).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = &self.address {
            school.address = Some(v.clone()).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = &self.settings {
            school.settings = v.clone();
        }
        school.updated_at = now;
    }
}
