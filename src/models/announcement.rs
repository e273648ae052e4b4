use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserRole;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(anyhow::anyhow!("Unknown priority: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementStatus {
    Draft,
    #[default]
    Published,
    Archived,
}

impl AnnouncementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnouncementStatus::Draft => "draft",
            AnnouncementStatus::Published => "published",
            AnnouncementStatus::Archived => "archived",
        }
    }
}

impl std::str::FromStr for AnnouncementStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AnnouncementStatus::Draft),
            "published" => Ok(AnnouncementStatus::Published),
            "archived" => Ok(AnnouncementStatus::Archived),
            _ => Err(anyhow::anyhow!("Unknown announcement status: {s}")),
        }
    }
}

/// Aggregate written back once the announcement emails have gone out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EmailStats {
    pub total_sent: usize,
    pub successful: usize,
    pub failed: usize,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    pub id: Uuid,
    pub school_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    /// Empty means everyone in the school.
    pub target_audience: Vec<UserRole>,
    pub priority: Priority,
    pub status: AnnouncementStatus,
    pub publish_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub email_stats: Option<EmailStats>,
}

impl Announcement {
    pub fn addresses(&self, role: UserRole) -> bool {
        self.target_audience.is_empty() || self.target_audience.contains(&role)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnouncementPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub target_audience: Option<Vec<UserRole>>,
    pub priority: Option<Priority>,
    pub status: Option<AnnouncementStatus>,
}

impl AnnouncementPatch {
    pub fn apply(&self, a: &mut Announcement, now: DateTime<Utc>) {
        if let Some(v) = &self.title {
            a.title = v.clone();
        }
        if let Some(v) = &self.content {
            a.content = v.clone();
        }
        if let Some(v) = &self.target_audience {
            a.target_audience = v.clone();
        }
        if let Some(v) = self.priority {
            a.priority = v;
        }
        if let Some(v) = self.status {
            a.status = v;
        }
        a.updated_at = now;
    }
}

/// List row with the author's display name resolved.
#[derive(Debug, Clone, Serialize)]
pub struct AnnouncementWithAuthor {
    #[serde(flatten)]
    pub announcement: Announcement,
    pub author_name: Option<String>,
}
