use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserRole;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmailCategory {
    Welcome,
    PasswordReset,
    Announcement,
    BulkNotification,
}

impl EmailCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailCategory::Welcome => "welcome",
            EmailCategory::PasswordReset => "password_reset",
            EmailCategory::Announcement => "announcement",
            EmailCategory::BulkNotification => "bulk_notification",
        }
    }
}

impl std::str::FromStr for EmailCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "welcome" => Ok(EmailCategory::Welcome),
            "password_reset" => Ok(EmailCategory::PasswordReset),
            "announcement" => Ok(EmailCategory::Announcement),
            "bulk_notification" => Ok(EmailCategory::BulkNotification),
            _ => Err(anyhow::anyhow!("Unknown email category: {s}")),
        }
    }
}

/// Append-only audit entry, one per outbound email attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailLog {
    pub id: Uuid,
    /// Tenant the email was sent on behalf of, when known.
    pub school_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub category: EmailCategory,
    pub role: Option<UserRole>,
    pub announcement_id: Option<Uuid>,
    pub subject: Option<String>,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub sent_by: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
}

impl EmailLog {
    pub fn new(category: EmailCategory, email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            school_id: None,
            user_id: None,
            email: email.to_string(),
            category,
            role: None,
            announcement_id: None,
            subject: None,
            success: false,
            message_id: None,
            error: None,
            sent_by: None,
            sent_at: Utc::now(),
        }
    }
}
