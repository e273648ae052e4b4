use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::class::Class;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            _ => Err(anyhow::anyhow!("Unknown attendance status: {s}")),
        }
    }
}

/// One student's mark for one class on one day.
/// Unique on (class_id, student_id, date).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub school_id: Uuid,
    pub class_id: Uuid,
    pub student_id: Uuid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub notes: String,
    pub marked_by: Uuid,
    pub marked_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn key(&self) -> (Uuid, Uuid, NaiveDate) {
        (self.class_id, self.student_id, self.date)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub student_id: Uuid,
    pub name: String,
    pub roll_number: Option<String>,
    pub avatar: Option<String>,
}

/// What the attendance page shows for a (class, date) selection.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceSheet {
    pub class: Class,
    pub date: NaiveDate,
    pub roster: Vec<RosterEntry>,
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceSaveSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}
