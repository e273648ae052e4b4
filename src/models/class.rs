use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Class {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub section: String,
    pub grade: String,
    pub capacity: i32,
    pub room: Option<String>,
    pub description: Option<String>,
    pub academic_year: String,
    pub subjects: Vec<String>,
    /// Homeroom teacher.
    pub class_teacher_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassPatch {
    pub name: Option<String>,
    pub section: Option<String>,
    pub grade: Option<String>,
    pub capacity: Option<i32>,
    pub room: Option<String>,
    pub description: Option<String>,
    pub academic_year: Option<String>,
    pub subjects: Option<Vec<String>>,
    pub class_teacher_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

impl ClassPatch {
    pub fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Default::default()
        }
    }

    pub fn apply(&self, class: &mut Class, now: DateTime<Utc>) {
        if let Some(v) = &self.name {
            class.name = v.clone();
        }
        if let Some(v) = &self.section {
            class.section = v.clone();
        }
        if let Some(v) = &self.grade {
            class.grade = v.clone();
        }
        if let Some(v) = self.capacity {
            class.capacity = v;
        }
        if let Some(v) = &self.room {
            class.room = Some(v.clone());
        }
        if let Some(v) = &self.description {
            class.description = Some(v.clone());
        }
        if let Some(v) = &self.academic_year {
            class.academic_year = v.clone();
        }
        if let Some(v) = &self.subjects {
            class.subjects = v.clone();
        }
        if let Some(v) = self.class_teacher_id {
            class.class_teacher_id = Some(v);
        }
        if let Some(v) = self.is_active {
            class.is_active = v;
        }
        class.updated_at = now;
    }
}
