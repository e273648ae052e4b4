use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::{
    error::{StoreError, ValidationError},
    forms::AttendanceForm,
    models::{
        attendance::{AttendanceRecord, AttendanceSaveSummary, AttendanceSheet, RosterEntry},
        auth::AuthenticatedUser,
        class::Class,
        user::{UserFilter, UserRole},
    },
    services::dashboard::MutationError,
    store::{Store, UpsertOutcome},
};

pub struct AttendanceService;

impl AttendanceService {
    async fn class_in_school(store: &dyn Store, school_id: Uuid, class_id: Uuid) -> Result<Class, StoreError> {
        match store.get_class(class_id).await? {
            Some(c) if c.school_id == school_id => Ok(c),
            _ => Err(StoreError::NotFound("Class")),
        }
    }

    async fn roster(store: &dyn Store, class: &Class) -> Result<Vec<RosterEntry>, StoreError> {
        let filter = UserFilter {
            roles: vec![UserRole::Student],
            class_id: Some(class.id),
            include_inactive: false,
        };
        let mut students = store.list_users(class.school_id, &filter).await?;
        students.sort_by(|a, b| {
            a.profile
                .roll_number
                .cmp(&b.profile.roll_number)
                .then_with(|| a.display_name().cmp(&b.display_name()))
        });
        Ok(students
            .into_iter()
            .map(|s| RosterEntry {
                student_id: s.id,
                name: s.display_name(),
                roll_number: s.profile.roll_number,
                avatar: s.profile.avatar,
            })
            .collect())
    }

    /// Roster of active students plus whatever has been marked for the day.
    pub async fn load_sheet(
        store: &dyn Store,
        school_id: Uuid,
        class_id: Uuid,
        date: NaiveDate,
    ) -> Result<AttendanceSheet, StoreError> {
        let class = Self::class_in_school(store, school_id, class_id).await?;
        let roster = Self::roster(store, &class).await?;
        let records = store.list_attendance(class_id, date).await?;
        Ok(AttendanceSheet {
            class,
            date,
            roster,
            records,
        })
    }

    /// Upserts one record per marked student. Unmarked students are skipped;
    /// existing records for them are left as they are.
    pub async fn save(
        store: &dyn Store,
        marker: &AuthenticatedUser,
        form: &AttendanceForm,
    ) -> Result<AttendanceSaveSummary, MutationError> {
        form.validate()?;
        let class = Self::class_in_school(store, marker.school_id, form.class_id).await?;
        let roster: HashSet<Uuid> = Self::roster(store, &class)
            .await?
            .into_iter()
            .map(|r| r.student_id)
            .collect();
        if let Some(stranger) = form.marks.iter().find(|m| !roster.contains(&m.student_id)) {
            return Err(ValidationError::new(
                "marks",
                format!("Student {} is not on the roster of {}", stranger.student_id, class.name),
            )
            .into());
        }

        let mut summary = AttendanceSaveSummary {
            inserted: 0,
            updated: 0,
            skipped: 0,
        };
        let now = Utc::now();
        for mark in &form.marks {
            let Some(status) = mark.status else {
                summary.skipped += 1;
                continue;
            };
            let record = AttendanceRecord {
                id: Uuid::new_v4(),
                school_id: class.school_id,
                class_id: class.id,
                student_id: mark.student_id,
                date: form.date,
                status,
                notes: mark.notes.clone().unwrap_or_default(),
                marked_by: marker.user_id,
                marked_at: now,
                created_at: now,
                updated_at: now,
            };
            match store.upsert_attendance(&record).await? {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
            }
        }
        // Roster students with no mark in the request count as skipped too.
        summary.skipped += roster.len() - form.marks.len();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::forms::{AttendanceMark, ClassForm, UserForm};
    use crate::models::attendance::AttendanceStatus;
    use crate::services::dashboard::{Classes, MemberKind, Members, Resource};
    use crate::store::memory::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        teacher: AuthenticatedUser,
        class: Class,
        students: Vec<Uuid>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let school_id = Uuid::new_v4();
        let class = Classes { store: store.clone(), school_id, include_inactive: false }
            .create(ClassForm { name: "5A".into(), grade: "5".into(), ..Default::default() })
            .await
            .unwrap();
        let members = Members {
            store: store.clone(),
            school_id,
            kind: MemberKind::Students,
            include_inactive: false,
        };
        let mut students = vec![];
        for i in 0..3 {
            let s = members
                .create(UserForm {
                    email: format!("s{i}@x.com"),
                    first_name: format!("S{i}"),
                    last_name: "Student".into(),
                    class_id: Some(class.id),
                    ..Default::default()
                })
                .await
                .unwrap();
            students.push(s.id);
        }
        let teacher = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            school_id,
            role: UserRole::Teacher,
            session_id: Uuid::new_v4(),
        };
        Fixture { store, teacher, class, students }
    }

    fn form(f: &Fixture, statuses: &[Option<AttendanceStatus>]) -> AttendanceForm {
        AttendanceForm {
            class_id: f.class.id,
            date: NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
            marks: f
                .students
                .iter()
                .zip(statuses)
                .map(|(id, status)| AttendanceMark { student_id: *id, status: *status, notes: None })
                .collect(),
        }
    }

    #[tokio::test]
    async fn saving_twice_keeps_one_record_per_student() {
        let f = fixture().await;
        let marks = form(&f, &[Some(AttendanceStatus::Present), Some(AttendanceStatus::Absent), None]);

        let first = AttendanceService::save(f.store.as_ref(), &f.teacher, &marks).await.unwrap();
        assert_eq!((first.inserted, first.updated, first.skipped), (2, 0, 1));

        let second = AttendanceService::save(f.store.as_ref(), &f.teacher, &marks).await.unwrap();
        assert_eq!((second.inserted, second.updated, second.skipped), (0, 2, 1));
        assert_eq!(f.store.attendance_count(), 2);

        let sheet = AttendanceService::load_sheet(f.store.as_ref(), f.teacher.school_id, f.class.id, marks.date)
            .await
            .unwrap();
        assert_eq!(sheet.roster.len(), 3);
        assert_eq!(sheet.records.len(), 2);
    }

    #[tokio::test]
    async fn unmarking_a_student_leaves_the_old_record() {
        let f = fixture().await;
        let marked = form(&f, &[Some(AttendanceStatus::Late)]);
        AttendanceService::save(f.store.as_ref(), &f.teacher, &marked).await.unwrap();
        let unmarked = form(&f, &[None]);
        AttendanceService::save(f.store.as_ref(), &f.teacher, &unmarked).await.unwrap();

        let records = f.store.list_attendance(f.class.id, marked.date).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn marks_for_students_off_the_roster_are_rejected() {
        let f = fixture().await;
        let mut marks = form(&f, &[Some(AttendanceStatus::Present)]);
        marks.marks.push(AttendanceMark {
            student_id: Uuid::new_v4(),
            status: Some(AttendanceStatus::Present),
            notes: None,
        });
        let err = AttendanceService::save(f.store.as_ref(), &f.teacher, &marks).await.unwrap_err();
        assert!(matches!(err, MutationError::Validation(_)));
        assert_eq!(f.store.attendance_count(), 0);
    }

    #[tokio::test]
    async fn other_schools_cannot_see_the_class() {
        let f = fixture().await;
        let err = AttendanceService::load_sheet(
            f.store.as_ref(),
            Uuid::new_v4(),
            f.class.id,
            NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
