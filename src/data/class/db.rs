use chrono::{NaiveTime, Utc};
use serde::Deserialize;
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Class, ClassStatus, ClassWithRelations, Schedule};
use crate::data::subject;
use crate::data::subject::db::SubjectDbExt;
use crate::data::subject::SubjectRef;
use crate::data::user::db::UserDbExt;
use crate::data::user::UserRef;
use crate::db::{unique_violation_on, Db};
use crate::middleware::paging::Paging;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::util::{invite_code, patch_field};
use crate::validate::Violations;

pub const DEFAULT_CAPACITY: i64 = 50;

/// Random invite codes collide rarely; retry a few times before giving up.
const INVITE_CODE_ATTEMPTS: usize = 3;

pub(crate) const CLASS_REL_SELECT: &str = "\
    SELECT c.id, c.name, c.invite_code, c.subject_id, c.teacher_id, c.description, \
    c.banner_url, c.banner_image_ref, c.capacity, c.status, c.schedules, \
    c.created_at, c.updated_at, \
    s.code AS subject_code, s.name AS subject_name, s.department_id AS subject_department_id, \
    u.name AS teacher_name, u.email AS teacher_email, u.role AS teacher_role \
    FROM classes c \
    JOIN subjects s ON s.id = c.subject_id \
    JOIN users u ON u.id = c.teacher_id";

pub mod problem {
    use uuid::Uuid;

    use crate::resp::problem::{problems, Problem};

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("class").insert_str("id", id).take()
    }

    /// Lookup miss by invite code reads the same as a miss by id.
    #[inline]
    pub fn invite_code_not_found(code: &str) -> Problem {
        problems::not_found("class")
            .insert_str("inviteCode", code)
            .take()
    }

    #[inline]
    pub fn teacher_not_found(id: &str) -> Problem {
        problems::not_found("teacher").insert_str("id", id).take()
    }
}

/// Joined row behind [`ClassWithRelations`]; also used by the
/// department-scoped class listing.
#[derive(Debug, FromRow)]
pub(crate) struct ClassRelRow {
    #[sqlx(flatten)]
    class: Class,
    subject_code: String,
    subject_name: String,
    subject_department_id: Uuid,
    teacher_name: String,
    teacher_email: String,
    teacher_role: Role,
}

impl From<ClassRelRow> for ClassWithRelations {
    fn from(row: ClassRelRow) -> Self {
        ClassWithRelations {
            subject: SubjectRef {
                id: row.class.subject_id,
                code: row.subject_code,
                name: row.subject_name,
                department_id: row.subject_department_id,
            },
            teacher: UserRef {
                id: row.class.teacher_id.clone(),
                name: row.teacher_name,
                email: row.teacher_email,
                role: row.teacher_role,
            },
            class: row.class,
        }
    }
}

fn check_schedules(violations: &mut Violations, schedules: &[Schedule]) {
    for (index, slot) in schedules.iter().enumerate() {
        if NaiveTime::parse_from_str(&slot.start_time, "%H:%M").is_err() {
            violations.push(format!("schedules[{index}].startTime"), "must be a HH:MM time");
        }
        if NaiveTime::parse_from_str(&slot.end_time, "%H:%M").is_err() {
            violations.push(format!("schedules[{index}].endTime"), "must be a HH:MM time");
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassCreateData {
    pub name: String,
    pub subject_id: Uuid,
    pub teacher_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub banner_image_ref: Option<String>,
    /// Defaults to 50.
    #[serde(default)]
    pub capacity: Option<i64>,
    /// Defaults to `active`.
    #[serde(default)]
    pub status: Option<ClassStatus>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl ClassCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        violations.require_non_empty("name", &self.name);
        violations.require_non_empty("teacherId", &self.teacher_id);
        if let Some(capacity) = self.capacity {
            if capacity < 1 {
                violations.push("capacity", "must be at least 1");
            }
        }
        check_schedules(&mut violations, &self.schedules);
        violations.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassUpdateData {
    pub name: Option<String>,
    pub subject_id: Option<Uuid>,
    pub teacher_id: Option<String>,
    /// Absent field keeps the stored value, explicit `null` clears it.
    #[serde(default, deserialize_with = "patch_field")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    #[schema(value_type = Option<String>)]
    pub banner_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    #[schema(value_type = Option<String>)]
    pub banner_image_ref: Option<Option<String>>,
    pub capacity: Option<i64>,
    pub status: Option<ClassStatus>,
    pub schedules: Option<Vec<Schedule>>,
}

impl ClassUpdateData {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.subject_id.is_none()
            && self.teacher_id.is_none()
            && self.description.is_none()
            && self.banner_url.is_none()
            && self.banner_image_ref.is_none()
            && self.capacity.is_none()
            && self.status.is_none()
            && self.schedules.is_none()
    }

    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        if self.is_empty() {
            violations.push("body", "must contain at least one updatable field");
        }
        violations.require_non_empty_opt("name", self.name.as_deref());
        violations.require_non_empty_opt("teacherId", self.teacher_id.as_deref());
        if let Some(capacity) = self.capacity {
            if capacity < 1 {
                violations.push("capacity", "must be at least 1");
            }
        }
        if let Some(schedules) = &self.schedules {
            check_schedules(&mut violations, schedules);
        }
        violations.finish()
    }
}

/// Filters of the class listing.
#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    pub subject_id: Option<Uuid>,
    pub teacher_id: Option<String>,
    pub status: Option<ClassStatus>,
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &ClassFilter) {
    query.push(" WHERE 1 = 1");

    if let Some(subject_id) = filter.subject_id {
        query.push(" AND c.subject_id = ").push_bind(subject_id);
    }
    if let Some(teacher_id) = &filter.teacher_id {
        query.push(" AND c.teacher_id = ").push_bind(teacher_id.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND c.status = ").push_bind(status);
    }
}

#[allow(async_fn_in_trait)]
pub trait ClassDbExt {
    async fn get_class(&self, id: Uuid) -> Result<Option<ClassWithRelations>, Problem>;

    async fn find_class_by_invite_code(
        &self,
        code: &str,
    ) -> Result<Option<ClassWithRelations>, Problem>;

    async fn list_classes(
        &self,
        filter: &ClassFilter,
        paging: Paging,
    ) -> Result<(Vec<ClassWithRelations>, i64), Problem>;

    /// Inserts a class under a fresh invite code, regenerating on collision.
    async fn create_class(&self, data: ClassCreateData) -> Result<ClassWithRelations, Problem>;

    async fn update_class(
        &self,
        id: Uuid,
        data: ClassUpdateData,
    ) -> Result<ClassWithRelations, Problem>;

    /// Deletes the class; its enrollments cascade.
    async fn delete_class(&self, id: Uuid) -> Result<(), Problem>;
}

impl ClassDbExt for Db {
    async fn get_class(&self, id: Uuid) -> Result<Option<ClassWithRelations>, Problem> {
        sqlx::query_as::<_, ClassRelRow>(&format!("{CLASS_REL_SELECT} WHERE c.id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map(|row| row.map(ClassWithRelations::from))
            .map_err(Problem::from)
    }

    async fn find_class_by_invite_code(
        &self,
        code: &str,
    ) -> Result<Option<ClassWithRelations>, Problem> {
        sqlx::query_as::<_, ClassRelRow>(&format!("{CLASS_REL_SELECT} WHERE c.invite_code = ?"))
            .bind(code)
            .fetch_optional(self.pool())
            .await
            .map(|row| row.map(ClassWithRelations::from))
            .map_err(Problem::from)
    }

    async fn list_classes(
        &self,
        filter: &ClassFilter,
        paging: Paging,
    ) -> Result<(Vec<ClassWithRelations>, i64), Problem> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM classes c");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(Problem::from)?;

        let mut query = QueryBuilder::<Sqlite>::new(CLASS_REL_SELECT);
        push_filters(&mut query, filter);
        query.push(" ORDER BY c.created_at DESC, c.id DESC LIMIT ");
        query.push_bind(paging.limit());
        query.push(" OFFSET ");
        query.push_bind(paging.offset());

        let classes = query
            .build_query_as::<ClassRelRow>()
            .fetch_all(self.pool())
            .await
            .map_err(Problem::from)?;

        Ok((
            classes.into_iter().map(ClassWithRelations::from).collect(),
            total,
        ))
    }

    async fn create_class(&self, data: ClassCreateData) -> Result<ClassWithRelations, Problem> {
        if self.get_subject(data.subject_id).await?.is_none() {
            return Err(subject::db::problem::not_found(data.subject_id));
        }
        if self.get_user(&data.teacher_id).await?.is_none() {
            return Err(problem::teacher_not_found(&data.teacher_id));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let capacity = data.capacity.unwrap_or(DEFAULT_CAPACITY);
        let status = data.status.unwrap_or_default();
        let schedules = Json(data.schedules.clone());

        for _ in 0..INVITE_CODE_ATTEMPTS {
            let code = invite_code();
            let result = sqlx::query(
                "INSERT INTO classes (id, name, invite_code, subject_id, teacher_id, description, \
                 banner_url, banner_image_ref, capacity, status, schedules, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&data.name)
            .bind(&code)
            .bind(data.subject_id)
            .bind(&data.teacher_id)
            .bind(&data.description)
            .bind(&data.banner_url)
            .bind(&data.banner_image_ref)
            .bind(capacity)
            .bind(status)
            .bind(&schedules)
            .bind(now)
            .bind(now)
            .execute(self.pool())
            .await;

            match result {
                Ok(_) => return self.get_class(id).await?.ok_or_else(problems::internal),
                Err(e) if unique_violation_on(&e, "classes.invite_code") => {
                    tracing::warn!("invite code {} already taken, regenerating", code);
                    continue;
                }
                Err(e) => return Err(Problem::from(e)),
            }
        }

        tracing::error!("could not allocate a unique invite code");
        Err(problems::internal())
    }

    async fn update_class(
        &self,
        id: Uuid,
        data: ClassUpdateData,
    ) -> Result<ClassWithRelations, Problem> {
        if self.get_class(id).await?.is_none() {
            return Err(problem::not_found(id));
        }

        if let Some(subject_id) = data.subject_id {
            if self.get_subject(subject_id).await?.is_none() {
                return Err(subject::db::problem::not_found(subject_id));
            }
        }
        if let Some(teacher_id) = &data.teacher_id {
            if self.get_user(teacher_id).await?.is_none() {
                return Err(problem::teacher_not_found(teacher_id));
            }
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE classes SET ");
        let mut set = query.separated(", ");
        if let Some(name) = &data.name {
            set.push("name = ").push_bind_unseparated(name.clone());
        }
        if let Some(subject_id) = data.subject_id {
            set.push("subject_id = ").push_bind_unseparated(subject_id);
        }
        if let Some(teacher_id) = &data.teacher_id {
            set.push("teacher_id = ")
                .push_bind_unseparated(teacher_id.clone());
        }
        if let Some(description) = &data.description {
            set.push("description = ")
                .push_bind_unseparated(description.clone());
        }
        if let Some(banner_url) = &data.banner_url {
            set.push("banner_url = ")
                .push_bind_unseparated(banner_url.clone());
        }
        if let Some(banner_image_ref) = &data.banner_image_ref {
            set.push("banner_image_ref = ")
                .push_bind_unseparated(banner_image_ref.clone());
        }
        if let Some(capacity) = data.capacity {
            set.push("capacity = ").push_bind_unseparated(capacity);
        }
        if let Some(status) = data.status {
            set.push("status = ").push_bind_unseparated(status);
        }
        if let Some(schedules) = &data.schedules {
            set.push("schedules = ")
                .push_bind_unseparated(Json(schedules.clone()));
        }
        set.push("updated_at = ").push_bind_unseparated(Utc::now());

        query.push(" WHERE id = ").push_bind(id);

        let result = query
            .build()
            .execute(self.pool())
            .await
            .map_err(Problem::from)?;
        if result.rows_affected() == 0 {
            return Err(problem::not_found(id));
        }

        self.get_class(id).await?.ok_or_else(problems::internal)
    }

    async fn delete_class(&self, id: Uuid) -> Result<(), Problem> {
        let result = sqlx::query("DELETE FROM classes WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(Problem::from)?;

        if result.rows_affected() == 0 {
            return Err(problem::not_found(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::enrollment::db::EnrollmentDbExt;
    use crate::testing::{self, fixtures};
    use crate::util::INVITE_CODE_LENGTH;
    use rocket::http::Status;

    #[rocket::async_test]
    async fn create_applies_defaults_and_resolves_relations() {
        let db = testing::memory_db().await;
        let department = fixtures::department(&db, "CS").await;
        let subject = fixtures::subject(&db, department.id, "CS101").await;
        let teacher = fixtures::user(&db, "user_t1", Role::Teacher).await;

        let class = db
            .create_class(ClassCreateData {
                name: "Intro".to_string(),
                subject_id: subject.id,
                teacher_id: teacher.id.clone(),
                description: None,
                banner_url: None,
                banner_image_ref: None,
                capacity: None,
                status: None,
                schedules: vec![],
            })
            .await
            .expect("create");

        assert_eq!(class.class.capacity, DEFAULT_CAPACITY);
        assert_eq!(class.class.status, ClassStatus::Active);
        assert!(class.class.schedules.0.is_empty());
        assert_eq!(class.class.invite_code.len(), INVITE_CODE_LENGTH);
        assert!(class
            .class
            .invite_code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(class.subject.code, "CS101");
        assert_eq!(class.subject.department_id, department.id);
        assert_eq!(class.teacher.id, "user_t1");
    }

    #[rocket::async_test]
    async fn create_requires_existing_subject_and_teacher() {
        let db = testing::memory_db().await;
        let department = fixtures::department(&db, "CS").await;
        let subject = fixtures::subject(&db, department.id, "CS101").await;
        fixtures::user(&db, "user_t1", Role::Teacher).await;

        let data = ClassCreateData {
            name: "Intro".to_string(),
            subject_id: Uuid::new_v4(),
            teacher_id: "user_t1".to_string(),
            description: None,
            banner_url: None,
            banner_image_ref: None,
            capacity: None,
            status: None,
            schedules: vec![],
        };
        let problem = db.create_class(data.clone()).await.unwrap_err();
        assert_eq!(problem.status, Status::NotFound);

        let problem = db
            .create_class(ClassCreateData {
                subject_id: subject.id,
                teacher_id: "user_x".to_string(),
                ..data
            })
            .await
            .unwrap_err();
        assert_eq!(problem.status, Status::NotFound);
    }

    #[rocket::async_test]
    async fn schedules_keep_their_order() {
        let db = testing::memory_db().await;
        let department = fixtures::department(&db, "CS").await;
        let subject = fixtures::subject(&db, department.id, "CS101").await;
        let teacher = fixtures::user(&db, "user_t1", Role::Teacher).await;

        let slots = vec![
            Schedule {
                day: crate::data::class::ScheduleDay::Wednesday,
                start_time: "14:00".to_string(),
                end_time: "15:30".to_string(),
            },
            Schedule {
                day: crate::data::class::ScheduleDay::Monday,
                start_time: "09:00".to_string(),
                end_time: "10:30".to_string(),
            },
        ];

        let created = db
            .create_class(ClassCreateData {
                name: "Intro".to_string(),
                subject_id: subject.id,
                teacher_id: teacher.id.clone(),
                description: None,
                banner_url: None,
                banner_image_ref: None,
                capacity: None,
                status: None,
                schedules: slots.clone(),
            })
            .await
            .expect("create");

        let fetched = db
            .get_class(created.class.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(fetched.class.schedules.0, slots);
    }

    #[rocket::async_test]
    async fn listing_filters_by_teacher_and_status() {
        let db = testing::memory_db().await;
        let department = fixtures::department(&db, "CS").await;
        let subject = fixtures::subject(&db, department.id, "CS101").await;
        let first = fixtures::user(&db, "user_t1", Role::Teacher).await;
        let second = fixtures::user(&db, "user_t2", Role::Teacher).await;

        let archived = fixtures::class(&db, subject.id, &first.id, "Old").await;
        db.update_class(
            archived.class.id,
            ClassUpdateData {
                status: Some(ClassStatus::Archived),
                ..Default::default()
            },
        )
        .await
        .expect("archive");
        fixtures::class(&db, subject.id, &first.id, "Current").await;
        fixtures::class(&db, subject.id, &second.id, "Other").await;

        let filter = ClassFilter {
            teacher_id: Some("user_t1".to_string()),
            ..Default::default()
        };
        let (_, total) = db.list_classes(&filter, Paging::default()).await.expect("list");
        assert_eq!(total, 2);

        let filter = ClassFilter {
            teacher_id: Some("user_t1".to_string()),
            status: Some(ClassStatus::Active),
            ..Default::default()
        };
        let (found, total) = db.list_classes(&filter, Paging::default()).await.expect("list");
        assert_eq!(total, 1);
        assert_eq!(found[0].class.name, "Current");
    }

    #[rocket::async_test]
    async fn duplicate_invite_codes_are_classified_for_the_retry_loop() {
        let db = testing::memory_db().await;
        let department = fixtures::department(&db, "CS").await;
        let subject = fixtures::subject(&db, department.id, "CS101").await;
        let teacher = fixtures::user(&db, "user_t1", Role::Teacher).await;
        let class = fixtures::class(&db, subject.id, &teacher.id, "Intro").await;

        let now = Utc::now();
        let err = sqlx::query(
            "INSERT INTO classes (id, name, invite_code, subject_id, teacher_id, description, \
             banner_url, banner_image_ref, capacity, status, schedules, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, NULL, NULL, NULL, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind("Clone")
        .bind(&class.class.invite_code)
        .bind(subject.id)
        .bind(&teacher.id)
        .bind(DEFAULT_CAPACITY)
        .bind(ClassStatus::Active)
        .bind(Json(Vec::<Schedule>::new()))
        .bind(now)
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap_err();

        assert!(unique_violation_on(&err, "classes.invite_code"));
    }

    #[rocket::async_test]
    async fn update_patches_only_the_provided_fields() {
        let db = testing::memory_db().await;
        let department = fixtures::department(&db, "CS").await;
        let subject = fixtures::subject(&db, department.id, "CS101").await;
        let teacher = fixtures::user(&db, "user_t1", Role::Teacher).await;

        let created = db
            .create_class(ClassCreateData {
                name: "Intro".to_string(),
                subject_id: subject.id,
                teacher_id: teacher.id.clone(),
                description: Some("first run".to_string()),
                banner_url: None,
                banner_image_ref: None,
                capacity: Some(30),
                status: None,
                schedules: vec![],
            })
            .await
            .expect("create");

        let patch: ClassUpdateData =
            serde_json::from_value(serde_json::json!({ "status": "inactive", "description": null }))
                .expect("deserialize");
        let updated = db.update_class(created.class.id, patch).await.expect("update");

        assert_eq!(updated.class.status, ClassStatus::Inactive);
        assert_eq!(updated.class.description, None);
        // Untouched fields survive the patch.
        assert_eq!(updated.class.capacity, 30);
        assert_eq!(updated.class.name, "Intro");
        assert_eq!(updated.class.invite_code, created.class.invite_code);
    }

    #[rocket::async_test]
    async fn deleting_a_class_removes_its_enrollments() {
        let db = testing::memory_db().await;
        let department = fixtures::department(&db, "CS").await;
        let subject = fixtures::subject(&db, department.id, "CS101").await;
        let teacher = fixtures::user(&db, "user_t1", Role::Teacher).await;
        let student = fixtures::user(&db, "user_s1", Role::Student).await;
        let class = fixtures::class(&db, subject.id, &teacher.id, "Intro").await;
        fixtures::enrollment(&db, &student.id, class.class.id).await;

        db.delete_class(class.class.id).await.expect("delete");

        let enrollments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments")
            .fetch_one(db.pool())
            .await
            .expect("count");
        assert_eq!(enrollments, 0);
        assert!(db
            .find_enrollment_pair(&student.id, class.class.id)
            .await
            .expect("pair lookup")
            .is_none());
    }

    #[test]
    fn capacity_and_schedule_violations_are_reported_together() {
        let data = ClassCreateData {
            name: "".to_string(),
            subject_id: Uuid::new_v4(),
            teacher_id: "user_t1".to_string(),
            description: None,
            banner_url: None,
            banner_image_ref: None,
            capacity: Some(0),
            status: None,
            schedules: vec![Schedule {
                day: crate::data::class::ScheduleDay::Friday,
                start_time: "9am".to_string(),
                end_time: "25:00".to_string(),
            }],
        };

        let problem = data.validate().unwrap_err();
        assert_eq!(problem.error, "validation_error");
        let details = problem.body.get("details").expect("details");
        // name, capacity, startTime and endTime all at once.
        assert_eq!(details.as_array().map(Vec::len), Some(4));
    }
}
