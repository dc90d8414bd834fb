use chrono::Utc;
use serde::Deserialize;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Enrollment, EnrollmentWithRelations};
use crate::data::class::db::ClassDbExt;
use crate::data::class::{self, ClassRef, ClassStatus};
use crate::data::user;
use crate::data::user::db::UserDbExt;
use crate::data::user::UserRef;
use crate::db::{unique_violation_on, Db};
use crate::middleware::paging::Paging;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::validate::Violations;

const ENROLLMENT_REL_SELECT: &str = "\
    SELECT e.id, e.student_id, e.class_id, e.enrolled_at, e.updated_at, \
    u.name AS student_name, u.email AS student_email, u.role AS student_role, \
    c.name AS class_name, c.invite_code AS class_invite_code, \
    c.subject_id AS class_subject_id, c.teacher_id AS class_teacher_id, \
    c.status AS class_status \
    FROM enrollments e \
    JOIN users u ON u.id = e.student_id \
    JOIN classes c ON c.id = e.class_id";

pub mod problem {
    use uuid::Uuid;

    use crate::resp::problem::{problems, Problem};

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("enrollment").insert_str("id", id).take()
    }

    /// Same response whether the advisory pair check or the store's unique
    /// index catches the duplicate.
    #[inline]
    pub fn already_enrolled(student_id: &str, class_id: Uuid) -> Problem {
        problems::conflict("student is already enrolled in this class")
            .insert_str("studentId", student_id)
            .insert_str("classId", class_id)
            .take()
    }
}

#[derive(Debug, FromRow)]
struct EnrollmentRelRow {
    #[sqlx(flatten)]
    enrollment: Enrollment,
    student_name: String,
    student_email: String,
    student_role: Role,
    class_name: String,
    class_invite_code: String,
    class_subject_id: Uuid,
    class_teacher_id: String,
    class_status: ClassStatus,
}

impl From<EnrollmentRelRow> for EnrollmentWithRelations {
    fn from(row: EnrollmentRelRow) -> Self {
        EnrollmentWithRelations {
            student: UserRef {
                id: row.enrollment.student_id.clone(),
                name: row.student_name,
                email: row.student_email,
                role: row.student_role,
            },
            class: ClassRef {
                id: row.enrollment.class_id,
                name: row.class_name,
                invite_code: row.class_invite_code,
                subject_id: row.class_subject_id,
                teacher_id: row.class_teacher_id,
                status: row.class_status,
            },
            enrollment: row.enrollment,
        }
    }
}

/// Direct create body; the student is always the session identity.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentCreateData {
    pub class_id: Uuid,
}

/// Join body; the class is resolved by its invite code.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentJoinData {
    pub invite_code: String,
}

impl EnrollmentJoinData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        violations.require_non_empty("inviteCode", &self.invite_code);
        violations.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentUpdateData {
    pub student_id: Option<String>,
    pub class_id: Option<Uuid>,
}

impl EnrollmentUpdateData {
    fn is_empty(&self) -> bool {
        self.student_id.is_none() && self.class_id.is_none()
    }

    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        if self.is_empty() {
            violations.push("body", "must contain at least one updatable field");
        }
        violations.require_non_empty_opt("studentId", self.student_id.as_deref());
        violations.finish()
    }
}

/// Filters of the enrollment listing.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentFilter {
    pub class_id: Option<Uuid>,
    pub student_id: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &EnrollmentFilter) {
    query.push(" WHERE 1 = 1");

    if let Some(class_id) = filter.class_id {
        query.push(" AND e.class_id = ").push_bind(class_id);
    }
    if let Some(student_id) = &filter.student_id {
        query.push(" AND e.student_id = ").push_bind(student_id.clone());
    }
}

#[allow(async_fn_in_trait)]
pub trait EnrollmentDbExt {
    async fn get_enrollment(&self, id: Uuid) -> Result<Option<EnrollmentWithRelations>, Problem>;

    /// Advisory duplicate check; the store's unique index has the last word.
    async fn find_enrollment_pair(
        &self,
        student_id: &str,
        class_id: Uuid,
    ) -> Result<Option<Enrollment>, Problem>;

    async fn list_enrollments(
        &self,
        filter: &EnrollmentFilter,
        paging: Paging,
    ) -> Result<(Vec<EnrollmentWithRelations>, i64), Problem>;

    /// Enrolls `student_id` into an already resolved class. Callers resolve
    /// the class first, by id or by invite code.
    async fn create_enrollment(
        &self,
        student_id: &str,
        class_id: Uuid,
    ) -> Result<EnrollmentWithRelations, Problem>;

    async fn update_enrollment(
        &self,
        id: Uuid,
        data: EnrollmentUpdateData,
    ) -> Result<EnrollmentWithRelations, Problem>;

    async fn delete_enrollment(&self, id: Uuid) -> Result<(), Problem>;
}

impl EnrollmentDbExt for Db {
    async fn get_enrollment(&self, id: Uuid) -> Result<Option<EnrollmentWithRelations>, Problem> {
        sqlx::query_as::<_, EnrollmentRelRow>(&format!("{ENROLLMENT_REL_SELECT} WHERE e.id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map(|row| row.map(EnrollmentWithRelations::from))
            .map_err(Problem::from)
    }

    async fn find_enrollment_pair(
        &self,
        student_id: &str,
        class_id: Uuid,
    ) -> Result<Option<Enrollment>, Problem> {
        sqlx::query_as::<_, Enrollment>(
            "SELECT id, student_id, class_id, enrolled_at, updated_at \
             FROM enrollments WHERE student_id = ? AND class_id = ?",
        )
        .bind(student_id)
        .bind(class_id)
        .fetch_optional(self.pool())
        .await
        .map_err(Problem::from)
    }

    async fn list_enrollments(
        &self,
        filter: &EnrollmentFilter,
        paging: Paging,
    ) -> Result<(Vec<EnrollmentWithRelations>, i64), Problem> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM enrollments e");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(Problem::from)?;

        let mut query = QueryBuilder::<Sqlite>::new(ENROLLMENT_REL_SELECT);
        push_filters(&mut query, filter);
        query.push(" ORDER BY e.enrolled_at DESC, e.id DESC LIMIT ");
        query.push_bind(paging.limit());
        query.push(" OFFSET ");
        query.push_bind(paging.offset());

        let enrollments = query
            .build_query_as::<EnrollmentRelRow>()
            .fetch_all(self.pool())
            .await
            .map_err(Problem::from)?;

        Ok((
            enrollments
                .into_iter()
                .map(EnrollmentWithRelations::from)
                .collect(),
            total,
        ))
    }

    async fn create_enrollment(
        &self,
        student_id: &str,
        class_id: Uuid,
    ) -> Result<EnrollmentWithRelations, Problem> {
        if self.get_user(student_id).await?.is_none() {
            return Err(user::db::problem::not_found(student_id));
        }
        if self.find_enrollment_pair(student_id, class_id).await?.is_some() {
            return Err(problem::already_enrolled(student_id, class_id));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO enrollments (id, student_id, class_id, enrolled_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(student_id)
        .bind(class_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| {
            if unique_violation_on(&e, "enrollments.student_id") {
                problem::already_enrolled(student_id, class_id)
            } else {
                Problem::from(e)
            }
        })?;

        self.get_enrollment(id).await?.ok_or_else(problems::internal)
    }

    async fn update_enrollment(
        &self,
        id: Uuid,
        data: EnrollmentUpdateData,
    ) -> Result<EnrollmentWithRelations, Problem> {
        let Some(current) = self.get_enrollment(id).await? else {
            return Err(problem::not_found(id));
        };

        if let Some(student_id) = &data.student_id {
            if self.get_user(student_id).await?.is_none() {
                return Err(user::db::problem::not_found(student_id));
            }
        }
        if let Some(class_id) = data.class_id {
            if self.get_class(class_id).await?.is_none() {
                return Err(class::db::problem::not_found(class_id));
            }
        }

        let student_id = data
            .student_id
            .clone()
            .unwrap_or(current.enrollment.student_id);
        let class_id = data.class_id.unwrap_or(current.enrollment.class_id);
        if let Some(existing) = self.find_enrollment_pair(&student_id, class_id).await? {
            if existing.id != id {
                return Err(problem::already_enrolled(&student_id, class_id));
            }
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE enrollments SET ");
        let mut set = query.separated(", ");
        set.push("student_id = ").push_bind_unseparated(student_id.clone());
        set.push("class_id = ").push_bind_unseparated(class_id);
        set.push("updated_at = ").push_bind_unseparated(Utc::now());
        query.push(" WHERE id = ").push_bind(id);

        let result = query.build().execute(self.pool()).await.map_err(|e| {
            if unique_violation_on(&e, "enrollments.student_id") {
                problem::already_enrolled(&student_id, class_id)
            } else {
                Problem::from(e)
            }
        })?;
        if result.rows_affected() == 0 {
            return Err(problem::not_found(id));
        }

        self.get_enrollment(id).await?.ok_or_else(problems::internal)
    }

    async fn delete_enrollment(&self, id: Uuid) -> Result<(), Problem> {
        let result = sqlx::query("DELETE FROM enrollments WHERE id = ?")
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
