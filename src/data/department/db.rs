use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Department, DepartmentUser, DepartmentWithSubjectCount};
use crate::data::class::db::{ClassRelRow, CLASS_REL_SELECT};
use crate::data::class::ClassWithRelations;
use crate::data::subject::SubjectWithClassCount;
use crate::db::{is_foreign_key_violation, unique_violation_on, Db};
use crate::middleware::paging::Paging;
use crate::resp::problem::Problem;
use crate::util::patch_field;
use crate::validate::Violations;

const DEPARTMENT_COLUMNS: &str = "id, code, name, description, created_at, updated_at";

/// Distinct (user, class) membership pairs of one department: class teachers
/// plus enrolled students. Binds the department id twice.
const DEPARTMENT_MEMBERS: &str = "\
    SELECT c.teacher_id AS user_id, c.id AS class_id \
    FROM classes c JOIN subjects s ON s.id = c.subject_id \
    WHERE s.department_id = ? \
    UNION \
    SELECT e.student_id AS user_id, e.class_id AS class_id \
    FROM enrollments e \
    JOIN classes c ON c.id = e.class_id \
    JOIN subjects s ON s.id = c.subject_id \
    WHERE s.department_id = ?";

pub mod problem {
    use uuid::Uuid;

    use crate::resp::problem::{problems, Problem};

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("department")
            .insert_str("id", id)
            .take()
    }

    #[inline]
    pub fn code_taken(code: &str) -> Problem {
        problems::conflict("a department with this code already exists")
            .insert_str("code", code)
            .take()
    }

    #[inline]
    pub fn has_subjects(id: Uuid) -> Problem {
        problems::conflict("department still has subjects and cannot be deleted")
            .insert_str("id", id)
            .take()
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentCreateData {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl DepartmentCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        violations.require_non_empty("code", &self.code);
        violations.require_non_empty("name", &self.name);
        violations.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentUpdateData {
    pub code: Option<String>,
    pub name: Option<String>,
    /// Absent field keeps the stored value, explicit `null` clears it.
    #[serde(default, deserialize_with = "patch_field")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

impl DepartmentUpdateData {
    fn is_empty(&self) -> bool {
        self.code.is_none() && self.name.is_none() && self.description.is_none()
    }

    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        if self.is_empty() {
            violations.push("body", "must contain at least one updatable field");
        }
        violations.require_non_empty_opt("code", self.code.as_deref());
        violations.require_non_empty_opt("name", self.name.as_deref());
        violations.finish()
    }
}

/// Filters of the department listing; `search` matches name or code.
#[derive(Debug, Clone, Default)]
pub struct DepartmentFilter {
    pub search: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &DepartmentFilter) {
    query.push(" WHERE 1 = 1");

    if let Some(search) = &filter.search {
        query
            .push(" AND (LOWER(d.name) LIKE '%' || LOWER(")
            .push_bind(search.clone())
            .push(") || '%' OR LOWER(d.code) LIKE '%' || LOWER(")
            .push_bind(search.clone())
            .push(") || '%')");
    }
}

#[allow(async_fn_in_trait)]
pub trait DepartmentDbExt {
    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, Problem>;

    /// Get-by-id with the subject count aggregate resolved.
    async fn get_department_with_stats(
        &self,
        id: Uuid,
    ) -> Result<Option<DepartmentWithSubjectCount>, Problem>;

    async fn find_department_by_code(&self, code: &str) -> Result<Option<Department>, Problem>;

    async fn list_departments(
        &self,
        filter: &DepartmentFilter,
        paging: Paging,
    ) -> Result<(Vec<DepartmentWithSubjectCount>, i64), Problem>;

    async fn create_department(&self, data: DepartmentCreateData) -> Result<Department, Problem>;

    async fn update_department(
        &self,
        id: Uuid,
        data: DepartmentUpdateData,
    ) -> Result<Department, Problem>;

    async fn delete_department(&self, id: Uuid) -> Result<(), Problem>;

    /// Subjects of one department, each with its class count.
    async fn list_department_subjects(
        &self,
        id: Uuid,
        paging: Paging,
    ) -> Result<(Vec<SubjectWithClassCount>, i64), Problem>;

    /// Classes taught under one department, relations resolved.
    async fn list_department_classes(
        &self,
        id: Uuid,
        paging: Paging,
    ) -> Result<(Vec<ClassWithRelations>, i64), Problem>;

    /// Users involved with one department: teachers of its classes and
    /// students enrolled in them.
    async fn list_department_users(
        &self,
        id: Uuid,
        paging: Paging,
    ) -> Result<(Vec<DepartmentUser>, i64), Problem>;
}

impl DepartmentDbExt for Db {
    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, Problem> {
        sqlx::query_as::<_, Department>(&format!(
            "SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(Problem::from)
    }

    async fn get_department_with_stats(
        &self,
        id: Uuid,
    ) -> Result<Option<DepartmentWithSubjectCount>, Problem> {
        sqlx::query_as::<_, DepartmentWithSubjectCount>(
            "SELECT d.id, d.code, d.name, d.description, d.created_at, d.updated_at, \
             COUNT(s.id) AS subject_count \
             FROM departments d LEFT JOIN subjects s ON s.department_id = d.id \
             WHERE d.id = ? GROUP BY d.id",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(Problem::from)
    }

    async fn find_department_by_code(&self, code: &str) -> Result<Option<Department>, Problem> {
        sqlx::query_as::<_, Department>(&format!(
            "SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(self.pool())
        .await
        .map_err(Problem::from)
    }

    async fn list_departments(
        &self,
        filter: &DepartmentFilter,
        paging: Paging,
    ) -> Result<(Vec<DepartmentWithSubjectCount>, i64), Problem> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM departments d");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(Problem::from)?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT d.id, d.code, d.name, d.description, d.created_at, d.updated_at, \
             COUNT(s.id) AS subject_count \
             FROM departments d LEFT JOIN subjects s ON s.department_id = d.id",
        );
        push_filters(&mut query, filter);
        query.push(" GROUP BY d.id ORDER BY d.created_at DESC, d.id DESC LIMIT ");
        query.push_bind(paging.limit());
        query.push(" OFFSET ");
        query.push_bind(paging.offset());

        let departments = query
            .build_query_as::<DepartmentWithSubjectCount>()
            .fetch_all(self.pool())
            .await
            .map_err(Problem::from)?;

        Ok((departments, total))
    }

    async fn create_department(&self, data: DepartmentCreateData) -> Result<Department, Problem> {
        if self.find_department_by_code(&data.code).await?.is_some() {
            return Err(problem::code_taken(&data.code));
        }

        let now = Utc::now();
        sqlx::query_as::<_, Department>(&format!(
            "INSERT INTO departments (id, code, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {DEPARTMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&data.code)
        .bind(&data.name)
        .bind(&data.description)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            if unique_violation_on(&e, "departments.code") {
                problem::code_taken(&data.code)
            } else {
                Problem::from(e)
            }
        })
    }

    async fn update_department(
        &self,
        id: Uuid,
        data: DepartmentUpdateData,
    ) -> Result<Department, Problem> {
        if self.get_department(id).await?.is_none() {
            return Err(problem::not_found(id));
        }

        if let Some(code) = &data.code {
            if let Some(existing) = self.find_department_by_code(code).await? {
                if existing.id != id {
                    return Err(problem::code_taken(code));
                }
            }
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE departments SET ");
        let mut set = query.separated(", ");
        if let Some(code) = &data.code {
            set.push("code = ").push_bind_unseparated(code.clone());
        }
        if let Some(name) = &data.name {
            set.push("name = ").push_bind_unseparated(name.clone());
        }
        if let Some(description) = &data.description {
            set.push("description = ")
                .push_bind_unseparated(description.clone());
        }
        set.push("updated_at = ").push_bind_unseparated(Utc::now());

        query.push(" WHERE id = ").push_bind(id);
        query.push(format!(" RETURNING {DEPARTMENT_COLUMNS}"));

        query
            .build_query_as::<Department>()
            .fetch_optional(self.pool())
            .await
            .map_err(|e| {
                if unique_violation_on(&e, "departments.code") {
                    problem::code_taken(data.code.as_deref().unwrap_or_default())
                } else {
                    Problem::from(e)
                }
            })?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn delete_department(&self, id: Uuid) -> Result<(), Problem> {
        let subjects: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM subjects WHERE department_id = ?")
                .bind(id)
                .fetch_one(self.pool())
                .await
                .map_err(Problem::from)?;
        if subjects > 0 {
            return Err(problem::has_subjects(id));
        }

        let result = sqlx::query("DELETE FROM departments WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    problem::has_subjects(id)
                } else {
                    Problem::from(e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(problem::not_found(id));
        }
        Ok(())
    }

    async fn list_department_subjects(
        &self,
        id: Uuid,
        paging: Paging,
    ) -> Result<(Vec<SubjectWithClassCount>, i64), Problem> {
        if self.get_department(id).await?.is_none() {
            return Err(problem::not_found(id));
        }

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subjects WHERE department_id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await
            .map_err(Problem::from)?;

        let subjects = sqlx::query_as::<_, SubjectWithClassCount>(
            "SELECT s.id, s.department_id, s.code, s.name, s.description, s.created_at, s.updated_at, \
             COUNT(c.id) AS class_count \
             FROM subjects s LEFT JOIN classes c ON c.subject_id = s.id \
             WHERE s.department_id = ? \
             GROUP BY s.id ORDER BY s.created_at DESC, s.id DESC LIMIT ? OFFSET ?",
        )
        .bind(id)
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(self.pool())
        .await
        .map_err(Problem::from)?;

        Ok((subjects, total))
    }

    async fn list_department_classes(
        &self,
        id: Uuid,
        paging: Paging,
    ) -> Result<(Vec<ClassWithRelations>, i64), Problem> {
        if self.get_department(id).await?.is_none() {
            return Err(problem::not_found(id));
        }

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM classes c \
             JOIN subjects s ON s.id = c.subject_id WHERE s.department_id = ?",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(Problem::from)?;

        let rows = sqlx::query_as::<_, ClassRelRow>(&format!(
            "{CLASS_REL_SELECT} WHERE s.department_id = ? \
             ORDER BY c.created_at DESC, c.id DESC LIMIT ? OFFSET ?"
        ))
        .bind(id)
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(self.pool())
        .await
        .map_err(Problem::from)?;

        Ok((rows.into_iter().map(ClassWithRelations::from).collect(), total))
    }

    async fn list_department_users(
        &self,
        id: Uuid,
        paging: Paging,
    ) -> Result<(Vec<DepartmentUser>, i64), Problem> {
        if self.get_department(id).await?.is_none() {
            return Err(problem::not_found(id));
        }

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(DISTINCT user_id) FROM ({DEPARTMENT_MEMBERS})"
        ))
        .bind(id)
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(Problem::from)?;

        let users = sqlx::query_as::<_, DepartmentUser>(&format!(
            "SELECT u.id, u.name, u.email, u.email_verified, u.image, u.image_ref, u.role, \
             u.created_at, u.updated_at, COUNT(m.class_id) AS class_count \
             FROM users u JOIN ({DEPARTMENT_MEMBERS}) m ON m.user_id = u.id \
             GROUP BY u.id ORDER BY u.created_at DESC, u.id DESC LIMIT ? OFFSET ?"
        ))
        .bind(id)
        .bind(id)
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(self.pool())
        .await
        .map_err(Problem::from)?;

        Ok((users, total))
    }
}
