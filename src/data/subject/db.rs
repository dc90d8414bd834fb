use chrono::Utc;
use serde::Deserialize;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Subject, SubjectWithDepartment};
use crate::data::department;
use crate::data::department::db::DepartmentDbExt;
use crate::data::department::DepartmentRef;
use crate::db::{unique_violation_on, Db};
use crate::middleware::paging::Paging;
use crate::resp::problem::{problems, Problem};
use crate::util::patch_field;
use crate::validate::Violations;

const SUBJECT_COLUMNS: &str = "id, department_id, code, name, description, created_at, updated_at";

const SUBJECT_DEPT_SELECT: &str = "\
    SELECT s.id, s.department_id, s.code, s.name, s.description, s.created_at, s.updated_at, \
    d.code AS department_code, d.name AS department_name \
    FROM subjects s JOIN departments d ON d.id = s.department_id";

pub mod problem {
    use uuid::Uuid;

    use crate::resp::problem::{problems, Problem};

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("subject").insert_str("id", id).take()
    }

    #[inline]
    pub fn code_taken(code: &str) -> Problem {
        problems::conflict("a subject with this code already exists")
            .insert_str("code", code)
            .take()
    }
}

#[derive(Debug, FromRow)]
struct SubjectDeptRow {
    #[sqlx(flatten)]
    subject: Subject,
    department_code: String,
    department_name: String,
}

impl From<SubjectDeptRow> for SubjectWithDepartment {
    fn from(row: SubjectDeptRow) -> Self {
        SubjectWithDepartment {
            department: DepartmentRef {
                id: row.subject.department_id,
                code: row.department_code,
                name: row.department_name,
            },
            subject: row.subject,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectCreateData {
    pub department_id: Uuid,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl SubjectCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        violations.require_non_empty("code", &self.code);
        violations.require_non_empty("name", &self.name);
        violations.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectUpdateData {
    pub department_id: Option<Uuid>,
    pub code: Option<String>,
    pub name: Option<String>,
    /// Absent field keeps the stored value, explicit `null` clears it.
    #[serde(default, deserialize_with = "patch_field")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

impl SubjectUpdateData {
    fn is_empty(&self) -> bool {
        self.department_id.is_none()
            && self.code.is_none()
            && self.name.is_none()
            && self.description.is_none()
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

/// Filters of the subject listing; `search` matches name or code.
#[derive(Debug, Clone, Default)]
pub struct SubjectFilter {
    pub department_id: Option<Uuid>,
    pub search: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &SubjectFilter) {
    query.push(" WHERE 1 = 1");

    if let Some(department_id) = filter.department_id {
        query.push(" AND s.department_id = ").push_bind(department_id);
    }

    if let Some(search) = &filter.search {
        query
            .push(" AND (LOWER(s.name) LIKE '%' || LOWER(")
            .push_bind(search.clone())
            .push(") || '%' OR LOWER(s.code) LIKE '%' || LOWER(")
            .push_bind(search.clone())
            .push(") || '%')");
    }
}

#[allow(async_fn_in_trait)]
pub trait SubjectDbExt {
    async fn get_subject(&self, id: Uuid) -> Result<Option<SubjectWithDepartment>, Problem>;

    async fn find_subject_by_code(&self, code: &str) -> Result<Option<Subject>, Problem>;

    async fn list_subjects(
        &self,
        filter: &SubjectFilter,
        paging: Paging,
    ) -> Result<(Vec<SubjectWithDepartment>, i64), Problem>;

    async fn create_subject(&self, data: SubjectCreateData)
        -> Result<SubjectWithDepartment, Problem>;

    async fn update_subject(
        &self,
        id: Uuid,
        data: SubjectUpdateData,
    ) -> Result<SubjectWithDepartment, Problem>;

    /// Deletes the subject; its classes and their enrollments cascade.
    async fn delete_subject(&self, id: Uuid) -> Result<(), Problem>;
}

impl SubjectDbExt for Db {
    async fn get_subject(&self, id: Uuid) -> Result<Option<SubjectWithDepartment>, Problem> {
        sqlx::query_as::<_, SubjectDeptRow>(&format!("{SUBJECT_DEPT_SELECT} WHERE s.id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map(|row| row.map(SubjectWithDepartment::from))
            .map_err(Problem::from)
    }

    async fn find_subject_by_code(&self, code: &str) -> Result<Option<Subject>, Problem> {
        sqlx::query_as::<_, Subject>(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(self.pool())
        .await
        .map_err(Problem::from)
    }

    async fn list_subjects(
        &self,
        filter: &SubjectFilter,
        paging: Paging,
    ) -> Result<(Vec<SubjectWithDepartment>, i64), Problem> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM subjects s");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(Problem::from)?;

        let mut query = QueryBuilder::<Sqlite>::new(SUBJECT_DEPT_SELECT);
        push_filters(&mut query, filter);
        query.push(" ORDER BY s.created_at DESC, s.id DESC LIMIT ");
        query.push_bind(paging.limit());
        query.push(" OFFSET ");
        query.push_bind(paging.offset());

        let subjects = query
            .build_query_as::<SubjectDeptRow>()
            .fetch_all(self.pool())
            .await
            .map_err(Problem::from)?;

        Ok((
            subjects.into_iter().map(SubjectWithDepartment::from).collect(),
            total,
        ))
    }

    async fn create_subject(
        &self,
        data: SubjectCreateData,
    ) -> Result<SubjectWithDepartment, Problem> {
        if self.get_department(data.department_id).await?.is_none() {
            return Err(department::db::problem::not_found(data.department_id));
        }
        if self.find_subject_by_code(&data.code).await?.is_some() {
            return Err(problem::code_taken(&data.code));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO subjects (id, department_id, code, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(data.department_id)
        .bind(&data.code)
        .bind(&data.name)
        .bind(&data.description)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| {
            if unique_violation_on(&e, "subjects.code") {
                problem::code_taken(&data.code)
            } else {
                Problem::from(e)
            }
        })?;

        self.get_subject(id).await?.ok_or_else(problems::internal)
    }

    async fn update_subject(
        &self,
        id: Uuid,
        data: SubjectUpdateData,
    ) -> Result<SubjectWithDepartment, Problem> {
        if self.get_subject(id).await?.is_none() {
            return Err(problem::not_found(id));
        }

        if let Some(department_id) = data.department_id {
            if self.get_department(department_id).await?.is_none() {
                return Err(department::db::problem::not_found(department_id));
            }
        }
        if let Some(code) = &data.code {
            if let Some(existing) = self.find_subject_by_code(code).await? {
                if existing.id != id {
                    return Err(problem::code_taken(code));
                }
            }
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE subjects SET ");
        let mut set = query.separated(", ");
        if let Some(department_id) = data.department_id {
            set.push("department_id = ")
                .push_bind_unseparated(department_id);
        }
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

        let result = query.build().execute(self.pool()).await.map_err(|e| {
            if unique_violation_on(&e, "subjects.code") {
                problem::code_taken(data.code.as_deref().unwrap_or_default())
            } else {
                Problem::from(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(problem::not_found(id));
        }
        self.get_subject(id).await?.ok_or_else(problems::internal)
    }

    async fn delete_subject(&self, id: Uuid) -> Result<(), Problem> {
        let result = sqlx::query("DELETE FROM subjects WHERE id = ?")
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
