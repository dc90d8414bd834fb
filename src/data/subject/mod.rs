use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::department::DepartmentRef;

pub mod db;

/// Course subject (e.g. `CS101`), owned by exactly one department. `code` is
/// the unique natural key.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: Uuid,
    pub department_id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal projection embedded in class responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub department_id: Uuid,
}

/// Subject with its owning department resolved.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectWithDepartment {
    #[serde(flatten)]
    pub subject: Subject,
    pub department: DepartmentRef,
}

/// Subject row of a department-scoped listing; the class count comes from a
/// left join so subjects without classes stay in the result with zero.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectWithClassCount {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub subject: Subject,
    pub class_count: i64,
}
