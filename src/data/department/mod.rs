use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::user::User;

pub mod db;

/// Academic department, the root of the catalog hierarchy. `code` is the
/// stable natural key (e.g. `CS`).
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal projection embedded in subject responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentRef {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

/// Department row of an aggregated listing. The subject count comes from a
/// left join so departments without subjects stay in the result with zero.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentWithSubjectCount {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub department: Department,
    pub subject_count: i64,
}

/// Member row of a department's user listing: anyone teaching or enrolled in
/// one of the department's classes, with how many of those classes they touch.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentUser {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub user: User,
    pub class_count: i64,
}
