use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::class::ClassRef;
use crate::data::user::UserRef;

pub mod db;

/// Membership of a student in a class. The `(student_id, class_id)` pair is
/// unique, a student joins a class at most once.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: String,
    pub class_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enrollment with its student and class resolved.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentWithRelations {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub student: UserRef,
    pub class: ClassRef,
}
