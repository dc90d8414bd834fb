use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::subject::SubjectRef;
use crate::data::user::UserRef;

pub mod db;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ClassStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl FromStr for ClassStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ClassStatus::Active),
            "inactive" => Ok(ClassStatus::Inactive),
            "archived" => Ok(ClassStatus::Archived),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ClassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassStatus::Active => write!(f, "active"),
            ClassStatus::Inactive => write!(f, "inactive"),
            ClassStatus::Archived => write!(f, "archived"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

/// One meeting slot of a class. Times are `HH:MM` strings; the slot order in
/// the list is preserved as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub day: ScheduleDay,
    pub start_time: String,
    pub end_time: String,
}

/// A taught class: one subject, one teacher, many enrollments. `invite_code`
/// is the random natural key students join by.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: Uuid,
    pub name: String,
    pub invite_code: String,
    pub subject_id: Uuid,
    pub teacher_id: String,
    pub description: Option<String>,
    pub banner_url: Option<String>,
    pub banner_image_ref: Option<String>,
    pub capacity: i64,
    pub status: ClassStatus,
    #[schema(value_type = Vec<Schedule>)]
    pub schedules: sqlx::types::Json<Vec<Schedule>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal projection embedded in enrollment responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassRef {
    pub id: Uuid,
    pub name: String,
    pub invite_code: String,
    pub subject_id: Uuid,
    pub teacher_id: String,
    pub status: ClassStatus,
}

/// Class with its subject and teacher resolved.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassWithRelations {
    #[serde(flatten)]
    pub class: Class,
    pub subject: SubjectRef,
    pub teacher: UserRef,
}
