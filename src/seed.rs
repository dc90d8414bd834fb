//! Wipe-and-reload bootstrap. Datasets reference entities by their natural
//! keys (department code, subject code, class invite code, user id); `run`
//! resolves those to generated ids while inserting in dependency order.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Deserialize;
use sqlx::types::Json;
use thiserror::Error;
use uuid::Uuid;

use crate::data::class::{ClassStatus, Schedule};
use crate::db::Db;
use crate::role::Role;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("subject '{subject}' references unknown department '{department}'")]
    UnknownDepartment { subject: String, department: String },

    #[error("class '{class}' references unknown subject '{subject}'")]
    UnknownSubject { class: String, subject: String },

    #[error("class '{class}' references unknown teacher '{teacher}'")]
    UnknownTeacher { class: String, teacher: String },

    #[error("enrollment references unknown invite code '{0}'")]
    UnknownInviteCode(String),

    #[error("enrollment references unknown user '{0}'")]
    UnknownUser(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedData {
    pub departments: Vec<SeedDepartment>,
    pub subjects: Vec<SeedSubject>,
    pub users: Vec<SeedUser>,
    pub classes: Vec<SeedClass>,
    pub enrollments: Vec<SeedEnrollment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedDepartment {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSubject {
    pub code: String,
    pub name: String,
    pub department_code: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedClass {
    pub name: String,
    pub invite_code: String,
    pub subject_code: String,
    pub teacher_id: String,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub status: Option<ClassStatus>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedEnrollment {
    pub student_id: String,
    pub class_invite_code: String,
}

/// Wipes all five tables in dependency order and reloads them from `data`.
pub async fn run(db: &Db, data: &SeedData) -> Result<(), SeedError> {
    tracing::info!("Wiping existing records...");
    for table in ["enrollments", "classes", "subjects", "departments", "users"] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(db.pool())
            .await?;
    }

    let now = Utc::now();

    let mut departments: HashMap<String, Uuid> = HashMap::new();
    for department in &data.departments {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO departments (id, code, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&department.code)
        .bind(&department.name)
        .bind(&department.description)
        .bind(now)
        .bind(now)
        .execute(db.pool())
        .await?;
        departments.insert(department.code.clone(), id);
    }

    let mut subjects: HashMap<String, Uuid> = HashMap::new();
    for subject in &data.subjects {
        let department_id = departments.get(&subject.department_code).ok_or_else(|| {
            SeedError::UnknownDepartment {
                subject: subject.code.clone(),
                department: subject.department_code.clone(),
            }
        })?;

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO subjects (id, department_id, code, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(department_id)
        .bind(&subject.code)
        .bind(&subject.name)
        .bind(&subject.description)
        .bind(now)
        .bind(now)
        .execute(db.pool())
        .await?;
        subjects.insert(subject.code.clone(), id);
    }

    let mut users: HashSet<String> = HashSet::new();
    for user in &data.users {
        sqlx::query(
            "INSERT INTO users (id, name, email, email_verified, image, image_ref, role, created_at, updated_at) \
             VALUES (?, ?, ?, ?, NULL, NULL, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(user.role)
        .bind(now)
        .bind(now)
        .execute(db.pool())
        .await?;
        users.insert(user.id.clone());
    }

    let mut classes: HashMap<String, Uuid> = HashMap::new();
    for class in &data.classes {
        let subject_id =
            subjects
                .get(&class.subject_code)
                .ok_or_else(|| SeedError::UnknownSubject {
                    class: class.name.clone(),
                    subject: class.subject_code.clone(),
                })?;
        if !users.contains(&class.teacher_id) {
            return Err(SeedError::UnknownTeacher {
                class: class.name.clone(),
                teacher: class.teacher_id.clone(),
            });
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO classes (id, name, invite_code, subject_id, teacher_id, description, \
             banner_url, banner_image_ref, capacity, status, schedules, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, NULL, NULL, NULL, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&class.name)
        .bind(&class.invite_code)
        .bind(subject_id)
        .bind(&class.teacher_id)
        .bind(class.capacity.unwrap_or(crate::data::class::db::DEFAULT_CAPACITY))
        .bind(class.status.unwrap_or_default())
        .bind(Json(class.schedules.clone()))
        .bind(now)
        .bind(now)
        .execute(db.pool())
        .await?;
        classes.insert(class.invite_code.clone(), id);
    }

    for enrollment in &data.enrollments {
        let class_id = classes
            .get(&enrollment.class_invite_code)
            .ok_or_else(|| SeedError::UnknownInviteCode(enrollment.class_invite_code.clone()))?;
        if !users.contains(&enrollment.student_id) {
            return Err(SeedError::UnknownUser(enrollment.student_id.clone()));
        }

        sqlx::query(
            "INSERT INTO enrollments (id, student_id, class_id, enrolled_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(&enrollment.student_id)
        .bind(class_id)
        .bind(now)
        .bind(now)
        .execute(db.pool())
        .await?;
    }

    tracing::info!(
        "Seeded {} departments, {} subjects, {} users, {} classes, {} enrollments.",
        data.departments.len(),
        data.subjects.len(),
        data.users.len(),
        data.classes.len(),
        data.enrollments.len()
    );
    Ok(())
}

/// Built-in development dataset.
pub fn dataset() -> SeedData {
    SeedData {
        departments: vec![
            SeedDepartment {
                code: "CS".to_string(),
                name: "Computer Science".to_string(),
                description: Some("Programming and computing".to_string()),
            },
            SeedDepartment {
                code: "MATH".to_string(),
                name: "Mathematics".to_string(),
                description: None,
            },
        ],
        subjects: vec![
            SeedSubject {
                code: "CS101".to_string(),
                name: "Intro to Programming".to_string(),
                department_code: "CS".to_string(),
                description: None,
            },
            SeedSubject {
                code: "MA101".to_string(),
                name: "Calculus I".to_string(),
                department_code: "MATH".to_string(),
                description: None,
            },
        ],
        users: vec![
            SeedUser {
                id: "user_a1".to_string(),
                name: "Ada Admin".to_string(),
                email: "ada@example.com".to_string(),
                role: Role::Admin,
                email_verified: true,
            },
            SeedUser {
                id: "user_t1".to_string(),
                name: "Terry Teacher".to_string(),
                email: "terry@example.com".to_string(),
                role: Role::Teacher,
                email_verified: true,
            },
            SeedUser {
                id: "user_s1".to_string(),
                name: "Sam Student".to_string(),
                email: "sam@example.com".to_string(),
                role: Role::Student,
                email_verified: false,
            },
            SeedUser {
                id: "user_s2".to_string(),
                name: "Sky Student".to_string(),
                email: "sky@example.com".to_string(),
                role: Role::Student,
                email_verified: false,
            },
        ],
        classes: vec![
            SeedClass {
                name: "Programming Basics".to_string(),
                invite_code: "ABC123".to_string(),
                subject_code: "CS101".to_string(),
                teacher_id: "user_t1".to_string(),
                capacity: None,
                status: None,
                schedules: vec![Schedule {
                    day: crate::data::class::ScheduleDay::Monday,
                    start_time: "09:00".to_string(),
                    end_time: "10:30".to_string(),
                }],
            },
            SeedClass {
                name: "Calculus Basics".to_string(),
                invite_code: "XYZ789".to_string(),
                subject_code: "MA101".to_string(),
                teacher_id: "user_t1".to_string(),
                capacity: Some(30),
                status: None,
                schedules: vec![],
            },
        ],
        // user_s1 is left out of ABC123 so joining it stays demonstrable.
        enrollments: vec![
            SeedEnrollment {
                student_id: "user_s2".to_string(),
                class_invite_code: "ABC123".to_string(),
            },
            SeedEnrollment {
                student_id: "user_s1".to_string(),
                class_invite_code: "XYZ789".to_string(),
            },
        ],
    }
}
