use std::str::FromStr;

use rocket::response::status;
use rocket::serde::json::{self, Json};
use rocket::State;
use uuid::Uuid;

use crate::data::class::db::problem as class_problem;
use crate::data::class::db::{ClassCreateData, ClassDbExt, ClassFilter, ClassUpdateData};
use crate::data::class::{ClassStatus, ClassWithRelations};
use crate::db::Db;
use crate::middleware::paging::PageQuery;
use crate::resp::envelope::{Paginated, Pagination, Payload};
use crate::resp::problem::{problems, Problem};
use crate::resp::session::AuthSession;
use crate::validate::Violations;

/// List classes with subject and teacher resolved
#[utoipa::path(
    params(
        ("subject" = Option<String>, Query, description = "subject id"),
        ("teacher" = Option<String>, Query, description = "teacher user id"),
        ("status" = Option<String>, Query, description = "active, inactive or archived")
    ),
    responses(
        (status = 200, description = "Paginated classes"),
        (status = 400, description = "Malformed filter or paging values", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/classes?<subject>&<teacher>&<status>")]
#[tracing::instrument]
pub async fn class_list(
    subject: Option<&str>,
    teacher: Option<&str>,
    status: Option<&str>,
    pages: PageQuery,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Paginated<ClassWithRelations>>, Problem> {
    let mut violations = Violations::new();
    let paging = pages.resolve(&mut violations);

    let mut filter = ClassFilter {
        teacher_id: teacher.map(str::to_owned),
        ..Default::default()
    };
    if let Some(raw) = subject {
        match Uuid::parse_str(raw) {
            Ok(id) => filter.subject_id = Some(id),
            Err(_) => violations.push("subject", "must be a UUID"),
        }
    }
    if let Some(raw) = status {
        match ClassStatus::from_str(raw) {
            Ok(status) => filter.status = Some(status),
            Err(_) => violations.push("status", "must be one of active, inactive, archived"),
        }
    }
    violations.finish()?;

    let (classes, total) = db.list_classes(&filter, paging).await?;
    Ok(Json(Paginated::new(
        classes,
        Pagination::new(paging.page, paging.limit, total),
    )))
}

/// Get one class
#[utoipa::path(
    responses(
        (status = 200, description = "Class with subject and teacher resolved"),
        (status = 404, description = "Unknown class", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/classes/<id>")]
#[tracing::instrument]
pub async fn class_get(
    id: Uuid,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<ClassWithRelations>>, Problem> {
    let class = db
        .get_class(id)
        .await?
        .ok_or_else(|| class_problem::not_found(id))?;

    Ok(Json(Payload::new(class)))
}

/// Look a class up by its invite code
#[utoipa::path(
    responses(
        (status = 200, description = "Class with subject and teacher resolved"),
        (status = 404, description = "No class under this invite code", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/classes/invite/<code>")]
#[tracing::instrument]
pub async fn class_by_invite(
    code: &str,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<ClassWithRelations>>, Problem> {
    let class = db
        .find_class_by_invite_code(code)
        .await?
        .ok_or_else(|| class_problem::invite_code_not_found(code))?;

    Ok(Json(Payload::new(class)))
}

/// Create a class
#[utoipa::path(
    request_body = ClassCreateData,
    responses(
        (status = 201, description = "Class created under a fresh invite code"),
        (status = 404, description = "Unknown subject or teacher", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/classes", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn class_create(
    data: Result<Json<ClassCreateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<status::Created<Json<Payload<ClassWithRelations>>>, Problem> {
    if !session.role.can_write_catalog() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let class = db.create_class(data).await?;
    let location = format!("/api/classes/{}", class.class.id);

    Ok(status::Created::new(location)
        .body(Json(Payload::with_message(class, "class created"))))
}

/// Update a class
#[utoipa::path(
    request_body = ClassUpdateData,
    responses(
        (status = 200, description = "Updated class"),
        (status = 404, description = "Unknown class, subject or teacher", body = Problem),
    ),
    security(("session" = []))
)]
#[put("/classes/<id>", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn class_update(
    id: Uuid,
    data: Result<Json<ClassUpdateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<ClassWithRelations>>, Problem> {
    if !session.role.can_write_catalog() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let class = db.update_class(id, data).await?;
    Ok(Json(Payload::new(class)))
}

/// Delete a class and its enrollments
#[utoipa::path(
    responses(
        (status = 200, description = "Class deleted, enrollments cascaded"),
        (status = 404, description = "Unknown class", body = Problem),
    ),
    security(("session" = []))
)]
#[delete("/classes/<id>")]
#[tracing::instrument]
pub async fn class_delete(
    id: Uuid,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<Uuid>>, Problem> {
    if !session.role.can_write_catalog() {
        return Err(problems::forbidden());
    }

    db.delete_class(id).await?;
    Ok(Json(Payload::with_message(id, "class deleted")))
}
