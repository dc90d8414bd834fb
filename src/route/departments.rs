use rocket::response::status;
use rocket::serde::json::{self, Json};
use rocket::State;
use uuid::Uuid;

use crate::data::department::db::problem as department_problem;
use crate::data::department::db::{
    DepartmentCreateData, DepartmentDbExt, DepartmentFilter, DepartmentUpdateData,
};
use crate::data::class::ClassWithRelations;
use crate::data::department::{Department, DepartmentUser, DepartmentWithSubjectCount};
use crate::data::subject::SubjectWithClassCount;
use crate::db::Db;
use crate::middleware::paging::PageQuery;
use crate::resp::envelope::{Paginated, Pagination, Payload};
use crate::resp::problem::{problems, Problem};
use crate::resp::session::AuthSession;
use crate::validate::Violations;

/// List departments with their subject counts
#[utoipa::path(
    params(
        ("search" = Option<String>, Query, description = "substring match on name or code")
    ),
    responses(
        (status = 200, description = "Paginated departments, each with subjectCount"),
        (status = 401, description = "Missing or invalid session", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/departments?<search>")]
#[tracing::instrument]
pub async fn department_list(
    search: Option<&str>,
    pages: PageQuery,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Paginated<DepartmentWithSubjectCount>>, Problem> {
    let mut violations = Violations::new();
    let paging = pages.resolve(&mut violations);
    violations.finish()?;

    let filter = DepartmentFilter {
        search: search.map(str::to_owned),
    };
    let (departments, total) = db.list_departments(&filter, paging).await?;

    Ok(Json(Paginated::new(
        departments,
        Pagination::new(paging.page, paging.limit, total),
    )))
}

/// Get one department
#[utoipa::path(
    responses(
        (status = 200, description = "Department with subjectCount"),
        (status = 404, description = "Unknown department", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/departments/<id>")]
#[tracing::instrument]
pub async fn department_get(
    id: Uuid,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<DepartmentWithSubjectCount>>, Problem> {
    let department = db
        .get_department_with_stats(id)
        .await?
        .ok_or_else(|| department_problem::not_found(id))?;

    Ok(Json(Payload::new(department)))
}

/// Create a department
#[utoipa::path(
    request_body = DepartmentCreateData,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 403, description = "Caller is not an admin", body = Problem),
        (status = 409, description = "Department code already taken", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/departments", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn department_create(
    data: Result<Json<DepartmentCreateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<status::Created<Json<Payload<Department>>>, Problem> {
    if !session.role.can_write_departments() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let department = db.create_department(data).await?;
    let location = format!("/api/departments/{}", department.id);

    Ok(status::Created::new(location)
        .body(Json(Payload::with_message(department, "department created"))))
}

/// Update a department
#[utoipa::path(
    request_body = DepartmentUpdateData,
    responses(
        (status = 200, description = "Updated department", body = Department),
        (status = 404, description = "Unknown department", body = Problem),
        (status = 409, description = "Department code already taken", body = Problem),
    ),
    security(("session" = []))
)]
#[put("/departments/<id>", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn department_update(
    id: Uuid,
    data: Result<Json<DepartmentUpdateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<Department>>, Problem> {
    if !session.role.can_write_departments() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let department = db.update_department(id, data).await?;
    Ok(Json(Payload::new(department)))
}

/// Delete a department without subjects
#[utoipa::path(
    responses(
        (status = 200, description = "Department deleted"),
        (status = 404, description = "Unknown department", body = Problem),
        (status = 409, description = "Department still has subjects", body = Problem),
    ),
    security(("session" = []))
)]
#[delete("/departments/<id>")]
#[tracing::instrument]
pub async fn department_delete(
    id: Uuid,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<Uuid>>, Problem> {
    if !session.role.can_write_departments() {
        return Err(problems::forbidden());
    }

    db.delete_department(id).await?;
    Ok(Json(Payload::with_message(id, "department deleted")))
}

/// List a department's subjects with their class counts
#[utoipa::path(
    responses(
        (status = 200, description = "Paginated subjects, each with classCount"),
        (status = 404, description = "Unknown department", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/departments/<id>/subjects")]
#[tracing::instrument]
pub async fn department_subjects(
    id: Uuid,
    pages: PageQuery,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Paginated<SubjectWithClassCount>>, Problem> {
    let mut violations = Violations::new();
    let paging = pages.resolve(&mut violations);
    violations.finish()?;

    let (subjects, total) = db.list_department_subjects(id, paging).await?;
    Ok(Json(Paginated::new(
        subjects,
        Pagination::new(paging.page, paging.limit, total),
    )))
}

/// List the classes taught under a department
#[utoipa::path(
    responses(
        (status = 200, description = "Paginated classes with subject and teacher resolved"),
        (status = 404, description = "Unknown department", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/departments/<id>/classes")]
#[tracing::instrument]
pub async fn department_classes(
    id: Uuid,
    pages: PageQuery,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Paginated<ClassWithRelations>>, Problem> {
    let mut violations = Violations::new();
    let paging = pages.resolve(&mut violations);
    violations.finish()?;

    let (classes, total) = db.list_department_classes(id, paging).await?;
    Ok(Json(Paginated::new(
        classes,
        Pagination::new(paging.page, paging.limit, total),
    )))
}

/// List the users involved with a department
#[utoipa::path(
    responses(
        (status = 200, description = "Paginated teachers and enrolled students, each with classCount"),
        (status = 404, description = "Unknown department", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/departments/<id>/users")]
#[tracing::instrument]
pub async fn department_users(
    id: Uuid,
    pages: PageQuery,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Paginated<DepartmentUser>>, Problem> {
    let mut violations = Violations::new();
    let paging = pages.resolve(&mut violations);
    violations.finish()?;

    let (users, total) = db.list_department_users(id, paging).await?;
    Ok(Json(Paginated::new(
        users,
        Pagination::new(paging.page, paging.limit, total),
    )))
}
