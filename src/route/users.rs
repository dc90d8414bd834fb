use std::str::FromStr;

use rocket::response::status;
use rocket::serde::json::{self, Json};
use rocket::State;

use crate::data::user::db::problem as user_problem;
use crate::data::user::db::{UserCreateData, UserDbExt, UserFilter, UserUpdateData};
use crate::data::user::User;
use crate::db::Db;
use crate::middleware::paging::PageQuery;
use crate::resp::envelope::{Paginated, Pagination, Payload};
use crate::resp::problem::{problems, Problem};
use crate::resp::session::AuthSession;
use crate::role::Role;
use crate::validate::Violations;

/// List user profiles
#[utoipa::path(
    params(
        ("role" = Option<String>, Query, description = "admin, teacher or student"),
        ("search" = Option<String>, Query, description = "substring match on name or email")
    ),
    responses(
        (status = 200, description = "Paginated users"),
        (status = 403, description = "Caller is not an admin", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/users?<role>&<search>")]
#[tracing::instrument]
pub async fn user_list(
    role: Option<&str>,
    search: Option<&str>,
    pages: PageQuery,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Paginated<User>>, Problem> {
    if !session.role.can_manage_users() {
        return Err(problems::forbidden());
    }

    let mut violations = Violations::new();
    let paging = pages.resolve(&mut violations);

    let mut filter = UserFilter {
        search: search.map(str::to_owned),
        ..Default::default()
    };
    if let Some(raw) = role {
        match Role::from_str(raw) {
            Ok(role) => filter.role = Some(role),
            Err(_) => violations.push("role", "must be one of admin, teacher, student"),
        }
    }
    violations.finish()?;

    let (users, total) = db.list_users(&filter, paging).await?;
    Ok(Json(Paginated::new(
        users,
        Pagination::new(paging.page, paging.limit, total),
    )))
}

/// Get one user profile
#[utoipa::path(
    responses(
        (status = 200, description = "User profile", body = User),
        (status = 404, description = "Unknown user", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/users/<id>")]
#[tracing::instrument]
pub async fn user_get(
    id: &str,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<User>>, Problem> {
    if !session.role.can_manage_users() {
        return Err(problems::forbidden());
    }

    let user = db
        .get_user(id)
        .await?
        .ok_or_else(|| user_problem::not_found(id))?;

    Ok(Json(Payload::new(user)))
}

/// Register a user profile under an externally issued id
#[utoipa::path(
    request_body = UserCreateData,
    responses(
        (status = 201, description = "User profile created", body = User),
        (status = 409, description = "Id or email already taken", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/users", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn user_create(
    data: Result<Json<UserCreateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<status::Created<Json<Payload<User>>>, Problem> {
    if !session.role.can_manage_users() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let user = db.create_user(data).await?;
    let location = format!("/api/users/{}", user.id);

    Ok(status::Created::new(location)
        .body(Json(Payload::with_message(user, "user created"))))
}

/// Update a user profile
#[utoipa::path(
    request_body = UserUpdateData,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 404, description = "Unknown user", body = Problem),
        (status = 409, description = "Email already taken", body = Problem),
    ),
    security(("session" = []))
)]
#[put("/users/<id>", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn user_update(
    id: &str,
    data: Result<Json<UserUpdateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<User>>, Problem> {
    if !session.role.can_manage_users() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let user = db.update_user(id, data).await?;
    Ok(Json(Payload::new(user)))
}

/// Delete a user profile
#[utoipa::path(
    responses(
        (status = 200, description = "User deleted, enrollments cascaded"),
        (status = 404, description = "Unknown user", body = Problem),
        (status = 409, description = "User still teaches classes", body = Problem),
    ),
    security(("session" = []))
)]
#[delete("/users/<id>")]
#[tracing::instrument]
pub async fn user_delete(
    id: &str,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<String>>, Problem> {
    if !session.role.can_manage_users() {
        return Err(problems::forbidden());
    }

    db.delete_user(id).await?;
    Ok(Json(Payload::with_message(
        id.to_string(),
        "user deleted",
    )))
}
