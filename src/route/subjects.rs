use rocket::response::status;
use rocket::serde::json::{self, Json};
use rocket::State;
use uuid::Uuid;

use crate::data::subject::db::problem as subject_problem;
use crate::data::subject::db::{
    SubjectCreateData, SubjectDbExt, SubjectFilter, SubjectUpdateData,
};
use crate::data::subject::SubjectWithDepartment;
use crate::db::Db;
use crate::middleware::paging::PageQuery;
use crate::resp::envelope::{Paginated, Pagination, Payload};
use crate::resp::problem::{problems, Problem};
use crate::resp::session::AuthSession;
use crate::validate::Violations;

/// List subjects with their departments
#[utoipa::path(
    params(
        ("department" = Option<String>, Query, description = "department id"),
        ("search" = Option<String>, Query, description = "substring match on name or code")
    ),
    responses(
        (status = 200, description = "Paginated subjects with department resolved"),
        (status = 400, description = "Malformed filter or paging values", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/subjects?<department>&<search>")]
#[tracing::instrument]
pub async fn subject_list(
    department: Option<&str>,
    search: Option<&str>,
    pages: PageQuery,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Paginated<SubjectWithDepartment>>, Problem> {
    let mut violations = Violations::new();
    let paging = pages.resolve(&mut violations);

    let mut filter = SubjectFilter {
        search: search.map(str::to_owned),
        ..Default::default()
    };
    if let Some(raw) = department {
        match Uuid::parse_str(raw) {
            Ok(id) => filter.department_id = Some(id),
            Err(_) => violations.push("department", "must be a UUID"),
        }
    }
    violations.finish()?;

    let (subjects, total) = db.list_subjects(&filter, paging).await?;
    Ok(Json(Paginated::new(
        subjects,
        Pagination::new(paging.page, paging.limit, total),
    )))
}

/// Get one subject
#[utoipa::path(
    responses(
        (status = 200, description = "Subject with department resolved"),
        (status = 404, description = "Unknown subject", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/subjects/<id>")]
#[tracing::instrument]
pub async fn subject_get(
    id: Uuid,
    _session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<SubjectWithDepartment>>, Problem> {
    let subject = db
        .get_subject(id)
        .await?
        .ok_or_else(|| subject_problem::not_found(id))?;

    Ok(Json(Payload::new(subject)))
}

/// Create a subject
#[utoipa::path(
    request_body = SubjectCreateData,
    responses(
        (status = 201, description = "Subject created"),
        (status = 404, description = "Unknown department", body = Problem),
        (status = 409, description = "Subject code already taken", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/subjects", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn subject_create(
    data: Result<Json<SubjectCreateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<status::Created<Json<Payload<SubjectWithDepartment>>>, Problem> {
    if !session.role.can_write_catalog() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let subject = db.create_subject(data).await?;
    let location = format!("/api/subjects/{}", subject.subject.id);

    Ok(status::Created::new(location)
        .body(Json(Payload::with_message(subject, "subject created"))))
}

/// Update a subject
#[utoipa::path(
    request_body = SubjectUpdateData,
    responses(
        (status = 200, description = "Updated subject"),
        (status = 404, description = "Unknown subject or department", body = Problem),
        (status = 409, description = "Subject code already taken", body = Problem),
    ),
    security(("session" = []))
)]
#[put("/subjects/<id>", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn subject_update(
    id: Uuid,
    data: Result<Json<SubjectUpdateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<SubjectWithDepartment>>, Problem> {
    if !session.role.can_write_catalog() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let subject = db.update_subject(id, data).await?;
    Ok(Json(Payload::new(subject)))
}

/// Delete a subject and its classes
#[utoipa::path(
    responses(
        (status = 200, description = "Subject deleted, classes cascaded"),
        (status = 404, description = "Unknown subject", body = Problem),
    ),
    security(("session" = []))
)]
#[delete("/subjects/<id>")]
#[tracing::instrument]
pub async fn subject_delete(
    id: Uuid,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<Uuid>>, Problem> {
    if !session.role.can_write_catalog() {
        return Err(problems::forbidden());
    }

    db.delete_subject(id).await?;
    Ok(Json(Payload::with_message(id, "subject deleted")))
}

#[cfg(test)]
mod subject_endpoints {
    use rocket::http::{ContentType, Status};
    use serde_json::{json, Value};

    use crate::db::Db;
    use crate::role::Role;
    use crate::testing::{self, fixtures};

    #[rocket::async_test]
    async fn teachers_can_create_but_students_cannot() {
        let client = testing::client().await;
        let db: &Db = client.rocket().state().expect("managed db");
        let department = fixtures::department(db, "CS").await;
        let body = json!({
            "departmentId": department.id,
            "code": "CS101",
            "name": "Intro to Programming",
        })
        .to_string();

        let response = client
            .post("/api/subjects")
            .header(ContentType::JSON)
            .header(testing::bearer("user_s1", Role::Student))
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .post("/api/subjects")
            .header(ContentType::JSON)
            .header(testing::bearer("user_t1", Role::Teacher))
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["data"]["code"], "CS101");
        assert_eq!(body["data"]["department"]["code"], "CS");
    }

    #[rocket::async_test]
    async fn creating_under_an_unknown_department_is_a_not_found() {
        let client = testing::client().await;

        let response = client
            .post("/api/subjects")
            .header(ContentType::JSON)
            .header(testing::bearer("user_a1", Role::Admin))
            .body(
                json!({
                    "departmentId": uuid::Uuid::new_v4(),
                    "code": "CS101",
                    "name": "Intro to Programming",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["error"], "not_found");
    }

    #[rocket::async_test]
    async fn listing_combines_department_and_search_filters() {
        let client = testing::client().await;
        let db: &Db = client.rocket().state().expect("managed db");
        let cs = fixtures::department(db, "CS").await;
        let math = fixtures::department(db, "MATH").await;
        fixtures::subject(db, cs.id, "CS101").await;
        fixtures::subject(db, cs.id, "CS201").await;
        fixtures::subject(db, math.id, "MA101").await;

        let response = client
            .get(format!("/api/subjects?department={}&search=cs2", cs.id))
            .header(testing::bearer("user_s1", Role::Student))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["code"], "CS201");
    }

    #[rocket::async_test]
    async fn malformed_department_filter_is_rejected() {
        let client = testing::client().await;

        let response = client
            .get("/api/subjects?department=not-a-uuid")
            .header(testing::bearer("user_s1", Role::Student))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["details"][0]["field"], "department");
    }

    #[rocket::async_test]
    async fn empty_update_fails_validation() {
        let client = testing::client().await;
        let db: &Db = client.rocket().state().expect("managed db");
        let department = fixtures::department(db, "CS").await;
        let subject = fixtures::subject(db, department.id, "CS101").await;

        let response = client
            .put(format!("/api/subjects/{}", subject.id))
            .header(ContentType::JSON)
            .header(testing::bearer("user_a1", Role::Admin))
            .body("{}")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["error"], "validation_error");
    }
}
