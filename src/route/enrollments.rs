use rocket::response::status;
use rocket::serde::json::{self, Json};
use rocket::{FromForm, State};
use uuid::Uuid;

use crate::data::class::db::problem as class_problem;
use crate::data::class::db::ClassDbExt;
use crate::data::enrollment::db::problem as enrollment_problem;
use crate::data::enrollment::db::{
    EnrollmentCreateData, EnrollmentDbExt, EnrollmentFilter, EnrollmentJoinData,
    EnrollmentUpdateData,
};
use crate::data::enrollment::EnrollmentWithRelations;
use crate::db::Db;
use crate::middleware::paging::PageQuery;
use crate::resp::envelope::{Paginated, Pagination, Payload};
use crate::resp::problem::{problems, Problem};
use crate::resp::session::AuthSession;
use crate::validate::Violations;

/// Query filters of the enrollment listing, captured raw so malformed ids
/// surface as field violations.
#[derive(Debug, FromForm)]
pub struct EnrollmentListQuery<'r> {
    #[field(name = "classId")]
    class_id: Option<&'r str>,
    #[field(name = "studentId")]
    student_id: Option<&'r str>,
}

/// List enrollments with student and class resolved
#[utoipa::path(
    params(
        ("classId" = Option<String>, Query, description = "class id"),
        ("studentId" = Option<String>, Query, description = "student user id")
    ),
    responses(
        (status = 200, description = "Paginated enrollments"),
        (status = 403, description = "Caller is not an admin or teacher", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/enrollments?<query..>")]
#[tracing::instrument]
pub async fn enrollment_list(
    query: EnrollmentListQuery<'_>,
    pages: PageQuery,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Paginated<EnrollmentWithRelations>>, Problem> {
    if !session.role.can_manage_enrollments() {
        return Err(problems::forbidden());
    }

    let mut violations = Violations::new();
    let paging = pages.resolve(&mut violations);

    let mut filter = EnrollmentFilter {
        student_id: query.student_id.map(str::to_owned),
        ..Default::default()
    };
    if let Some(raw) = query.class_id {
        match Uuid::parse_str(raw) {
            Ok(id) => filter.class_id = Some(id),
            Err(_) => violations.push("classId", "must be a UUID"),
        }
    }
    violations.finish()?;

    let (enrollments, total) = db.list_enrollments(&filter, paging).await?;
    Ok(Json(Paginated::new(
        enrollments,
        Pagination::new(paging.page, paging.limit, total),
    )))
}

/// Get one enrollment
#[utoipa::path(
    responses(
        (status = 200, description = "Enrollment with student and class resolved"),
        (status = 404, description = "Unknown enrollment", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/enrollments/<id>")]
#[tracing::instrument]
pub async fn enrollment_get(
    id: Uuid,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<EnrollmentWithRelations>>, Problem> {
    if !session.role.can_manage_enrollments() {
        return Err(problems::forbidden());
    }

    let enrollment = db
        .get_enrollment(id)
        .await?
        .ok_or_else(|| enrollment_problem::not_found(id))?;

    Ok(Json(Payload::new(enrollment)))
}

/// Enroll the caller into a class by id
#[utoipa::path(
    request_body = EnrollmentCreateData,
    responses(
        (status = 201, description = "Enrollment created for the session user"),
        (status = 404, description = "Unknown class", body = Problem),
        (status = 409, description = "Already enrolled", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/enrollments", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn enrollment_create(
    data: Result<Json<EnrollmentCreateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<status::Created<Json<Payload<EnrollmentWithRelations>>>, Problem> {
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();

    let class = db
        .get_class(data.class_id)
        .await?
        .ok_or_else(|| class_problem::not_found(data.class_id))?;

    let enrollment = db.create_enrollment(&session.user, class.class.id).await?;
    let location = format!("/api/enrollments/{}", enrollment.enrollment.id);

    Ok(status::Created::new(location)
        .body(Json(Payload::with_message(enrollment, "enrolled"))))
}

/// Enroll the caller into a class by invite code
#[utoipa::path(
    request_body = EnrollmentJoinData,
    responses(
        (status = 201, description = "Enrollment created for the session user"),
        (status = 404, description = "No class under this invite code", body = Problem),
        (status = 409, description = "Already enrolled", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/enrollments/join", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn enrollment_join(
    data: Result<Json<EnrollmentJoinData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<status::Created<Json<Payload<EnrollmentWithRelations>>>, Problem> {
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let class = db
        .find_class_by_invite_code(&data.invite_code)
        .await?
        .ok_or_else(|| class_problem::invite_code_not_found(&data.invite_code))?;

    let enrollment = db.create_enrollment(&session.user, class.class.id).await?;
    let location = format!("/api/enrollments/{}", enrollment.enrollment.id);

    Ok(status::Created::new(location)
        .body(Json(Payload::with_message(enrollment, "enrolled"))))
}

/// Update an enrollment
#[utoipa::path(
    request_body = EnrollmentUpdateData,
    responses(
        (status = 200, description = "Updated enrollment"),
        (status = 404, description = "Unknown enrollment, student or class", body = Problem),
        (status = 409, description = "Target student is already enrolled there", body = Problem),
    ),
    security(("session" = []))
)]
#[put("/enrollments/<id>", format = "application/json", data = "<data>")]
#[tracing::instrument]
pub async fn enrollment_update(
    id: Uuid,
    data: Result<Json<EnrollmentUpdateData>, json::Error<'_>>,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<EnrollmentWithRelations>>, Problem> {
    if !session.role.can_manage_enrollments() {
        return Err(problems::forbidden());
    }
    let data = data.map_err(|e| problems::parse_problem(&e))?.into_inner();
    data.validate()?;

    let enrollment = db.update_enrollment(id, data).await?;
    Ok(Json(Payload::new(enrollment)))
}

/// Delete an enrollment
#[utoipa::path(
    responses(
        (status = 200, description = "Enrollment deleted"),
        (status = 404, description = "Unknown enrollment", body = Problem),
    ),
    security(("session" = []))
)]
#[delete("/enrollments/<id>")]
#[tracing::instrument]
pub async fn enrollment_delete(
    id: Uuid,
    session: AuthSession,
    db: &State<Db>,
) -> Result<Json<Payload<Uuid>>, Problem> {
    if !session.role.can_manage_enrollments() {
        return Err(problems::forbidden());
    }

    db.delete_enrollment(id).await?;
    Ok(Json(Payload::with_message(id, "enrollment deleted")))
}

#[cfg(test)]
mod enrollment_endpoints {
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{json, Value};

    use crate::data::class::ClassWithRelations;
    use crate::db::Db;
    use crate::role::Role;
    use crate::testing::{self, fixtures};

    async fn classroom(client: &Client) -> ClassWithRelations {
        let db: &Db = client.rocket().state().expect("managed db");
        let department = fixtures::department(db, "CS").await;
        let subject = fixtures::subject(db, department.id, "CS101").await;
        let teacher = fixtures::user(db, "user_t1", Role::Teacher).await;
        fixtures::user(db, "user_s1", Role::Student).await;
        fixtures::class(db, subject.id, &teacher.id, "Intro").await
    }

    #[rocket::async_test]
    async fn joining_twice_yields_exactly_one_enrollment() {
        let client = testing::client().await;
        let class = classroom(&client).await;
        let body = json!({ "inviteCode": class.class.invite_code }).to_string();

        let response = client
            .post("/api/enrollments/join")
            .header(ContentType::JSON)
            .header(testing::bearer("user_s1", Role::Student))
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        assert!(response.headers().get_one("Location").is_some());

        let first: Value = response.into_json().await.expect("json body");
        assert_eq!(first["data"]["classId"], class.class.id.to_string());
        assert_eq!(first["data"]["student"]["id"], "user_s1");

        let response = client
            .post("/api/enrollments/join")
            .header(ContentType::JSON)
            .header(testing::bearer("user_s1", Role::Student))
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let second: Value = response.into_json().await.expect("json body");
        assert_eq!(second["error"], "conflict");

        let db: &Db = client.rocket().state().expect("managed db");
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments")
            .fetch_one(db.pool())
            .await
            .expect("count");
        assert_eq!(rows, 1);
    }

    #[rocket::async_test]
    async fn unknown_invite_code_is_a_not_found() {
        let client = testing::client().await;
        classroom(&client).await;

        let response = client
            .post("/api/enrollments/join")
            .header(ContentType::JSON)
            .header(testing::bearer("user_s1", Role::Student))
            .body(json!({ "inviteCode": "ZZZZZZZZ" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["error"], "not_found");
    }

    #[rocket::async_test]
    async fn blank_invite_code_fails_validation() {
        let client = testing::client().await;

        let response = client
            .post("/api/enrollments/join")
            .header(ContentType::JSON)
            .header(testing::bearer("user_s1", Role::Student))
            .body(json!({ "inviteCode": "  " }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["error"], "validation_error");
    }

    #[rocket::async_test]
    async fn create_takes_the_student_from_the_session() {
        let client = testing::client().await;
        let class = classroom(&client).await;

        // The body carries no student; a body-supplied one could not be
        // injected even on behalf of an admin.
        let response = client
            .post("/api/enrollments")
            .header(ContentType::JSON)
            .header(testing::bearer("user_s1", Role::Student))
            .body(
                json!({ "classId": class.class.id, "studentId": "user_t1" }).to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["data"]["studentId"], "user_s1");
    }

    #[rocket::async_test]
    async fn session_without_a_user_row_cannot_enroll() {
        let client = testing::client().await;
        let class = classroom(&client).await;

        let response = client
            .post("/api/enrollments")
            .header(ContentType::JSON)
            .header(testing::bearer("user_ghost", Role::Student))
            .body(json!({ "classId": class.class.id }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["error"], "not_found");
    }

    #[rocket::async_test]
    async fn listing_is_closed_to_students() {
        let client = testing::client().await;

        let response = client
            .get("/api/enrollments")
            .header(testing::bearer("user_s1", Role::Student))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .get("/api/enrollments")
            .header(testing::bearer("user_t1", Role::Teacher))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn listing_filters_by_class() {
        let client = testing::client().await;
        let class = classroom(&client).await;
        let db: &Db = client.rocket().state().expect("managed db");
        let other = fixtures::class(db, class.subject.id, &class.teacher.id, "Advanced").await;
        fixtures::enrollment(db, "user_s1", class.class.id).await;
        fixtures::enrollment(db, "user_s1", other.class.id).await;

        let response = client
            .get(format!("/api/enrollments?classId={}&studentId=user_s1", class.class.id))
            .header(testing::bearer("user_t1", Role::Teacher))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["class"]["id"], class.class.id.to_string());
    }

    #[rocket::async_test]
    async fn update_moves_and_delete_removes() {
        let client = testing::client().await;
        let class = classroom(&client).await;
        let db: &Db = client.rocket().state().expect("managed db");
        let other = fixtures::class(db, class.subject.id, &class.teacher.id, "Advanced").await;
        let enrollment = fixtures::enrollment(db, "user_s1", class.class.id).await;
        let uri = format!("/api/enrollments/{}", enrollment.enrollment.id);

        let response = client
            .put(&uri)
            .header(ContentType::JSON)
            .header(testing::bearer("user_s1", Role::Student))
            .body(json!({ "classId": other.class.id }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .put(&uri)
            .header(ContentType::JSON)
            .header(testing::bearer("user_a1", Role::Admin))
            .body(json!({ "classId": other.class.id }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["data"]["class"]["id"], other.class.id.to_string());

        let response = client
            .delete(&uri)
            .header(testing::bearer("user_t1", Role::Teacher))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(&uri)
            .header(testing::bearer("user_t1", Role::Teacher))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }
}
