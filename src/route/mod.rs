use std::collections::BTreeMap;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Build, Request, Rocket, Route};

pub mod classes;
pub mod departments;
pub mod enrollments;
pub mod subjects;
pub mod users;

use classes::*;
use departments::*;
use enrollments::*;
use subjects::*;
use users::*;

use utoipa::OpenApi;

use crate::{
    data::{class, department, enrollment, subject, user},
    resp::envelope::Pagination,
    resp::problem::{problems, Problem},
    resp::session::doc::SessionAuth,
    role::Role,
    validate::Violation,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        department_list,
        department_get,
        department_create,
        department_update,
        department_delete,
        department_subjects,
        department_classes,
        department_users,
        subject_list,
        subject_get,
        subject_create,
        subject_update,
        subject_delete,
        class_list,
        class_get,
        class_by_invite,
        class_create,
        class_update,
        class_delete,
        enrollment_list,
        enrollment_get,
        enrollment_create,
        enrollment_join,
        enrollment_update,
        enrollment_delete,
        user_list,
        user_get,
        user_create,
        user_update,
        user_delete
    ),
    components(schemas(
        Role,
        department::Department,
        department::DepartmentRef,
        department::DepartmentWithSubjectCount,
        department::DepartmentUser,
        department::db::DepartmentCreateData,
        department::db::DepartmentUpdateData,
        subject::Subject,
        subject::SubjectRef,
        subject::SubjectWithDepartment,
        subject::SubjectWithClassCount,
        subject::db::SubjectCreateData,
        subject::db::SubjectUpdateData,
        class::Class,
        class::ClassRef,
        class::ClassWithRelations,
        class::ClassStatus,
        class::Schedule,
        class::ScheduleDay,
        class::db::ClassCreateData,
        class::db::ClassUpdateData,
        enrollment::Enrollment,
        enrollment::EnrollmentWithRelations,
        enrollment::db::EnrollmentCreateData,
        enrollment::db::EnrollmentJoinData,
        enrollment::db::EnrollmentUpdateData,
        user::User,
        user::UserRef,
        user::db::UserCreateData,
        user::db::UserUpdateData,
        Pagination,
        Violation,
        Problem
    )),
    modifiers(&SessionAuth, &API_PREFIX)
)]
pub struct ApiDoc;

pub struct PathPrefix(pub &'static str);
static API_PREFIX: PathPrefix = PathPrefix("/api");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

/// Machine-readable description of the API surface.
#[get("/openapi.json")]
pub fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Keeps unmatched routes, failed guards and other framework-level rejections
/// inside the response envelope.
#[catch(default)]
fn fallback(status: Status, _request: &Request<'_>) -> Problem {
    problems::for_status(status)
}

pub fn api() -> Vec<Route> {
    routes![
        department_list,
        department_get,
        department_create,
        department_update,
        department_delete,
        department_subjects,
        department_classes,
        department_users,
        subject_list,
        subject_get,
        subject_create,
        subject_update,
        subject_delete,
        class_list,
        class_get,
        class_by_invite,
        class_create,
        class_update,
        class_delete,
        enrollment_list,
        enrollment_get,
        enrollment_create,
        enrollment_join,
        enrollment_update,
        enrollment_delete,
        user_list,
        user_get,
        user_create,
        user_update,
        user_delete,
        openapi_json
    ]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/api", api())
        .register("/", catchers![fallback])
}

#[cfg(test)]
mod api_surface {
    use rocket::http::Status;
    use serde_json::Value;

    use crate::role::Role;
    use crate::testing;

    #[rocket::async_test]
    async fn openapi_document_lists_the_prefixed_paths() {
        let client = testing::client().await;

        let response = client.get("/api/openapi.json").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("json body");
        let paths = body["paths"].as_object().expect("paths object");
        assert!(paths.contains_key("/api/departments"));
        assert!(paths.contains_key("/api/enrollments/join"));
        assert!(paths.contains_key("/api/classes/invite/{code}"));
    }

    #[rocket::async_test]
    async fn unmatched_routes_use_the_envelope() {
        let client = testing::client().await;

        let response = client
            .get("/api/nothing-here")
            .header(testing::bearer("user_a1", Role::Admin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["error"], "not_found");
    }

    #[rocket::async_test]
    async fn garbled_path_ids_fall_through_to_not_found() {
        let client = testing::client().await;

        let response = client
            .get("/api/departments/not-a-uuid")
            .header(testing::bearer("user_a1", Role::Admin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }
}
