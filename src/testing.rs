//! Helpers shared by the test suites: in-memory stores, a local client over
//! a fully built Rocket, signed session headers and entity fixtures.

use rocket::http::Header;
use rocket::local::asynchronous::Client;

use crate::config::Config;
use crate::db::Db;
use crate::resp::session::AuthSession;
use crate::role::Role;

pub static TEST_SECRET: &str = "test-secret";

/// Fresh in-memory store with all migrations applied.
pub async fn memory_db() -> Db {
    Db::connect("sqlite::memory:")
        .await
        .expect("in-memory database")
}

/// Local client over a Rocket built against an in-memory store.
pub async fn client() -> Client {
    let mut config = Config::default();
    config.database_url = "sqlite::memory:".to_string();
    config.session_secret = TEST_SECRET.to_string();

    let rocket = crate::build(config).await.expect("rocket build");
    Client::tracked(rocket).await.expect("local client")
}

/// `Authorization` header carrying a session signed with [`TEST_SECRET`].
pub fn bearer(user: &str, role: Role) -> Header<'static> {
    let token = AuthSession::new(user, role)
        .encode_jwt(TEST_SECRET)
        .expect("session token");
    Header::new("Authorization", format!("Bearer {token}"))
}

pub mod fixtures {
    use uuid::Uuid;

    use crate::data::class::db::{ClassCreateData, ClassDbExt};
    use crate::data::class::ClassWithRelations;
    use crate::data::department::db::{DepartmentCreateData, DepartmentDbExt};
    use crate::data::department::Department;
    use crate::data::enrollment::db::EnrollmentDbExt;
    use crate::data::enrollment::EnrollmentWithRelations;
    use crate::data::subject::db::{SubjectCreateData, SubjectDbExt};
    use crate::data::subject::Subject;
    use crate::data::user::db::{UserCreateData, UserDbExt};
    use crate::data::user::User;
    use crate::db::Db;
    use crate::role::Role;

    pub async fn user(db: &Db, id: &str, role: Role) -> User {
        db.create_user(UserCreateData {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{id}@example.com"),
            role,
            email_verified: false,
            image: None,
            image_ref: None,
        })
        .await
        .expect("user fixture")
    }

    pub async fn department(db: &Db, code: &str) -> Department {
        db.create_department(DepartmentCreateData {
            code: code.to_string(),
            name: format!("{code} department"),
            description: None,
        })
        .await
        .expect("department fixture")
    }

    pub async fn subject(db: &Db, department_id: Uuid, code: &str) -> Subject {
        db.create_subject(SubjectCreateData {
            department_id,
            code: code.to_string(),
            name: format!("{code} subject"),
            description: None,
        })
        .await
        .expect("subject fixture")
        .subject
    }

    pub async fn class(
        db: &Db,
        subject_id: Uuid,
        teacher_id: &str,
        name: &str,
    ) -> ClassWithRelations {
        db.create_class(ClassCreateData {
            name: name.to_string(),
            subject_id,
            teacher_id: teacher_id.to_string(),
            description: None,
            banner_url: None,
            banner_image_ref: None,
            capacity: None,
            status: None,
            schedules: vec![],
        })
        .await
        .expect("class fixture")
    }

    pub async fn enrollment(
        db: &Db,
        student_id: &str,
        class_id: Uuid,
    ) -> EnrollmentWithRelations {
        db.create_enrollment(student_id, class_id)
            .await
            .expect("enrollment fixture")
    }
}
