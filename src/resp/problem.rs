use std::fmt::{Display, Formatter};
use std::io::Cursor;

use rocket::http::ContentType;
use rocket::http::Status;
use rocket::response::Responder;
use rocket::{response, Request, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::db;

/// Error half of the response envelope: `{error, message?, ...}` with the
/// HTTP status carried out of band. `error` is a stable machine-readable
/// code, `message` is for humans, and `body` holds per-error extras such as
/// the `details` array of validation violations.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Problem {
    #[serde(skip)]
    pub status: Status,
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Default for Problem {
    fn default() -> Self {
        Problem {
            status: Status::InternalServerError,
            error: "internal_error".to_string(),
            message: None,
            body: Map::new(),
        }
    }
}

impl Problem {
    pub fn new(status: Status, error: impl ToString, message: impl ToString) -> Problem {
        Problem {
            status,
            error: error.to_string(),
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn message(&mut self, value: impl ToString) -> &mut Problem {
        self.message = Some(value.to_string());
        self
    }

    pub fn insert<V: Serialize>(&mut self, key: impl ToString, value: V) -> &mut Problem {
        self.body.insert(
            key.to_string(),
            serde_json::to_value(value).expect("data must be JSON serializable"),
        );
        self
    }

    pub fn insert_str(&mut self, key: impl ToString, value: impl ToString) -> &mut Problem {
        self.body
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    /// Finishes a builder chain on `&mut Problem`, leaving a default in place.
    pub fn take(&mut self) -> Problem {
        std::mem::take(self)
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.error)
    }
}

impl std::error::Error for Problem {}

impl<'r> Responder<'r, 'static> for Problem {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body_string =
            serde_json::to_string(&self).expect("problem body must be JSON serializable");

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body_string.len(), Cursor::new(body_string))
            .ok()
    }
}

pub mod problems {
    use rocket::http::Status;
    use rocket::serde::json;

    use crate::resp::problem::Problem;

    #[inline]
    pub fn unauthenticated() -> Problem {
        Problem::new(
            Status::Unauthorized,
            "unauthenticated",
            "a valid session is required",
        )
    }

    #[inline]
    pub fn forbidden() -> Problem {
        Problem::new(
            Status::Forbidden,
            "forbidden",
            "the caller's role does not permit this operation",
        )
    }

    #[inline]
    pub fn not_found(what: impl ToString) -> Problem {
        Problem::new(
            Status::NotFound,
            "not_found",
            format!("{} not found", what.to_string()),
        )
    }

    #[inline]
    pub fn conflict(message: impl ToString) -> Problem {
        Problem::new(Status::Conflict, "conflict", message)
    }

    #[inline]
    pub fn internal() -> Problem {
        Problem::new(
            Status::InternalServerError,
            "internal_error",
            "an unexpected error occurred",
        )
    }

    /// Rejected request bodies are validation failures, reported before any
    /// store access.
    pub fn parse_problem(error: &json::Error<'_>) -> Problem {
        let message = match error {
            json::Error::Io(_) => "unable to read request body".to_string(),
            json::Error::Parse(_, e) => format!("malformed JSON body: {e}"),
        };
        Problem::new(Status::BadRequest, "validation_error", message)
    }

    /// Envelope for catcher-produced responses, keyed by status code.
    pub fn for_status(status: Status) -> Problem {
        let error = match status.code {
            400 => "validation_error",
            401 => "unauthenticated",
            403 => "forbidden",
            404 => "not_found",
            405 => "method_not_allowed",
            409 => "conflict",
            422 => "validation_error",
            500 => "internal_error",
            _ => "error",
        };

        Problem::new(status, error, status.reason_lossy().to_lowercase())
    }
}

/// Store-error backstop. Pre-checks catch most conflicts, but a race that
/// slips past them surfaces here as a constraint violation and must still be
/// reported as a 409, never as a raw 500.
impl From<sqlx::Error> for Problem {
    fn from(e: sqlx::Error) -> Self {
        if db::is_unique_violation(&e) {
            return problems::conflict("a record with the same unique value already exists");
        }
        if db::is_foreign_key_violation(&e) {
            return problems::conflict("the operation is blocked by related records");
        }

        match e {
            sqlx::Error::RowNotFound => problems::not_found("record"),
            other => {
                tracing::error!("database error: {}", other);
                problems::internal()
            }
        }
    }
}

impl From<serde_json::Error> for Problem {
    fn from(e: serde_json::Error) -> Self {
        tracing::error!("JSON processing error: {}", e);
        problems::internal()
    }
}
