use rocket::http::Status;
use serde::Serialize;
use utoipa::ToSchema;

use crate::resp::problem::Problem;

/// One violated input constraint.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

/// Collects every violated constraint of a request so they can be reported
/// together in a single 400 response instead of one at a time.
#[derive(Debug, Default)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn new() -> Violations {
        Violations::default()
    }

    pub fn push(&mut self, field: impl ToString, message: impl ToString) {
        self.0.push(Violation {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    /// Adds a violation unless `value` is non-empty after trimming.
    pub fn require_non_empty(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "must not be empty");
        }
    }

    /// Same check, applied only when the field is present in a partial update.
    pub fn require_non_empty_opt(&mut self, field: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.require_non_empty(field, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn finish(self) -> Result<(), Problem> {
        if self.0.is_empty() {
            return Ok(());
        }

        Err(
            Problem::new(Status::BadRequest, "validation_error", "request validation failed")
                .insert("details", self.0)
                .take(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_collector_passes() {
        assert!(Violations::new().finish().is_ok());
    }

    #[test]
    fn all_violations_are_reported_together() {
        let mut v = Violations::new();
        v.require_non_empty("name", "  ");
        v.require_non_empty("code", "");
        v.push("capacity", "must be at least 1");

        let problem = v.finish().unwrap_err();
        assert_eq!(problem.status, Status::BadRequest);
        assert_eq!(problem.error, "validation_error");

        let details = problem.body.get("details").expect("details array");
        assert_eq!(details.as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn optional_fields_are_only_checked_when_present() {
        let mut v = Violations::new();
        v.require_non_empty_opt("description", None);
        assert!(v.is_empty());

        v.require_non_empty_opt("description", Some(" "));
        assert!(!v.is_empty());
    }
}
