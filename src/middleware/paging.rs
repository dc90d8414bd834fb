use std::convert::Infallible;

use rocket::request::{FromRequest, Outcome, Request};

use crate::validate::Violations;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Raw `page` and `limit` query parameters, captured before parsing so that
/// malformed values surface as field violations instead of being silently
/// dropped by form parsing.
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    page: Option<String>,
    limit: Option<String>,
}

/// Validated paging window. `page` is 1-based.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Paging {
    pub page: u32,
    pub limit: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Paging {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Paging {
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.limit)
    }
}

impl PageQuery {
    /// Parses the captured parameters, recording a violation for each value
    /// that is not a positive integer in range. Violations from the query and
    /// the body can then be reported in a single response.
    pub fn resolve(&self, violations: &mut Violations) -> Paging {
        let page = match self.page.as_deref() {
            None => DEFAULT_PAGE,
            Some(raw) => match raw.parse::<u32>() {
                Ok(page) if page >= 1 => page,
                Ok(_) => {
                    violations.push("page", "must be at least 1");
                    DEFAULT_PAGE
                }
                Err(_) => {
                    violations.push("page", "must be a positive integer");
                    DEFAULT_PAGE
                }
            },
        };

        let limit = match self.limit.as_deref() {
            None => DEFAULT_LIMIT,
            Some(raw) => match raw.parse::<u32>() {
                Ok(limit) if (1..=MAX_LIMIT).contains(&limit) => limit,
                Ok(_) => {
                    violations.push("limit", format!("must be between 1 and {}", MAX_LIMIT));
                    DEFAULT_LIMIT
                }
                Err(_) => {
                    violations.push("limit", "must be a positive integer");
                    DEFAULT_LIMIT
                }
            },
        };

        Paging { page, limit }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PageQuery {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let page = request
            .query_value::<&str>("page")
            .and_then(Result::ok)
            .map(str::to_owned);

        let limit = request
            .query_value::<&str>("limit")
            .and_then(Result::ok)
            .map(str::to_owned);

        Outcome::Success(PageQuery { page, limit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, limit: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(str::to_owned),
            limit: limit.map(str::to_owned),
        }
    }

    #[test]
    fn absent_parameters_resolve_to_defaults() {
        let mut violations = Violations::new();
        let paging = query(None, None).resolve(&mut violations);

        assert!(violations.is_empty());
        assert_eq!(paging, Paging::default());
        assert_eq!(paging.offset(), 0);
    }

    #[test]
    fn valid_parameters_are_parsed() {
        let mut violations = Violations::new();
        let paging = query(Some("3"), Some("25")).resolve(&mut violations);

        assert!(violations.is_empty());
        assert_eq!(paging.page, 3);
        assert_eq!(paging.limit, 25);
        assert_eq!(paging.offset(), 50);
    }

    #[test]
    fn zero_and_negative_pages_are_violations() {
        let mut violations = Violations::new();
        query(Some("0"), None).resolve(&mut violations);
        query(Some("-2"), None).resolve(&mut violations);

        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn non_numeric_values_are_violations() {
        let mut violations = Violations::new();
        query(Some("abc"), Some("ten")).resolve(&mut violations);

        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn limit_above_maximum_is_a_violation() {
        let mut violations = Violations::new();
        let paging = query(None, Some("101")).resolve(&mut violations);

        assert_eq!(violations.len(), 1);
        assert_eq!(paging.limit, DEFAULT_LIMIT);
    }
}
