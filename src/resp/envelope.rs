use serde::Serialize;
use utoipa::ToSchema;

/// Success half of the response envelope: `{data, message?}`.
#[derive(Debug, Clone, Serialize)]
pub struct Payload<T> {
    pub data: T,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Payload<T> {
    pub fn new(data: T) -> Payload<T> {
        Payload {
            data,
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl ToString) -> Payload<T> {
        Payload {
            data,
            message: Some(message.to_string()),
        }
    }
}

/// List envelope: `{data, pagination}`.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, pagination: Pagination) -> Paginated<T> {
        Paginated { data, pagination }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    /// `totalPages = ceil(total / limit)`; zero rows means zero pages.
    pub fn new(page: u32, limit: u32, total: i64) -> Pagination {
        let limit_wide = i64::from(limit.max(1));
        Pagination {
            page,
            limit,
            total,
            total_pages: (total + limit_wide - 1) / limit_wide,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_is_the_ceiling_of_total_over_limit() {
        assert_eq!(Pagination::new(1, 10, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 10, 1).total_pages, 1);
        assert_eq!(Pagination::new(1, 10, 10).total_pages, 1);
        assert_eq!(Pagination::new(1, 10, 11).total_pages, 2);
        assert_eq!(Pagination::new(3, 7, 20).total_pages, 3);
        assert_eq!(Pagination::new(1, 1, 100).total_pages, 100);
    }

    #[test]
    fn envelope_serializes_with_camel_case_keys() {
        let page = Pagination::new(2, 25, 51);
        let json = serde_json::to_value(page).unwrap();
        assert_eq!(json["totalPages"], 3);
        assert_eq!(json["limit"], 25);

        let list = Paginated::new(vec![1, 2, 3], page);
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["data"].as_array().map(Vec::len), Some(3));
        assert!(json["pagination"].is_object());
    }

    #[test]
    fn payload_omits_absent_message() {
        let json = serde_json::to_value(Payload::new(5)).unwrap();
        assert!(json.get("message").is_none());

        let json = serde_json::to_value(Payload::with_message(5, "created")).unwrap();
        assert_eq!(json["message"], "created");
    }
}
