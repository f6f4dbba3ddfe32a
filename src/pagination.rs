use serde::Serialize;
use serde_json::{json, Value};

use crate::config;

/// Resolved page/sort window handed to the store. The sort column is always
/// one of the handler's allow-listed identifiers, never raw client input.
#[derive(Debug, Clone)]
pub struct Slice {
    pub page: u32,
    pub limit: u32,
    pub offset: i64,
    pub order_by: &'static str,
    pub descending: bool,
}

impl Slice {
    /// Build a slice from raw query parameters. Unknown sort fields fall back
    /// to the default; page and limit are clamped to sane bounds.
    pub fn from_query(
        page: Option<u32>,
        limit: Option<u32>,
        sort_by: Option<&str>,
        sort_order: Option<&str>,
        allowed: &[&'static str],
        default_sort: &'static str,
        default_descending: bool,
    ) -> Self {
        let api = &config::config().api;
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(api.default_page_size)
            .clamp(1, api.max_page_size);
        let order_by = allowed
            .iter()
            .find(|c| Some(**c) == sort_by)
            .copied()
            .unwrap_or(default_sort);
        let descending = match sort_order {
            Some("asc") => false,
            Some("desc") => true,
            _ => default_descending,
        };
        Self {
            page,
            limit,
            offset: i64::from(page - 1) * i64::from(limit),
            order_by,
            descending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(slice: &Slice, total: i64) -> Self {
        let limit = i64::from(slice.limit);
        Self {
            page: slice.page,
            limit: slice.limit,
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

/// Uniform list envelope: `{ success, data, pagination }`.
pub fn page_envelope<T: Serialize>(data: &[T], slice: &Slice, total: i64) -> Value {
    json!({
        "success": true,
        "data": data,
        "pagination": Pagination::new(slice, total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &[&str] = &["name", "code", "created_at"];

    #[test]
    fn defaults_apply() {
        let slice = Slice::from_query(None, None, None, None, ALLOWED, "name", false);
        assert_eq!(slice.page, 1);
        assert_eq!(slice.offset, 0);
        assert_eq!(slice.order_by, "name");
        assert!(!slice.descending);
    }

    #[test]
    fn unknown_sort_field_falls_back() {
        let slice = Slice::from_query(
            None,
            None,
            Some("id; DROP TABLE users"),
            Some("desc"),
            ALLOWED,
            "name",
            false,
        );
        assert_eq!(slice.order_by, "name");
        assert!(slice.descending);
    }

    #[test]
    fn page_and_limit_are_clamped() {
        let slice = Slice::from_query(Some(0), Some(100_000), None, None, ALLOWED, "name", false);
        assert_eq!(slice.page, 1);
        assert!(slice.limit <= crate::config::config().api.max_page_size);

        let slice = Slice::from_query(Some(3), Some(20), None, None, ALLOWED, "name", false);
        assert_eq!(slice.offset, 40);
    }

    #[test]
    fn total_pages_round_up() {
        let slice = Slice::from_query(Some(1), Some(10), None, None, ALLOWED, "name", false);
        let meta = Pagination::new(&slice, 21);
        assert_eq!(meta.total_pages, 3);
        let meta = Pagination::new(&slice, 20);
        assert_eq!(meta.total_pages, 2);
        let meta = Pagination::new(&slice, 0);
        assert_eq!(meta.total_pages, 0);
    }
}
