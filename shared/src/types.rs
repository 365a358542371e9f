//! Common types used across the platform

use serde::{Deserialize, Deserializer, Serialize};

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Pagination {
    /// Largest page size a client may request
    pub const MAX_PER_PAGE: u32 = 200;

    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// Page size clamped to `1..=MAX_PER_PAGE`
    pub fn limit(&self) -> i64 {
        self.per_page.clamp(1, Self::MAX_PER_PAGE) as i64
    }

    /// Row offset for the requested page (pages are 1-based)
    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.limit()
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, pagination: &Pagination, total_items: u64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(pagination, total_items),
        }
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn new(pagination: &Pagination, total_items: u64) -> Self {
        let per_page = pagination.limit() as u64;
        Self {
            page: pagination.page.max(1),
            per_page: per_page as u32,
            total_items,
            total_pages: total_items.div_ceil(per_page) as u32,
        }
    }
}

/// Date range for queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: chrono::NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Deserializer for clearable update fields typed `Option<Option<T>>`.
/// Pair it with `#[serde(default)]`: a missing key stays `None` and keeps
/// the stored value, an explicit `null` becomes `Some(None)` and clears it.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Value to store for a clearable field given the update and the current value
pub fn patch<T>(update: Option<Option<T>>, current: Option<T>) -> Option<T> {
    match update {
        Some(value) => value,
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Update {
        #[serde(default, deserialize_with = "nullable")]
        remarks: Option<Option<String>>,
    }

    #[test]
    fn test_offset_and_limit() {
        let p = Pagination::new(3, 25);
        assert_eq!(p.limit(), 25);
        assert_eq!(p.offset(), 50);

        let zero = Pagination::new(0, 0);
        assert_eq!(zero.limit(), 1);
        assert_eq!(zero.offset(), 0);

        let huge = Pagination::new(1, 10_000);
        assert_eq!(huge.limit(), Pagination::MAX_PER_PAGE as i64);
    }

    #[test]
    fn test_total_pages() {
        let meta = PaginationMeta::new(&Pagination::new(1, 20), 41);
        assert_eq!(meta.total_pages, 3);
        let empty = PaginationMeta::new(&Pagination::default(), 0);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_nullable_distinguishes_missing_from_null() {
        let missing: Update = serde_json::from_str("{}").unwrap();
        let cleared: Update = serde_json::from_str(r#"{"remarks": null}"#).unwrap();
        let set: Update = serde_json::from_str(r#"{"remarks": "Hazy"}"#).unwrap();

        assert_eq!(missing.remarks, None);
        assert_eq!(cleared.remarks, Some(None));
        assert_eq!(set.remarks, Some(Some("Hazy".to_string())));

        let stored = Some("Clear".to_string());
        assert_eq!(patch(missing.remarks, stored.clone()), stored);
        assert_eq!(patch(cleared.remarks, stored.clone()), None);
        assert_eq!(patch(set.remarks, stored), Some("Hazy".to_string()));
    }
}
