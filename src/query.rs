//! Query module for building image listing queries.
//!
//! [`ImagesQuery`] carries everything a listing request can specify:
//! pagination, an inclusive creation-time window, a metadata predicate and
//! the metadata projection flag. Handlers build one incrementally from the
//! request parameters; once evaluation starts the value is only read.

use crate::metadata::MetadataExpr;
use chrono::{DateTime, Utc};

/// Page number used when the request does not specify one.
pub const DEFAULT_PAGE: u32 = 1;

/// Page size used when the request does not specify one.
pub const DEFAULT_LIMIT: u32 = 20;

/// The filter, pagination and projection parameters of an image listing.
///
/// Every field is optional at construction time; the getters fall back to
/// the documented defaults so evaluation can never fail on a missing field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImagesQuery {
    page: Option<u32>,
    limit: Option<u32>,
    return_metadata: bool,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    metadata_query: Option<MetadataExpr>,
}

impl ImagesQuery {
    /// Creates an empty query: first page, default page size, no filters,
    /// metadata excluded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page number. Page numbering starts at 1; rejecting zero or
    /// non-numeric input is the caller's job.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets whether each returned record includes its metadata.
    pub fn with_return_metadata(mut self, include: bool) -> Self {
        self.return_metadata = include;
        self
    }

    /// Sets the inclusive lower bound on creation time.
    pub fn with_from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Sets the inclusive upper bound on creation time.
    ///
    /// The query does not verify `from <= to`; an inverted window simply
    /// matches nothing.
    pub fn with_to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Sets the metadata predicate.
    pub fn with_metadata_query(mut self, expr: MetadataExpr) -> Self {
        self.metadata_query = Some(expr);
        self
    }

    /// Parses and sets the metadata predicate from its JSON-encoded string
    /// form. Input that does not parse as a query document is silently
    /// ignored and leaves the query unchanged.
    pub fn with_metadata_query_str(mut self, input: &str) -> Self {
        if let Some(expr) = MetadataExpr::parse(input) {
            self.metadata_query = Some(expr);
        }
        self
    }

    /// The requested page, defaulting to [`DEFAULT_PAGE`].
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(DEFAULT_PAGE)
    }

    /// The requested page size, defaulting to [`DEFAULT_LIMIT`].
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// Whether returned records carry metadata.
    pub fn return_metadata(&self) -> bool {
        self.return_metadata
    }

    /// The inclusive lower bound on creation time, if any.
    pub fn from(&self) -> Option<DateTime<Utc>> {
        self.from
    }

    /// The inclusive upper bound on creation time, if any.
    pub fn to(&self) -> Option<DateTime<Utc>> {
        self.to
    }

    /// The metadata predicate, if any.
    pub fn metadata_query(&self) -> Option<&MetadataExpr> {
        self.metadata_query.as_ref()
    }

    /// Number of records the pagination skips. A zero page, which callers
    /// are expected to reject, is treated as the first page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page().saturating_sub(1)) * u64::from(self.limit())
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_LIMIT, DEFAULT_PAGE, ImagesQuery};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_defaults() {
        let query = ImagesQuery::new();

        assert_eq!(DEFAULT_PAGE, query.page());
        assert_eq!(DEFAULT_LIMIT, query.limit());
        assert!(!query.return_metadata());
        assert_eq!(None, query.from());
        assert_eq!(None, query.to());
        assert!(query.metadata_query().is_none());
        assert_eq!(0, query.offset());
    }

    #[test]
    fn test_chained_construction() {
        let from = Utc.timestamp_opt(1000, 0).unwrap();
        let to = Utc.timestamp_opt(2000, 0).unwrap();

        let query = ImagesQuery::new()
            .with_page(3)
            .with_limit(50)
            .with_return_metadata(true)
            .with_from(from)
            .with_to(to)
            .with_metadata_query_str(r#"{"color":"red"}"#);

        assert_eq!(3, query.page());
        assert_eq!(50, query.limit());
        assert!(query.return_metadata());
        assert_eq!(Some(from), query.from());
        assert_eq!(Some(to), query.to());
        assert!(query.metadata_query().is_some());
        assert_eq!(100, query.offset());
    }

    #[test]
    fn test_malformed_metadata_query_is_ignored() {
        let query = ImagesQuery::new()
            .with_metadata_query_str("{not json")
            .with_metadata_query_str("[1,2]")
            .with_metadata_query_str(r#"{"f":{"$bogus":1}}"#);

        assert!(query.metadata_query().is_none());
    }

    #[test]
    fn test_malformed_query_does_not_clobber_valid_one() {
        let query = ImagesQuery::new()
            .with_metadata_query_str(r#"{"color":"red"}"#)
            .with_metadata_query_str("{not json");

        assert!(query.metadata_query().is_some());
    }

    #[test]
    fn test_offset_follows_page_and_limit() {
        assert_eq!(
            20,
            ImagesQuery::new().with_page(2).offset()
        );
        assert_eq!(
            10,
            ImagesQuery::new().with_page(2).with_limit(10).offset()
        );
    }
}
