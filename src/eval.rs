//! # Query Evaluator
//!
//! Applies an [`ImagesQuery`] to a per-key collection of image records and
//! produces a deterministic, ordered page. Every database backend must
//! produce results identical to this module; the in-memory backend calls it
//! directly and the SQL backend falls back to it whenever a metadata
//! predicate is in play.
//!
//! The pipeline, in order:
//!
//! 1. Inclusive `from`/`to` bounds on the creation timestamp.
//! 2. The metadata predicate, if the query carries one. A record with no
//!    metadata never matches a non-empty predicate.
//! 3. Sort by creation time descending, identifier ascending as tie break.
//!    The secondary key makes pagination deterministic: identical query and
//!    data always yield the identical sequence.
//! 4. Skip `(page - 1) * limit` records, take `limit`.
//! 5. Unless the query requests metadata, strip it from every record.

use crate::{database::ImageRecord, metadata::MetadataExpr, query::ImagesQuery};

/// Evaluates a query against a collection: filter, sort, paginate, project.
pub fn evaluate(query: &ImagesQuery, records: Vec<ImageRecord>) -> Vec<ImageRecord> {
    let filtered = filter_records(query, records);

    let page: Vec<ImageRecord> = filtered
        .into_iter()
        .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
        .take(query.limit() as usize)
        .collect();

    project(query, page)
}

/// Applies the query's filters and the canonical ordering, but not
/// pagination or projection. `count_images` is defined over this set.
pub fn filter_records(query: &ImagesQuery, records: Vec<ImageRecord>) -> Vec<ImageRecord> {
    let mut matched: Vec<ImageRecord> = records
        .into_iter()
        .filter(|r| within_time_bounds(query, r))
        .filter(|r| matches_metadata(query.metadata_query(), r))
        .collect();

    matched.sort_by(|a, b| {
        b.created
            .cmp(&a.created)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });

    matched
}

/// Drops metadata from each record unless the query asks for it.
pub fn project(query: &ImagesQuery, records: Vec<ImageRecord>) -> Vec<ImageRecord> {
    if query.return_metadata() {
        return records;
    }

    records
        .into_iter()
        .map(|mut r| {
            r.metadata = None;
            r
        })
        .collect()
}

fn within_time_bounds(query: &ImagesQuery, record: &ImageRecord) -> bool {
    if let Some(from) = query.from() {
        if record.created < from {
            return false;
        }
    }
    if let Some(to) = query.to() {
        if record.created > to {
            return false;
        }
    }
    true
}

fn matches_metadata(expr: Option<&MetadataExpr>, record: &ImageRecord) -> bool {
    let Some(expr) = expr else {
        return true;
    };

    match &record.metadata {
        Some(metadata) => expr.matches(metadata),
        // No metadata at all: only the vacuous predicate matches.
        None => expr.is_match_all(),
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, filter_records};
    use crate::{database::ImageRecord, query::ImagesQuery, storage::ImageId};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(seq: u64, created: i64, metadata: Option<serde_json::Value>) -> ImageRecord {
        ImageRecord {
            identifier: ImageId::from(seq),
            width: 800,
            height: 600,
            size: 1337,
            extension: "png".to_string(),
            created: ts(created),
            metadata: metadata.map(|v| match v {
                serde_json::Value::Object(map) => map,
                _ => panic!("test metadata must be an object"),
            }),
        }
    }

    /// 25 records with creation times 1000, 1040, ... spread inside the
    /// window used by the pagination tests.
    fn fixture() -> Vec<ImageRecord> {
        (0..25).map(|i| record(i, 1000 + (i as i64) * 40, None)).collect()
    }

    #[test]
    fn test_sorted_most_recent_first() {
        let result = evaluate(&ImagesQuery::new(), fixture());

        assert_eq!(20, result.len());
        assert!(result.windows(2).all(|w| w[0].created >= w[1].created));
        assert_eq!(ImageId::from(24), result[0].identifier);
    }

    #[test]
    fn test_determinism() {
        let query = ImagesQuery::new().with_page(2).with_limit(7);

        let first = evaluate(&query, fixture());
        let second = evaluate(&query, fixture());

        assert_eq!(first, second);
    }

    #[test]
    fn test_ties_broken_by_identifier() {
        let records = vec![record(3, 500, None), record(1, 500, None), record(2, 500, None)];

        let result = evaluate(&ImagesQuery::new(), records);

        assert_eq!(
            vec![ImageId::from(1), ImageId::from(2), ImageId::from(3)],
            result.into_iter().map(|r| r.identifier).collect::<Vec<_>>()
        );
    }

    /// Concatenating all pages reproduces the filtered set exactly once per
    /// record: no gaps, no duplicates.
    #[test]
    fn test_pagination_covers_without_gaps_or_duplicates() {
        let full = filter_records(&ImagesQuery::new(), fixture());

        let mut paged = Vec::new();
        for page in 1..=5 {
            let query = ImagesQuery::new().with_page(page).with_limit(7);
            paged.extend(evaluate(&query, fixture()));
        }

        assert_eq!(full, paged);
    }

    #[test]
    fn test_page_past_the_end_is_empty() {
        let query = ImagesQuery::new().with_page(100).with_limit(10);

        assert!(evaluate(&query, fixture()).is_empty());
    }

    /// The worked example from the listing contract: page 2 with limit 10
    /// over 25 matching records returns ranks 11-20 of the sorted set.
    #[test]
    fn test_second_page_returns_ranks_eleven_to_twenty() {
        let query = ImagesQuery::new()
            .with_page(2)
            .with_limit(10)
            .with_from(ts(1000))
            .with_to(ts(2000));

        let result = evaluate(&query, fixture());

        let expected: Vec<ImageId> = (5..15).rev().map(ImageId::from).collect();
        assert_eq!(
            expected,
            result.into_iter().map(|r| r.identifier).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let records = vec![
            record(1, 999, None),
            record(2, 1000, None),
            record(3, 1500, None),
            record(4, 2000, None),
            record(5, 2001, None),
        ];

        let query = ImagesQuery::new().with_from(ts(1000)).with_to(ts(2000));
        let result = evaluate(&query, records);

        assert_eq!(
            vec![ImageId::from(4), ImageId::from(3), ImageId::from(2)],
            result.into_iter().map(|r| r.identifier).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_metadata_predicate_filters() {
        let records = vec![
            record(1, 100, Some(json!({"color": "red"}))),
            record(2, 200, Some(json!({"color": "blue"}))),
            record(3, 300, Some(json!({"size": 12}))),
            record(4, 400, None),
        ];

        let query = ImagesQuery::new().with_metadata_query_str(r#"{"color":"red"}"#);
        let result = evaluate(&query, records);

        assert_eq!(1, result.len());
        assert_eq!(ImageId::from(1), result[0].identifier);
    }

    #[test]
    fn test_records_without_metadata_never_match_predicates() {
        let records = vec![record(1, 100, None)];

        let query = ImagesQuery::new().with_metadata_query_str(r#"{"gps":{"$exists":false}}"#);

        assert!(evaluate(&query, records).is_empty());
    }

    #[test]
    fn test_projection_strips_metadata_by_default() {
        let records = vec![record(1, 100, Some(json!({"color": "red"})))];

        let plain = evaluate(&ImagesQuery::new(), records.clone());
        assert!(plain[0].metadata.is_none());

        let with_metadata = evaluate(&ImagesQuery::new().with_return_metadata(true), records);
        assert!(with_metadata[0].metadata.is_some());
    }
}
