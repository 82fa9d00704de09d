//! # Metadata Predicate Module
//!
//! Image metadata is a free-form JSON object. This module defines the
//! predicate tree used to filter image collections by that metadata, the
//! parser that builds the tree from a JSON query document, and the matching
//! semantics evaluated against each record.
//!
//! ## Query document shape
//!
//! A query document is a JSON object. Each field entry is a test, and the
//! object as a whole is the conjunction of its entries:
//!
//! - `{"color": "red"}`: field equality.
//! - `{"size": {"$gt": 100, "$lte": 200}}`: operator object; every operator
//!   in it must hold.
//! - `{"$or": [{"color": "red"}, {"color": "blue"}]}`: disjunction of
//!   sub-documents. `$and` is accepted for symmetry.
//!
//! Supported field operators: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$in`, `$exists`. Field names may use dotted paths (`exif.camera`) to
//! reach into nested objects.
//!
//! ## Matching semantics
//!
//! Values are matched over the JSON tagged union without implicit coercion:
//! numbers compare numerically with each other (`1` equals `1.0`), every
//! other pairing compares strictly by type and value. Ordering operators are
//! defined for number/number (numeric) and string/string (lexicographic)
//! pairs only; any other pairing fails the test. A record that carries no
//! metadata at all never matches a non-empty predicate, `$exists: false`
//! included.

use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// The metadata attached to an image: a JSON object.
pub type Metadata = serde_json::Map<String, Value>;

/// A parsed metadata predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataExpr {
    /// Conjunction of subexpressions. The empty conjunction matches
    /// everything and is what `{}` parses to.
    And(Vec<MetadataExpr>),

    /// Disjunction of subexpressions.
    Or(Vec<MetadataExpr>),

    /// A single test against one (possibly dotted) field path.
    Field(String, FieldOp),
}

/// A test applied to the value found at a field path.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Exists(bool),
}

impl MetadataExpr {
    /// Parses a query document from its JSON-encoded string form, as it
    /// arrives in the `query` query-string parameter.
    ///
    /// Anything that is not a well-formed query document (invalid JSON, a
    /// non-object top level, an unknown operator) yields `None`, which
    /// callers treat as "no predicate". This mirrors the write-nothing,
    /// reject-nothing contract of the HTTP boundary.
    pub fn parse(input: &str) -> Option<MetadataExpr> {
        let value: Value = serde_json::from_str(input).ok()?;
        MetadataExpr::from_json(&value).ok()
    }

    /// Builds a predicate from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns a [`PredicateError`] describing the offending fragment when
    /// the value is not an object or uses an operator this module does not
    /// define.
    pub fn from_json(value: &Value) -> Result<MetadataExpr, PredicateError> {
        let Value::Object(map) = value else {
            return Err(PredicateError::NotAnObject);
        };

        let mut tests = Vec::with_capacity(map.len());

        for (key, entry) in map {
            match key.as_str() {
                "$or" => tests.push(combinator(entry, MetadataExpr::Or)?),
                "$and" => tests.push(combinator(entry, MetadataExpr::And)?),
                _ if key.starts_with('$') => {
                    return Err(PredicateError::UnknownOperator { name: key.clone() });
                }
                _ => {
                    for op in field_ops(entry)? {
                        tests.push(MetadataExpr::Field(key.clone(), op));
                    }
                }
            }
        }

        if tests.len() == 1 {
            Ok(tests.remove(0))
        } else {
            Ok(MetadataExpr::And(tests))
        }
    }

    /// Whether this predicate places no constraint at all (`{}`).
    pub fn is_match_all(&self) -> bool {
        matches!(self, MetadataExpr::And(tests) if tests.is_empty())
    }

    /// Evaluates the predicate against a metadata object.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            MetadataExpr::And(tests) => tests.iter().all(|t| t.matches(metadata)),
            MetadataExpr::Or(tests) => tests.iter().any(|t| t.matches(metadata)),
            MetadataExpr::Field(path, op) => op.matches(lookup(metadata, path)),
        }
    }
}

/// Parses the body of `$or`/`$and`: a non-empty array of query documents.
fn combinator(
    entry: &Value,
    wrap: fn(Vec<MetadataExpr>) -> MetadataExpr,
) -> Result<MetadataExpr, PredicateError> {
    let Value::Array(items) = entry else {
        return Err(PredicateError::InvalidCombinator);
    };

    if items.is_empty() {
        return Err(PredicateError::InvalidCombinator);
    }

    let exprs = items
        .iter()
        .map(MetadataExpr::from_json)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(wrap(exprs))
}

/// Parses the value side of a field entry into one or more operators.
fn field_ops(entry: &Value) -> Result<Vec<FieldOp>, PredicateError> {
    let Value::Object(map) = entry else {
        return Ok(vec![FieldOp::Eq(entry.clone())]);
    };

    // An object value is an operator document only if it uses operator keys.
    // A plain object (no `$` keys) is compared for equality as-is; mixing the
    // two makes the document ambiguous and is rejected.
    let dollar_keys = map.keys().filter(|k| k.starts_with('$')).count();
    if dollar_keys == 0 {
        return Ok(vec![FieldOp::Eq(entry.clone())]);
    }
    if dollar_keys != map.len() {
        return Err(PredicateError::MixedOperatorObject);
    }

    map.iter()
        .map(|(op, operand)| match op.as_str() {
            "$eq" => Ok(FieldOp::Eq(operand.clone())),
            "$ne" => Ok(FieldOp::Ne(operand.clone())),
            "$gt" => Ok(FieldOp::Gt(operand.clone())),
            "$gte" => Ok(FieldOp::Gte(operand.clone())),
            "$lt" => Ok(FieldOp::Lt(operand.clone())),
            "$lte" => Ok(FieldOp::Lte(operand.clone())),
            "$in" => match operand {
                Value::Array(items) => Ok(FieldOp::In(items.clone())),
                _ => Err(PredicateError::InvalidOperand {
                    operator: "$in".to_string(),
                }),
            },
            "$exists" => match operand {
                Value::Bool(flag) => Ok(FieldOp::Exists(*flag)),
                _ => Err(PredicateError::InvalidOperand {
                    operator: "$exists".to_string(),
                }),
            },
            _ => Err(PredicateError::UnknownOperator {
                name: op.to_string(),
            }),
        })
        .collect()
}

impl FieldOp {
    fn matches(&self, found: Option<&Value>) -> bool {
        match self {
            FieldOp::Eq(expected) => found.is_some_and(|v| value_eq(v, expected)),
            FieldOp::Ne(expected) => found.is_some_and(|v| !value_eq(v, expected)),
            FieldOp::Gt(bound) => cmp(found, bound).is_some_and(|o| o == Ordering::Greater),
            FieldOp::Gte(bound) => cmp(found, bound).is_some_and(|o| o != Ordering::Less),
            FieldOp::Lt(bound) => cmp(found, bound).is_some_and(|o| o == Ordering::Less),
            FieldOp::Lte(bound) => cmp(found, bound).is_some_and(|o| o != Ordering::Greater),
            FieldOp::In(candidates) => {
                found.is_some_and(|v| candidates.iter().any(|c| value_eq(v, c)))
            }
            FieldOp::Exists(expected) => found.is_some() == *expected,
        }
    }
}

/// Resolves a dotted field path against a metadata object.
fn lookup<'a>(metadata: &'a Metadata, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = metadata.get(segments.next()?)?;

    for segment in segments {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }

    Some(current)
}

/// Equality over the JSON union. Numbers compare numerically across the
/// integer/float split; all other pairings compare strictly by type.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| value_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Ordering for the range operators. Defined for number/number and
/// string/string pairs; anything else has no ordering and fails the test.
fn cmp(found: Option<&Value>, bound: &Value) -> Option<Ordering> {
    match (found?, bound) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}

/// Reasons a JSON value fails to parse as a query document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("query document must be a JSON object")]
    NotAnObject,

    #[error("unknown operator: {name}")]
    UnknownOperator { name: String },

    #[error("operand is not valid for {operator}")]
    InvalidOperand { operator: String },

    #[error("$and/$or expect a non-empty array of query documents")]
    InvalidCombinator,

    #[error("operator object mixes operators and plain fields")]
    MixedOperatorObject,
}

#[cfg(test)]
mod tests {
    use super::{FieldOp, Metadata, MetadataExpr, PredicateError};
    use serde_json::json;

    fn meta(value: serde_json::Value) -> Metadata {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("test metadata must be an object"),
        }
    }

    #[test]
    fn test_parse_equality() {
        assert_eq!(
            Some(MetadataExpr::Field(
                "color".to_string(),
                FieldOp::Eq(json!("red"))
            )),
            MetadataExpr::parse(r#"{"color":"red"}"#)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(None, MetadataExpr::parse("not json at all"));
        assert_eq!(None, MetadataExpr::parse(r#""just a string""#));
        assert_eq!(None, MetadataExpr::parse("[1, 2, 3]"));
        assert_eq!(None, MetadataExpr::parse(r#"{"field":{"$nope":1}}"#));
    }

    #[test]
    fn test_parse_empty_document_matches_all() {
        let expr = MetadataExpr::parse("{}").unwrap();

        assert!(expr.is_match_all());
        assert!(expr.matches(&meta(json!({"anything": 1}))));
        assert!(expr.matches(&Metadata::new()));
    }

    #[test]
    fn test_unknown_operator_is_strict_error() {
        assert_eq!(
            Err(PredicateError::UnknownOperator {
                name: "$regex".to_string()
            }),
            MetadataExpr::from_json(&json!({"name": {"$regex": "^a"}}))
        );
    }

    #[test]
    fn test_field_equality_matching() {
        let expr = MetadataExpr::parse(r#"{"color":"red"}"#).unwrap();

        assert!(expr.matches(&meta(json!({"color": "red"}))));
        assert!(!expr.matches(&meta(json!({"color": "blue"}))));
        // A record without the key is excluded, not an error.
        assert!(!expr.matches(&meta(json!({"size": 3}))));
    }

    #[test]
    fn test_numbers_compare_numerically() {
        let expr = MetadataExpr::parse(r#"{"rating":1}"#).unwrap();

        assert!(expr.matches(&meta(json!({"rating": 1.0}))));
        assert!(!expr.matches(&meta(json!({"rating": "1"}))));
    }

    #[test]
    fn test_no_cross_type_coercion() {
        let expr = MetadataExpr::parse(r#"{"flag":true}"#).unwrap();

        assert!(expr.matches(&meta(json!({"flag": true}))));
        assert!(!expr.matches(&meta(json!({"flag": 1}))));
        assert!(!expr.matches(&meta(json!({"flag": "true"}))));
    }

    #[test]
    fn test_range_operators() {
        let expr = MetadataExpr::parse(r#"{"size":{"$gt":100,"$lte":200}}"#).unwrap();

        assert!(expr.matches(&meta(json!({"size": 150}))));
        assert!(expr.matches(&meta(json!({"size": 200}))));
        assert!(!expr.matches(&meta(json!({"size": 100}))));
        assert!(!expr.matches(&meta(json!({"size": 201}))));
        // Ordering against a non-number never matches.
        assert!(!expr.matches(&meta(json!({"size": "big"}))));
    }

    #[test]
    fn test_string_ordering_is_lexicographic() {
        let expr = MetadataExpr::parse(r#"{"name":{"$lt":"m"}}"#).unwrap();

        assert!(expr.matches(&meta(json!({"name": "alice"}))));
        assert!(!expr.matches(&meta(json!({"name": "zoe"}))));
        assert!(!expr.matches(&meta(json!({"name": 3}))));
    }

    #[test]
    fn test_in_and_ne() {
        let expr = MetadataExpr::parse(r#"{"color":{"$in":["red","blue"]}}"#).unwrap();
        assert!(expr.matches(&meta(json!({"color": "blue"}))));
        assert!(!expr.matches(&meta(json!({"color": "green"}))));

        let expr = MetadataExpr::parse(r#"{"color":{"$ne":"red"}}"#).unwrap();
        assert!(expr.matches(&meta(json!({"color": "blue"}))));
        assert!(!expr.matches(&meta(json!({"color": "red"}))));
        // $ne still requires the field to be present.
        assert!(!expr.matches(&meta(json!({"size": 1}))));
    }

    #[test]
    fn test_exists() {
        let expr = MetadataExpr::parse(r#"{"gps":{"$exists":false}}"#).unwrap();

        assert!(expr.matches(&meta(json!({"color": "red"}))));
        assert!(!expr.matches(&meta(json!({"gps": null}))));
    }

    #[test]
    fn test_or_combinator() {
        let expr =
            MetadataExpr::parse(r#"{"$or":[{"color":"red"},{"color":"blue"}]}"#).unwrap();

        assert!(expr.matches(&meta(json!({"color": "red"}))));
        assert!(expr.matches(&meta(json!({"color": "blue"}))));
        assert!(!expr.matches(&meta(json!({"color": "green"}))));
    }

    #[test]
    fn test_top_level_conjunction() {
        let expr = MetadataExpr::parse(r#"{"color":"red","size":4}"#).unwrap();

        assert!(expr.matches(&meta(json!({"color": "red", "size": 4}))));
        assert!(!expr.matches(&meta(json!({"color": "red", "size": 5}))));
    }

    #[test]
    fn test_dotted_paths() {
        let expr = MetadataExpr::parse(r#"{"exif.camera":"X100"}"#).unwrap();

        assert!(expr.matches(&meta(json!({"exif": {"camera": "X100"}}))));
        assert!(!expr.matches(&meta(json!({"exif": {"camera": "Q2"}}))));
        assert!(!expr.matches(&meta(json!({"exif": "X100"}))));
    }

    #[test]
    fn test_plain_object_equality() {
        let expr = MetadataExpr::parse(r#"{"exif":{"camera":"X100"}}"#).unwrap();

        assert!(expr.matches(&meta(json!({"exif": {"camera": "X100"}}))));
        assert!(!expr.matches(&meta(json!({"exif": {"camera": "X100", "iso": 200}}))));
    }
}
