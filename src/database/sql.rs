//! SQL database backend.
//!
//! Wraps an SQLx connection pool and implements [`ImageDatabase`] on top of
//! the statement templates provided by the active SQL dialect. Key and time
//! filtering and ordering are pushed into SQL, and so is pagination when
//! the query carries no metadata predicate; with a predicate in play the matching
//! rows are handed to [`crate::eval`] so both backends share one definition
//! of the listing semantics.

use super::{DatabaseError, DbOperation, ImageDatabase, ImageRecord};
use crate::{
    dialect::{CurrentDialect, CurrentRow, Db, Dialect},
    eval,
    metadata::Metadata,
    query::ImagesQuery,
    storage::ImageId,
};
use async_trait::async_trait;
use chrono::DateTime;
use futures::TryStreamExt;
use serde_json::Value;
pub use sqlx::Pool;
use sqlx::{FromRow, Row};

fn decode_error(
    column: &str,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source,
    }
}

impl FromRow<'_, CurrentRow> for ImageRecord {
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        let identifier: String = row.try_get("identifier")?;
        let width: i64 = row.try_get("width")?;
        let height: i64 = row.try_get("height")?;
        let file_size: i64 = row.try_get("file_size")?;
        let extension: String = row.try_get("extension")?;
        let created_at: i64 = row.try_get("created_at")?;
        let metadata: Option<String> = row.try_get("metadata")?;

        let identifier =
            ImageId::try_from(identifier).map_err(|e| decode_error("identifier", Box::new(e)))?;

        let created = DateTime::from_timestamp(created_at, 0)
            .ok_or_else(|| decode_error("created_at", "timestamp out of range".into()))?;

        let metadata = metadata
            .map(|text| parse_metadata_column(&text))
            .transpose()
            .map_err(|e| decode_error("metadata", e))?;

        Ok(ImageRecord {
            identifier,
            width: width as u32,
            height: height as u32,
            size: file_size as u64,
            extension,
            created,
            metadata,
        })
    }
}

fn parse_metadata_column(
    text: &str,
) -> Result<Metadata, Box<dyn std::error::Error + Send + Sync>> {
    match serde_json::from_str(text)? {
        Value::Object(map) => Ok(map),
        _ => Err("metadata column is not a JSON object".into()),
    }
}

/// An [`ImageDatabase`] over an SQLx pool.
///
/// The implementation is SQL dialect agnostic and delegates syntax to the
/// dialect selected at compile time. Transient connection failures are
/// retried a bounded number of times before the error propagates.
#[derive(Debug, Clone)]
pub struct SqlDatabase {
    pool: Pool<Db>,
}

impl SqlDatabase {
    /// Runs the schema migration and wraps the pool.
    pub async fn with_migration(pool: Pool<Db>) -> Result<Self, sqlx::Error> {
        CurrentDialect::migration(&pool).await?;

        Ok(Self { pool })
    }

    async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DatabaseError>>,
    {
        let max_retries = 3;
        for attempt in 0..max_retries {
            let result = op().await;
            match result {
                Ok(v) => return Ok(v),
                Err(ref e) if e.is_retryable() && attempt + 1 < max_retries => {
                    tracing::warn!(attempt, error = %e, "retrying database operation");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("retry loop should return before exceeding max_retries")
    }

    /// Fetches the key- and time-filtered rows in listing order, with
    /// pagination pushed into SQL when `paginate` is set.
    async fn fetch_rows(
        &self,
        public_key: &str,
        query: &ImagesQuery,
        paginate: bool,
    ) -> Result<Vec<ImageRecord>, DatabaseError> {
        let stmt = CurrentDialect::select_images_statement(listing_condition(query, paginate));

        self.retry(|| async {
            let mut q = sqlx::query_as::<_, ImageRecord>(&stmt).bind(public_key);

            if let Some(from) = query.from() {
                q = q.bind(from.timestamp());
            }
            if let Some(to) = query.to() {
                q = q.bind(to.timestamp());
            }
            if paginate {
                q = q.bind(query.limit() as i64).bind(query.offset() as i64);
            }

            q.fetch(&self.pool)
                .try_collect()
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryImages,
                    sql: stmt.clone(),
                    source: e,
                })
        })
        .await
    }
}

/// WHERE fragment for a listing: key scope plus the optional time window.
/// Placeholder order is public_key, from, to.
fn filter_condition(query: &ImagesQuery) -> (String, usize) {
    let mut idx = 1;
    let mut sql = format!("WHERE public_key = {}", CurrentDialect::placeholder(idx));

    if query.from().is_some() {
        idx += 1;
        sql.push_str(&format!(
            " AND created_at >= {}",
            CurrentDialect::placeholder(idx)
        ));
    }
    if query.to().is_some() {
        idx += 1;
        sql.push_str(&format!(
            " AND created_at <= {}",
            CurrentDialect::placeholder(idx)
        ));
    }

    (sql, idx)
}

/// Full listing fragment: filters, canonical order and, when pagination is
/// handled in SQL, LIMIT/OFFSET placeholders.
fn listing_condition(query: &ImagesQuery, paginate: bool) -> String {
    let (mut sql, mut idx) = filter_condition(query);

    sql.push(' ');
    sql.push_str(CurrentDialect::order_clause());

    if paginate {
        idx += 1;
        sql.push_str(&format!(" LIMIT {}", CurrentDialect::placeholder(idx)));
        idx += 1;
        sql.push_str(&format!(" OFFSET {}", CurrentDialect::placeholder(idx)));
    }

    sql
}

#[async_trait]
impl ImageDatabase for SqlDatabase {
    async fn insert_image(
        &self,
        public_key: &str,
        record: ImageRecord,
    ) -> Result<(), DatabaseError> {
        let stmt = CurrentDialect::insert_image_statement();
        let metadata = record
            .metadata
            .as_ref()
            .map(|m| Value::Object(m.clone()).to_string());

        self.retry(|| async {
            sqlx::query(&stmt)
                .bind(public_key)
                .bind(record.identifier.to_string())
                .bind(record.width as i64)
                .bind(record.height as i64)
                .bind(record.size as i64)
                .bind(&record.extension)
                .bind(record.created.timestamp())
                .bind(metadata.as_deref())
                .execute(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::InsertImage {
                        identifier: record.identifier.clone(),
                    },
                    sql: stmt.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    async fn image_exists(&self, public_key: &str, id: &ImageId) -> Result<bool, DatabaseError> {
        let stmt = CurrentDialect::image_exists_statement();

        self.retry(|| async {
            sqlx::query_scalar::<_, bool>(&stmt)
                .bind(public_key)
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryImage {
                        identifier: id.clone(),
                    },
                    sql: stmt.clone(),
                    source: e,
                })
        })
        .await
    }

    async fn get_image(
        &self,
        public_key: &str,
        id: &ImageId,
    ) -> Result<Option<ImageRecord>, DatabaseError> {
        let stmt = CurrentDialect::select_image_statement();

        self.retry(|| async {
            sqlx::query_as::<_, ImageRecord>(&stmt)
                .bind(public_key)
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryImage {
                        identifier: id.clone(),
                    },
                    sql: stmt.clone(),
                    source: e,
                })
        })
        .await
    }

    async fn get_images(
        &self,
        public_key: &str,
        query: &ImagesQuery,
    ) -> Result<Vec<ImageRecord>, DatabaseError> {
        let paginate_in_sql = query.metadata_query().is_none();
        let records = self.fetch_rows(public_key, query, paginate_in_sql).await?;

        if paginate_in_sql {
            Ok(eval::project(query, records))
        } else {
            Ok(eval::evaluate(query, records))
        }
    }

    async fn count_images(
        &self,
        public_key: &str,
        query: &ImagesQuery,
    ) -> Result<u64, DatabaseError> {
        if query.metadata_query().is_some() {
            // The predicate only exists in Rust, so counting walks the same
            // unpaginated rows the listing would.
            let records = self.fetch_rows(public_key, query, false).await?;
            return Ok(eval::filter_records(query, records).len() as u64);
        }

        let (condition, _) = filter_condition(query);
        let stmt = CurrentDialect::count_images_statement(condition);

        let count = self
            .retry(|| async {
                let mut q = sqlx::query_scalar::<_, i64>(&stmt).bind(public_key);

                if let Some(from) = query.from() {
                    q = q.bind(from.timestamp());
                }
                if let Some(to) = query.to() {
                    q = q.bind(to.timestamp());
                }

                q.fetch_one(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::CountImages,
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(count as u64)
    }

    async fn update_metadata(
        &self,
        public_key: &str,
        id: &ImageId,
        metadata: Metadata,
    ) -> Result<bool, DatabaseError> {
        let stmt = CurrentDialect::update_metadata_statement();
        let text = Value::Object(metadata).to_string();

        let result = self
            .retry(|| async {
                sqlx::query(&stmt)
                    .bind(&text)
                    .bind(public_key)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::UpdateMetadata {
                            identifier: id.clone(),
                        },
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_metadata(
        &self,
        public_key: &str,
        id: &ImageId,
    ) -> Result<Option<Metadata>, DatabaseError> {
        let stmt = CurrentDialect::select_metadata_statement();

        let row: Option<Option<String>> = self
            .retry(|| async {
                sqlx::query_scalar(&stmt)
                    .bind(public_key)
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::QueryMetadata {
                            identifier: id.clone(),
                        },
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        match row {
            None => Ok(None),
            Some(None) => Ok(Some(Metadata::new())),
            Some(Some(text)) => {
                let metadata =
                    parse_metadata_column(&text).map_err(|e| DatabaseError::CorruptRecord {
                        identifier: id.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(metadata))
            }
        }
    }

    async fn delete_image(&self, public_key: &str, id: &ImageId) -> Result<(), DatabaseError> {
        let stmt = CurrentDialect::delete_image_statement();

        self.retry(|| async {
            sqlx::query(&stmt)
                .bind(public_key)
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::DeleteImage {
                        identifier: id.clone(),
                    },
                    sql: stmt.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Pool, SqlDatabase};
    use crate::{
        database::{ImageDatabase, ImageRecord, memory::MemoryDatabase},
        dialect::Db,
        query::ImagesQuery,
        storage::ImageId,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    /// Returns an in-memory SQLite connection pool for testing.
    async fn get_pool() -> Pool<Db> {
        Pool::connect(":memory:").await.unwrap()
    }

    fn record(seq: u64, created: i64, metadata: Option<serde_json::Value>) -> ImageRecord {
        ImageRecord {
            identifier: ImageId::from(seq),
            width: 800,
            height: 600,
            size: 2048,
            extension: "png".to_string(),
            created: Utc.timestamp_opt(created, 0).unwrap(),
            metadata: metadata.map(|v| match v {
                serde_json::Value::Object(map) => map,
                _ => panic!("test metadata must be an object"),
            }),
        }
    }

    /// Verifies that the migration can run multiple times on the same pool
    /// without error.
    #[tokio::test]
    async fn test_migration_idempotency() {
        let pool = get_pool().await;

        SqlDatabase::with_migration(pool.clone()).await.unwrap();
        SqlDatabase::with_migration(pool.clone()).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let db = SqlDatabase::with_migration(get_pool().await).await.unwrap();

        let stored = record(1, 1000, Some(json!({"color": "red"})));
        db.insert_image("key", stored.clone()).await.unwrap();

        assert!(db.image_exists("key", &ImageId::from(1)).await.unwrap());
        assert_eq!(
            Some(stored),
            db.get_image("key", &ImageId::from(1)).await.unwrap()
        );
        assert_eq!(
            None,
            db.get_image("other", &ImageId::from(1)).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_reinsert_replaces_row() {
        let db = SqlDatabase::with_migration(get_pool().await).await.unwrap();

        db.insert_image("key", record(1, 1000, None)).await.unwrap();
        db.insert_image("key", record(1, 2000, None)).await.unwrap();

        let fetched = db.get_image("key", &ImageId::from(1)).await.unwrap().unwrap();
        assert_eq!(2000, fetched.created.timestamp());
        assert_eq!(1, db.count_images("key", &ImagesQuery::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_with_sql_pagination() {
        let db = SqlDatabase::with_migration(get_pool().await).await.unwrap();

        for seq in 0..25 {
            db.insert_image("key", record(seq, 1000 + (seq as i64) * 40, None))
                .await
                .unwrap();
        }

        let query = ImagesQuery::new().with_page(2).with_limit(10);
        let listed = db.get_images("key", &query).await.unwrap();

        let expected: Vec<ImageId> = (5..15).rev().map(ImageId::from).collect();
        assert_eq!(
            expected,
            listed.into_iter().map(|r| r.identifier).collect::<Vec<_>>()
        );
    }

    /// Both backends must produce the identical listing for the identical
    /// query and data.
    #[tokio::test]
    async fn test_agrees_with_memory_backend() {
        let sql = SqlDatabase::with_migration(get_pool().await).await.unwrap();
        let memory = MemoryDatabase::new();

        for seq in 0..10 {
            let meta = if seq % 2 == 0 {
                Some(json!({"color": "red", "rank": seq}))
            } else {
                Some(json!({"color": "blue", "rank": seq}))
            };
            let r = record(seq, 5000 - (seq as i64) * 7, meta);
            sql.insert_image("key", r.clone()).await.unwrap();
            memory.insert_image("key", r).await.unwrap();
        }

        let queries = vec![
            ImagesQuery::new(),
            ImagesQuery::new().with_limit(3).with_page(2),
            ImagesQuery::new().with_from(Utc.timestamp_opt(4950, 0).unwrap()),
            ImagesQuery::new()
                .with_return_metadata(true)
                .with_metadata_query_str(r#"{"color":"red"}"#),
            ImagesQuery::new()
                .with_limit(2)
                .with_metadata_query_str(r#"{"rank":{"$gte":3}}"#),
        ];

        for query in queries {
            assert_eq!(
                memory.get_images("key", &query).await.unwrap(),
                sql.get_images("key", &query).await.unwrap(),
            );
            assert_eq!(
                memory.count_images("key", &query).await.unwrap(),
                sql.count_images("key", &query).await.unwrap(),
            );
        }
    }

    #[tokio::test]
    async fn test_metadata_update_and_distinct_missing_states() {
        let db = SqlDatabase::with_migration(get_pool().await).await.unwrap();
        let id = ImageId::from(1);

        db.insert_image("key", record(1, 1000, None)).await.unwrap();

        // Present record without metadata: empty object.
        assert_eq!(
            Some(serde_json::Map::new()),
            db.get_metadata("key", &id).await.unwrap()
        );
        // Missing record: None.
        assert_eq!(
            None,
            db.get_metadata("key", &ImageId::from(9)).await.unwrap()
        );

        let meta = match json!({"color": "red"}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(db.update_metadata("key", &id, meta.clone()).await.unwrap());
        assert_eq!(Some(meta), db.get_metadata("key", &id).await.unwrap());

        assert!(!db
            .update_metadata("key", &ImageId::from(9), serde_json::Map::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let db = SqlDatabase::with_migration(get_pool().await).await.unwrap();
        let id = ImageId::from(1);

        db.insert_image("key", record(1, 1000, None)).await.unwrap();

        db.delete_image("key", &id).await.unwrap();
        db.delete_image("key", &id).await.unwrap();

        assert!(!db.image_exists("key", &id).await.unwrap());
    }
}
