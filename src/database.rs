//! Database abstraction for image records.
//!
//! [`ImageDatabase`] is the capability every database backend implements:
//! record CRUD plus the listing/counting operations whose semantics are
//! pinned down by [`crate::eval`]. Backends are selected at runtime, so the
//! trait is object safe and handlers hold an `Arc<dyn ImageDatabase>`.
//!
//! Two backends live in this crate: [`memory::MemoryDatabase`], the
//! reference implementation that routes everything through the evaluator,
//! and [`sql::SqlDatabase`], which pushes what it can into SQL and defers
//! the rest to the same evaluator.

pub mod memory;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

use crate::{
    metadata::Metadata,
    query::ImagesQuery,
    storage::ImageId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A stored image as the database sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Content-derived identifier, unique per public key.
    pub identifier: ImageId,
    /// Pixel width, probed at ingest.
    pub width: u32,
    /// Pixel height, probed at ingest.
    pub height: u32,
    /// Size of the stored bytes.
    pub size: u64,
    /// Sniffed file extension, e.g. `png`.
    pub extension: String,
    /// Creation time, second precision.
    pub created: DateTime<Utc>,
    /// Attached metadata. `None` when nothing was ever attached.
    pub metadata: Option<Metadata>,
}

/// The database capability consumed by resource handlers.
///
/// All collections are scoped by public key: no operation can observe
/// another key's records. Listing and counting must honor the
/// [`ImagesQuery`] semantics exactly as [`crate::eval::evaluate`] defines
/// them.
#[async_trait]
pub trait ImageDatabase: Send + Sync {
    /// Inserts a record, replacing any previous record with the same
    /// identifier under the same key.
    async fn insert_image(
        &self,
        public_key: &str,
        record: ImageRecord,
    ) -> Result<(), DatabaseError>;

    /// Returns whether a record exists for the key and identifier.
    async fn image_exists(&self, public_key: &str, id: &ImageId) -> Result<bool, DatabaseError>;

    /// Fetches a single record, `None` when it does not exist.
    async fn get_image(
        &self,
        public_key: &str,
        id: &ImageId,
    ) -> Result<Option<ImageRecord>, DatabaseError>;

    /// Evaluates a listing query against the key's collection.
    ///
    /// The result is deterministic: filtered by the query's time window and
    /// metadata predicate, ordered by creation time descending with the
    /// identifier as tie break, paginated, and stripped of metadata unless
    /// the query asks for it.
    async fn get_images(
        &self,
        public_key: &str,
        query: &ImagesQuery,
    ) -> Result<Vec<ImageRecord>, DatabaseError>;

    /// Counts the records the query's filters match, ignoring pagination.
    async fn count_images(
        &self,
        public_key: &str,
        query: &ImagesQuery,
    ) -> Result<u64, DatabaseError>;

    /// Replaces the metadata attached to a record.
    ///
    /// Returns `false` when no record exists for the identifier.
    async fn update_metadata(
        &self,
        public_key: &str,
        id: &ImageId,
        metadata: Metadata,
    ) -> Result<bool, DatabaseError>;

    /// Reads the metadata attached to a record.
    ///
    /// `None` means the record itself does not exist; a record without
    /// metadata yields `Some` with an empty object, so callers can tell the
    /// two apart.
    async fn get_metadata(
        &self,
        public_key: &str,
        id: &ImageId,
    ) -> Result<Option<Metadata>, DatabaseError>;

    /// Removes a record. Removing a missing record is not an error.
    async fn delete_image(&self, public_key: &str, id: &ImageId) -> Result<(), DatabaseError>;
}

/// Represents errors that can occur during database operations.
///
/// Backend failure is never folded into an empty result: an unreachable
/// store surfaces here and propagates to the caller.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A general SQL query failure, with full context including operation and SQL.
    #[error("query failed during {operation:?}: sql={sql}")]
    QueryFailed {
        operation: DbOperation,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    /// A failure to begin or commit a transaction.
    #[error("failed to operate transaction")]
    TransactionFailed {
        #[source]
        source: sqlx::Error,
    },

    /// A stored row could not be mapped back into an [`ImageRecord`].
    #[error("corrupt row for image {identifier}: {reason}")]
    CorruptRecord { identifier: String, reason: String },
}

/// Enum representing the kind of database operation being performed,
/// used for attaching context to [`DatabaseError::QueryFailed`].
#[derive(Debug)]
pub enum DbOperation {
    InsertImage { identifier: ImageId },
    QueryImages,
    CountImages,
    QueryImage { identifier: ImageId },
    UpdateMetadata { identifier: ImageId },
    QueryMetadata { identifier: ImageId },
    DeleteImage { identifier: ImageId },
}

impl DatabaseError {
    pub(crate) fn is_retryable(&self) -> bool {
        let is_retryable_kind = |e: &sqlx::Error| {
            matches!(e, sqlx::Error::Io(_))
                || matches!(e, sqlx::Error::Protocol(_))
                || matches!(e, sqlx::Error::PoolTimedOut)
        };

        match self {
            DatabaseError::QueryFailed { source, .. } => is_retryable_kind(source),
            DatabaseError::TransactionFailed { source } => is_retryable_kind(source),
            DatabaseError::CorruptRecord { .. } => false,
        }
    }
}
