//! High-level image operations.
//!
//! This module ties the storage and database collaborators together into
//! the operations the binaries expose: storing an image with optional
//! metadata, listing and counting a key's collection, reading and replacing
//! metadata, and removing an image. The entry point for ingestion is
//! [`StoreImageCommand`], a fluent builder executed asynchronously.
//!
//! Errors from both layers are folded into [`AppError`], which the HTTP and
//! CLI frontends translate into user-visible responses. Backend failures
//! always propagate; they are never flattened into empty results.

use crate::{
    database::{DatabaseError, ImageDatabase, ImageRecord},
    metadata::Metadata,
    query::ImagesQuery,
    storage::{ImageId, Storage, StorageError},
};
use chrono::{DateTime, Utc};

/// Represents a command for storing an image into the system.
///
/// Holds the owning public key, the raw image bytes and optional metadata.
/// Use `with_metadata` to attach metadata before calling `execute()`.
pub struct StoreImageCommand {
    /// The public key that owns the image.
    pub public_key: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Metadata to attach at ingest time.
    pub metadata: Option<Metadata>,
}

impl StoreImageCommand {
    /// Creates a new `StoreImageCommand` for the given key and bytes.
    pub fn new(public_key: &str, bytes: &[u8]) -> Self {
        StoreImageCommand {
            public_key: public_key.to_string(),
            bytes: bytes.to_vec(),
            metadata: None,
        }
    }

    /// Attaches metadata to store alongside the image.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Executes the store: writes the bytes, probes the image attributes
    /// and inserts the database record.
    ///
    /// If the database insert fails the stored file is removed again, so a
    /// failed store leaves no orphaned bytes behind.
    pub async fn execute(
        self,
        storage: &Storage,
        db: &dyn ImageDatabase,
    ) -> Result<ImageRecord, AppError> {
        let stored = storage.store_image(&self.public_key, &self.bytes)?;

        // Second precision: the SQL backend stores unix seconds, and listing
        // determinism relies on every backend seeing the same timestamp.
        let created = truncate_to_seconds(Utc::now());

        let record = ImageRecord {
            identifier: stored.identifier.clone(),
            width: stored.width,
            height: stored.height,
            size: stored.size,
            extension: stored.extension,
            created,
            metadata: self.metadata,
        };

        match db.insert_image(&self.public_key, record.clone()).await {
            Ok(()) => {
                tracing::debug!(
                    public_key = %self.public_key,
                    identifier = %record.identifier,
                    "stored image"
                );
                Ok(record)
            }
            Err(e) => {
                storage.ensure_deleted(&self.public_key, &stored.identifier)?;
                Err(e.into())
            }
        }
    }
}

fn truncate_to_seconds(now: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// Lists a key's images according to the query.
pub async fn fetch_images(
    db: &dyn ImageDatabase,
    public_key: &str,
    query: &ImagesQuery,
) -> Result<Vec<ImageRecord>, AppError> {
    Ok(db.get_images(public_key, query).await?)
}

/// Counts the images the query's filters match, ignoring pagination.
pub async fn count_images(
    db: &dyn ImageDatabase,
    public_key: &str,
    query: &ImagesQuery,
) -> Result<u64, AppError> {
    Ok(db.count_images(public_key, query).await?)
}

/// Fetches a single record, failing with [`AppError::ImageNotFound`] when
/// the key has no such image.
pub async fn fetch_image(
    db: &dyn ImageDatabase,
    public_key: &str,
    id: &ImageId,
) -> Result<ImageRecord, AppError> {
    db.get_image(public_key, id)
        .await?
        .ok_or_else(|| AppError::ImageNotFound {
            identifier: id.clone(),
        })
}

/// Reads the metadata attached to an image. An image without metadata
/// yields an empty object.
pub async fn fetch_metadata(
    db: &dyn ImageDatabase,
    public_key: &str,
    id: &ImageId,
) -> Result<Metadata, AppError> {
    db.get_metadata(public_key, id)
        .await?
        .ok_or_else(|| AppError::ImageNotFound {
            identifier: id.clone(),
        })
}

/// Replaces the metadata attached to an image.
pub async fn replace_metadata(
    db: &dyn ImageDatabase,
    public_key: &str,
    id: &ImageId,
    metadata: Metadata,
) -> Result<(), AppError> {
    if db.update_metadata(public_key, id, metadata).await? {
        Ok(())
    } else {
        Err(AppError::ImageNotFound {
            identifier: id.clone(),
        })
    }
}

/// Completely removes an image from both storage and the database.
///
/// Removing an image the key does not own fails with
/// [`AppError::ImageNotFound`].
pub async fn remove_image(
    storage: &Storage,
    db: &dyn ImageDatabase,
    public_key: &str,
    id: &ImageId,
) -> Result<(), AppError> {
    if !db.image_exists(public_key, id).await? {
        return Err(AppError::ImageNotFound {
            identifier: id.clone(),
        });
    }

    storage.ensure_deleted(public_key, id)?;
    db.delete_image(public_key, id).await?;

    Ok(())
}

/// Error types within the application, encapsulating storage and database
/// errors alongside the not-found signal the frontends map to 404.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("image not found: {identifier}")]
    ImageNotFound { identifier: ImageId },
}
