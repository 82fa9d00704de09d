//! In-memory database backend.
//!
//! The reference implementation of [`ImageDatabase`]: a per-key map of
//! records with every listing routed through [`crate::eval`]. Useful in
//! tests and as the executable definition of the query semantics.

use super::{DatabaseError, ImageDatabase, ImageRecord};
use crate::{eval, metadata::Metadata, query::ImagesQuery, storage::ImageId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryDatabase {
    collections: RwLock<HashMap<String, BTreeMap<ImageId, ImageRecord>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn records_for(&self, public_key: &str) -> Vec<ImageRecord> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        collections
            .get(public_key)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ImageDatabase for MemoryDatabase {
    async fn insert_image(
        &self,
        public_key: &str,
        record: ImageRecord,
    ) -> Result<(), DatabaseError> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        collections
            .entry(public_key.to_string())
            .or_default()
            .insert(record.identifier.clone(), record);

        Ok(())
    }

    async fn image_exists(&self, public_key: &str, id: &ImageId) -> Result<bool, DatabaseError> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Ok(collections
            .get(public_key)
            .is_some_and(|records| records.contains_key(id)))
    }

    async fn get_image(
        &self,
        public_key: &str,
        id: &ImageId,
    ) -> Result<Option<ImageRecord>, DatabaseError> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Ok(collections
            .get(public_key)
            .and_then(|records| records.get(id).cloned()))
    }

    async fn get_images(
        &self,
        public_key: &str,
        query: &ImagesQuery,
    ) -> Result<Vec<ImageRecord>, DatabaseError> {
        Ok(eval::evaluate(query, self.records_for(public_key)))
    }

    async fn count_images(
        &self,
        public_key: &str,
        query: &ImagesQuery,
    ) -> Result<u64, DatabaseError> {
        Ok(eval::filter_records(query, self.records_for(public_key)).len() as u64)
    }

    async fn update_metadata(
        &self,
        public_key: &str,
        id: &ImageId,
        metadata: Metadata,
    ) -> Result<bool, DatabaseError> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let record = collections
            .get_mut(public_key)
            .and_then(|records| records.get_mut(id));

        match record {
            Some(record) => {
                record.metadata = Some(metadata);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_metadata(
        &self,
        public_key: &str,
        id: &ImageId,
    ) -> Result<Option<Metadata>, DatabaseError> {
        Ok(self
            .get_image(public_key, id)
            .await?
            .map(|record| record.metadata.unwrap_or_default()))
    }

    async fn delete_image(&self, public_key: &str, id: &ImageId) -> Result<(), DatabaseError> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(records) = collections.get_mut(public_key) {
            records.remove(id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryDatabase;
    use crate::{
        database::{ImageDatabase, ImageRecord},
        query::ImagesQuery,
        storage::ImageId,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn record(seq: u64, created: i64) -> ImageRecord {
        ImageRecord {
            identifier: ImageId::from(seq),
            width: 640,
            height: 480,
            size: 1024,
            extension: "png".to_string(),
            created: Utc.timestamp_opt(created, 0).unwrap(),
            metadata: None,
        }
    }

    fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = MemoryDatabase::new();

        db.insert_image("key", record(1, 100)).await.unwrap();

        assert!(db.image_exists("key", &ImageId::from(1)).await.unwrap());
        assert_eq!(
            Some(record(1, 100)),
            db.get_image("key", &ImageId::from(1)).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_collections_are_scoped_by_key() {
        let db = MemoryDatabase::new();

        db.insert_image("alice", record(1, 100)).await.unwrap();
        db.insert_image("bob", record(2, 200)).await.unwrap();

        assert!(!db.image_exists("bob", &ImageId::from(1)).await.unwrap());

        let listed = db.get_images("alice", &ImagesQuery::new()).await.unwrap();
        assert_eq!(1, listed.len());
        assert_eq!(ImageId::from(1), listed[0].identifier);
    }

    #[tokio::test]
    async fn test_listing_is_ordered_and_counted() {
        let db = MemoryDatabase::new();

        for seq in 0..5 {
            db.insert_image("key", record(seq, 100 + seq as i64))
                .await
                .unwrap();
        }

        let listed = db.get_images("key", &ImagesQuery::new()).await.unwrap();
        assert_eq!(ImageId::from(4), listed[0].identifier);
        assert_eq!(5, db.count_images("key", &ImagesQuery::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let db = MemoryDatabase::new();
        let id = ImageId::from(1);

        db.insert_image("key", record(1, 100)).await.unwrap();

        // A record without metadata reads back as an empty object...
        assert_eq!(
            Some(serde_json::Map::new()),
            db.get_metadata("key", &id).await.unwrap()
        );
        // ...while a missing record reads back as None.
        assert_eq!(
            None,
            db.get_metadata("key", &ImageId::from(9)).await.unwrap()
        );

        assert!(db
            .update_metadata("key", &id, object(json!({"color": "red"})))
            .await
            .unwrap());
        assert_eq!(
            Some(object(json!({"color": "red"}))),
            db.get_metadata("key", &id).await.unwrap()
        );

        assert!(!db
            .update_metadata("key", &ImageId::from(9), object(json!({})))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let db = MemoryDatabase::new();
        let id = ImageId::from(1);

        db.insert_image("key", record(1, 100)).await.unwrap();

        db.delete_image("key", &id).await.unwrap();
        db.delete_image("key", &id).await.unwrap();

        assert!(!db.image_exists("key", &id).await.unwrap());
    }
}
