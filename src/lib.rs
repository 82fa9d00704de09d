//! # Image Storage and Retrieval Service
//!
//! This crate provides the building blocks of an HTTP image service:
//! clients store images under a content-derived identifier, attach metadata,
//! query per-key collections and administer an access-control model that
//! gates every resource operation.
//!
//! ## Features
//!
//! - **Image Storage**: Content-addressed files on disk, with the pixel
//!   dimensions and file attributes probed at ingest.
//! - **Metadata Queries**: Listing requests combine pagination, an inclusive
//!   creation-time window and a JSON predicate over the attached metadata,
//!   evaluated deterministically by the [`eval`] module.
//! - **Access Control**: A public key maps to a private key and a list of
//!   granted resources or resource groups, optionally scoped to users. Every
//!   handler consults [`access::AccessControl`] before touching anything.
//! - **Pluggable Backends**: The database and access-control stores are
//!   capability traits selected at runtime; an in-memory reference backend
//!   and an SQLx-based SQL backend ship in-tree.
//!
//! ## Usage
//!
//! The ingestion entry point is [`app::StoreImageCommand`], a fluent builder
//! executed against a storage and a database collaborator:
//!
//! ```no_run
//! use imago::app::StoreImageCommand;
//! use imago::database::memory::MemoryDatabase;
//! use imago::storage::Storage;
//!
//! async fn ingest(storage: &Storage, db: &MemoryDatabase, bytes: &[u8]) {
//!     let command = StoreImageCommand::new("some-key", bytes);
//!
//!     match command.execute(storage, db).await {
//!         Ok(record) => println!("stored image {}", record.identifier),
//!         Err(error) => eprintln!("failed to store image: {error}"),
//!     }
//! }
//! ```

pub mod access;
pub mod app;
pub mod database;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod dialect;
pub mod eval;
pub mod metadata;
pub mod query;
pub mod storage;
