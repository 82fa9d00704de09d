//! # SQL Dialect Module
//!
//! The `Dialect` trait abstracts over the differences in SQL syntax across
//! the supported database systems, so the higher-level query code stays
//! agnostic of the target database. The dialect in effect is determined at
//! compile time by feature flags: `sqlite` (the default) or `postgres`.

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
mod postgres;

/// The current SQL dialect used at compile time, determined by feature flags.
#[cfg(feature = "sqlite")]
pub type CurrentDialect = sqlite::SqliteDialect;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type CurrentDialect = postgres::PostgresDialect;

#[cfg(feature = "sqlite")]
pub type Db = sqlx::Sqlite;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type Db = sqlx::Postgres;

#[cfg(feature = "sqlite")]
pub type CurrentRow = sqlx::sqlite::SqliteRow;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type CurrentRow = sqlx::postgres::PgRow;

/// A trait for SQL dialects to support database-specific query generation.
///
/// The default method bodies carry the SQLite spellings; dialects with a
/// different placeholder or upsert syntax override what they need.
pub trait Dialect {
    /// Returns the SQL placeholder syntax for the given parameter index.
    ///
    /// - SQLite: `?`
    /// - PostgreSQL: `$1`, `$2`, ...
    fn placeholder(idx: usize) -> String;

    /// Columns of the `images` table in statement order.
    fn image_columns() -> &'static str {
        "public_key, identifier, width, height, file_size, extension, created_at, metadata"
    }

    /// Upsert for an image record. A re-stored image replaces its row.
    fn insert_image_statement() -> String {
        format!(
            "INSERT OR REPLACE INTO images ({}) VALUES ({}, {}, {}, {}, {}, {}, {}, {})",
            Self::image_columns(),
            Self::placeholder(1),
            Self::placeholder(2),
            Self::placeholder(3),
            Self::placeholder(4),
            Self::placeholder(5),
            Self::placeholder(6),
            Self::placeholder(7),
            Self::placeholder(8)
        )
    }

    fn image_exists_statement() -> String {
        format!(
            "SELECT EXISTS (SELECT 1 FROM images WHERE public_key = {} AND identifier = {})",
            Self::placeholder(1),
            Self::placeholder(2)
        )
    }

    fn select_image_statement() -> String {
        format!(
            "SELECT {} FROM images WHERE public_key = {} AND identifier = {}",
            Self::image_columns(),
            Self::placeholder(1),
            Self::placeholder(2)
        )
    }

    /// Returns a full SELECT statement for the listing query.
    ///
    /// # Parameters
    /// - `condition`: WHERE/ORDER/LIMIT fragment built by the caller.
    fn select_images_statement(condition: String) -> String {
        format!("SELECT {} FROM images {}", Self::image_columns(), condition)
    }

    /// Returns the statement counting images matching the given condition.
    fn count_images_statement(condition: String) -> String {
        format!("SELECT COUNT(*) FROM images {}", condition)
    }

    /// The canonical listing order: most recent first, identifier as the
    /// deterministic tie break.
    fn order_clause() -> &'static str {
        "ORDER BY created_at DESC, identifier ASC"
    }

    fn update_metadata_statement() -> String {
        format!(
            "UPDATE images SET metadata = {} WHERE public_key = {} AND identifier = {}",
            Self::placeholder(1),
            Self::placeholder(2),
            Self::placeholder(3)
        )
    }

    fn select_metadata_statement() -> String {
        format!(
            "SELECT metadata FROM images WHERE public_key = {} AND identifier = {}",
            Self::placeholder(1),
            Self::placeholder(2)
        )
    }

    fn delete_image_statement() -> String {
        format!(
            "DELETE FROM images WHERE public_key = {} AND identifier = {}",
            Self::placeholder(1),
            Self::placeholder(2)
        )
    }

    /// Runs the idempotent schema migration.
    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error>;
}
