use super::{Db, Dialect};

/// SQLite dialect implementation of the `Dialect` trait.
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn placeholder(_idx: usize) -> String {
        "?".to_string()
    }

    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
        let stmts = vec![
            r#"CREATE TABLE IF NOT EXISTS images (
                public_key TEXT NOT NULL,
                identifier TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                file_size INTEGER NOT NULL,
                extension TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                metadata TEXT,
                PRIMARY KEY (public_key, identifier)
            );"#,
            r#"CREATE INDEX IF NOT EXISTS images_by_key_and_time
                ON images (public_key, created_at);"#,
        ];

        for stmt in stmts {
            sqlx::query(stmt).execute(pool).await?;
        }

        Ok(())
    }
}
