use super::{Db, Dialect};

/// Postgres dialect implementation of the `Dialect` trait.
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn placeholder(idx: usize) -> String {
        format!("${idx}")
    }

    fn insert_image_statement() -> String {
        format!(
            r#"INSERT INTO images ({}) VALUES ({}, {}, {}, {}, {}, {}, {}, {})
            ON CONFLICT (public_key, identifier) DO UPDATE SET
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                file_size = EXCLUDED.file_size,
                extension = EXCLUDED.extension,
                created_at = EXCLUDED.created_at,
                metadata = EXCLUDED.metadata"#,
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

    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
        let stmts = vec![
            r#"CREATE TABLE IF NOT EXISTS images (
                public_key TEXT NOT NULL,
                identifier TEXT NOT NULL,
                width BIGINT NOT NULL,
                height BIGINT NOT NULL,
                file_size BIGINT NOT NULL,
                extension TEXT NOT NULL,
                created_at BIGINT NOT NULL,
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
