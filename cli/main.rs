use chrono::DateTime;
use clap::{Parser, Subcommand};
use imago::{
    app::{AppError, StoreImageCommand, fetch_images, remove_image},
    database::sql::SqlDatabase,
    metadata::Metadata,
    query::ImagesQuery,
    storage::{ImageId, Storage},
};
use serde_json::Value;
use sqlx::{Pool, Sqlite, migrate::MigrateDatabase};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imago")]
#[command(about = "Image storage and retrieval CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store an image for a public key
    Store {
        #[arg(help = "Path to image file")]
        path: PathBuf,

        #[arg(short, long, help = "Public key that owns the image")]
        key: String,

        #[arg(short, long, help = "Metadata as a JSON object")]
        metadata: Option<String>,
    },

    /// List a public key's images
    List {
        #[arg(short, long, help = "Public key whose images to list")]
        key: String,

        #[arg(short, long, help = "Page number")]
        page: Option<u32>,

        #[arg(short, long, help = "Images per page")]
        limit: Option<u32>,

        #[arg(long, help = "Unix timestamp lower bound (inclusive)")]
        from: Option<i64>,

        #[arg(long, help = "Unix timestamp upper bound (inclusive)")]
        to: Option<i64>,

        #[arg(short, long, help = "Metadata query as a JSON object")]
        query: Option<String>,

        #[arg(long, help = "Include metadata in the output")]
        metadata: bool,
    },

    /// Remove an image
    Remove {
        #[arg(short, long, help = "Public key that owns the image")]
        key: String,

        #[arg(help = "Image identifier")]
        id: String,
    },
}

fn parse_metadata(text: &str) -> Metadata {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => map,
        _ => {
            eprintln!("metadata must be a JSON object");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./db/imago.db".to_string());
    let storage_root = std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./images".to_string());

    if !Sqlite::database_exists(&database_url).await.unwrap_or(false) {
        Sqlite::create_database(&database_url).await.unwrap();
    }

    let db = SqlDatabase::with_migration(Pool::connect(&database_url).await.unwrap())
        .await
        .unwrap();
    let storage = Storage::new(PathBuf::from(storage_root));

    match cli.command {
        Commands::Store { path, key, metadata } => {
            let bytes = tokio::fs::read(&path)
                .await
                .expect("failed to read image bytes");

            let cmd = StoreImageCommand::new(&key, &bytes);
            let cmd = match metadata {
                Some(text) => cmd.with_metadata(parse_metadata(&text)),
                None => cmd,
            };

            let record = cmd.execute(&storage, &db).await?;

            println!("stored {} ({}x{})", record.identifier, record.width, record.height);
        }
        Commands::List {
            key,
            page,
            limit,
            from,
            to,
            query,
            metadata,
        } => {
            let mut q = ImagesQuery::new().with_return_metadata(metadata);

            if let Some(page) = page {
                q = q.with_page(page);
            }
            if let Some(limit) = limit {
                q = q.with_limit(limit);
            }
            if let Some(from) = from {
                q = q.with_from(DateTime::from_timestamp(from, 0).expect("from is out of range"));
            }
            if let Some(to) = to {
                q = q.with_to(DateTime::from_timestamp(to, 0).expect("to is out of range"));
            }
            if let Some(raw) = query {
                q = q.with_metadata_query_str(&raw);
            }

            for record in fetch_images(&db, &key, &q).await? {
                let metadata = record
                    .metadata
                    .map(|m| format!(" {}", Value::Object(m)))
                    .unwrap_or_default();

                println!(
                    "{} {:>10} {}x{} {}{}",
                    record.identifier,
                    record.created.timestamp(),
                    record.width,
                    record.height,
                    record.extension,
                    metadata,
                );
            }
        }
        Commands::Remove { key, id } => {
            let id = ImageId::try_from(id).expect("invalid image identifier");

            remove_image(&storage, &db, &key, &id).await?;

            println!("removed {}", id);
        }
    }

    Ok(())
}
