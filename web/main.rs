mod access;
mod auth;
mod error;
mod image;
mod images;

use axum::{
    Router,
    routing::{get, post},
};
use imago::{
    access::{
        AccessControl,
        simple::{AccessControlConfig, SimpleAccessControl},
    },
    database::{ImageDatabase, sql::SqlDatabase},
    storage::Storage,
};
use sqlx::{Pool, Sqlite, migrate::MigrateDatabase};
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn ImageDatabase>,
    pub storage: Arc<Storage>,
    pub access: Arc<dyn AccessControl>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./db/imago.db".to_string());
    let storage_root = std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./images".to_string());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let access_file = std::env::var("ACCESS_CONTROL_FILE")
        .expect("ACCESS_CONTROL_FILE must point to the access control configuration");

    let config: AccessControlConfig = serde_json::from_str(
        &std::fs::read_to_string(&access_file)
            .expect("failed to read access control configuration"),
    )
    .expect("invalid access control configuration");

    if !Sqlite::database_exists(&database_url).await.unwrap_or(false) {
        Sqlite::create_database(&database_url).await.unwrap();
    }

    let db = SqlDatabase::with_migration(Pool::connect(&database_url).await.unwrap())
        .await
        .unwrap();

    let state = AppState {
        db: Arc::new(db),
        storage: Arc::new(Storage::new(PathBuf::from(storage_root))),
        access: Arc::new(SimpleAccessControl::new(config)),
    };

    let app = Router::new()
        .route("/users/{user}/images.json", get(images::get_images))
        .route("/users/{user}/images", post(image::post_image))
        .route(
            "/users/{user}/images/{id}",
            get(image::get_image).delete(image::delete_image),
        )
        .route(
            "/users/{user}/images/{id}/metadata.json",
            get(image::get_metadata).put(image::put_metadata),
        )
        .route("/users.json", get(access::get_users))
        .route("/groups.json", get(access::get_groups))
        .route("/groups/{group}.json", get(access::get_group))
        .route("/keys/{publicKey}/access.json", get(access::get_access_list))
        .with_state(state);

    tracing::info!(%bind_addr, "listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
