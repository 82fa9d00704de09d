use crate::{
    AppState,
    auth::{RequesterKey, ensure_access},
    error::ApiError,
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use imago::{
    access::resource,
    app::{count_images, fetch_images},
    database::ImageRecord,
    metadata::Metadata,
    query::ImagesQuery,
};
use serde::{Deserialize, Serialize};

/// Query-string parameters of the image listing.
///
/// `num` is the historical alias for `limit`; `limit` wins when both are
/// present. `metadata` is a truthy flag (`1`). `query` carries a
/// URL-encoded JSON predicate; anything malformed in it is ignored rather
/// than rejected.
#[derive(Deserialize)]
pub struct ImagesParams {
    page: Option<u32>,
    limit: Option<u32>,
    num: Option<u32>,
    metadata: Option<String>,
    from: Option<i64>,
    to: Option<i64>,
    query: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ImageItem {
    pub identifier: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub extension: String,
    pub created: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl ImageItem {
    pub fn from_record(record: ImageRecord) -> Self {
        ImageItem {
            identifier: record.identifier.to_string(),
            width: record.width,
            height: record.height,
            size: record.size,
            extension: record.extension,
            created: record.created.timestamp(),
            metadata: record.metadata,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ImagesResponse {
    pub page: u32,
    pub limit: u32,
    pub count: u64,
    pub images: Vec<ImageItem>,
}

fn positive(name: &str, value: u32) -> Result<u32, ApiError> {
    if value == 0 {
        return Err(ApiError::BadRequest(format!(
            "{name} must be a positive integer"
        )));
    }
    Ok(value)
}

fn timestamp(name: &str, value: i64) -> Result<DateTime<Utc>, ApiError> {
    DateTime::from_timestamp(value, 0)
        .ok_or_else(|| ApiError::BadRequest(format!("{name} is out of range")))
}

fn truthy(flag: &str) -> bool {
    matches!(flag, "1" | "true")
}

pub fn build_query(params: ImagesParams) -> Result<ImagesQuery, ApiError> {
    let mut query = ImagesQuery::new();

    if let Some(page) = params.page {
        query = query.with_page(positive("page", page)?);
    }
    if let Some(limit) = params.limit.or(params.num) {
        query = query.with_limit(positive("limit", limit)?);
    }
    if let Some(flag) = params.metadata {
        query = query.with_return_metadata(truthy(&flag));
    }
    if let Some(from) = params.from {
        query = query.with_from(timestamp("from", from)?);
    }
    if let Some(to) = params.to {
        query = query.with_to(timestamp("to", to)?);
    }
    if let Some(raw) = params.query {
        query = query.with_metadata_query_str(&raw);
    }

    Ok(query)
}

pub async fn get_images(
    State(app): State<AppState>,
    Path(user): Path<String>,
    requester: RequesterKey,
    Query(params): Query<ImagesParams>,
) -> Result<Json<ImagesResponse>, ApiError> {
    ensure_access(
        app.access.as_ref(),
        &requester,
        resource::IMAGES_GET,
        Some(&user),
    )
    .await?;

    let query = build_query(params)?;

    let records = fetch_images(app.db.as_ref(), &user, &query).await?;
    let count = count_images(app.db.as_ref(), &user, &query).await?;

    Ok(Json(ImagesResponse {
        page: query.page(),
        limit: query.limit(),
        count,
        images: records.into_iter().map(ImageItem::from_record).collect(),
    }))
}
