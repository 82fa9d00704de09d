use crate::{
    AppState,
    auth::{RequesterKey, ensure_access},
    error::ApiError,
    images::ImageItem,
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bytes::BytesMut;
use imago::{
    access::resource,
    app::{StoreImageCommand, fetch_image, fetch_metadata, remove_image, replace_metadata},
    metadata::Metadata,
    storage::ImageId,
};
use serde_json::Value;

fn parse_id(raw: &str) -> Result<ImageId, ApiError> {
    ImageId::try_from(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Strictly decodes a metadata document: unlike the listing's `query`
/// filter, a write with malformed metadata is rejected, not ignored.
fn parse_metadata(text: &str) -> Result<Metadata, ApiError> {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::BadRequest(
            "metadata must be a JSON object".to_string(),
        )),
        Err(e) => Err(ApiError::BadRequest(format!("invalid metadata: {e}"))),
    }
}

pub async fn get_image(
    State(app): State<AppState>,
    Path((user, id)): Path<(String, String)>,
    requester: RequesterKey,
) -> Result<impl IntoResponse, ApiError> {
    ensure_access(
        app.access.as_ref(),
        &requester,
        resource::IMAGE_GET,
        Some(&user),
    )
    .await?;

    let id = parse_id(&id)?;

    // The record check keeps database and storage in agreement about what
    // exists; the bytes then come straight from storage.
    fetch_image(app.db.as_ref(), &user, &id).await?;
    let bytes = app.storage.get_image(&user, &id)?;

    let mime = infer::get(&bytes)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok(([(header::CONTENT_TYPE, mime)], bytes))
}

pub async fn post_image(
    State(app): State<AppState>,
    Path(user): Path<String>,
    requester: RequesterKey,
    mut multipart: Multipart,
) -> Result<Json<ImageItem>, ApiError> {
    ensure_access(
        app.access.as_ref(),
        &requester,
        resource::IMAGES_POST,
        Some(&user),
    )
    .await?;

    let mut bytes = None;
    let mut metadata = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                let mut data = BytesMut::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
                {
                    data.extend_from_slice(&chunk);
                }
                bytes = Some(data.freeze().to_vec());
            }
            "metadata" => {
                let text = field.text().await.unwrap_or_default();
                metadata = Some(parse_metadata(&text)?);
            }
            _ => {} // ignore
        }
    }

    let bytes = match bytes {
        Some(b) => b,
        None => return Err(ApiError::BadRequest("missing file".to_string())),
    };

    let cmd = StoreImageCommand::new(&user, &bytes);

    let cmd = if let Some(m) = metadata {
        cmd.with_metadata(m)
    } else {
        cmd
    };

    let record = cmd.execute(&app.storage, app.db.as_ref()).await?;

    Ok(Json(ImageItem::from_record(record)))
}

pub async fn delete_image(
    State(app): State<AppState>,
    Path((user, id)): Path<(String, String)>,
    requester: RequesterKey,
) -> Result<StatusCode, ApiError> {
    ensure_access(
        app.access.as_ref(),
        &requester,
        resource::IMAGE_DELETE,
        Some(&user),
    )
    .await?;

    let id = parse_id(&id)?;
    remove_image(&app.storage, app.db.as_ref(), &user, &id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_metadata(
    State(app): State<AppState>,
    Path((user, id)): Path<(String, String)>,
    requester: RequesterKey,
) -> Result<Json<Metadata>, ApiError> {
    ensure_access(
        app.access.as_ref(),
        &requester,
        resource::METADATA_GET,
        Some(&user),
    )
    .await?;

    let id = parse_id(&id)?;
    let metadata = fetch_metadata(app.db.as_ref(), &user, &id).await?;

    Ok(Json(metadata))
}

pub async fn put_metadata(
    State(app): State<AppState>,
    Path((user, id)): Path<(String, String)>,
    requester: RequesterKey,
    Json(body): Json<Value>,
) -> Result<Json<Metadata>, ApiError> {
    ensure_access(
        app.access.as_ref(),
        &requester,
        resource::METADATA_PUT,
        Some(&user),
    )
    .await?;

    let id = parse_id(&id)?;
    let metadata = match body {
        Value::Object(map) => map,
        _ => {
            return Err(ApiError::BadRequest(
                "metadata must be a JSON object".to_string(),
            ));
        }
    };

    replace_metadata(app.db.as_ref(), &user, &id, metadata.clone()).await?;

    Ok(Json(metadata))
}
