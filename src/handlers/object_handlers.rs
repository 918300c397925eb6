//! HTTP handlers for uploads and object reads.
//! Bodies are streamed in both directions, never buffered whole.

use crate::{
    auth::Tenant,
    errors::{AppError, ResultExt},
    models::{record::Record, reply::OperationReply},
    services::{
        object_store::{ObjectReader, ObjectStore},
        transcoder::{TranscodeError, Transcoder},
        upload_service::UploadSource,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use tracing::info;

/// `POST /upload/{*key}`: upload a single stream named `key`, or every part
/// of a multipart form, then index what was stored.
pub async fn upload(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(key): Path<String>,
    request: Request,
) -> Result<Json<OperationReply<Vec<Record>>>, AppError> {
    let key_hint = key.trim_matches('/');
    if key_hint.is_empty() {
        return Err(AppError::validation("upload", "upload key must not be empty"));
    }

    let source = UploadSource::from_request(request).await.op("upload")?;
    let keys = tenant.keys();
    let records = state
        .pipeline
        .upload_and_index(&keys, key_hint, source)
        .await
        .op("upload")?;

    Ok(Json(OperationReply::new("upload", records)))
}

/// `GET /get/{bucket}/{*key}`: read an object by logical name; the storage
/// key is derived for the calling tenant.
pub async fn get_object(
    State(state): State<AppState>,
    tenant: Tenant,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let key = tenant.keys().derive(&name);
    let reader = read_object(&state, "get", &bucket, &key).await?;
    info!(tenant = %tenant.0, %bucket, %name, %key, size = reader.size, "object read");
    Ok(object_response(reader))
}

/// `GET /get_key/{bucket}/{key}`: read an object by raw storage key.
pub async fn get_key(
    State(state): State<AppState>,
    tenant: Tenant,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let reader = read_object(&state, "get_key", &bucket, &key).await?;
    info!(tenant = %tenant.0, %bucket, %key, size = reader.size, "object read by key");
    Ok(object_response(reader))
}

/// `GET /meta_json/{bucket}/{*key}`: proxy the transcoder's metadata document
/// for the object the tenant named `key`.
///
/// An upstream error status is passed through as-is.
pub async fn meta_json(
    State(state): State<AppState>,
    tenant: Tenant,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let bucket = state.selector.select_for_read(&bucket).op("meta_json")?;
    let meta_key = tenant.keys().derive_meta(&name);
    let document = state
        .transcoder
        .meta_json(bucket, &name, &meta_key)
        .await
        .map_err(|err| {
            let upstream = match &err {
                TranscodeError::Status { status, .. } => StatusCode::from_u16(*status).ok(),
                _ => None,
            };
            match upstream {
                Some(status) => AppError::new(status, "meta_json", err.to_string()),
                None => AppError::from_error("meta_json", err),
            }
        })?;

    let mut response = Response::new(Body::from_stream(document.stream));
    let content_type = document
        .content_type
        .and_then(|value| HeaderValue::from_str(&value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = document.content_length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

async fn read_object(
    state: &AppState,
    operation: &'static str,
    bucket: &str,
    key: &str,
) -> Result<ObjectReader, AppError> {
    let bucket = state.selector.select_for_read(bucket).op(operation)?;
    state.store.read(bucket, key).await.op(operation)
}

fn object_response(reader: ObjectReader) -> Response {
    let mut response = Response::new(Body::from_stream(reader.stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(reader.size));
    response
}
