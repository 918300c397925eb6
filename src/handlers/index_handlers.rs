//! Tag index handlers: write records under tags, list them back.

use crate::{
    auth::Tenant,
    errors::{AppError, ResultExt},
    models::{
        record::Record,
        reply::{IndexRequest, ListReply, ListRequest, OperationReply, TagListing},
    },
    services::tag_index::META_TAG,
    state::AppState,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

/// `POST /index`
pub async fn index(
    State(state): State<AppState>,
    tenant: Tenant,
    payload: Result<Json<IndexRequest>, JsonRejection>,
) -> Result<Json<OperationReply<()>>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::validation("index", rejection.body_text()))?;
    state
        .index
        .index_records(&tenant.0, request.files)
        .await
        .op("index")?;
    Ok(Json(OperationReply::empty("index")))
}

/// `POST /list`
pub async fn list(
    State(state): State<AppState>,
    tenant: Tenant,
    payload: Result<Json<ListRequest>, JsonRejection>,
) -> Result<Json<OperationReply<ListReply<Record>>>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::validation("list", rejection.body_text()))?;
    let tags = state
        .index
        .list_by_tags(&tenant.keys(), &request.tags)
        .await
        .op("list")?;
    Ok(Json(OperationReply::new("list", ListReply { tags })))
}

/// `POST /list_meta`: every tag the tenant has indexed. The body is ignored.
pub async fn list_meta(
    State(state): State<AppState>,
    tenant: Tenant,
) -> Result<Json<OperationReply<ListReply<String>>>, AppError> {
    let keys = state.index.list_tags(&tenant.0).await.op("list_meta")?;
    let listing = TagListing {
        tag: META_TAG.to_string(),
        keys,
    };
    Ok(Json(OperationReply::new(
        "list_meta",
        ListReply {
            tags: vec![listing],
        },
    )))
}
