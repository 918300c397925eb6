//! Route table of the gateway.
//!
//! - `POST /upload/{*key}`             upload one stream or a multipart form
//! - `POST /index`                     index records under tags
//! - `POST /list`                      list records by tag
//! - `POST /list_meta`                 list the tenant's tags
//! - `GET  /get/{bucket}/{*key}`       read by logical name
//! - `GET  /get_key/{bucket}/{key}`    read by storage key
//! - `GET  /meta_json/{bucket}/{*key}` transcoder metadata by logical name
//! - `GET  /ping`                      backend liveness
//!
//! Every route but `/ping` requires a tenant.

use crate::{
    handlers::{
        health_handlers::ping,
        index_handlers::{index, list, list_meta},
        object_handlers::{get_key, get_object, meta_json, upload},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        // uploads stream, the default body cap would reject large multipart forms
        .route(
            "/upload/{*key}",
            post(upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/index", post(index))
        .route("/list", post(list))
        .route("/list_meta", post(list_meta))
        .route("/get/{bucket}/{*key}", get(get_object))
        .route("/get_key/{bucket}/{key}", get(get_key))
        .route("/meta_json/{bucket}/{*key}", get(meta_json))
}
