use crate::services::{
    bucket_selector::BucketSelector, object_store::ObjectStore, pipeline::Pipeline,
    tag_index::TagIndex, transcoder::Transcoder, upload_service::UploadService,
};
use axum::http::HeaderName;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared handles every handler gets. Built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub selector: Arc<BucketSelector>,
    pub store: Arc<dyn ObjectStore>,
    pub transcoder: Arc<dyn Transcoder>,
    pub index: TagIndex,
    pub pipeline: Pipeline,
    /// Header the fronting auth layer puts the tenant identifier in.
    pub tenant_header: HeaderName,
}

impl AppState {
    pub fn new(
        db: Arc<SqlitePool>,
        selector: Arc<BucketSelector>,
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
        tenant_header: HeaderName,
    ) -> Self {
        let uploads = UploadService::new(selector.clone(), store.clone(), transcoder.clone());
        let index = TagIndex::new(db.clone());
        let pipeline = Pipeline::new(uploads, index.clone());
        Self {
            db,
            selector,
            store,
            transcoder,
            index,
            pipeline,
            tenant_header,
        }
    }
}
