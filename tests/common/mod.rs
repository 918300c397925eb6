#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use futures::{StreamExt, stream};
use media_gateway::{
    AppState, app, db,
    models::{
        bucket::{Bucket, UNBOUNDED_SIZE},
        media::{MediaInfo, MediaKind, Track},
    },
    services::{
        bucket_selector::BucketSelector,
        object_store::{ByteStream, DiskObjectStore, ObjectStore},
        transcoder::{MetaDocument, TranscodeError, TranscodeReply, TranscodeRequest, TranscodeResult, Transcoder},
    },
};
use serde_json::Value;
use std::io;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const TENANT_HEADER: &str = "x-auth-user";

/// Stands in for the transcoding service: writes the body into the shared
/// store itself and reports one track matching the content type.
pub struct FakeTranscoder {
    store: Arc<DiskObjectStore>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    meta: Mutex<Vec<String>>,
}

impl FakeTranscoder {
    pub fn new(store: Arc<DiskObjectStore>) -> Self {
        Self {
            store,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            meta: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
        body: ByteStream<'_>,
    ) -> TranscodeResult<TranscodeReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TranscodeError::Status {
                url: format!("fake://transcode/{}", request.key),
                status: 500,
                body: "transcoder exploded".into(),
            });
        }

        let size = self
            .store
            .write(request.bucket, request.key, UNBOUNDED_SIZE, body)
            .await
            .map_err(|err| TranscodeError::Status {
                url: format!("fake://transcode/{}", request.key),
                status: 500,
                body: err.to_string(),
            })?;
        self.meta.lock().unwrap().push(request.meta_key.to_string());

        let mime_type = match MediaKind::classify(request.content_type) {
            MediaKind::Audio => "audio/aac",
            _ => "video/h264",
        };
        Ok(TranscodeReply {
            bucket: request.bucket.name.clone(),
            key: request.key.to_string(),
            id: "fake-id".into(),
            size,
            meta_bucket: request.bucket.name.clone(),
            meta_key: request.meta_key.to_string(),
            meta_id: "fake-meta-id".into(),
            meta_size: 2,
            timestamp: Some(Utc::now()),
            media: Some(MediaInfo {
                tracks: vec![Track {
                    codec: "fake".into(),
                    mime_type: mime_type.into(),
                    ..Default::default()
                }],
            }),
        })
    }

    async fn meta_json(
        &self,
        bucket: &Bucket,
        name: &str,
        meta_key: &str,
    ) -> TranscodeResult<MetaDocument> {
        if !self.meta.lock().unwrap().iter().any(|k| k == meta_key) {
            return Err(TranscodeError::Status {
                url: format!("fake://meta_json/{}/{}", bucket.name, meta_key),
                status: 404,
                body: "no such metadata".into(),
            });
        }
        let doc = serde_json::json!({ "bucket": bucket.name, "name": name, "meta_key": meta_key }).to_string();
        Ok(MetaDocument {
            content_type: Some("application/json".into()),
            content_length: Some(doc.len() as u64),
            stream: stream::iter(vec![Ok::<_, io::Error>(Bytes::from(doc))]).boxed(),
        })
    }
}

pub struct TestServer {
    pub dir: TempDir,
    pub app: Router,
    pub state: AppState,
    pub store: Arc<DiskObjectStore>,
    pub transcoder: Arc<FakeTranscoder>,
}

/// Gateway over a temp dir with buckets `small/1/1K` and `large/1:2/unbounded`.
pub async fn server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let objects = dir.path().join("objects");
    std::fs::create_dir_all(&objects).unwrap();

    let url = format!("sqlite://{}", dir.path().join("index.db").display());
    let pool = Arc::new(db::connect(&url).await.unwrap());
    let store = Arc::new(DiskObjectStore::new(&objects));
    let transcoder = Arc::new(FakeTranscoder::new(store.clone()));
    let selector = Arc::new(
        BucketSelector::new(vec![
            "small/1/1K".parse().unwrap(),
            "large/1:2/unbounded".parse().unwrap(),
        ])
        .unwrap(),
    );

    let state = AppState::new(
        pool,
        selector,
        store.clone(),
        transcoder.clone(),
        TENANT_HEADER.parse().unwrap(),
    );
    TestServer {
        dir,
        app: app(state.clone()),
        state,
        store,
        transcoder,
    }
}

impl TestServer {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        let value = serde_json::from_slice(&body)
            .unwrap_or_else(|_| panic!("not json: {}", String::from_utf8_lossy(&body)));
        (status, value)
    }
}

pub fn upload(tenant: &str, name: &str, content_type: &str, body: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/upload/{}", name))
        .header(TENANT_HEADER, tenant)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

/// Multipart form with one `file` field per `(filename, content type, data)`.
pub fn upload_multipart(tenant: &str, parts: &[(&str, &str, &str)]) -> Request<Body> {
    let boundary = "gateway-test-boundary";
    let mut body = String::new();
    for (filename, content_type, data) in parts {
        body.push_str(&format!("--{}\r\n", boundary));
        body.push_str(&format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        ));
        body.push_str(&format!("Content-Type: {}\r\n\r\n", content_type));
        body.push_str(data);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", boundary));

    Request::builder()
        .method("POST")
        .uri("/upload/batch")
        .header(TENANT_HEADER, tenant)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn post_json(tenant: Option<&str>, path: &str, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(tenant) = tenant {
        builder = builder.header(TENANT_HEADER, tenant);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(tenant: Option<&str>, path: &str) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(tenant) = tenant {
        builder = builder.header(TENANT_HEADER, tenant);
    }
    builder.body(Body::empty()).unwrap()
}
