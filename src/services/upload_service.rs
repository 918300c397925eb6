//! Upload path: split the request body into parts, derive each part's keys,
//! and route it to the transcoder (audio/video) or straight into the object
//! store (everything else).
//!
//! Parts share one request stream, so they are uploaded one after another
//! and never buffered whole. The first failing part aborts the batch; parts
//! already written stay in the store.

use crate::errors::{Classify, ErrorKind};
use crate::models::{
    bucket::{Bucket, UNBOUNDED_SIZE},
    media::MediaKind,
    record::Record,
};
use crate::services::{
    bucket_selector::BucketSelector,
    keys::KeyDeriver,
    object_store::{ByteStream, ObjectStore, StoreError},
    transcoder::{TranscodeError, TranscodeRequest, Transcoder},
};
use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Request},
    http::{HeaderValue, header},
};
use chrono::Utc;
use futures::StreamExt;
use std::{fmt, io, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

/// Content type assumed when neither the request nor the part declares one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Which collaborator a part was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    ObjectStore,
    Transcoder,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::ObjectStore => write!(f, "object store"),
            Backend::Transcoder => write!(f, "transcoder"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload request: {0}")]
    Invalid(String),
    #[error("{content_type}: could not upload `{name}` -> `{key}` via {backend}: {source}")]
    Part {
        content_type: String,
        name: String,
        key: String,
        backend: Backend,
        #[source]
        source: BackendError,
    },
}

pub type UploadResult<T> = Result<T, UploadError>;

impl Classify for UploadError {
    fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Invalid(_) => ErrorKind::Validation,
            UploadError::Part { source, .. } => match source {
                BackendError::Store(err) => err.kind(),
                BackendError::Transcode(err) => err.kind(),
            },
        }
    }
}

/// The inbound body, either one stream or a multipart form.
pub enum UploadSource {
    Single {
        content_type: String,
        /// Declared length; `None` when absent or zero.
        size: Option<u64>,
        body: Body,
    },
    Multipart {
        /// Content type for parts that do not declare their own.
        content_type: String,
        multipart: Multipart,
    },
}

impl UploadSource {
    /// Inspect the request headers and wrap the body accordingly.
    pub async fn from_request(request: Request) -> UploadResult<Self> {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        if let Some(form_type) = content_type.as_deref().and_then(as_form_data) {
            let mut request = request;
            let form_type = HeaderValue::from_str(&form_type)
                .map_err(|err| UploadError::Invalid(err.to_string()))?;
            request.headers_mut().insert(header::CONTENT_TYPE, form_type);
            let multipart = Multipart::from_request(request, &())
                .await
                .map_err(|rejection| UploadError::Invalid(rejection.body_text()))?;
            // The envelope type describes the form, not any one part.
            return Ok(UploadSource::Multipart {
                content_type: DEFAULT_CONTENT_TYPE.to_string(),
                multipart,
            });
        }

        let size = request
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|size| *size > 0);

        Ok(UploadSource::Single {
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size,
            body: request.into_body(),
        })
    }
}

/// Multipart subtypes whose parts are uploaded one by one.
const MULTIPART_SUBTYPES: [&str; 2] = ["multipart/form-data", "multipart/mixed"];

/// The content type rewritten as `multipart/form-data` with the same
/// parameters, or `None` when the body is not a multipart envelope.
fn as_form_data(content_type: &str) -> Option<String> {
    MULTIPART_SUBTYPES.iter().find_map(|subtype| {
        let prefix = content_type.get(..subtype.len())?;
        let rest = &content_type[subtype.len()..];
        let matches = prefix.eq_ignore_ascii_case(subtype)
            && (rest.is_empty() || rest.starts_with([';', ' ']));
        matches.then(|| format!("multipart/form-data{}", rest))
    })
}

/// One part, with its keys already derived.
#[derive(Debug, Clone)]
pub struct PartUpload {
    pub name: String,
    pub key: String,
    pub meta_key: String,
    pub content_type: String,
    /// Declared length; `None` means unbounded.
    pub size: Option<u64>,
}

impl PartUpload {
    pub fn new(
        keys: &KeyDeriver,
        name: impl Into<String>,
        content_type: impl Into<String>,
        size: Option<u64>,
    ) -> Self {
        let name = name.into();
        Self {
            key: keys.derive(&name),
            meta_key: keys.derive_meta(&name),
            name,
            content_type: content_type.into(),
            size: size.filter(|size| *size > 0),
        }
    }

    fn expected_size(&self) -> u64 {
        self.size.unwrap_or(UNBOUNDED_SIZE)
    }
}

#[derive(Clone)]
pub struct UploadService {
    selector: Arc<BucketSelector>,
    store: Arc<dyn ObjectStore>,
    transcoder: Arc<dyn Transcoder>,
}

impl UploadService {
    pub fn new(
        selector: Arc<BucketSelector>,
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            selector,
            store,
            transcoder,
        }
    }

    /// Upload every part of `source` for the tenant behind `keys`.
    ///
    /// A single stream is named `key_hint`; multipart parts are named by
    /// their filenames. Returns one record per part, or the first error.
    pub async fn upload_batch(
        &self,
        keys: &KeyDeriver,
        key_hint: &str,
        source: UploadSource,
    ) -> UploadResult<Vec<Record>> {
        match source {
            UploadSource::Single {
                content_type,
                size,
                body,
            } => {
                let part = PartUpload::new(keys, key_hint, content_type, size);
                let stream = body
                    .into_data_stream()
                    .map(|chunk| chunk.map_err(io::Error::other))
                    .boxed();
                Ok(vec![self.upload_part(&part, stream).await?])
            }
            UploadSource::Multipart {
                content_type,
                mut multipart,
            } => {
                let mut records = Vec::new();
                while let Some(field) = multipart
                    .next_field()
                    .await
                    .map_err(|err| UploadError::Invalid(format!("malformed multipart body: {}", err)))?
                {
                    let Some(name) = field
                        .file_name()
                        .filter(|name| !name.is_empty())
                        .map(str::to_owned)
                    else {
                        return Err(UploadError::Invalid(format!(
                            "multipart part `{}` has no filename",
                            field.name().unwrap_or_default()
                        )));
                    };
                    let part_type = field
                        .content_type()
                        .map(str::to_owned)
                        .unwrap_or_else(|| content_type.clone());

                    let part = PartUpload::new(keys, name, part_type, None);
                    let stream = field
                        .map(|chunk| chunk.map_err(io::Error::other))
                        .boxed();
                    records.push(self.upload_part(&part, stream).await?);
                }

                if records.is_empty() {
                    return Err(UploadError::Invalid("multipart body has no parts".into()));
                }
                Ok(records)
            }
        }
    }

    /// Upload one part through the backend its content type calls for.
    pub async fn upload_part(
        &self,
        part: &PartUpload,
        stream: ByteStream<'_>,
    ) -> UploadResult<Record> {
        let backend = if MediaKind::classify(&part.content_type).needs_transcoding() {
            Backend::Transcoder
        } else {
            Backend::ObjectStore
        };

        let result = match backend {
            Backend::Transcoder => self.upload_media(part, stream).await,
            Backend::ObjectStore => self.upload_data(part, stream).await,
        };

        let mut record = result.map_err(|source| {
            warn!(
                name = %part.name,
                key = %part.key,
                content_type = %part.content_type,
                %backend,
                "upload failed: {}",
                source
            );
            UploadError::Part {
                content_type: part.content_type.clone(),
                name: part.name.clone(),
                key: part.key.clone(),
                backend,
                source,
            }
        })?;
        record.name = part.name.clone();
        record.content_type = part.content_type.clone();

        info!(
            name = %record.name,
            bucket = %record.bucket,
            key = %record.key,
            size = record.size,
            content_type = %record.content_type,
            %backend,
            "part uploaded"
        );
        Ok(record)
    }

    async fn upload_data(
        &self,
        part: &PartUpload,
        stream: ByteStream<'_>,
    ) -> Result<Record, BackendError> {
        let expected = part.expected_size();
        let bucket = self.selector.select_for_write(expected)?;
        let timestamp = Utc::now();
        let copied = self.store.write(bucket, &part.key, expected, stream).await?;

        Ok(Record {
            name: String::new(),
            bucket: bucket.name.clone(),
            key: part.key.clone(),
            size: copied,
            meta_bucket: None,
            meta_key: None,
            meta_size: None,
            content_type: String::new(),
            timestamp,
            media: None,
        })
    }

    async fn upload_media(
        &self,
        part: &PartUpload,
        stream: ByteStream<'_>,
    ) -> Result<Record, BackendError> {
        let bucket: &Bucket = self.selector.select_for_write(part.expected_size())?;
        let request = TranscodeRequest {
            bucket,
            key: &part.key,
            meta_key: &part.meta_key,
            content_type: &part.content_type,
            content_length: part.size,
        };
        let reply = self.transcoder.transcode(request, stream).await?;

        if !reply.key.is_empty() && reply.key != part.key {
            warn!(
                expected = %part.key,
                replied = %reply.key,
                "transcoder replied with a different key, keeping the derived one"
            );
        }
        let bucket_name = non_empty(reply.bucket).unwrap_or_else(|| bucket.name.clone());
        let meta_bucket = non_empty(reply.meta_bucket).unwrap_or_else(|| bucket_name.clone());

        Ok(Record {
            name: String::new(),
            bucket: bucket_name,
            key: part.key.clone(),
            size: reply.size,
            meta_bucket: Some(meta_bucket),
            meta_key: Some(part.meta_key.clone()),
            meta_size: Some(reply.meta_size),
            content_type: String::new(),
            timestamp: reply.timestamp.unwrap_or_else(Utc::now),
            media: reply.media,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
