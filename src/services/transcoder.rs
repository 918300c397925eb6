//! Client for the external transcoding service.
//!
//! Audio and video uploads are streamed to `POST {base}/transcode/{key}`.
//! The service writes the transcoded object and its metadata companion into
//! the bucket named in the `X-Ell-*` headers and replies with where they
//! landed. `GET {base}/meta_json/{bucket}/{meta_key}` serves that metadata
//! back as JSON.

use crate::errors::{Classify, ErrorKind};
use crate::models::{bucket::Bucket, media::MediaInfo};
use crate::services::object_store::ByteStream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt, channel::mpsc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Deserializer, de};
use std::io;
use thiserror::Error;
use tracing::debug;

const HEADER_BUCKET: &str = "x-ell-bucket";
const HEADER_KEY: &str = "x-ell-key";
const HEADER_GROUPS: &str = "x-ell-groups";
const HEADER_META_BUCKET: &str = "x-ell-meta-bucket";
const HEADER_META_KEY: &str = "x-ell-meta-key";
const HEADER_META_GROUPS: &str = "x-ell-meta-groups";

/// Chunks buffered between the inbound part and the outbound request.
const BODY_CHANNEL_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} replied with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("could not decode reply from {url}: '{body}': {source}")]
    Decode {
        url: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;

impl Classify for TranscodeError {
    fn kind(&self) -> ErrorKind {
        match self {
            TranscodeError::Decode { .. } => ErrorKind::UpstreamDecode,
            TranscodeError::Status { status: 404, .. } => ErrorKind::NotFound,
            TranscodeError::Request { .. } | TranscodeError::Status { .. } => {
                ErrorKind::BucketUnavailable
            }
        }
    }
}

/// Where the transcoder should put the object and its metadata.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeRequest<'a> {
    pub bucket: &'a Bucket,
    pub key: &'a str,
    pub meta_key: &'a str,
    pub content_type: &'a str,
    /// `None` when the part length is unknown.
    pub content_length: Option<u64>,
}

/// The transcoder's reply to a successful upload.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TranscodeReply {
    pub bucket: String,
    pub key: String,
    pub id: String,
    pub size: u64,
    pub meta_bucket: String,
    pub meta_key: String,
    pub meta_id: String,
    pub meta_size: u64,
    #[serde(deserialize_with = "deserialize_mtime")]
    pub timestamp: Option<DateTime<Utc>>,
    pub media: Option<MediaInfo>,
}

/// `{"tsec": .., "tnsec": ..}` as sent by the transcoder.
#[derive(Deserialize)]
struct Mtime {
    #[serde(default)]
    tsec: i64,
    #[serde(default)]
    tnsec: i64,
}

fn deserialize_mtime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(mtime) = Option::<Mtime>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let nanos = u32::try_from(mtime.tnsec)
        .map_err(|_| <D::Error as de::Error>::custom(format!("invalid tnsec {}", mtime.tnsec)))?;
    DateTime::from_timestamp(mtime.tsec, nanos)
        .map(Some)
        .ok_or_else(|| {
            <D::Error as de::Error>::custom(format!("invalid timestamp {}.{}", mtime.tsec, nanos))
        })
}

/// Metadata document served back by the transcoder.
pub struct MetaDocument {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub stream: ByteStream<'static>,
}

#[async_trait]
pub trait Transcoder: Send + Sync + 'static {
    /// Stream `body` to the transcoder and return where it was stored.
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
        body: ByteStream<'_>,
    ) -> TranscodeResult<TranscodeReply>;

    /// Fetch the metadata document stored under `meta_key`, the companion of
    /// the object the caller named `name`.
    async fn meta_json(
        &self,
        bucket: &Bucket,
        name: &str,
        meta_key: &str,
    ) -> TranscodeResult<MetaDocument>;
}

/// [`Transcoder`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpTranscoder {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTranscoder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }
}

#[async_trait]
impl Transcoder for HttpTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
        body: ByteStream<'_>,
    ) -> TranscodeResult<TranscodeReply> {
        let url = format!("{}/transcode/{}", self.base_url, request.key);
        let groups = request.bucket.groups_header();

        // reqwest needs a 'static body, the part stream borrows the request,
        // so chunks are handed over through a bounded channel.
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(BODY_CHANNEL_DEPTH);
        let mut builder = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, request.content_type)
            .header(HEADER_BUCKET, &request.bucket.name)
            .header(HEADER_KEY, request.key)
            .header(HEADER_GROUPS, &groups)
            .header(HEADER_META_BUCKET, &request.bucket.name)
            .header(HEADER_META_KEY, request.meta_key)
            .header(HEADER_META_GROUPS, &groups)
            .body(reqwest::Body::wrap_stream(rx));
        if let Some(length) = request.content_length {
            builder = builder.header(CONTENT_LENGTH, length);
        }

        let (response, ()) = tokio::join!(builder.send(), pump(body, tx));
        let response = response.map_err(|source| TranscodeError::Request {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        let data = response
            .bytes()
            .await
            .map_err(|source| TranscodeError::Request {
                url: url.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(TranscodeError::Status {
                url,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&data).into_owned(),
            });
        }

        let reply: TranscodeReply =
            serde_json::from_slice(&data).map_err(|source| TranscodeError::Decode {
                url: url.clone(),
                body: String::from_utf8_lossy(&data).into_owned(),
                source,
            })?;
        debug!(%url, bucket = %reply.bucket, key = %reply.key, size = reply.size, "transcoded");
        Ok(reply)
    }

    async fn meta_json(
        &self,
        bucket: &Bucket,
        name: &str,
        meta_key: &str,
    ) -> TranscodeResult<MetaDocument> {
        let url = format!("{}/meta_json/{}/{}", self.base_url, bucket.name, meta_key);
        let response = self
            .http
            .get(&url)
            .header(HEADER_BUCKET, &bucket.name)
            .header(HEADER_KEY, name)
            .header(HEADER_GROUPS, bucket.groups_header())
            .send()
            .await
            .map_err(|source| TranscodeError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscodeError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();

        Ok(MetaDocument {
            content_type,
            content_length,
            stream,
        })
    }
}

/// Forward `body` into `tx` until either side finishes. A failed chunk is
/// forwarded too so the outbound request aborts instead of ending cleanly.
async fn pump(mut body: ByteStream<'_>, mut tx: mpsc::Sender<io::Result<Bytes>>) {
    while let Some(chunk) = body.next().await {
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_reply() {
        let json = r#"{
            "bucket": "b1", "key": "k", "id": "id1", "size": 42,
            "meta_bucket": "b1", "meta_key": "mk", "meta_id": "id2", "meta_size": 7,
            "timestamp": {"tsec": 1704067200, "tnsec": 500},
            "media": {"tracks": [{"codec": "h264", "mime_type": "video/h264", "video": {"width": 640, "height": 480}}]}
        }"#;
        let reply: TranscodeReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.size, 42);
        assert_eq!(reply.meta_key, "mk");
        let ts = reply.timestamp.unwrap();
        assert_eq!(ts.timestamp(), 1_704_067_200);
        assert_eq!(ts.timestamp_subsec_nanos(), 500);
        let media = reply.media.unwrap();
        assert_eq!(media.tracks[0].video.width, 640);
    }

    #[test]
    fn missing_fields_default() {
        let reply: TranscodeReply = serde_json::from_str(r#"{"bucket":"b","key":"k"}"#).unwrap();
        assert_eq!(reply.timestamp, None);
        assert_eq!(reply.media, None);
        assert_eq!(reply.size, 0);
    }

    #[test]
    fn negative_nanos_are_rejected() {
        let result =
            serde_json::from_str::<TranscodeReply>(r#"{"timestamp":{"tsec":1,"tnsec":-1}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn decode_errors_are_upstream_decode() {
        let source = serde_json::from_str::<TranscodeReply>("not json").unwrap_err();
        let err = TranscodeError::Decode {
            url: "http://t/transcode/k".into(),
            body: "not json".into(),
            source,
        };
        assert_eq!(err.kind(), ErrorKind::UpstreamDecode);
        assert!(err.to_string().contains("not json"));
    }
}
