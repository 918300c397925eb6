//! Represents one uploaded part after it has landed in storage.

use super::media::MediaInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The normalized result of uploading one part.
///
/// Produced by the upload path (either backend), handed by value to the
/// indexer, and returned to the client. A `Record` stores metadata only, the
/// payload lives in the object store under `bucket`/`key`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Record {
    /// Logical name the client uploaded the part as.
    pub name: String,

    /// Bucket the payload was written to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bucket: String,

    /// Tenant-scoped storage key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    /// Bytes written.
    #[serde(default)]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_size: Option<u64>,

    /// MIME type the part was uploaded with.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,

    /// When the payload was written.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Per-track info, only present when the transcoder supplied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,
}

/// A row of a tag table.
#[derive(FromRow, Clone, Debug)]
pub struct TagRow {
    pub bucket: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub size: i64,
}
