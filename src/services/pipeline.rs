//! Upload, then index.
//!
//! The two steps share no transaction. When indexing fails the uploaded
//! objects stay in the store without tags; the error names every
//! `bucket/key` so they can be re-indexed by hand.

use crate::errors::{Classify, ErrorKind};
use crate::models::{media::MediaKind, record::Record, reply::IndexEntry};
use crate::services::{
    keys::KeyDeriver,
    tag_index::{IndexError, TagIndex},
    upload_service::{UploadError, UploadService, UploadSource},
};
use thiserror::Error;
use tracing::{error, info};

/// Tag every record is indexed under.
pub const ALL_TAG: &str = "all";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("uploaded {} but indexing failed: {source}", .objects.join(", "))]
    Indexing {
        objects: Vec<String>,
        #[source]
        source: IndexError,
    },
}

impl Classify for PipelineError {
    fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Upload(err) => err.kind(),
            PipelineError::Indexing { .. } => ErrorKind::IndexingFailure,
        }
    }
}

/// Tags a freshly uploaded record is indexed under: its UTC upload date,
/// [`ALL_TAG`], and one tag per media class found.
///
/// Media classes come from the transcoder's tracks when there are any that
/// classify, otherwise from the record's content type.
pub fn derive_tags(record: &Record) -> Vec<String> {
    let mut tags = vec![
        record.timestamp.format("%Y-%m-%d").to_string(),
        ALL_TAG.to_string(),
    ];

    let mut media_tags: Vec<&'static str> = record
        .media
        .iter()
        .flat_map(|media| media.tracks.iter())
        .filter_map(|track| track.kind().tag())
        .collect();
    if media_tags.is_empty() {
        media_tags.extend(MediaKind::classify(&record.content_type).tag());
    }

    for tag in media_tags {
        if !tags.iter().any(|existing| existing == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

#[derive(Clone)]
pub struct Pipeline {
    uploads: UploadService,
    index: TagIndex,
}

impl Pipeline {
    pub fn new(uploads: UploadService, index: TagIndex) -> Self {
        Self { uploads, index }
    }

    /// Upload every part of `source`, then index the records under their
    /// derived tags. Records are only returned once indexing succeeded.
    pub async fn upload_and_index(
        &self,
        keys: &KeyDeriver,
        key_hint: &str,
        source: UploadSource,
    ) -> Result<Vec<Record>, PipelineError> {
        let records = self.uploads.upload_batch(keys, key_hint, source).await?;

        let entries = records
            .iter()
            .map(|record| IndexEntry {
                file: record.clone(),
                tags: derive_tags(record),
            })
            .collect();

        if let Err(source) = self.index.index_records(keys.tenant(), entries).await {
            let objects: Vec<String> = records
                .iter()
                .map(|record| format!("{}/{}", record.bucket, record.key))
                .collect();
            error!(
                tenant = keys.tenant(),
                objects = ?objects,
                "uploaded objects left unindexed: {}",
                source
            );
            return Err(PipelineError::Indexing { objects, source });
        }

        info!(tenant = keys.tenant(), parts = records.len(), "upload indexed");
        Ok(records)
    }
}
