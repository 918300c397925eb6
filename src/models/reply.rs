//! JSON request and response bodies of the HTTP surface.

use super::record::Record;
use serde::{Deserialize, Serialize};

/// `{"operation": ..., "reply": ...}`, the envelope of every successful reply.
#[derive(Serialize, Debug)]
pub struct OperationReply<T> {
    pub operation: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<T>,
}

impl<T> OperationReply<T> {
    pub fn new(operation: &'static str, reply: T) -> Self {
        Self {
            operation,
            reply: Some(reply),
        }
    }
}

impl OperationReply<()> {
    pub fn empty(operation: &'static str) -> Self {
        Self {
            operation,
            reply: None,
        }
    }
}

/// One record and the tags it should be indexed under.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IndexEntry {
    pub file: Record,
    pub tags: Vec<String>,
}

/// Body of `POST /index`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IndexRequest {
    #[serde(default)]
    pub files: Vec<IndexEntry>,
}

/// Body of `POST /list`.
#[derive(Deserialize, Debug, Default)]
pub struct ListRequest {
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TagListing<T> {
    pub tag: String,
    pub keys: Vec<T>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ListReply<T> {
    pub tags: Vec<TagListing<T>>,
}
