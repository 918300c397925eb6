//! Picks the bucket a write goes to, and resolves buckets by name for reads.

use crate::models::bucket::{Bucket, UNBOUNDED_SIZE};
use crate::services::object_store::{StoreError, StoreResult};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketPoolError {
    #[error("bucket pool is empty")]
    Empty,
    #[error("bucket `{0}` is configured more than once")]
    Duplicate(String),
    #[error("bucket `{0}` has no replica groups")]
    NoGroups(String),
}

/// The static bucket pool. Built once at startup, shared read-only.
#[derive(Clone, Debug)]
pub struct BucketSelector {
    buckets: Vec<Bucket>,
}

impl BucketSelector {
    pub fn new(buckets: Vec<Bucket>) -> Result<Self, BucketPoolError> {
        if buckets.is_empty() {
            return Err(BucketPoolError::Empty);
        }
        let mut names = HashSet::new();
        for bucket in &buckets {
            if !names.insert(bucket.name.as_str()) {
                return Err(BucketPoolError::Duplicate(bucket.name.clone()));
            }
            if bucket.replica_groups.is_empty() {
                return Err(BucketPoolError::NoGroups(bucket.name.clone()));
            }
        }
        Ok(Self { buckets })
    }

    /// Choose the smallest capacity class that accommodates `expected_size`.
    ///
    /// Callers that do not know the size pass [`UNBOUNDED_SIZE`], which only
    /// an unbounded bucket accepts. Ties go to the bucket configured first.
    pub fn select_for_write(&self, expected_size: u64) -> StoreResult<&Bucket> {
        self.buckets
            .iter()
            .filter(|bucket| bucket.capacity.fits(expected_size))
            .min_by_key(|bucket| bucket.capacity)
            .ok_or(StoreError::NoBucketAvailable {
                size: expected_size,
            })
    }

    /// Look up a bucket by name.
    pub fn select_for_read(&self, name: &str) -> StoreResult<&Bucket> {
        self.buckets
            .iter()
            .find(|bucket| bucket.name == name)
            .ok_or_else(|| StoreError::UnknownBucket(name.to_string()))
    }

    /// Whether any bucket accepts writes of unknown length.
    pub fn accepts_unbounded(&self) -> bool {
        self.select_for_write(UNBOUNDED_SIZE).is_ok()
    }
}
