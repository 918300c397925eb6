//! src/services/object_store.rs
//!
//! Capability interface to the distributed object store, plus the on-disk
//! backend the gateway ships with. Each replica group is a directory tree;
//! an object lives at `root/{group}/{bucket}/{shard}/{shard}/{key}` in every
//! group of its bucket.

use crate::errors::{Classify, ErrorKind};
use crate::models::bucket::{Bucket, UNBOUNDED_SIZE, is_safe_path_segment};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::{
    io::{self, ErrorKind as IoErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// A stream of payload chunks, borrowed from whatever produces them.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no bucket can accommodate {size} bytes")]
    NoBucketAvailable { size: u64 },
    #[error("bucket `{0}` does not exist")]
    UnknownBucket(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("size mismatch writing `{key}`: expected {expected} bytes, copied {copied}")]
    SizeMismatch {
        key: String,
        expected: u64,
        copied: u64,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NoBucketAvailable { .. } | StoreError::Io(_) => {
                ErrorKind::BucketUnavailable
            }
            StoreError::UnknownBucket(_) | StoreError::ObjectNotFound { .. } => {
                ErrorKind::NotFound
            }
            StoreError::InvalidKey(_) | StoreError::SizeMismatch { .. } => ErrorKind::Validation,
        }
    }
}

/// An object opened for reading.
pub struct ObjectReader {
    pub size: u64,
    pub stream: ByteStream<'static>,
}

/// What the gateway needs from the distributed store.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Stream `stream` into `key` on every replica group of `bucket`.
    ///
    /// `expected_size` is [`UNBOUNDED_SIZE`] when the length is unknown;
    /// otherwise copying more or fewer bytes than announced is an error.
    /// Returns the number of bytes written.
    async fn write(
        &self,
        bucket: &Bucket,
        key: &str,
        expected_size: u64,
        stream: ByteStream<'_>,
    ) -> StoreResult<u64>;

    /// Open `key` from the first replica group of `bucket` that has it.
    async fn read(&self, bucket: &Bucket, key: &str) -> StoreResult<ObjectReader>;

    /// Cheap reachability check.
    async fn ping(&self) -> StoreResult<()>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Object store backed by local directories, one per replica group.
#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    base_path: PathBuf,
}

impl DiskObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape the bucket directory.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.len() > MAX_OBJECT_KEY_LEN || !is_safe_path_segment(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Two-level shard directories from MD5(bucket/key), to keep directories small.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, group: u32, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.base_path.clone();
        path.push(group.to_string());
        path.push(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Copy the finished primary replica into another group via temp + rename.
    async fn replicate(&self, primary: &Path, target: &Path) -> StoreResult<()> {
        let parent = parent_dir(target)?;
        fs::create_dir_all(&parent).await?;
        let tmp = TempFile::new(parent.join(format!(".tmp-{}", Uuid::new_v4())));
        fs::copy(primary, tmp.path()).await?;
        fs::rename(tmp.path(), target).await?;
        tmp.persist();
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn write(
        &self,
        bucket: &Bucket,
        key: &str,
        expected_size: u64,
        mut stream: ByteStream<'_>,
    ) -> StoreResult<u64> {
        Self::ensure_key_safe(key)?;
        let mut groups = bucket.replica_groups.iter().copied();
        let primary_group = groups
            .next()
            .ok_or_else(|| StoreError::UnknownBucket(bucket.name.clone()))?;

        let primary_path = self.object_path(primary_group, &bucket.name, key);
        let parent = parent_dir(&primary_path)?;
        fs::create_dir_all(&parent).await?;

        // Removed on drop unless persisted, which covers both errors and a
        // cancelled request future.
        let tmp = TempFile::new(parent.join(format!(".tmp-{}", Uuid::new_v4())));
        let mut file = File::create(tmp.path()).await?;

        let mut copied: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            copied += chunk.len() as u64;
            if expected_size != UNBOUNDED_SIZE && copied > expected_size {
                return Err(StoreError::SizeMismatch {
                    key: key.to_string(),
                    expected: expected_size,
                    copied,
                });
            }
            file.write_all(&chunk).await?;
        }
        if expected_size != UNBOUNDED_SIZE && copied != expected_size {
            return Err(StoreError::SizeMismatch {
                key: key.to_string(),
                expected: expected_size,
                copied,
            });
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(tmp.path(), &primary_path).await?;
        tmp.persist();

        for group in groups {
            let replica_path = self.object_path(group, &bucket.name, key);
            self.replicate(&primary_path, &replica_path).await?;
        }

        debug!(
            bucket = %bucket.name,
            key,
            groups = %bucket.groups_header(),
            copied,
            "object written"
        );
        Ok(copied)
    }

    async fn read(&self, bucket: &Bucket, key: &str) -> StoreResult<ObjectReader> {
        Self::ensure_key_safe(key)?;
        for group in &bucket.replica_groups {
            let path = self.object_path(*group, &bucket.name, key);
            let file = match File::open(&path).await {
                Ok(file) => file,
                Err(err) if err.kind() == IoErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(bucket = %bucket.name, key, group, "replica unreadable: {}", err);
                    continue;
                }
            };
            let size = file.metadata().await?.len();
            return Ok(ObjectReader {
                size,
                stream: ReaderStream::new(file).boxed(),
            });
        }
        Err(StoreError::ObjectNotFound {
            bucket: bucket.name.clone(),
            key: key.to_string(),
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        let meta = fs::metadata(&self.base_path).await?;
        if !meta.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                IoErrorKind::NotADirectory,
                format!("{} is not a directory", self.base_path.display()),
            )));
        }
        Ok(())
    }
}

fn parent_dir(path: &Path) -> StoreResult<PathBuf> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        StoreError::Io(io::Error::other("object path missing parent directory"))
    })
}

/// A temp file that deletes itself unless [`TempFile::persist`] is called.
struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persist(mut self) {
        self.keep = true;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
