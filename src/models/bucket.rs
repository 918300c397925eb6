//! Storage buckets: named destinations in the distributed store.

use serde::Serialize;
use std::{collections::BTreeSet, fmt, str::FromStr};
use thiserror::Error;

/// Size passed down the write path when the caller does not know how many
/// bytes are coming. Only buckets with an unbounded capacity class accept it.
pub const UNBOUNDED_SIZE: u64 = u64::MAX;

/// How large an object a bucket is provisioned for.
///
/// Ordered from the tightest bounded class to `Unbounded`, which is how the
/// selector prefers the smallest bucket that still fits.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CapacityClass {
    /// Accepts objects up to and including this many bytes.
    Bounded(u64),
    /// Accepts any object, including streams of unknown length.
    Unbounded,
}

impl CapacityClass {
    /// Whether an object of `size` bytes may be written into this class.
    pub fn fits(&self, size: u64) -> bool {
        match self {
            CapacityClass::Unbounded => true,
            CapacityClass::Bounded(limit) => size != UNBOUNDED_SIZE && size <= *limit,
        }
    }
}

impl fmt::Display for CapacityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityClass::Bounded(limit) => write!(f, "{}", limit),
            CapacityClass::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// A storage bucket in the distributed object store.
///
/// The pool of buckets is loaded once at startup and never mutated; a bucket
/// chosen for a write is used for that whole write.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket name, also the namespace objects are written under.
    pub name: String,

    /// Replica groups every object in this bucket is written to.
    pub replica_groups: BTreeSet<u32>,

    /// Largest object this bucket is provisioned for.
    pub capacity: CapacityClass,
}

impl Bucket {
    /// Replica groups joined with `:`, the wire form used by the transcoder.
    pub fn groups_header(&self) -> String {
        self.replica_groups
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Whether `segment` can be used as one directory or file name under the
/// store root without escaping it.
pub fn is_safe_path_segment(segment: &str) -> bool {
    !(segment.is_empty()
        || segment == "."
        || segment.contains('/')
        || segment.contains("..")
        || segment
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\'))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketSpecError {
    #[error("bucket spec `{0}` must look like NAME/GROUP[:GROUP...]/CAPACITY")]
    Malformed(String),
    #[error("bucket spec `{spec}` has unusable name `{name}`")]
    InvalidName { spec: String, name: String },
    #[error("bucket spec `{spec}` has invalid replica group `{group}`")]
    InvalidGroup { spec: String, group: String },
    #[error("bucket spec `{spec}` has invalid capacity `{capacity}`")]
    InvalidCapacity { spec: String, capacity: String },
}

/// Parses `NAME/G1:G2/CAPACITY`, e.g. `small/1:2/64M` or `large/1:2:3/unbounded`.
impl FromStr for Bucket {
    type Err = BucketSpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = spec.trim().split('/').collect();
        let [name, groups, capacity] = parts.as_slice() else {
            return Err(BucketSpecError::Malformed(spec.to_string()));
        };
        if name.is_empty() || groups.is_empty() {
            return Err(BucketSpecError::Malformed(spec.to_string()));
        }
        if !is_safe_path_segment(name) {
            return Err(BucketSpecError::InvalidName {
                spec: spec.to_string(),
                name: name.to_string(),
            });
        }

        let mut replica_groups = BTreeSet::new();
        for group in groups.split(':') {
            let id = group
                .parse::<u32>()
                .map_err(|_| BucketSpecError::InvalidGroup {
                    spec: spec.to_string(),
                    group: group.to_string(),
                })?;
            replica_groups.insert(id);
        }

        let capacity =
            parse_capacity(capacity).ok_or_else(|| BucketSpecError::InvalidCapacity {
                spec: spec.to_string(),
                capacity: capacity.to_string(),
            })?;

        Ok(Bucket {
            name: name.to_string(),
            replica_groups,
            capacity,
        })
    }
}

fn parse_capacity(raw: &str) -> Option<CapacityClass> {
    if raw.eq_ignore_ascii_case("unbounded") || raw == "*" {
        return Some(CapacityClass::Unbounded);
    }
    let (digits, multiplier) = match raw.char_indices().last()? {
        (idx, 'K' | 'k') => (&raw[..idx], 1u64 << 10),
        (idx, 'M' | 'm') => (&raw[..idx], 1u64 << 20),
        (idx, 'G' | 'g') => (&raw[..idx], 1u64 << 30),
        _ => (raw, 1),
    };
    let limit = digits.parse::<u64>().ok()?.checked_mul(multiplier)?;
    Some(CapacityClass::Bounded(limit))
}
