//! Abstractions over the object storage that holds pipeline metadata documents and
//! success markers.
//!
//! Every backend exposes an opaque version token per object so callers can make a
//! write conditional on the state they read (compare-and-swap). Backends that cannot
//! honour a precondition must report `WriteOutcome::PreconditionFailed` rather than
//! silently writing.

mod memory;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::MemoryBucketStore;
pub use s3::{S3BucketStore, S3Config};

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("access to object forbidden: {0}")]
    Forbidden(String),
    #[error("internal store error: {0}")]
    Internal(String),
}

impl BucketError {
    pub(crate) fn from_sdk(err: impl std::fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }
}

/// Condition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write unconditionally, replacing whatever is stored.
    None,
    /// Write only if nothing is stored under the key yet.
    DoesNotExist,
    /// Write only if the stored object still carries this version token.
    MatchesVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { version: Option<String> },
    PreconditionFailed,
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Object body together with the version token it was read at.
#[derive(Debug, Clone)]
pub struct VersionedObject {
    pub bytes: Bytes,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub version: Option<String>,
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Returns `BucketError::NotFound` when nothing is stored under `key`.
    async fn get_object(&self, key: &str) -> Result<VersionedObject, BucketError>;

    /// A failed precondition is reported through the outcome, never as an error.
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<WriteOutcome, BucketError>;

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, BucketError>;

    /// Deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> Result<(), BucketError>;

    /// Lists every object under `prefix`, in no particular order.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, BucketError>;
}
