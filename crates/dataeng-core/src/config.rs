//! Environment configuration for the metadata bucket.

use std::env;
use std::sync::Arc;

use dataeng_bucket::{BucketStore, MemoryBucketStore, S3BucketStore, S3Config};

use crate::error::{PipelineError, Result};
use crate::metadata::{ConcurrencyMode, MetadataStore};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStoreKind {
    S3,
    /// Process-local store that starts empty on every [`StoreConfig::open`]. Only
    /// meaningful when all readers and writers share one process.
    Memory,
}

impl ObjectStoreKind {
    /// Whether state written through this kind is visible to later processes.
    pub fn is_persistent(self) -> bool {
        matches!(self, ObjectStoreKind::S3)
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub kind: ObjectStoreKind,
    pub s3: S3Config,
    pub concurrency: ConcurrencyMode,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok().filter(|value| !value.is_empty()))
    }

    /// Builds the configuration from any variable source; `from_env` reads the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = match lookup("DATAENG_OBJECT_STORE_KIND").as_deref() {
            None | Some("s3") => ObjectStoreKind::S3,
            Some("memory") => ObjectStoreKind::Memory,
            Some(other) => {
                return Err(PipelineError::Config(format!(
                    "unsupported DATAENG_OBJECT_STORE_KIND '{other}' (expected 's3' or 'memory')"
                )))
            }
        };

        let bucket = lookup("S3_BUCKET").unwrap_or_default();
        if kind == ObjectStoreKind::S3 && bucket.is_empty() {
            return Err(PipelineError::Config("S3_BUCKET must be set".into()));
        }

        let s3 = S3Config {
            bucket,
            region: lookup("S3_REGION").unwrap_or_else(|| S3Config::default().region),
            endpoint: lookup("S3_ENDPOINT_URL"),
            access_key_id: lookup("S3_ACCESS_KEY_ID"),
            secret_access_key: lookup("S3_SECRET_ACCESS_KEY"),
            session_token: lookup("S3_SESSION_TOKEN"),
            force_path_style: lookup("S3_FORCE_PATH_STYLE")
                .map(|value| parse_flag(&value))
                .unwrap_or(false),
        };

        let max_attempts = match lookup("DATAENG_METADATA_MAX_ATTEMPTS") {
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|attempts| *attempts >= 1)
                .ok_or_else(|| {
                    PipelineError::Config(format!(
                        "DATAENG_METADATA_MAX_ATTEMPTS must be a positive integer, got '{value}'"
                    ))
                })?,
            None => DEFAULT_MAX_ATTEMPTS,
        };

        let concurrency = match lookup("DATAENG_METADATA_CONCURRENCY").as_deref() {
            None | Some("last-writer-wins") => ConcurrencyMode::LastWriterWins,
            Some("optimistic") => ConcurrencyMode::Optimistic { max_attempts },
            Some(other) => {
                return Err(PipelineError::Config(format!(
                    "unsupported DATAENG_METADATA_CONCURRENCY '{other}' (expected 'last-writer-wins' or 'optimistic')"
                )))
            }
        };

        Ok(Self {
            kind,
            s3,
            concurrency,
        })
    }

    pub async fn open(&self) -> Result<Arc<dyn BucketStore>> {
        match self.kind {
            ObjectStoreKind::S3 => Ok(Arc::new(S3BucketStore::new(self.s3.clone()).await?)),
            ObjectStoreKind::Memory => Ok(Arc::new(MemoryBucketStore::new())),
        }
    }

    pub async fn metadata_store(&self) -> Result<MetadataStore> {
        let store = self.open().await?;
        Ok(MetadataStore::new(store).with_concurrency(self.concurrency))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
