// crates/dataeng-core/src/error.rs

use dataeng_bucket::BucketError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Object store operation failed: {0}")]
    Bucket(#[from] BucketError),

    #[error("Metadata document at '{key}' is not valid JSON: {source}")]
    MalformedDocument {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Metadata document at '{key}' is valid JSON but not a metadata document: {source}")]
    UnexpectedShape {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metadata document at '{key}' was modified concurrently; gave up after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
