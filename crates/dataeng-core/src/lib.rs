pub mod config;
pub mod error;
pub mod metadata;
pub mod naming;
pub mod objects;
pub mod success;

pub use error::{PipelineError, Result};
pub use metadata::{ConcurrencyMode, MetadataDocument, MetadataStore, SuccessWindow};
