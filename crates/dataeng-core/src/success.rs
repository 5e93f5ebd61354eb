use bytes::Bytes;
use dataeng_bucket::{BucketStore, WritePrecondition};
use tracing::debug;

use crate::error::Result;
use crate::metadata::utc_timestamp;

/// Writes the `_SUCCESS` marker at `location`, replacing any earlier marker.
///
/// The body is the current UTC timestamp, which is returned.
pub async fn mark_success(store: &dyn BucketStore, location: &str) -> Result<String> {
    debug!(location, "marking _SUCCESS file");
    let content = utc_timestamp();
    store
        .put_object(
            location,
            Bytes::from(content.clone()),
            "text/plain",
            WritePrecondition::None,
        )
        .await?;
    debug!(location, content = %content, "_SUCCESS file has been uploaded");
    Ok(content)
}
