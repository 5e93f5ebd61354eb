//! Object helpers that log and degrade instead of failing.
//!
//! These answer "I could not find out" with `None` and a warning, and treat a
//! forbidden or missing object as an ordinary negative answer.

use dataeng_bucket::{BucketError, BucketStore};
use tracing::{debug, warn};

/// `Some(false)` when the key is missing or forbidden, `None` when the state cannot be determined.
pub async fn key_exists(store: &dyn BucketStore, key: &str) -> Option<bool> {
    debug!(key, "checking key existence");
    match store.head_object(key).await {
        Ok(meta) => Some(meta.is_some()),
        Err(BucketError::Forbidden(_)) => {
            debug!(key, "key is forbidden");
            Some(false)
        }
        Err(err) => {
            warn!(key, error = %err, "unable to determine key existence");
            None
        }
    }
}

pub async fn object_size(store: &dyn BucketStore, key: &str) -> Option<u64> {
    match store.head_object(key).await {
        Ok(Some(meta)) => Some(meta.size),
        Ok(None) => {
            debug!(key, "object does not exist");
            None
        }
        Err(err) => {
            warn!(key, error = %err, "unable to get object size");
            None
        }
    }
}

/// Keys under `prefix`, sorted, excluding directory placeholders that end in `/`.
///
/// A leading `/` is dropped and a trailing `/` is added to a non-empty prefix.
pub async fn list_keys(store: &dyn BucketStore, prefix: &str) -> Option<Vec<String>> {
    let prefix = normalize_prefix(prefix);
    match store.list_objects(&prefix).await {
        Ok(objects) => {
            let mut keys: Vec<String> = objects
                .into_iter()
                .map(|meta| meta.key)
                .filter(|key| !key.ends_with('/'))
                .collect();
            keys.sort();
            Some(keys)
        }
        Err(err @ (BucketError::Forbidden(_) | BucketError::NotFound(_))) => {
            debug!(prefix = %prefix, error = %err, "unable to list keys");
            None
        }
        Err(err) => {
            warn!(prefix = %prefix, error = %err, "unable to list keys");
            None
        }
    }
}

pub async fn delete_object(store: &dyn BucketStore, key: &str) {
    debug!(key, "deleting object");
    if let Err(err) = store.delete_object(key).await {
        warn!(key, error = %err, "unable to delete object");
    }
}

/// Deletes every object under `prefix` and the prefix key itself. Returns how
/// many objects were deleted.
pub async fn delete_prefix(store: &dyn BucketStore, prefix: &str) -> usize {
    debug!(prefix, "deleting prefix");
    let objects = match store.list_objects(prefix).await {
        Ok(objects) => objects,
        Err(err @ (BucketError::Forbidden(_) | BucketError::NotFound(_))) => {
            debug!(prefix, error = %err, "unable to list prefix for deletion");
            return 0;
        }
        Err(err) => {
            warn!(prefix, error = %err, "unable to delete prefix");
            return 0;
        }
    };

    let mut deleted = 0;
    for meta in &objects {
        match store.delete_object(&meta.key).await {
            Ok(()) => deleted += 1,
            Err(err) => warn!(key = %meta.key, error = %err, "unable to delete object"),
        }
    }

    if !objects.iter().any(|meta| meta.key == prefix) {
        if let Err(err) = store.delete_object(prefix).await {
            debug!(prefix, error = %err, "unable to delete prefix placeholder");
        }
    }

    deleted
}

fn normalize_prefix(prefix: &str) -> String {
    let prefix = prefix.strip_prefix('/').unwrap_or(prefix);
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}
