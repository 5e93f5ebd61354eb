use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    BucketError, BucketStore, ObjectMeta, VersionedObject, WriteOutcome, WritePrecondition,
};

/// Process-local store for tests and dry runs.
///
/// Versions are per-key counters starting at 1, rendered as strings.
#[derive(Debug, Default, Clone)]
pub struct MemoryBucketStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: u64,
}

impl StoredObject {
    fn meta(&self, key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: self.data.len() as u64,
            version: Some(self.version.to_string()),
        }
    }
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|objects| objects.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredObject>>, BucketError> {
        self.objects
            .read()
            .map_err(|_| BucketError::Internal("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredObject>>, BucketError> {
        self.objects
            .write()
            .map_err(|_| BucketError::Internal("lock poisoned".into()))
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn get_object(&self, key: &str) -> Result<VersionedObject, BucketError> {
        let objects = self.read()?;
        objects
            .get(key)
            .map(|object| VersionedObject {
                bytes: object.data.clone(),
                version: Some(object.version.to_string()),
            })
            .ok_or_else(|| BucketError::NotFound(key.to_string()))
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        _content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<WriteOutcome, BucketError> {
        let mut objects = self.write()?;
        let current = objects.get(key).map(|object| object.version);

        let satisfied = match (&precondition, current) {
            (WritePrecondition::None, _) => true,
            (WritePrecondition::DoesNotExist, current) => current.is_none(),
            (WritePrecondition::MatchesVersion(expected), Some(version)) => {
                expected.parse::<u64>().ok() == Some(version)
            }
            (WritePrecondition::MatchesVersion(_), None) => false,
        };
        if !satisfied {
            return Ok(WriteOutcome::PreconditionFailed);
        }

        let version = current.map_or(1, |version| version + 1);
        objects.insert(
            key.to_string(),
            StoredObject {
                data: bytes,
                version,
            },
        );

        Ok(WriteOutcome::Written {
            version: Some(version.to_string()),
        })
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, BucketError> {
        Ok(self.read()?.get(key).map(|object| object.meta(key)))
    }

    async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        self.write()?.remove(key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, BucketError> {
        let objects = self.read()?;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| object.meta(key))
            .collect())
    }
}
