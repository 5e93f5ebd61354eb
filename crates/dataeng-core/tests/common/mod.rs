#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDateTime, Utc};
use dataeng_bucket::{
    BucketError, BucketStore, MemoryBucketStore, ObjectMeta, VersionedObject, WriteOutcome,
    WritePrecondition,
};
use tokio::sync::Barrier;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub fn parse_timestamp(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").expect("timestamp layout")
}

/// Asserts `value` was stamped at or after `since` (microsecond precision).
pub fn assert_not_older_than(value: &str, since: chrono::DateTime<Utc>) {
    let stamped = parse_timestamp(value).and_utc().timestamp_micros();
    assert!(
        stamped >= since.timestamp_micros(),
        "timestamp {value} is older than {since}"
    );
}

pub async fn put_raw(store: &MemoryBucketStore, key: &str, body: &'static [u8]) {
    store
        .put_object(
            key,
            Bytes::from_static(body),
            "application/json",
            WritePrecondition::None,
        )
        .await
        .expect("seed object");
}

/// Rejects every request with `Forbidden`.
pub struct ForbiddenStore;

#[async_trait]
impl BucketStore for ForbiddenStore {
    async fn get_object(&self, key: &str) -> Result<VersionedObject, BucketError> {
        Err(BucketError::Forbidden(key.to_string()))
    }

    async fn put_object(
        &self,
        key: &str,
        _bytes: Bytes,
        _content_type: &str,
        _precondition: WritePrecondition,
    ) -> Result<WriteOutcome, BucketError> {
        Err(BucketError::Forbidden(key.to_string()))
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, BucketError> {
        Err(BucketError::Forbidden(key.to_string()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        Err(BucketError::Forbidden(key.to_string()))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, BucketError> {
        Err(BucketError::Forbidden(prefix.to_string()))
    }
}

/// Holds the first `gated` reads at a barrier so concurrent writers all observe
/// the same document before any of them writes.
pub struct GatedStore {
    inner: MemoryBucketStore,
    barrier: Barrier,
    gated: usize,
    reads: AtomicUsize,
}

impl GatedStore {
    pub fn new(inner: MemoryBucketStore, gated: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(gated),
            gated,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BucketStore for GatedStore {
    async fn get_object(&self, key: &str) -> Result<VersionedObject, BucketError> {
        let result = self.inner.get_object(key).await;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.gated {
            self.barrier.wait().await;
        }
        result
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<WriteOutcome, BucketError> {
        self.inner
            .put_object(key, bytes, content_type, precondition)
            .await
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, BucketError> {
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        self.inner.delete_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, BucketError> {
        self.inner.list_objects(prefix).await
    }
}

/// Every conditional write loses, as if another writer always got there first.
pub struct AlwaysContendedStore {
    pub inner: MemoryBucketStore,
    pub puts: AtomicUsize,
}

impl AlwaysContendedStore {
    pub fn new(inner: MemoryBucketStore) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BucketStore for AlwaysContendedStore {
    async fn get_object(&self, key: &str) -> Result<VersionedObject, BucketError> {
        self.inner.get_object(key).await
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<WriteOutcome, BucketError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if precondition == WritePrecondition::None {
            return self
                .inner
                .put_object(key, bytes, content_type, precondition)
                .await;
        }
        Ok(WriteOutcome::PreconditionFailed)
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, BucketError> {
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        self.inner.delete_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, BucketError> {
        self.inner.list_objects(prefix).await
    }
}

/// Reads pass through to the inner store; every write is rejected with `Forbidden`.
pub struct ReadOnlyStore {
    pub inner: MemoryBucketStore,
}

#[async_trait]
impl BucketStore for ReadOnlyStore {
    async fn get_object(&self, key: &str) -> Result<VersionedObject, BucketError> {
        self.inner.get_object(key).await
    }

    async fn put_object(
        &self,
        key: &str,
        _bytes: Bytes,
        _content_type: &str,
        _precondition: WritePrecondition,
    ) -> Result<WriteOutcome, BucketError> {
        Err(BucketError::Forbidden(key.to_string()))
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, BucketError> {
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        Err(BucketError::Forbidden(key.to_string()))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, BucketError> {
        self.inner.list_objects(prefix).await
    }
}

/// Log lines written by the subscriber installed with [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Captures warnings and errors on the current thread until the guard drops.
pub fn capture_logs() -> (LogBuffer, DefaultGuard) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}
