//! Per-source metadata document tracking the last successful ingestion window.
//!
//! One JSON document lives at `{data_source}/{data_source_type}/metadata.json`:
//!
//! ```json
//! {
//!   "last_success": {
//!     "<format>": {
//!       "<market>": {
//!         "last_updated": "2018-01-31 23:59:59.120000",
//!         "prefix": "gfk/matched_report/_/2018/01/31/_/_/_/csv/",
//!         "yesterday_last_updated": "...",
//!         "yesterday_prefix": "...",
//!         "custom_values": {}
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Every store operation reads the whole document, merges in memory and writes the
//! whole document back. Keys this crate does not know about are carried through
//! untouched, and so are known window keys holding values of an unexpected type
//! (including `null`) until an update overwrites them.
//!
//! Timestamps are rendered like Python's `str(datetime)`: six fractional digits,
//! or none at all when the microseconds are zero.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dataeng_bucket::{BucketError, BucketStore, WriteOutcome, WritePrecondition};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::naming::metadata_key;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Timestamp layout shared by `last_updated`, `yesterday_last_updated` and success markers.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const WHOLE_SECOND_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn utc_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    if at.timestamp_subsec_micros() == 0 {
        at.format(WHOLE_SECOND_FORMAT).to_string()
    } else {
        at.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)` instead of collapsing it to `None`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// `format -> market -> window`.
    #[serde(default)]
    pub last_success: BTreeMap<String, BTreeMap<String, SuccessWindow>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Checkpoint state of one `(format, market)` pair.
///
/// Fields hold whatever JSON was stored; this crate only ever writes strings (and
/// an object for `custom_values`). The accessors return `None` for other types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessWindow {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub yesterday_last_updated: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub yesterday_prefix: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub custom_values: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetadataDocument {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Pretty-printed with two-space indentation.
    pub fn to_pretty_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn window(&self, format: &str, market: &str) -> Option<&SuccessWindow> {
        self.last_success.get(format)?.get(market)
    }

    /// Returns the window, creating it and any missing parents.
    pub fn window_mut(&mut self, format: &str, market: &str) -> &mut SuccessWindow {
        self.last_success
            .entry(format.to_string())
            .or_default()
            .entry(market.to_string())
            .or_default()
    }

    /// Stamps today's (or yesterday's) checkpoint of a window.
    pub fn record_success(
        &mut self,
        format: &str,
        market: &str,
        prefix: &str,
        timestamp: &str,
        is_yesterday: bool,
    ) -> &mut SuccessWindow {
        let window = self.window_mut(format, market);
        if is_yesterday {
            window.yesterday_last_updated = Some(timestamp.into());
            window.yesterday_prefix = Some(prefix.into());
        } else {
            window.last_updated = Some(timestamp.into());
            window.prefix = Some(prefix.into());
        }
        window
    }

    /// Drops the yesterday checkpoint. Returns whether anything was removed; a
    /// missing window is left missing.
    pub fn clear_yesterday(&mut self, format: &str, market: &str) -> bool {
        let Some(window) = self
            .last_success
            .get_mut(format)
            .and_then(|markets| markets.get_mut(market))
        else {
            return false;
        };

        let had_timestamp = window.yesterday_last_updated.take().is_some();
        let had_prefix = window.yesterday_prefix.take().is_some();
        had_timestamp || had_prefix
    }
}

impl SuccessWindow {
    pub fn last_updated(&self) -> Option<&str> {
        self.last_updated.as_ref().and_then(Value::as_str)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Value::as_str)
    }

    pub fn yesterday_last_updated(&self) -> Option<&str> {
        self.yesterday_last_updated.as_ref().and_then(Value::as_str)
    }

    pub fn yesterday_prefix(&self) -> Option<&str> {
        self.yesterday_prefix.as_ref().and_then(Value::as_str)
    }

    pub fn custom_values(&self) -> Option<&Map<String, Value>> {
        self.custom_values.as_ref().and_then(Value::as_object)
    }

    /// Replaces `custom_values` when `values` is non-empty; otherwise keeps what is there.
    pub fn merge_custom_values(&mut self, values: Option<Map<String, Value>>) {
        if let Some(values) = values.filter(|values| !values.is_empty()) {
            self.custom_values = Some(Value::Object(values));
        }
    }
}

/// How document writes guard against concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// Unconditional writes. Two writers that read the same state race and the
    /// later write discards the earlier one's changes.
    #[default]
    LastWriterWins,
    /// Writes are conditional on the version that was read; on conflict the
    /// read-merge-write cycle is retried up to `max_attempts` times.
    Optimistic { max_attempts: u32 },
}

impl ConcurrencyMode {
    fn max_attempts(&self) -> u32 {
        match self {
            ConcurrencyMode::LastWriterWins => 1,
            ConcurrencyMode::Optimistic { max_attempts } => (*max_attempts).max(1),
        }
    }
}

/// Identifies one metadata document.
#[derive(Debug, Clone, Copy)]
pub struct SourceRef<'a> {
    pub data_source: &'a str,
    pub data_source_type: &'a str,
}

impl<'a> SourceRef<'a> {
    pub fn new(data_source: &'a str, data_source_type: &'a str) -> Self {
        Self {
            data_source,
            data_source_type,
        }
    }

    pub fn key(&self) -> String {
        metadata_key(self.data_source, self.data_source_type)
    }
}

/// Window addressed by an update.
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdate<'a> {
    pub market: &'a str,
    pub format: &'a str,
    pub prefix: &'a str,
    pub is_yesterday: bool,
}

struct Snapshot {
    document: Option<MetadataDocument>,
    version: Option<String>,
}

pub struct MetadataStore {
    store: Arc<dyn BucketStore>,
    concurrency: ConcurrencyMode,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self {
            store,
            concurrency: ConcurrencyMode::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyMode) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn concurrency(&self) -> ConcurrencyMode {
        self.concurrency
    }

    pub fn bucket_store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    /// Reads the document. `None` when it does not exist or cannot be read for
    /// lack of permission; malformed JSON is an error.
    pub async fn get(&self, source: SourceRef<'_>) -> Result<Option<MetadataDocument>> {
        match self.load(source).await {
            Ok(snapshot) => Ok(snapshot.document),
            Err(PipelineError::Bucket(BucketError::Forbidden(key))) => {
                warn!(key = %key, "metadata document is forbidden; state cannot be determined");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn update(&self, source: SourceRef<'_>, window: WindowUpdate<'_>) -> Result<()> {
        self.update_with_custom_values(source, window, None).await
    }

    /// Like [`update`](Self::update), also replacing `custom_values` on the window
    /// when a non-empty map is given.
    pub async fn update_with_custom_values(
        &self,
        source: SourceRef<'_>,
        window: WindowUpdate<'_>,
        custom_values: Option<Map<String, Value>>,
    ) -> Result<()> {
        self.modify(source, |document| {
            let mut document = document.unwrap_or_else(|| {
                debug!(
                    data_source = source.data_source,
                    data_source_type = source.data_source_type,
                    "metadata does not exist, creating a new document"
                );
                MetadataDocument::default()
            });
            let timestamp = utc_timestamp();
            document
                .record_success(
                    window.format,
                    window.market,
                    window.prefix,
                    &timestamp,
                    window.is_yesterday,
                )
                .merge_custom_values(custom_values.clone());
            Some(document)
        })
        .await
    }

    /// Removes the yesterday checkpoint of a window. Nothing is written when the
    /// document, the window or the yesterday keys are absent.
    pub async fn clear_yesterday(
        &self,
        source: SourceRef<'_>,
        market: &str,
        format: &str,
    ) -> Result<()> {
        self.modify(source, |document| {
            let mut document = document?;
            if document.clear_yesterday(format, market) {
                Some(document)
            } else {
                debug!(
                    data_source = source.data_source,
                    data_source_type = source.data_source_type,
                    format,
                    market,
                    "no yesterday checkpoint to remove"
                );
                None
            }
        })
        .await
    }

    async fn load(&self, source: SourceRef<'_>) -> Result<Snapshot> {
        let key = source.key();
        debug!(key = %key, "loading metadata document");

        let object = match self.store.get_object(&key).await {
            Ok(object) => object,
            Err(BucketError::NotFound(_)) => {
                debug!(key = %key, "metadata document does not exist");
                return Ok(Snapshot {
                    document: None,
                    version: None,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let document = MetadataDocument::from_slice(&object.bytes).map_err(|err| {
            if err.is_syntax() || err.is_eof() {
                PipelineError::MalformedDocument { key, source: err }
            } else {
                PipelineError::UnexpectedShape { key, source: err }
            }
        })?;

        Ok(Snapshot {
            document: Some(document),
            version: object.version,
        })
    }

    /// Read-merge-write cycle. `apply` returns `None` when nothing needs writing.
    async fn modify<F>(&self, source: SourceRef<'_>, mut apply: F) -> Result<()>
    where
        F: FnMut(Option<MetadataDocument>) -> Option<MetadataDocument>,
    {
        let key = source.key();
        let max_attempts = self.concurrency.max_attempts();

        for attempt in 1..=max_attempts {
            let snapshot = self
                .load(source)
                .await
                .map_err(|err| warn_if_forbidden(&key, err))?;
            let precondition = match (self.concurrency, &snapshot) {
                (ConcurrencyMode::LastWriterWins, _) => WritePrecondition::None,
                (ConcurrencyMode::Optimistic { .. }, Snapshot { document: None, .. }) => {
                    WritePrecondition::DoesNotExist
                }
                (ConcurrencyMode::Optimistic { .. }, Snapshot { version: Some(version), .. }) => {
                    WritePrecondition::MatchesVersion(version.clone())
                }
                // The backend handed out no version token, so there is nothing to match on.
                (ConcurrencyMode::Optimistic { .. }, Snapshot { version: None, .. }) => {
                    WritePrecondition::None
                }
            };

            let Some(document) = apply(snapshot.document) else {
                return Ok(());
            };

            let body = document.to_pretty_json()?;
            debug!(
                key = %key,
                attempt,
                metadata = %String::from_utf8_lossy(&body),
                "uploading metadata document"
            );

            match self
                .store
                .put_object(&key, Bytes::from(body), JSON_CONTENT_TYPE, precondition)
                .await
                .map_err(|err| warn_if_forbidden(&key, err.into()))?
            {
                WriteOutcome::Written { .. } => return Ok(()),
                WriteOutcome::PreconditionFailed => {
                    debug!(
                        key = %key,
                        attempt,
                        max_attempts,
                        "metadata document changed since read; retrying"
                    );
                }
            }
        }

        Err(PipelineError::Conflict {
            key,
            attempts: max_attempts,
        })
    }
}

fn warn_if_forbidden(key: &str, err: PipelineError) -> PipelineError {
    if let PipelineError::Bucket(BucketError::Forbidden(_)) = &err {
        warn!(key, "access to metadata document forbidden; update not persisted");
    }
    err
}
