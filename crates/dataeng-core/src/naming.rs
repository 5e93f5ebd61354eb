//! Deterministic resource names and storage path layout for ingestion pipelines.
//!
//! Bucket names are derived by hashing business identifiers, so every process
//! computes the same name without a registry. Staging dataset ids are the one
//! exception: they are random, disposable scratch namespaces.

use std::fmt;

use sha1::{Digest, Sha1};
use uuid::Uuid;

pub const DOMAIN_NAME: &str = "dataeng.com";
pub const DAGS_BUCKET_PREFIX: &str = "composer";
pub const DATAFLOW_BUCKET_PREFIX: &str = "dataflow";
pub const TEST_BUCKET_PREFIX: &str = "test";
pub const DAGS_PREFIX: &str = "dags";

/// Placeholder for an unset partition component.
pub const UNSET: &str = "_";

const HASH_LEN: usize = 10;

/// Bucket receiving raw ingested data for an organisation's business group.
///
/// `org_name` and `group_name` are lower-cased before hashing; `project_id` is hashed as given.
pub fn ingestion_bucket_name(project_id: &str, org_name: &str, group_name: &str) -> String {
    let text = format!(
        "{project_id}{}{}",
        org_name.to_lowercase(),
        group_name.to_lowercase()
    );
    bucket_name(None, &text)
}

/// Bucket holding modeled output of one repository.
pub fn modeling_bucket_name(
    project_id: &str,
    org_name: &str,
    group_name: &str,
    repo_name: &str,
) -> String {
    let text = format!(
        "{project_id}{}{}{}",
        org_name.to_lowercase(),
        group_name.to_lowercase(),
        repo_name.to_lowercase()
    );
    bucket_name(None, &text)
}

pub fn dags_bucket_name(project_id: &str) -> String {
    bucket_name(Some(DAGS_BUCKET_PREFIX), project_id)
}

pub fn dataflow_bucket_name(project_id: &str) -> String {
    bucket_name(Some(DATAFLOW_BUCKET_PREFIX), project_id)
}

pub fn test_bucket_name(project_id: &str) -> String {
    bucket_name(Some(TEST_BUCKET_PREFIX), project_id)
}

pub fn dags_location(dags_bucket_name: &str) -> String {
    format!("gs://{dags_bucket_name}/{DAGS_PREFIX}")
}

fn bucket_name(prefix: Option<&str>, text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let hashed = &digest[..HASH_LEN];

    match prefix {
        Some(prefix) => format!("{prefix}-{hashed}.{DOMAIN_NAME}"),
        None => format!("{hashed}.{DOMAIN_NAME}"),
    }
}

/// Hierarchical prefix `{source}/{type}/{location}/{Y}/{M}/{D}/{h}/{m}/{s}/{format}/`.
///
/// Unset components render as `_`. Set components are zero-padded (year to four
/// digits, the rest to two) but otherwise taken verbatim: no calendar validation.
///
/// ```
/// use dataeng_core::naming::PartitionPrefix;
///
/// let prefix = PartitionPrefix::new("gfk", "matched_report", "csv")
///     .year("2018")
///     .month(1)
///     .day("31")
///     .build();
/// assert_eq!(prefix, "gfk/matched_report/_/2018/01/31/_/_/_/csv/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPrefix {
    data_source: String,
    data_source_type: String,
    format: String,
    location: String,
    year: String,
    month: String,
    day: String,
    hour: String,
    minute: String,
    second: String,
}

impl PartitionPrefix {
    pub fn new(
        data_source: impl Into<String>,
        data_source_type: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            data_source_type: data_source_type.into(),
            format: format.into(),
            location: UNSET.to_string(),
            year: UNSET.to_string(),
            month: UNSET.to_string(),
            day: UNSET.to_string(),
            hour: UNSET.to_string(),
            minute: UNSET.to_string(),
            second: UNSET.to_string(),
        }
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn year(mut self, year: impl ToString) -> Self {
        self.year = year.to_string();
        self
    }

    pub fn month(mut self, month: impl ToString) -> Self {
        self.month = month.to_string();
        self
    }

    pub fn day(mut self, day: impl ToString) -> Self {
        self.day = day.to_string();
        self
    }

    pub fn hour(mut self, hour: impl ToString) -> Self {
        self.hour = hour.to_string();
        self
    }

    pub fn minute(mut self, minute: impl ToString) -> Self {
        self.minute = minute.to_string();
        self
    }

    pub fn second(mut self, second: impl ToString) -> Self {
        self.second = second.to_string();
        self
    }

    pub fn build(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PartitionPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}/{}/{}/{}/{}/",
            self.data_source,
            self.data_source_type,
            self.location,
            zero_fill(&self.year, 4),
            zero_fill(&self.month, 2),
            zero_fill(&self.day, 2),
            zero_fill(&self.hour, 2),
            zero_fill(&self.minute, 2),
            zero_fill(&self.second, 2),
            self.format,
        )
    }
}

/// Left-pads with zeros to `width` characters, keeping a leading sign in front.
fn zero_fill(value: &str, width: usize) -> String {
    let len = value.chars().count();
    if value == UNSET || len >= width {
        return value.to_string();
    }

    let padding = "0".repeat(width - len);
    match value.chars().next() {
        Some(sign @ ('+' | '-')) => format!("{sign}{padding}{}", &value[1..]),
        _ => format!("{padding}{value}"),
    }
}

/// Fresh staging dataset id: `staging_{source}_{type}_{uuid with underscores}`.
///
/// Characters other than alphanumerics and `_` become `_`, then surrounding `_` are
/// trimmed from each part. Every call returns a different id.
pub fn staging_dataset_id(data_source: &str, data_source_type: &str) -> String {
    let suffix = Uuid::new_v4().to_string().replace('-', "_");
    format!(
        "staging_{}_{}_{suffix}",
        sanitize_identifier(data_source),
        sanitize_identifier(data_source_type)
    )
}

fn sanitize_identifier(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

pub fn success_file_location(data_source: &str, data_source_type: &str) -> String {
    format!("{data_source}/{data_source_type}/_SUCCESS")
}

pub fn metadata_key(data_source: &str, data_source_type: &str) -> String {
    format!("{data_source}/{data_source_type}/metadata.json")
}
