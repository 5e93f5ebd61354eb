use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use crate::{
    BucketError, BucketStore, ObjectMeta, VersionedObject, WriteOutcome, WritePrecondition,
};

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            force_path_style: false,
        }
    }
}

/// S3-compatible store. The ETag doubles as the version token for conditional writes.
#[derive(Clone)]
pub struct S3BucketStore {
    client: Client,
    bucket: String,
}

impl S3BucketStore {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        if config.bucket.is_empty() {
            return Err(BucketError::Configuration(
                "bucket name cannot be empty".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                config.session_token.clone(),
                None,
                "static",
            );
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response()
        .map(|response| response.status().as_u16())
}

fn classify<E>(err: SdkError<E, HttpResponse>, key: &str) -> BucketError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match status_of(&err) {
        Some(404) => BucketError::NotFound(key.to_string()),
        Some(403) => BucketError::Forbidden(key.to_string()),
        _ => BucketError::from_sdk(DisplayErrorContext(&err)),
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    async fn get_object(&self, key: &str) -> Result<VersionedObject, BucketError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(err, key))?;

        let version = output.e_tag().map(str::to_string);
        let data = output.body.collect().await.map_err(BucketError::from_sdk)?;
        Ok(VersionedObject {
            bytes: data.into_bytes(),
            version,
        })
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<WriteOutcome, BucketError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type);

        request = match precondition {
            WritePrecondition::None => request,
            WritePrecondition::DoesNotExist => request.if_none_match("*"),
            WritePrecondition::MatchesVersion(etag) => request.if_match(etag),
        };

        match request.send().await {
            Ok(output) => Ok(WriteOutcome::Written {
                version: output.e_tag().map(str::to_string),
            }),
            // 409 is returned when a concurrent conditional write to the same key is in flight.
            Err(err) if matches!(status_of(&err), Some(412) | Some(409)) => {
                debug!(key, "conditional put rejected by precondition");
                Ok(WriteOutcome::PreconditionFailed)
            }
            Err(err) => Err(classify(err, key)),
        }
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, BucketError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: output.content_length().unwrap_or_default().max(0) as u64,
                version: output.e_tag().map(str::to_string),
            })),
            Err(err) => match classify(err, key) {
                BucketError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(err, key))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, BucketError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| classify(err, prefix))?;
            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                objects.push(ObjectMeta {
                    key: key.to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                    version: object.e_tag().map(str::to_string),
                });
            }
        }

        Ok(objects)
    }
}
