//! Google Cloud Storage backend over the JSON API.
//!
//! Processed state is a custom metadata entry on each object. Listing asks
//! for `name` and `metadata` of every item so processed objects are dropped
//! during the same paging walk. Bearer tokens come from `object_store`'s GCP
//! credential chain.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::gcp::{GcpCredentialProvider, GoogleCloudStorageBuilder};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use snafu::prelude::*;
use std::collections::HashMap;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use url::Url;

use crate::config::PROCESSED_MARKER;
use crate::error::{
    CredentialsSnafu, HttpSnafu, InvalidUrlSnafu, NotFoundSnafu, StorageError,
    UnexpectedStatusSnafu,
};

use super::{ObjectReader, StorageProvider};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const LIST_FIELDS: &str = "items(name,metadata),nextPageToken";

/// Settings for a GCS bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsOptions {
    pub bucket: String,
    /// Only objects under this prefix are listed.
    pub prefix: Option<String>,
    pub metadata_key: String,
    /// API endpoint override, e.g. an emulator.
    pub endpoint: Option<String>,
    pub credentials_file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMetadata {
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

fn is_marked_processed(metadata: Option<&HashMap<String, String>>, key: &str) -> bool {
    metadata
        .and_then(|m| m.get(key))
        .is_some_and(|value| value == PROCESSED_MARKER)
}

/// `sleet/<version> (<os>; <arch>)`
pub fn user_agent() -> String {
    format!(
        "sleet/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

pub struct GcsBackend {
    client: Client,
    endpoint: Url,
    options: GcsOptions,
    credentials: GcpCredentialProvider,
}

impl std::fmt::Debug for GcsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GcsBackend<{}>", self.describe())
    }
}

impl GcsBackend {
    /// Resolve credentials from the environment (or the configured service
    /// account file) and connect.
    pub async fn connect(options: GcsOptions) -> Result<Self, StorageError> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&options.bucket);
        if let Some(path) = &options.credentials_file {
            debug!("Constructing GCS credentials from service account file");
            builder = builder.with_service_account_path(path);
        }
        let store = builder.build().context(CredentialsSnafu)?;
        let credentials = store.credentials().clone();

        Self::with_credentials(options, credentials).await
    }

    /// Connect with an explicit credential provider.
    ///
    /// One token is fetched up front so bad credentials fail at startup.
    pub async fn with_credentials(
        options: GcsOptions,
        credentials: GcpCredentialProvider,
    ) -> Result<Self, StorageError> {
        let endpoint_str = options.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let endpoint = Url::parse(endpoint_str)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .context(InvalidUrlSnafu { url: endpoint_str })?;

        let client = Client::builder()
            .user_agent(user_agent())
            .build()
            .context(HttpSnafu)?;

        credentials
            .get_credential()
            .await
            .context(CredentialsSnafu)?;

        Ok(Self {
            client,
            endpoint,
            options,
            credentials,
        })
    }

    /// `{endpoint}/storage/v1/b/{bucket}/o[/{object}]`, each segment encoded.
    fn objects_url(&self, object: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", self.options.bucket.as_str(), "o"])
                .extend(object);
        }
        url
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, StorageError> {
        let credential = self
            .credentials
            .get_credential()
            .await
            .context(CredentialsSnafu)?;
        Ok(request.bearer_auth(&credential.bearer))
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response, StorageError> {
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .context(HttpSnafu)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return NotFoundSnafu { path }.fail();
        }
        let body = response.text().await.unwrap_or_default();
        UnexpectedStatusSnafu {
            status: status.as_u16(),
            path,
            body,
        }
        .fail()
    }

    async fn object_metadata(&self, path: &str) -> Result<HashMap<String, String>, StorageError> {
        let request = self
            .client
            .get(self.objects_url(Some(path)))
            .query(&[("fields", "metadata")]);
        let resource: ObjectMetadata = self
            .send(request, path)
            .await?
            .json()
            .await
            .context(HttpSnafu)?;
        Ok(resource.metadata.unwrap_or_default())
    }
}

#[async_trait]
impl StorageProvider for GcsBackend {
    async fn list_unprocessed(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        let bucket = self.options.bucket.as_str();

        loop {
            let mut request = self
                .client
                .get(self.objects_url(None))
                .query(&[("fields", LIST_FIELDS)]);
            if let Some(prefix) = &self.options.prefix {
                request = request.query(&[("prefix", prefix)]);
            }
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: ObjectList = self
                .send(request, bucket)
                .await?
                .json()
                .await
                .context(HttpSnafu)?;

            names.extend(
                page.items
                    .into_iter()
                    .filter(|item| {
                        !is_marked_processed(item.metadata.as_ref(), &self.options.metadata_key)
                    })
                    .map(|item| item.name),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }

    async fn read(&self, path: &str) -> Result<ObjectReader, StorageError> {
        let request = self
            .client
            .get(self.objects_url(Some(path)))
            .query(&[("alt", "media")]);
        let response = self.send(request, path).await?;

        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let request = self.client.delete(self.objects_url(Some(path)));
        self.send(request, path).await?;
        Ok(())
    }

    /// Any failure counts as processed so a flaky lookup never causes a
    /// duplicate ingest.
    async fn was_processed(&self, path: &str) -> Result<bool, StorageError> {
        match self.object_metadata(path).await {
            Ok(metadata) => Ok(is_marked_processed(
                Some(&metadata),
                &self.options.metadata_key,
            )),
            Err(e) => {
                warn!(path, error = %e, "Could not read object metadata, treating it as processed");
                Ok(true)
            }
        }
    }

    async fn mark_processed(&self, path: &str) -> Result<(), StorageError> {
        let mut metadata = self.object_metadata(path).await?;
        metadata.insert(
            self.options.metadata_key.clone(),
            PROCESSED_MARKER.to_string(),
        );

        let request = self
            .client
            .patch(self.objects_url(Some(path)))
            .json(&json!({ "metadata": metadata }));
        self.send(request, path).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.options.prefix {
            Some(prefix) => format!("gs://{}/{}", self.options.bucket, prefix),
            None => format!("gs://{}", self.options.bucket),
        }
    }
}
