//! HTTP object storage adapter.
//!
//! Uploads an artifact with a single `PUT {upload_url}/{prefix}/{millis}_{file}`
//! and returns the matching public link.

use super::{CapabilityResult, Storage};
use crate::config::StorageConfig;
use crate::error::CapabilityError;
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub struct HttpStorage {
    config: StorageConfig,
    client: reqwest::Client,
}

impl HttpStorage {
    /// Build the adapter and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unavailable`] when a configured URL does
    /// not parse or the client cannot be built.
    pub fn new(config: StorageConfig) -> CapabilityResult<Self> {
        for url in [&config.upload_url, &config.public_url] {
            if !url.is_empty() {
                reqwest::Url::parse(url).map_err(|e| {
                    CapabilityError::Unavailable(format!("bad storage url {url:?}: {e}"))
                })?;
            }
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CapabilityError::Unavailable(format!("cannot build http client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Remote object name for `file_name` uploaded at `millis`.
    #[must_use]
    pub fn object_name(&self, file_name: &str, millis: i64) -> String {
        let prefix = self.config.object_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{millis}_{file_name}")
        } else {
            format!("{prefix}/{millis}_{file_name}")
        }
    }

    fn object_url(base: &str, object: &str) -> String {
        let encoded: Vec<String> = object
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", base.trim_end_matches('/'), encoded.join("/"))
    }

    fn public_base(&self) -> &str {
        if self.config.public_url.is_empty() {
            &self.config.upload_url
        } else {
            &self.config.public_url
        }
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn upload(&self, local_path: &Path) -> CapabilityResult<String> {
        if self.config.upload_url.is_empty() {
            return Err(CapabilityError::Unavailable(
                "no storage endpoint configured".into(),
            ));
        }
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CapabilityError::Failed(format!("bad artifact path {}", local_path.display()))
            })?;
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| CapabilityError::Unavailable(format!("cannot read artifact: {e}")))?;

        let object = self.object_name(file_name, Utc::now().timestamp_millis());
        let upload_url = Self::object_url(&self.config.upload_url, &object);
        debug!(url = %upload_url, bytes = bytes.len(), "PUT emergency audio");

        let mut request = self
            .client
            .put(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(bytes);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::Failed(format!("upload request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => CapabilityError::PermissionDenied(format!(
                    "storage rejected credentials ({status})"
                )),
                _ => CapabilityError::Failed(format!("storage returned {status}: {body}")),
            });
        }

        let link = Self::object_url(self.public_base(), &object);
        info!(%link, "artifact stored");
        Ok(link)
    }
}
