//! Server-native backend adapter
//!
//! Talks to the library's own metadata/file server over HTTPS. Attachment
//! content lives under the owning library, addressed by attachment key;
//! version tokens are the server's content hashes. Pushes are conditional
//! writes so a remote update between classify and push surfaces as a
//! conflict instead of silently clobbering.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::attachment::AttachmentRecord;

use super::{CancelFlag, ProgressFn, TransportError};

/// HTTP client timeout for metadata requests; content transfers carry
/// their own deadline at the coordinator level
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response header carrying the content version observed at fetch start
const VERSION_HEADER: &str = "x-content-version";

/// Attachment file metadata as returned by the server
#[derive(Debug, Deserialize)]
struct RemoteFileInfo {
    version: String,
}

/// Server-native transport
pub struct ServerTransport {
    http: Client,
    base_url: String,
    api_key: String,
}

impl ServerTransport {
    /// Create a transport for the given API root and key
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TransportError::from_reqwest)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn file_url(&self, record: &AttachmentRecord) -> String {
        format!(
            "{}/libraries/{}/attachments/{}/file",
            self.base_url,
            record.library_id,
            urlencoding::encode(record.key.as_str())
        )
    }

    fn info_url(&self, record: &AttachmentRecord) -> String {
        format!(
            "{}/libraries/{}/attachments/{}/file/info",
            self.base_url,
            record.library_id,
            urlencoding::encode(record.key.as_str())
        )
    }

    pub async fn probe_remote_version(
        &self,
        record: &AttachmentRecord,
    ) -> Result<Option<String>, TransportError> {
        let url = self.info_url(record);
        debug!(key = %record.key, url = %url, "Probing server file version");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let info: RemoteFileInfo = response
                    .json()
                    .await
                    .map_err(TransportError::from_reqwest)?;
                Ok(Some(info.version))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::from_status(status.as_u16(), &body))
            }
        }
    }

    pub async fn fetch(
        &self,
        record: &AttachmentRecord,
        dest: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancelFlag,
    ) -> Result<String, TransportError> {
        let url = self.file_url(record);
        debug!(key = %record.key, url = %url, "Downloading attachment from server");

        let mut response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, &body));
        }

        let version = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::Network("server response missing content version".to_string())
            })?;

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(TransportError::from_reqwest)?
        {
            cancel.check()?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress(written, total);
        }
        file.flush().await?;

        info!(key = %record.key, size = written, version = %version, "Downloaded attachment from server");
        Ok(version)
    }

    pub async fn push(
        &self,
        record: &AttachmentRecord,
        local_path: &Path,
        expected_version: Option<&str>,
    ) -> Result<String, TransportError> {
        let url = self.file_url(record);
        let body = tokio::fs::read(local_path).await?;
        let size = body.len();

        debug!(key = %record.key, size = size, expected = ?expected_version, "Uploading attachment to server");

        let mut request = self
            .http
            .put(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", record.content_type.clone())
            .body(body);

        // Conditional write: the server rejects with 412 when the remote
        // version moved since we last saw it
        if let Some(expected) = expected_version {
            request = request.header("If-Match", expected);
        }

        let response = request.send().await.map_err(TransportError::from_reqwest)?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => {
                let actual = response.text().await.unwrap_or_default();
                Err(TransportError::Conflict {
                    expected: expected_version.unwrap_or("<none>").to_string(),
                    actual,
                })
            }
            status if status.is_success() => {
                let info: RemoteFileInfo = response
                    .json()
                    .await
                    .map_err(TransportError::from_reqwest)?;
                info!(key = %record.key, size = size, version = %info.version, "Uploaded attachment to server");
                Ok(info.version)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::from_status(status.as_u16(), &body))
            }
        }
    }
}
