//! WebDAV backend adapter
//!
//! Stores each attachment as a single resource under a user-configured
//! share, named by attachment key so renames on the item side do not
//! orphan content. ETags serve as version tokens; conditional PUTs turn
//! concurrent remote edits into conflicts.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::attachment::AttachmentRecord;

use super::{CancelFlag, ProgressFn, TransportError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// WebDAV transport with basic-auth credentials
pub struct WebdavTransport {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl WebdavTransport {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TransportError::from_reqwest)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn resource_url(&self, record: &AttachmentRecord) -> String {
        // Keyed by attachment identity, not filename, so two attachments
        // sharing "paper.pdf" never collide on the share
        format!(
            "{}/{}.bin",
            self.base_url,
            urlencoding::encode(record.key.as_str())
        )
    }

    fn etag_of(response: &reqwest::Response) -> Option<String> {
        response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string())
    }

    pub async fn probe_remote_version(
        &self,
        record: &AttachmentRecord,
    ) -> Result<Option<String>, TransportError> {
        let url = self.resource_url(record);
        debug!(key = %record.key, url = %url, "Probing WebDAV resource");

        let response = self
            .http
            .head(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => match Self::etag_of(&response) {
                Some(etag) => Ok(Some(etag)),
                None => Err(TransportError::Network(
                    "WebDAV server returned no ETag".to_string(),
                )),
            },
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
        let url = self.resource_url(record);
        debug!(key = %record.key, url = %url, "Downloading attachment from WebDAV");

        let mut response = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, &body));
        }

        let etag = Self::etag_of(&response).ok_or_else(|| {
            TransportError::Network("WebDAV server returned no ETag".to_string())
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

        info!(key = %record.key, size = written, etag = %etag, "Downloaded attachment from WebDAV");
        Ok(etag)
    }

    pub async fn push(
        &self,
        record: &AttachmentRecord,
        local_path: &Path,
        expected_version: Option<&str>,
    ) -> Result<String, TransportError> {
        let url = self.resource_url(record);
        let body = tokio::fs::read(local_path).await?;

        debug!(key = %record.key, size = body.len(), expected = ?expected_version, "Uploading attachment to WebDAV");

        let mut request = self
            .http
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .body(body);

        if let Some(expected) = expected_version {
            request = request.header("If-Match", format!("\"{}\"", expected));
        }

        let response = request.send().await.map_err(TransportError::from_reqwest)?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => {
                // Re-probe to report what the remote actually holds
                let actual = self
                    .probe_remote_version(record)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "<unknown>".to_string());
                Err(TransportError::Conflict {
                    expected: expected_version.unwrap_or("<none>").to_string(),
                    actual,
                })
            }
            status if status.is_success() => {
                // Servers that omit the ETag on PUT get a follow-up probe
                let etag = match Self::etag_of(&response) {
                    Some(etag) => etag,
                    None => self.probe_remote_version(record).await?.ok_or_else(|| {
                        TransportError::Network(
                            "WebDAV resource vanished after upload".to_string(),
                        )
                    })?,
                };
                info!(key = %record.key, etag = %etag, "Uploaded attachment to WebDAV");
                Ok(etag)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::from_status(status.as_u16(), &body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{AttachmentKey, LinkMode};

    #[test]
    fn resources_are_keyed_by_attachment_identity() {
        let transport =
            WebdavTransport::new("https://dav.example.org/refs/", "user", "pass").unwrap();
        let rec = AttachmentRecord {
            key: AttachmentKey::from("KEY 1"),
            library_id: 7,
            link_mode: LinkMode::ImportedFile,
            content_type: "application/pdf".to_string(),
            filename: "paper.pdf".to_string(),
            charset: None,
            url: None,
            size_bytes: 0,
            server_version: None,
        };
        assert_eq!(
            transport.resource_url(&rec),
            "https://dav.example.org/refs/KEY%201.bin"
        );
    }
}
