//! Attachment fetching
//!
//! Reads text attachments from their CDN URLs with a bounded client.
//! Fetch failures are the caller's decision to tolerate; this layer only
//! categorizes them.

use std::time::Duration;

use url::Url;

use crate::error::{GatewayError, Result};

pub struct AttachmentFetcher {
    http: reqwest::Client,
}

impl AttachmentFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("lingo-gateway/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(GatewayError::from)?;

        Ok(Self { http })
    }

    /// Reads a raw text file from a URL.
    pub async fn read_text(&self, file_url: &str) -> Result<String> {
        let url = normalize_url(file_url)?;
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::UpstreamHttp {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.text().await?)
    }
}

/// Parses and re-encodes the URL so paths with spaces or non-ASCII
/// characters (file names are often Korean) reach the CDN intact.
fn normalize_url(file_url: &str) -> Result<Url> {
    Url::parse(file_url)
        .map_err(|e| GatewayError::Validation(format!("Invalid attachment URL: {e}")))
}
