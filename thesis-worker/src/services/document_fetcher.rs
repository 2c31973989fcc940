//! Full-text download over HTTP

use crate::error::ServiceError;
use crate::types::DocumentFetcher;
use reqwest::Client;
use std::time::Duration;

/// HTTP document fetcher
///
/// Refuses bodies larger than `max_bytes` before reading them when the server
/// sends a Content-Length.
pub struct HttpDocumentFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpDocumentFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(thesis_common::config::get_user_agent())
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/pdf,*/*;q=0.8")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: format!("download of {} failed", url),
            });
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(ServiceError::InvalidInput(format!(
                    "document is {} bytes, limit {}",
                    len, self.max_bytes
                )));
            }
        }

        let bytes = response.bytes().await?;
        tracing::debug!(url, bytes = bytes.len(), "Document downloaded");
        Ok(bytes.to_vec())
    }
}
