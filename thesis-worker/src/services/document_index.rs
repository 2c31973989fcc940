//! Document index client
//!
//! Uploads acquired documents into a named store of the retrieval service that
//! grounds section generation.

use crate::error::ServiceError;
use crate::types::{DocumentIndex, IndexMetadata};
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    indexed: bool,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<serde_json::Value>,
}

/// HTTP document index
pub struct HttpDocumentIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDocumentIndex {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(thesis_common::config::get_user_agent())
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn documents_url(&self, store_id: &str) -> String {
        format!("{}/stores/{}/documents", self.base_url, store_id)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait::async_trait]
impl DocumentIndex for HttpDocumentIndex {
    async fn upload(&self, bytes: &[u8], metadata: &IndexMetadata) -> Result<bool, ServiceError> {
        let body = serde_json::json!({
            "displayName": metadata.display_name,
            "mimeType": metadata.mime_type,
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            "metadata": metadata,
        });

        let response = self
            .authorize(self.client.post(self.documents_url(&metadata.store_id)))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        tracing::debug!(
            store = %metadata.store_id,
            document = %metadata.display_name,
            indexed = parsed.indexed,
            "Index upload finished"
        );
        Ok(parsed.indexed)
    }

    async fn has_documents(&self, store_id: &str) -> Result<bool, ServiceError> {
        let response = self
            .authorize(self.client.get(self.documents_url(store_id)))
            .query(&[("pageSize", "1")])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ListResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;
        Ok(!parsed.documents.is_empty())
    }
}
