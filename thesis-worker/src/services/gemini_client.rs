//! Gemini text generation client (`generateContent`)

use crate::error::ServiceError;
use crate::types::{GenerationRequest, TextGenerator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    /// File search store used for grounded requests
    file_search_store: Option<String>,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        file_search_store: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(thesis_common::config::get_user_agent())
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            file_search_store,
        })
    }

    fn build_body(&self, request: &GenerationRequest) -> GenerateContentRequest {
        let text = match &request.context {
            Some(context) if !context.is_empty() => {
                format!("{}\n\n---\nContext:\n{}", request.prompt, context)
            }
            _ => request.prompt.clone(),
        };

        let tools = match (&self.file_search_store, request.grounded) {
            (Some(store), true) => vec![serde_json::json!({
                "fileSearch": { "fileSearchStoreNames": [store] }
            })],
            _ => Vec::new(),
        };

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(text) }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: TEMPERATURE,
            },
            tools,
        }
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError> {
        let url = format!("{}/models/{}:generateContent", BASE_URL, self.model);
        let body = self.build_body(&request);

        tracing::debug!(
            task = ?request.task,
            prompt_chars = request.prompt.len(),
            grounded = request.grounded,
            "Calling Gemini"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Parse("response has no candidates".to_string()))?;

        if let Some(reason) = &candidate.finish_reason {
            if reason != "STOP" {
                tracing::debug!(task = ?request.task, finish_reason = %reason, "Generation stopped early");
            }
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationTask;

    #[test]
    fn test_grounded_request_adds_tool() {
        let client = GeminiClient::new(
            "key".into(),
            None,
            Some("stores/abc".into()),
            Duration::from_secs(5),
        )
        .unwrap();

        let plain = GenerationRequest::new(GenerationTask::Summary, "hi", 100);
        assert!(client.build_body(&plain).tools.is_empty());

        let grounded = GenerationRequest::new(GenerationTask::Section, "hi", 100)
            .with_context("digest")
            .grounded();
        let body = client.build_body(&grounded);
        assert_eq!(body.tools.len(), 1);
        let text = body.contents[0].parts[0].text.as_deref().unwrap();
        assert!(text.ends_with("digest"));
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]},"finishReason":"STOP"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let text: String = parsed.candidates[0]
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .filter_map(|p| p.text.clone())
            .collect();
        assert_eq!(text, "Hello world");
    }
}
