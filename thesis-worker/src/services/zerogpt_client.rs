//! ZeroGPT detector client (RapidAPI)
//!
//! Scores are the human-written percentage. Without an API key the client
//! reports `ServiceError::Unavailable` so the style loop passes content through.

use crate::error::ServiceError;
use crate::types::{DetectabilityReport, DetectabilityScorer, FlaggedSpan};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const API_URL: &str = "https://zerogpt.p.rapidapi.com/api/v1/detectText";
const API_HOST: &str = "zerogpt.p.rapidapi.com";

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<DetectData>,
    #[serde(default, rename = "fakePercentage")]
    fake_percentage: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectData {
    #[serde(default)]
    is_human_written: Option<f64>,
    #[serde(default)]
    is_gpt_generated: Option<f64>,
    /// Sentences highlighted as machine-written
    #[serde(default)]
    h: Vec<String>,
}

impl DetectResponse {
    fn into_report(self) -> Result<DetectabilityReport, ServiceError> {
        match self.data {
            Some(data) if self.success => {
                let score = data
                    .is_human_written
                    .or_else(|| data.is_gpt_generated.map(|g| 100.0 - g))
                    .ok_or_else(|| ServiceError::Parse("no score in detector response".into()))?;
                // Highlighted sentences get the score of the whole text
                let flagged_spans = data
                    .h
                    .into_iter()
                    .filter(|s| !s.trim().is_empty())
                    .map(|text| FlaggedSpan { text, score })
                    .collect();
                Ok(DetectabilityReport {
                    score: score.clamp(0.0, 100.0),
                    flagged_spans,
                })
            }
            _ => match self.fake_percentage {
                Some(fake) => Ok(DetectabilityReport {
                    score: (100.0 - fake).clamp(0.0, 100.0),
                    flagged_spans: Vec::new(),
                }),
                None => Err(ServiceError::Parse(
                    self.message
                        .unwrap_or_else(|| "unrecognized detector response".to_string()),
                )),
            },
        }
    }
}

/// ZeroGPT client
pub struct ZeroGptClient {
    client: Client,
    api_key: Option<String>,
}

impl ZeroGptClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(thesis_common::config::get_user_agent())
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self { client, api_key })
    }
}

#[async_trait::async_trait]
impl DetectabilityScorer for ZeroGptClient {
    async fn score(&self, text: &str) -> Result<DetectabilityReport, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::Unavailable("detector API key not configured".into()))?;

        let response = self
            .client
            .post(API_URL)
            .header("X-RapidAPI-Key", api_key)
            .header("X-RapidAPI-Host", API_HOST)
            .json(&serde_json::json!({ "input_text": text }))
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

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let report = parsed.into_report()?;
        tracing::debug!(
            chars = text.len(),
            score = report.score,
            flagged = report.flagged_spans.len(),
            "Detector scored text"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rapidapi_format() {
        let json = r#"{"success":true,"data":{"is_human_written":62.5,"is_gpt_generated":37.5,"h":["Flagged one.",""]}}"#;
        let report = serde_json::from_str::<DetectResponse>(json)
            .unwrap()
            .into_report()
            .unwrap();
        assert_eq!(report.score, 62.5);
        assert_eq!(report.flagged_spans.len(), 1);
    }

    #[test]
    fn test_legacy_format() {
        let json = r#"{"fakePercentage": 20}"#;
        let report = serde_json::from_str::<DetectResponse>(json)
            .unwrap()
            .into_report()
            .unwrap();
        assert_eq!(report.score, 80.0);
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let client = ZeroGptClient::new(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.score("text").await,
            Err(ServiceError::Unavailable(_))
        ));
    }
}
