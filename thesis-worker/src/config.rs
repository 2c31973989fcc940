//! Configuration resolution for the thesis worker
//!
//! Two concerns live here:
//! - `WorkerConfig`: pipeline tuning constants, read from the `[pipeline]` TOML table
//! - API key resolution with Database → ENV → TOML priority

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use thesis_common::config::TomlConfig;
use thesis_common::{Error, Result};
use tracing::{info, warn};

/// Pipeline tuning constants
///
/// Every threshold is configuration; the defaults are the values the pipeline
/// was tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    // Acquisition
    pub acquisition_workers: usize,
    pub sources_per_1000_words: f64,
    pub min_sources: usize,
    pub max_sources: usize,
    pub min_sources_per_chapter: usize,
    pub replacement_relevance_floor: f64,
    pub default_relevance_score: f64,
    pub min_document_bytes: usize,
    pub max_document_bytes: usize,
    pub bytes_per_page_estimate: usize,

    // Service calls
    pub fetch_timeout_secs: u64,
    pub service_timeout_secs: u64,
    pub max_service_attempts: u32,

    // Generation
    pub generation_attempts: usize,
    pub min_word_ratio: f64,
    pub max_word_ratio: f64,
    pub rolling_context_chars: usize,
    pub upcoming_preview_count: usize,
    pub words_per_page: usize,

    // Repair
    pub repair_iterations: usize,
    pub repair_concurrency: usize,
    pub min_quote_chars: usize,
    pub patch_safety_ratio: f64,
    pub fuzzy_anchor_chars: usize,

    // Style convergence
    pub min_human_score: f64,
    pub style_iterations: usize,
    pub spans_per_iteration: usize,
    pub detector_chunk_chars: usize,
    pub iteration_pause_ms: u64,

    // Scheduling
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            acquisition_workers: 5,
            sources_per_1000_words: 3.0,
            min_sources: 5,
            max_sources: 40,
            min_sources_per_chapter: 1,
            replacement_relevance_floor: 30.0,
            default_relevance_score: 50.0,
            min_document_bytes: 10 * 1024,
            max_document_bytes: 50 * 1024 * 1024,
            bytes_per_page_estimate: 60_000,
            fetch_timeout_secs: 30,
            service_timeout_secs: 120,
            max_service_attempts: 3,
            generation_attempts: 3,
            min_word_ratio: 0.9,
            max_word_ratio: 1.1,
            rolling_context_chars: 6_000,
            upcoming_preview_count: 5,
            words_per_page: 300,
            repair_iterations: 3,
            repair_concurrency: 4,
            min_quote_chars: 30,
            patch_safety_ratio: 0.5,
            fuzzy_anchor_chars: 40,
            min_human_score: 70.0,
            style_iterations: 5,
            spans_per_iteration: 6,
            detector_chunk_chars: 12_000,
            iteration_pause_ms: 1_000,
            max_concurrent_jobs: 1,
        }
    }
}

impl WorkerConfig {
    /// Build from the optional `[pipeline]` table; missing keys keep defaults
    pub fn from_toml(toml_config: &TomlConfig) -> Result<Self> {
        let config = match &toml_config.pipeline {
            Some(table) => toml::Value::Table(table.clone())
                .try_into::<WorkerConfig>()
                .map_err(|e| Error::Config(format!("Invalid [pipeline] table: {}", e)))?,
            None => WorkerConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or invert the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.acquisition_workers == 0 || self.repair_concurrency == 0 {
            return Err(Error::Config(
                "acquisition_workers and repair_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Config("max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.min_sources > self.max_sources {
            return Err(Error::Config(format!(
                "min_sources ({}) exceeds max_sources ({})",
                self.min_sources, self.max_sources
            )));
        }
        if self.min_document_bytes >= self.max_document_bytes {
            return Err(Error::Config(
                "min_document_bytes must be below max_document_bytes".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.patch_safety_ratio) {
            return Err(Error::Config(format!(
                "patch_safety_ratio must be within 0..=1, got {}",
                self.patch_safety_ratio
            )));
        }
        if self.min_word_ratio > self.max_word_ratio {
            return Err(Error::Config(
                "min_word_ratio must not exceed max_word_ratio".to_string(),
            ));
        }
        if self.generation_attempts == 0 || self.max_service_attempts == 0 {
            return Err(Error::Config(
                "generation_attempts and max_service_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Acquisition target T for a document of `target_words`
    pub fn source_target(&self, target_words: usize) -> usize {
        let wanted = (target_words as f64 / 1000.0 * self.sources_per_1000_words).ceil() as usize;
        wanted.clamp(self.min_sources, self.max_sources)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    pub fn iteration_pause(&self) -> Duration {
        Duration::from_millis(self.iteration_pause_ms)
    }
}

/// API keys the worker needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyKind {
    Generation,
    Detector,
}

impl ApiKeyKind {
    /// Key in the `settings` table
    pub fn setting_key(&self) -> &'static str {
        match self {
            ApiKeyKind::Generation => "generation_api_key",
            ApiKeyKind::Detector => "detector_api_key",
        }
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            ApiKeyKind::Generation => "THESIS_GENERATION_API_KEY",
            ApiKeyKind::Detector => "THESIS_DETECTOR_API_KEY",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiKeyKind::Generation => "Generation",
            ApiKeyKind::Detector => "Detector",
        }
    }

    fn toml_value<'a>(&self, toml_config: &'a TomlConfig) -> Option<&'a String> {
        match self {
            ApiKeyKind::Generation => toml_config.generation_api_key.as_ref(),
            ApiKeyKind::Detector => toml_config.detector_api_key.as_ref(),
        }
    }
}

/// Resolve an API key from the 3-tier configuration
///
/// **Priority:** Database → ENV → TOML. Returns `None` when no tier has a
/// usable key; callers decide whether that disables a service or is fatal.
pub async fn resolve_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
    kind: ApiKeyKind,
) -> Result<Option<String>> {
    let db_key = crate::db::settings::get_setting::<String>(db, kind.setting_key())
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(kind.env_var()).ok().filter(|k| is_valid_key(k));
    let toml_key = kind.toml_value(toml_config).filter(|k| is_valid_key(k)).cloned();

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "{} API key found in multiple sources: {}. Using {} (highest priority).",
            kind.label(),
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(source) = sources.first() {
        info!("{} API key loaded from {}", kind.label(), source);
    } else {
        warn!(
            "{} API key not configured (settings table, {} or TOML)",
            kind.label(),
            kind.env_var()
        );
    }

    Ok(db_key.or(env_key).or(toml_key))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_target_clamped() {
        let config = WorkerConfig::default();
        assert_eq!(config.source_target(1_000), 5);
        assert_eq!(config.source_target(10_000), 30);
        assert_eq!(config.source_target(100_000), 40);
    }

    #[test]
    fn test_partial_pipeline_table() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [pipeline]
            acquisition_workers = 8
            min_human_score = 80.0
            "#,
        )
        .unwrap();
        let config = WorkerConfig::from_toml(&toml_config).unwrap();
        assert_eq!(config.acquisition_workers, 8);
        assert_eq!(config.min_human_score, 80.0);
        assert_eq!(config.repair_iterations, 3);
    }

    #[test]
    fn test_invalid_pipeline_values_rejected() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [pipeline]
            patch_safety_ratio = 1.5
            "#,
        )
        .unwrap();
        assert!(WorkerConfig::from_toml(&toml_config).is_err());
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key("   "));
    }
}
