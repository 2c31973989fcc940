//! OpenAlex works search
//!
//! Searches open-access works and maps them to `ReferenceRecord`s. Works without
//! a title are dropped; the open-access PDF location becomes `document_url`.

use crate::error::ServiceError;
use crate::models::ReferenceRecord;
use crate::types::ReferenceSearch;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openalex.org";
const RESULTS_PER_QUERY: u32 = 25;

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    publication_year: Option<i32>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    #[serde(default)]
    open_access: Option<OpenAccess>,
    #[serde(default)]
    best_oa_location: Option<Location>,
    #[serde(default)]
    primary_location: Option<Location>,
    #[serde(default)]
    abstract_inverted_index: Option<BTreeMap<String, Vec<usize>>>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    author: Author,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccess {
    #[serde(default)]
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    source: Option<Source>,
}

#[derive(Debug, Deserialize)]
struct Source {
    #[serde(default)]
    display_name: Option<String>,
}

impl Work {
    fn into_record(self) -> Option<ReferenceRecord> {
        let title = self
            .title
            .or(self.display_name)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())?;

        let authors = self
            .authorships
            .into_iter()
            .filter_map(|a| a.author.display_name)
            .collect();

        let document_url = self
            .best_oa_location
            .as_ref()
            .and_then(|l| l.pdf_url.clone())
            .or_else(|| self.primary_location.as_ref().and_then(|l| l.pdf_url.clone()))
            .or_else(|| self.open_access.and_then(|oa| oa.oa_url));

        let journal = self
            .primary_location
            .and_then(|l| l.source)
            .and_then(|s| s.display_name);

        let mut record = ReferenceRecord::new(title, authors, self.publication_year);
        if let Some(doi) = self.doi.filter(|d| !d.trim().is_empty()) {
            record = record.with_doi(doi);
        }
        record.document_url = document_url;
        record.journal = journal;
        record.abstract_text = self.abstract_inverted_index.map(|idx| rebuild_abstract(&idx));
        Some(record)
    }
}

/// OpenAlex ships abstracts as word → positions; put the words back in order
fn rebuild_abstract(index: &BTreeMap<String, Vec<usize>>) -> String {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    positioned.sort_by_key(|(p, _)| *p);
    positioned
        .into_iter()
        .map(|(_, w)| w)
        .collect::<Vec<_>>()
        .join(" ")
}

/// OpenAlex API client
pub struct OpenAlexClient {
    client: Client,
    base_url: String,
    /// Contact address for the polite pool
    mailto: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl OpenAlexClient {
    pub fn new(
        base_url: Option<String>,
        mailto: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(thesis_common::config::get_user_agent())
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        // 10 requests per second is the documented limit
        let rate_limiter = RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
        ));

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            mailto,
            rate_limiter,
        })
    }
}

#[async_trait::async_trait]
impl ReferenceSearch for OpenAlexClient {
    fn name(&self) -> &'static str {
        "OpenAlex"
    }

    async fn search(
        &self,
        query: &str,
        language: &str,
    ) -> Result<Vec<ReferenceRecord>, ServiceError> {
        self.rate_limiter.until_ready().await;

        let mut filter = "is_oa:true".to_string();
        let lang = language.trim().to_lowercase();
        if lang.len() == 2 {
            filter.push_str(&format!(",language:{}", lang));
        }

        let per_page = RESULTS_PER_QUERY.to_string();
        let mut params = vec![
            ("search", query),
            ("filter", filter.as_str()),
            ("per-page", per_page.as_str()),
        ];
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.as_str()));
        }

        tracing::debug!(query, "Searching OpenAlex");

        let response = self
            .client
            .get(format!("{}/works", self.base_url))
            .query(&params)
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

        let body: WorksResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let records: Vec<ReferenceRecord> =
            body.results.into_iter().filter_map(Work::into_record).collect();

        tracing::debug!(query, results = records.len(), "OpenAlex search complete");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_mapping() {
        let json = r#"{
            "results": [{
                "display_name": "Remote Work and Productivity",
                "doi": "https://doi.org/10.1000/xyz",
                "publication_year": 2021,
                "authorships": [{"author": {"display_name": "Jana Müller"}}],
                "best_oa_location": {"pdf_url": "https://example.org/a.pdf"},
                "primary_location": {"source": {"display_name": "Journal of Work"}},
                "abstract_inverted_index": {"Remote": [0], "work": [1], "matters": [2]}
            }, {
                "display_name": "   "
            }]
        }"#;
        let body: WorksResponse = serde_json::from_str(json).unwrap();
        let records: Vec<_> = body.results.into_iter().filter_map(Work::into_record).collect();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.dedup_key(), "10.1000/xyz");
        assert_eq!(r.document_url.as_deref(), Some("https://example.org/a.pdf"));
        assert_eq!(r.journal.as_deref(), Some("Journal of Work"));
        assert_eq!(r.abstract_text.as_deref(), Some("Remote work matters"));
    }
}
