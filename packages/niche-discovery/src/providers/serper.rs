//! Serper.dev search adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{build_client, ensure_success, map_send_error, DEFAULT_TIMEOUT};
use crate::error::{ProviderError, ProviderResult};
use crate::security::SecretString;
use crate::traits::searcher::{SearchHit, SearchPage, SearchProvider};

const SERPER_API_URL: &str = "https://google.serper.dev/search";
const PROVIDER: &str = "serper";

/// Published price per search call (USD).
pub const SERPER_COST_PER_SEARCH: f64 = 0.004;

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    gl: &'a str,
    hl: &'a str,
    num: u32,
    page: u32,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    position: Option<u32>,
}

/// Google SERP search through Serper.dev.
///
/// Defaults to Spanish results (`gl=es`, `hl=es`), 10 results per page.
pub struct SerperSearcher {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    country: String,
    language: String,
    timeout: Duration,
    cost_per_search: f64,
}

impl SerperSearcher {
    pub fn new(api_key: impl Into<String>) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(PROVIDER, DEFAULT_TIMEOUT)?,
            api_key: SecretString::new(api_key),
            base_url: SERPER_API_URL.to_string(),
            country: "es".to_string(),
            language: "es".to_string(),
            timeout: DEFAULT_TIMEOUT,
            cost_per_search: SERPER_COST_PER_SEARCH,
        })
    }

    /// Create from environment variable `SERPER_API_KEY`.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("SERPER_API_KEY")
            .map_err(|_| ProviderError::not_configured(PROVIDER, "SERPER_API_KEY not set"))?;
        Self::new(api_key)
    }

    pub fn with_locale(mut self, country: impl Into<String>, language: impl Into<String>) -> Self {
        self.country = country.into();
        self.language = language.into();
        self
    }

    /// Point at a different endpoint (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ProviderResult<Self> {
        self.client = build_client(PROVIDER, timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_cost_per_search(mut self, cost: f64) -> Self {
        self.cost_per_search = cost;
        self
    }
}

#[async_trait]
impl SearchProvider for SerperSearcher {
    async fn search(&self, query: &str, page: u32) -> ProviderResult<SearchPage> {
        let request = SerperRequest {
            q: query,
            gl: &self.country,
            hl: &self.language,
            num: 10,
            page,
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("X-API-KEY", self.api_key.expose())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;

        let response = ensure_success(PROVIDER, response).await?;
        let body: SerperResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;

        let results = body
            .organic
            .into_iter()
            .enumerate()
            .map(|(i, r)| SearchHit {
                title: r.title,
                url: r.link,
                snippet: r.snippet,
                rank: r.position.unwrap_or(i as u32 + 1),
            })
            .collect();

        Ok(SearchPage {
            results,
            cost_usd: self.cost_per_search,
        })
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
