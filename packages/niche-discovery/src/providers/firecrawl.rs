//! Firecrawl scrape adapter.
//!
//! Uses `/v1/scrape` with main-content extraction, which strips navigation
//! and boilerplate before the page reaches the extractor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{build_client, ensure_success, map_send_error, DEFAULT_TIMEOUT};
use crate::error::{ProviderError, ProviderResult};
use crate::security::SecretString;
use crate::traits::scraper::{ScrapeProvider, ScrapedPage};

const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1";
const PROVIDER: &str = "firecrawl";

/// Published price per scrape attempt (USD).
pub const FIRECRAWL_COST_PER_PAGE: f64 = 0.001;

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'static str; 1],
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    success: bool,
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    metadata: Option<PageMetadata>,
}

#[derive(Deserialize)]
struct PageMetadata {
    title: Option<String>,
}

/// Firecrawl-backed scraper.
pub struct FirecrawlScraper {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    timeout: Duration,
    cost_per_page: f64,
}

impl FirecrawlScraper {
    pub fn new(api_key: impl Into<String>) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(PROVIDER, DEFAULT_TIMEOUT)?,
            api_key: SecretString::new(api_key),
            base_url: FIRECRAWL_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            cost_per_page: FIRECRAWL_COST_PER_PAGE,
        })
    }

    /// Create from environment variable `FIRECRAWL_API_KEY`.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("FIRECRAWL_API_KEY")
            .map_err(|_| ProviderError::not_configured(PROVIDER, "FIRECRAWL_API_KEY not set"))?;
        Self::new(api_key)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ProviderResult<Self> {
        self.client = build_client(PROVIDER, timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_cost_per_page(mut self, cost: f64) -> Self {
        self.cost_per_page = cost;
        self
    }
}

#[async_trait]
impl ScrapeProvider for FirecrawlScraper {
    async fn fetch_content(&self, url: &str) -> ProviderResult<ScrapedPage> {
        let request = ScrapeRequest {
            url,
            formats: ["markdown"],
            only_main_content: true,
        };

        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;

        let response = ensure_success(PROVIDER, response).await?;
        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;

        if !body.success {
            return Err(ProviderError::malformed(
                PROVIDER,
                body.error.unwrap_or_else(|| "scrape unsuccessful".to_string()),
            ));
        }

        let data = body
            .data
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "missing data"))?;
        let markdown = data.markdown.unwrap_or_default();
        if markdown.trim().is_empty() {
            return Err(ProviderError::EmptyContent {
                provider: PROVIDER,
                url: url.to_string(),
            });
        }

        Ok(ScrapedPage {
            markdown,
            title: data.metadata.and_then(|m| m.title),
            cost_usd: self.cost_per_page,
        })
    }

    fn cost_per_call(&self) -> f64 {
        self.cost_per_page
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = ScrapeRequest {
            url: "https://reddit.com/r/x",
            formats: ["markdown"],
            only_main_content: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["formats"][0], "markdown");
        assert_eq!(json["onlyMainContent"], true);
    }

    #[test]
    fn test_response_parsing() {
        let body: ScrapeResponse = serde_json::from_str(
            r##"{"success":true,"data":{"markdown":"# Hi","metadata":{"title":"Hi"}}}"##,
        )
        .unwrap();
        assert!(body.success);
        let data = body.data.unwrap();
        assert_eq!(data.markdown.as_deref(), Some("# Hi"));
        assert_eq!(data.metadata.unwrap().title.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_cost_per_call() {
        let scraper = FirecrawlScraper::new("key").unwrap().with_cost_per_page(0.002);
        assert!((scraper.cost_per_call() - 0.002).abs() < f64::EPSILON);
    }
}
