//! HTTP adapters for the provider traits.
//!
//! - `SerperSearcher` - Serper.dev Google SERP API
//! - `FirecrawlScraper` - Firecrawl `/v1/scrape`
//! - `OpenRouterLlm` - any OpenAI-compatible chat completions endpoint
//! - `RateLimitedSearcher` - governor-based wrapper for any search provider

pub mod firecrawl;
pub mod openrouter;
pub mod rate_limited;
pub mod serper;

pub use firecrawl::FirecrawlScraper;
pub use openrouter::OpenRouterLlm;
pub use rate_limited::RateLimitedSearcher;
pub use serper::SerperSearcher;

use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

/// Default client-side timeout for adapter requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(provider: &'static str, timeout: Duration) -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::http(provider, e))
}

fn map_send_error(provider: &'static str, timeout: Duration, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider,
            secs: timeout.as_secs(),
        }
    } else {
        ProviderError::http(provider, err)
    }
}

/// Turn a non-2xx response into `ProviderError::Status`.
async fn ensure_success(
    provider: &'static str,
    response: reqwest::Response,
) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        provider,
        status: status.as_u16(),
        body: truncate(&body, 500),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
