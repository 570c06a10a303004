//! Scrape provider trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// Main content of a fetched page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub markdown: String,
    pub title: Option<String>,
    pub cost_usd: f64,
}

impl ScrapedPage {
    pub fn new(markdown: impl Into<String>, cost_usd: f64) -> Self {
        Self {
            markdown: markdown.into(),
            title: None,
            cost_usd,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Fetches a URL and returns its main content as markdown.
///
/// Providers bill per attempt, so [`ScrapeProvider::cost_per_call`] is
/// charged for failed attempts too.
#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    async fn fetch_content(&self, url: &str) -> ProviderResult<ScrapedPage>;

    /// Published price of one fetch attempt.
    fn cost_per_call(&self) -> f64;

    fn name(&self) -> &'static str;
}
