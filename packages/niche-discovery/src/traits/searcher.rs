//! Search provider trait.
//!
//! One call fetches one SERP page for one query. Paging, retry and cost
//! recording live in the search stage, so adapters stay thin.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// One organic result on a SERP page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,

    /// 1-based position within the page.
    pub rank: u32,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, rank: u32) -> Self {
        Self {
            title: String::new(),
            url: url.into(),
            snippet: None,
            rank,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

/// One SERP page and what it cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<SearchHit>,
    pub cost_usd: f64,
}

/// Web search provider (Serper, SerpAPI, ...).
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetch page `page` (1-based, 10 results) of `query`.
    async fn search(&self, query: &str, page: u32) -> ProviderResult<SearchPage>;

    /// Provider name for logs and errors.
    fn name(&self) -> &'static str;
}
