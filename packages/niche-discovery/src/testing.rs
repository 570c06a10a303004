//! Testing utilities including mock implementations.
//!
//! These stand in for the search, scrape and LLM providers so the pipeline
//! can be exercised without network calls or billing. Every mock records its
//! calls for assertions.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{
    Completion, LlmProvider, ScrapeProvider, ScrapedPage, SearchHit, SearchPage, SearchProvider,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn server_error(provider: &'static str) -> ProviderError {
    ProviderError::Status {
        provider,
        status: 500,
        body: "mock failure".to_string(),
    }
}

/// Tracks how many calls are in flight at once.
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// A mock search provider.
///
/// Pages are configured per `(query, page)`. Unconfigured pages return no
/// results, unless [`MockSearchProvider::with_generated_results`] is set.
#[derive(Clone, Default)]
pub struct MockSearchProvider {
    pages: Arc<Mutex<HashMap<(String, u32), Vec<SearchHit>>>>,
    failing: Arc<Mutex<HashSet<(String, u32)>>>,
    generated_per_page: Option<u32>,
    cost_per_call: f64,
    calls: Arc<Mutex<Vec<(String, u32)>>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self {
            cost_per_call: 0.004,
            ..Default::default()
        }
    }

    /// Results for one page of one query.
    pub fn with_page(self, query: impl Into<String>, page: u32, hits: Vec<SearchHit>) -> Self {
        lock(&self.pages).insert((query.into(), page), hits);
        self
    }

    /// Make one page of one query fail with a 500.
    pub fn with_failing_page(self, query: impl Into<String>, page: u32) -> Self {
        lock(&self.failing).insert((query.into(), page));
        self
    }

    /// Unconfigured pages return `count` distinct reddit URLs derived from
    /// the query and page.
    pub fn with_generated_results(mut self, count: u32) -> Self {
        self.generated_per_page = Some(count);
        self
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        lock(&self.calls).clone()
    }

    fn generated(&self, query: &str, page: u32, count: u32) -> Vec<SearchHit> {
        let slug: String = query
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        (1..=count)
            .map(|rank| {
                SearchHit::new(
                    format!("https://www.reddit.com/r/{slug}/comments/p{page}r{rank}/"),
                    rank,
                )
                .with_title(format!("{query} #{rank}"))
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, page: u32) -> ProviderResult<SearchPage> {
        lock(&self.calls).push((query.to_string(), page));

        let key = (query.to_string(), page);
        if lock(&self.failing).contains(&key) {
            return Err(server_error("mock-search"));
        }

        let results = match lock(&self.pages).get(&key) {
            Some(hits) => hits.clone(),
            None => match self.generated_per_page {
                Some(count) => self.generated(query, page, count),
                None => Vec::new(),
            },
        };

        Ok(SearchPage {
            results,
            cost_usd: self.cost_per_call,
        })
    }

    fn name(&self) -> &'static str {
        "mock-search"
    }
}

#[derive(Clone)]
enum ScrapeBehavior {
    Page { markdown: String, title: Option<String> },
    Fail,
    Empty,
}

/// A mock scrape provider.
///
/// Unconfigured URLs get the default content if one is set, otherwise an
/// `EmptyContent` error.
#[derive(Clone, Default)]
pub struct MockScrapeProvider {
    pages: Arc<Mutex<HashMap<String, ScrapeBehavior>>>,
    default_content: Option<String>,
    delay: Option<Duration>,
    cost_per_call: f64,
    calls: Arc<Mutex<Vec<String>>>,
    gauge: Arc<ConcurrencyGauge>,
}

impl MockScrapeProvider {
    pub fn new() -> Self {
        Self {
            cost_per_call: 0.001,
            ..Default::default()
        }
    }

    pub fn with_page(self, url: impl Into<String>, markdown: impl Into<String>) -> Self {
        lock(&self.pages).insert(
            url.into(),
            ScrapeBehavior::Page {
                markdown: markdown.into(),
                title: None,
            },
        );
        self
    }

    pub fn with_titled_page(
        self,
        url: impl Into<String>,
        title: impl Into<String>,
        markdown: impl Into<String>,
    ) -> Self {
        lock(&self.pages).insert(
            url.into(),
            ScrapeBehavior::Page {
                markdown: markdown.into(),
                title: Some(title.into()),
            },
        );
        self
    }

    /// Fail with a 500 for this URL.
    pub fn with_failure(self, url: impl Into<String>) -> Self {
        lock(&self.pages).insert(url.into(), ScrapeBehavior::Fail);
        self
    }

    /// Succeed at the HTTP level but return no content.
    pub fn with_empty(self, url: impl Into<String>) -> Self {
        lock(&self.pages).insert(url.into(), ScrapeBehavior::Empty);
        self
    }

    pub fn with_default_content(mut self, markdown: impl Into<String>) -> Self {
        self.default_content = Some(markdown.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        lock(&self.calls).iter().filter(|u| u.as_str() == url).count()
    }

    /// Highest number of fetches observed in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.gauge.max()
    }

    fn behavior(&self, url: &str) -> ScrapeBehavior {
        match lock(&self.pages).get(url) {
            Some(behavior) => behavior.clone(),
            None => match &self.default_content {
                Some(markdown) => ScrapeBehavior::Page {
                    markdown: markdown.clone(),
                    title: None,
                },
                None => ScrapeBehavior::Empty,
            },
        }
    }
}

#[async_trait]
impl ScrapeProvider for MockScrapeProvider {
    async fn fetch_content(&self, url: &str) -> ProviderResult<ScrapedPage> {
        lock(&self.calls).push(url.to_string());
        self.gauge.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.gauge.exit();

        match self.behavior(url) {
            ScrapeBehavior::Page { markdown, title } => Ok(ScrapedPage {
                markdown,
                title,
                cost_usd: self.cost_per_call,
            }),
            ScrapeBehavior::Fail => Err(server_error("mock-scrape")),
            ScrapeBehavior::Empty => Err(ProviderError::EmptyContent {
                provider: "mock-scrape",
                url: url.to_string(),
            }),
        }
    }

    fn cost_per_call(&self) -> f64 {
        self.cost_per_call
    }

    fn name(&self) -> &'static str {
        "mock-scrape"
    }
}

#[derive(Clone)]
enum LlmBehavior {
    Respond(String),
    Fail,
}

/// A mock LLM.
///
/// Responses are matched by substring against the prompt, first match
/// wins. Without a match the default response is returned (`IGNORAR`
/// unless overridden).
#[derive(Clone)]
pub struct MockLlm {
    rules: Arc<Mutex<Vec<(String, LlmBehavior)>>>,
    default_response: String,
    cost_per_call: f64,
    delay: Option<Duration>,
    prompts: Arc<Mutex<Vec<String>>>,
    gauge: Arc<ConcurrencyGauge>,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            rules: Arc::default(),
            default_response: "IGNORAR".to_string(),
            cost_per_call: 0.0003,
            delay: None,
            prompts: Arc::default(),
            gauge: Arc::default(),
        }
    }

    /// Respond with `response` when the prompt contains `needle`.
    pub fn with_response_for(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        lock(&self.rules).push((needle.into(), LlmBehavior::Respond(response.into())));
        self
    }

    /// Fail with a 500 when the prompt contains `needle`.
    pub fn with_failure_for(self, needle: impl Into<String>) -> Self {
        lock(&self.rules).push((needle.into(), LlmBehavior::Fail));
        self
    }

    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.gauge.max()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn complete(&self, prompt: &str) -> ProviderResult<Completion> {
        lock(&self.prompts).push(prompt.to_string());
        self.gauge.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.gauge.exit();

        let behavior = lock(&self.rules)
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, behavior)| behavior.clone())
            .unwrap_or_else(|| LlmBehavior::Respond(self.default_response.clone()));

        match behavior {
            LlmBehavior::Respond(text) => Ok(Completion::new(text, self.cost_per_call)),
            LlmBehavior::Fail => Err(server_error("mock-llm")),
        }
    }

    fn name(&self) -> &'static str {
        "mock-llm"
    }
}
