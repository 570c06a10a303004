//! Configuration types for jobs, pricing and pipeline behaviour.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigValidationError;

/// Maximum distinct life contexts per job.
pub const MAX_LIFE_CONTEXTS: usize = 15;

/// Maximum distinct product words per job.
pub const MAX_PRODUCT_WORDS: usize = 15;

/// Maximum `life_contexts x product_words` combinations per job.
pub const MAX_COMBINATIONS: usize = 100;

/// Upper bound on SERP pages fetched per query.
pub const MAX_SERP_PAGES: u32 = 10;

/// Upper bound on the per-stage worker pool.
pub const MAX_BATCH_SIZE: usize = 50;

fn default_serp_pages() -> u32 {
    5
}

fn default_batch_size() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// Configuration for one discovery run, as submitted by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Situational search terms ("new freelancer", "wedding").
    pub life_contexts: Vec<String>,

    /// Product/category terms combined with each life context.
    pub product_words: Vec<String>,

    /// Optional pain indicators ("me frustra"); each adds one query per pair and source.
    #[serde(default)]
    pub indicators: Vec<String>,

    #[serde(default)]
    pub sources: SourcesConfig,

    /// SERP pages fetched per query (10 results each).
    #[serde(default = "default_serp_pages")]
    pub serp_pages: u32,

    /// Worker-pool size for scraping and extraction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Product/target/industry variables interpolated into the extraction prompt.
    #[serde(default)]
    pub variables: ExtractionVariables,

    /// Replaces the built-in extraction prompt template.
    #[serde(default)]
    pub extraction_prompt: Option<String>,
}

impl JobConfig {
    /// Create a config with default sources (reddit only) and paging.
    pub fn new<I, J, S, T>(life_contexts: I, product_words: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            life_contexts: life_contexts.into_iter().map(Into::into).collect(),
            product_words: product_words.into_iter().map(Into::into).collect(),
            indicators: Vec::new(),
            sources: SourcesConfig::default(),
            serp_pages: default_serp_pages(),
            batch_size: default_batch_size(),
            variables: ExtractionVariables::default(),
            extraction_prompt: None,
        }
    }

    pub fn with_indicators<I, S>(mut self, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indicators = indicators.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sources(mut self, sources: SourcesConfig) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_serp_pages(mut self, pages: u32) -> Self {
        self.serp_pages = pages;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_variables(mut self, variables: ExtractionVariables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.extraction_prompt = Some(prompt.into());
        self
    }

    /// Trim every term and drop blanks and case-insensitive duplicates.
    ///
    /// The term lists are sets; limits are measured on the normalized form.
    pub fn normalized(&self) -> Self {
        Self {
            life_contexts: dedup_terms(&self.life_contexts),
            product_words: dedup_terms(&self.product_words),
            indicators: dedup_terms(&self.indicators),
            sources: SourcesConfig {
                reddit: self.sources.reddit,
                thematic_forums: self.sources.thematic_forums,
                general_forums: dedup_terms(&self.sources.general_forums),
            },
            ..self.clone()
        }
    }

    /// Number of (life_context, product_word) pairs after normalization.
    pub fn total_combinations(&self) -> usize {
        let normalized = self.normalized();
        normalized.life_contexts.len() * normalized.product_words.len()
    }

    /// Check limits and required fields. Runs before anything is billed.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let config = self.normalized();
        let contexts = config.life_contexts.len();
        let words = config.product_words.len();

        if contexts == 0 {
            return Err(ConfigValidationError::MissingLifeContexts);
        }
        if words == 0 {
            return Err(ConfigValidationError::MissingProductWords);
        }
        if contexts > MAX_LIFE_CONTEXTS {
            return Err(ConfigValidationError::TooManyLifeContexts {
                max: MAX_LIFE_CONTEXTS,
                actual: contexts,
            });
        }
        if words > MAX_PRODUCT_WORDS {
            return Err(ConfigValidationError::TooManyProductWords {
                max: MAX_PRODUCT_WORDS,
                actual: words,
            });
        }
        if contexts * words > MAX_COMBINATIONS {
            return Err(ConfigValidationError::TooManyCombinations {
                max: MAX_COMBINATIONS,
                actual: contexts * words,
                life_contexts: contexts,
                product_words: words,
            });
        }
        if !config.sources.any_enabled() {
            return Err(ConfigValidationError::NoSourcesEnabled);
        }
        if config.serp_pages == 0 || config.serp_pages > MAX_SERP_PAGES {
            return Err(ConfigValidationError::InvalidSerpPages {
                max: MAX_SERP_PAGES,
                actual: config.serp_pages,
            });
        }
        if config.batch_size == 0 || config.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigValidationError::InvalidBatchSize {
                max: MAX_BATCH_SIZE,
                actual: config.batch_size,
            });
        }
        Ok(())
    }
}

/// Trim and drop blanks, then collapse terms equal ignoring case, keeping the
/// first spelling in input order.
fn dedup_terms(terms: &[String]) -> Vec<String> {
    let mut seen: indexmap::IndexMap<String, String> = indexmap::IndexMap::new();
    for term in terms {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            continue;
        }
        seen.entry(trimmed.to_lowercase()).or_insert_with(|| trimmed.to_string());
    }
    seen.into_values().collect()
}

/// Which sites the planner targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_true")]
    pub reddit: bool,

    /// Match each life context against the built-in topic-forum catalogue.
    #[serde(default)]
    pub thematic_forums: bool,

    /// Extra forum domains searched for every pair (`forocoches.com`).
    #[serde(default)]
    pub general_forums: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            reddit: true,
            thematic_forums: false,
            general_forums: Vec::new(),
        }
    }
}

impl SourcesConfig {
    pub fn reddit_only() -> Self {
        Self::default()
    }

    pub fn with_reddit(mut self, enabled: bool) -> Self {
        self.reddit = enabled;
        self
    }

    pub fn with_thematic_forums(mut self, enabled: bool) -> Self {
        self.thematic_forums = enabled;
        self
    }

    pub fn with_general_forum(mut self, domain: impl Into<String>) -> Self {
        self.general_forums.push(domain.into());
        self
    }

    pub fn any_enabled(&self) -> bool {
        self.reddit || self.thematic_forums || !self.general_forums.is_empty()
    }
}

/// Job-level variables for the extraction prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionVariables {
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
}

impl ExtractionVariables {
    pub fn new(product: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            product: Some(product.into()),
            target: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    pub fn with_company_name(mut self, name: impl Into<String>) -> Self {
        self.company_name = Some(name.into());
        self
    }
}

/// Published provider prices used for estimates.
///
/// Actual costs always come from the providers' responses; these only feed
/// pre-flight numbers and the per-attempt scrape charge on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// USD per SERP page call.
    pub serp_per_search: f64,

    /// USD per scrape attempt.
    pub scrape_per_page: f64,

    /// USD per URL sent to the extractor (planner estimate).
    pub extraction_per_url: f64,

    /// USD per 1K prompt tokens (selection estimate).
    pub input_per_1k_tokens: f64,

    /// USD per 1K completion tokens (selection estimate).
    pub output_per_1k_tokens: f64,

    /// Completion tokens assumed per extracted URL.
    pub output_tokens_per_url: u64,

    /// Prompt tokens assumed per scraped word.
    pub tokens_per_word: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            serp_per_search: 0.004,
            scrape_per_page: 0.001,
            extraction_per_url: 0.0002,
            input_per_1k_tokens: 0.00015,
            output_per_1k_tokens: 0.0006,
            output_tokens_per_url: 200,
            tokens_per_word: 1.0,
        }
    }
}

/// Heuristics behind the URL-volume estimate. Uncalibrated guesses, not guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateHeuristics {
    pub results_per_page: u32,

    /// Fraction of SERP slots expected to hold a usable result.
    pub fill_rate: f64,

    /// Fraction of raw URLs expected to survive deduplication.
    pub dedup_rate: f64,
}

impl Default for EstimateHeuristics {
    fn default() -> Self {
        Self {
            results_per_page: 10,
            fill_rate: 0.7,
            dedup_rate: 0.7,
        }
    }
}

impl EstimateHeuristics {
    pub fn with_fill_rate(mut self, fill_rate: f64) -> Self {
        self.fill_rate = fill_rate;
        self
    }

    pub fn with_dedup_rate(mut self, dedup_rate: f64) -> Self {
        self.dedup_rate = dedup_rate;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for (name, value) in [("fill_rate", self.fill_rate), ("dedup_rate", self.dedup_rate)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigValidationError::InvalidHeuristic { name, value });
            }
        }
        Ok(())
    }
}

/// Bounded retry for a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards.
    pub initial_backoff: Duration,

    /// Per-attempt timeout. Expiry counts as a failed attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff. Useful in tests.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Backoff before attempt `attempt` (1-based; the first attempt has none).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Pipeline-wide knobs that are not part of a single job's config.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Concurrent page calls per search query.
    pub search_concurrency: usize,

    /// Results scoring below this are dropped (unless the query targets a known forum).
    pub min_url_quality: u8,

    /// Page content is truncated to this many characters before prompting.
    pub max_content_chars: usize,

    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            search_concurrency: 3,
            min_url_quality: 40,
            max_content_chars: 15_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_search_concurrency(mut self, concurrency: usize) -> Self {
        self.search_concurrency = concurrency.max(1);
        self
    }

    pub fn with_min_url_quality(mut self, score: u8) -> Self {
        self.min_url_quality = score;
        self
    }

    pub fn with_max_content_chars(mut self, chars: usize) -> Self {
        self.max_content_chars = chars;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
