//! Resumable Niche-Discovery Pipeline
//!
//! Turns a bounded cross-product of search terms into extracted
//! problem/persona pairs ("niches"), with every billed call recorded.
//!
//! # Stages
//!
//! Each stage consumes the previous stage's persisted output, never an
//! in-memory handoff, so any stage can restart from what the store says:
//!
//! 1. [`QueryPlanner`] validates the config and expands it into `site:` queries
//! 2. [`SearchExecutor`] pages through results and stores deduplicated URLs
//! 3. [`ScrapeOrchestrator`] fetches content for `pending` URLs
//! 4. [`ExtractionEngine`] sends selected `scraped` content to the LLM and
//!    parses its `;`-delimited answer into niches
//!
//! [`DiscoveryPipeline`] drives a job through whatever is left.
//!
//! # Usage
//!
//! ```rust,ignore
//! use niche_discovery::{DiscoveryPipeline, JobConfig, MemoryStore};
//! use niche_discovery::testing::{MockLlm, MockScrapeProvider, MockSearchProvider};
//!
//! let pipeline = DiscoveryPipeline::builder(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockSearchProvider::new().with_generated_results(10)),
//!     Arc::new(MockScrapeProvider::new().with_default_content("...")),
//!     Arc::new(MockLlm::new()),
//! )
//! .build();
//!
//! let config = JobConfig::new(["autonomos"], ["facturacion"]);
//! let estimate = pipeline.estimate(&config)?;
//! let job = pipeline.create_job("project-1", config).await?;
//! let outcome = pipeline.run(job.id).await?;
//! ```
//!
//! # Modules
//!
//! - [`types`] - Jobs, URLs, niches, cost records and their state machines
//! - [`planner`] - Query expansion and pre-flight estimates
//! - [`filter`] - URL normalization and quality scoring
//! - [`pipeline`] - Stages, extraction parser and the job driver
//! - [`ledger`] - Append-only cost aggregation
//! - [`results`] - Read model and CSV export
//! - [`traits`] / [`providers`] - Provider seams and their HTTP adapters
//! - [`stores`] - MemoryStore and SqliteStore
//! - [`events`] - Progress events
//! - [`testing`] - Mock providers

pub mod error;
pub mod events;
pub mod filter;
pub mod ledger;
pub mod pipeline;
pub mod planner;
pub mod providers;
pub mod results;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    ConfigValidationError, DiscoveryError, ExtractionError, PersistenceError, ProviderError,
    Result,
};
pub use events::{BroadcastEventBus, EventBus, NoopEventBus, PipelineEvent};
pub use ledger::{CostLedger, CostSummary, EstimateComparison};
pub use planner::{Estimate, QueryPlan, QueryPlanner, SearchQuery};
pub use results::{niches_to_csv, JobSummary, ResultsAggregator, SelectionSummary, UrlPage};
pub use traits::{
    Completion, DiscoveryStore, LlmProvider, ScrapeProvider, ScrapedPage, SearchHit, SearchPage,
    SearchProvider,
};
pub use types::{
    CostRecord, CostType, EstimateHeuristics, ExtractionVariables, Job, JobConfig, JobCounters,
    JobId, JobStatus, NewNiche, Niche, Phase, PipelineConfig, PricingConfig, RetryPolicy,
    SourceType, SourcesConfig, StatusCounts, UrlId, UrlQuery, UrlRecord, UrlStatus,
};

// Re-export pipeline components
pub use pipeline::{
    parse_extraction_output, DiscoveryPipeline, DiscoveryPipelineBuilder, ExtractionEngine,
    ExtractionOutcome, RunOutcome, ScrapeOrchestrator, SearchExecutor, Stage, StageReport,
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

// Re-export providers
pub use providers::{FirecrawlScraper, OpenRouterLlm, RateLimitedSearcher, SerperSearcher};
