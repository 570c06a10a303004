//! Core data types for the discovery pipeline.

pub mod config;
pub mod cost;
pub mod job;
pub mod niche;
pub mod url;

pub use config::{
    EstimateHeuristics, ExtractionVariables, JobConfig, PipelineConfig, PricingConfig,
    RetryPolicy, SourcesConfig, MAX_BATCH_SIZE, MAX_COMBINATIONS, MAX_LIFE_CONTEXTS,
    MAX_PRODUCT_WORDS, MAX_SERP_PAGES,
};
pub use cost::{CostRecord, CostType};
pub use job::{Job, JobCounters, JobEvent, JobId, JobStatus, Phase, ResumeCheckpoint};
pub use niche::{NewNiche, Niche};
pub use url::{
    NewUrl, SourceType, StatusCounts, UrlChange, UrlEvent, UrlId, UrlQuery, UrlRecord, UrlStatus,
};
