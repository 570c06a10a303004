//! Typed errors for the discovery pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell
//! item-level failures apart from the ones that must stop a stage.

use thiserror::Error;

use crate::types::{job::JobId, url::UrlId};

/// Top-level error for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Job configuration rejected before anything was billed
    #[error("invalid job config: {0}")]
    Config(#[from] ConfigValidationError),

    /// A single provider call failed (search page, scrape, or LLM)
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// LLM output matched neither `IGNORAR` nor the row contract
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Store read or write failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Job does not exist
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// URL does not exist
    #[error("url not found: {0}")]
    UrlNotFound(UrlId),

    /// A state machine rejected the requested transition
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Job was cancelled before the operation could run
    #[error("job cancelled: {0}")]
    Cancelled(JobId),
}

impl DiscoveryError {
    /// Whether this error must abort the current stage's dispatch loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiscoveryError::Persistence(_))
    }
}

/// Job config limits exceeded or required fields missing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigValidationError {
    #[error("at least one life context is required")]
    MissingLifeContexts,

    #[error("at least one product word is required")]
    MissingProductWords,

    #[error("maximum {max} life contexts allowed, got {actual}")]
    TooManyLifeContexts { max: usize, actual: usize },

    #[error("maximum {max} product words allowed, got {actual}")]
    TooManyProductWords { max: usize, actual: usize },

    #[error(
        "maximum {max} combinations allowed, got {actual} ({life_contexts} contexts x {product_words} words)"
    )]
    TooManyCombinations {
        max: usize,
        actual: usize,
        life_contexts: usize,
        product_words: usize,
    },

    #[error("no search source enabled")]
    NoSourcesEnabled,

    #[error("serp_pages must be between 1 and {max}, got {actual}")]
    InvalidSerpPages { max: u32, actual: u32 },

    #[error("batch_size must be between 1 and {max}, got {actual}")]
    InvalidBatchSize { max: usize, actual: usize },

    #[error("{name} must be within (0, 1], got {value}")]
    InvalidHeuristic { name: &'static str, value: f64 },
}

/// A single external call failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure
    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Non-2xx response
    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// Call exceeded its per-call timeout
    #[error("{provider} timed out after {secs}s")]
    Timeout { provider: &'static str, secs: u64 },

    /// Response body could not be decoded
    #[error("{provider} returned a malformed response: {reason}")]
    MalformedResponse {
        provider: &'static str,
        reason: String,
    },

    /// Fetch succeeded but produced no usable content
    #[error("{provider} returned empty content for {url}")]
    EmptyContent { provider: &'static str, url: String },

    /// Adapter could not be built (missing key, bad client setup)
    #[error("{provider} is not configured: {reason}")]
    NotConfigured {
        provider: &'static str,
        reason: String,
    },
}

impl ProviderError {
    pub fn http(
        provider: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ProviderError::Http {
            provider,
            source: source.into(),
        }
    }

    pub fn malformed(provider: &'static str, reason: impl Into<String>) -> Self {
        ProviderError::MalformedResponse {
            provider,
            reason: reason.into(),
        }
    }

    pub fn not_configured(provider: &'static str, reason: impl Into<String>) -> Self {
        ProviderError::NotConfigured {
            provider,
            reason: reason.into(),
        }
    }

    /// Empty content and malformed bodies won't improve on a second attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { .. } | ProviderError::Timeout { .. } => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::MalformedResponse { .. }
            | ProviderError::EmptyContent { .. }
            | ProviderError::NotConfigured { .. } => false,
        }
    }
}

/// The LLM output could not be interpreted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("output was empty")]
    EmptyOutput,

    #[error("no parseable niche rows ({skipped} lines skipped): {preview}")]
    NoParseableRows { skipped: usize, preview: String },
}

/// Store operation failed.
#[derive(Debug, Error)]
#[error("storage error: {0}")]
pub struct PersistenceError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl PersistenceError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(source.into())
    }
}

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Result type alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, PersistenceError>;
