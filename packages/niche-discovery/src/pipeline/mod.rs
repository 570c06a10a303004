//! Discovery pipeline - the core of the library.
//!
//! Stages, each reading the previous stage's persisted output:
//! - Search: planned queries -> deduplicated `pending` URLs
//! - Scrape: `pending` URLs -> `scraped` / `failed`
//! - Extract: selected `scraped` URLs -> `extracted` / `filtered` / `failed`
//!
//! [`DiscoveryPipeline`] drives a job through the stages its persisted
//! status says are left.

pub mod extract;
pub mod parser;
pub mod prompts;
pub mod retry;
pub mod runner;
pub mod scrape;
pub mod search;

pub use extract::ExtractionEngine;
pub use parser::{parse_extraction_output, read_delimited, DelimitedRead, ExtractionOutcome};
pub use prompts::{build_extraction_prompt, DEFAULT_EXTRACTION_PROMPT};
pub use retry::with_retry;
pub use runner::{DiscoveryPipeline, DiscoveryPipelineBuilder, RunOutcome};
pub use scrape::ScrapeOrchestrator;
pub use search::SearchExecutor;

use serde::Serialize;
use std::fmt;

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Scrape,
    Extract,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Scrape => "scrape",
            Stage::Extract => "extract",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one stage run did.
///
/// For search, `dispatched`/`succeeded`/`failed` count page calls and
/// `filtered` counts results dropped by the quality filter. For scrape and
/// extract they count URLs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub filtered: usize,
    /// Units not processed: cancelled before dispatch, or already moved on
    /// by someone else.
    pub skipped: usize,
    pub urls_found: usize,
    pub niches_found: usize,
    pub cost_usd: f64,
    pub cancelled: bool,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            dispatched: 0,
            succeeded: 0,
            failed: 0,
            filtered: 0,
            skipped: 0,
            urls_found: 0,
            niches_found: 0,
            cost_usd: 0.0,
            cancelled: false,
        }
    }

    pub(crate) fn record(&mut self, outcome: &UnitOutcome) {
        match outcome {
            UnitOutcome::Scraped => self.succeeded += 1,
            UnitOutcome::Extracted { niches } => {
                self.succeeded += 1;
                self.niches_found += niches;
            }
            UnitOutcome::Filtered => self.filtered += 1,
            UnitOutcome::Failed => self.failed += 1,
            UnitOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Result of processing one URL in the scrape or extract stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Scraped,
    Extracted { niches: usize },
    Filtered,
    Failed,
    /// Cancelled before dispatch, or the URL was no longer in the expected status.
    Skipped,
}
