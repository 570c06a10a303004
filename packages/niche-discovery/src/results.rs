//! Read model over a job's URLs, niches and costs, plus CSV export.

use serde::Serialize;
use std::sync::Arc;

use crate::error::{DiscoveryError, Result};
use crate::ledger::{CostLedger, CostSummary, EstimateComparison};
use crate::planner::QueryPlanner;
use crate::traits::DiscoveryStore;
use crate::types::{
    Job, JobId, Niche, Phase, PricingConfig, StatusCounts, UrlQuery, UrlRecord, UrlStatus,
};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Column order of the niche export.
pub const CSV_HEADERS: [&str; 9] = [
    "ID",
    "Problem",
    "Persona",
    "Functional Cause",
    "Emotional Load",
    "Evidence",
    "Alternatives",
    "Source URL",
    "Created At",
];

/// Pre-extraction view of the `scraped` URLs and what extracting the
/// selected ones would cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionSummary {
    pub scraped: u64,
    pub selected: u64,
    pub total_words: u64,
    pub selected_words: u64,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl SelectionSummary {
    pub fn from_urls<'a>(
        urls: impl IntoIterator<Item = &'a UrlRecord>,
        pricing: &PricingConfig,
    ) -> Self {
        let mut summary = SelectionSummary::default();
        for url in urls {
            if url.status != UrlStatus::Scraped {
                continue;
            }
            let words = u64::from(url.word_count.unwrap_or(0));
            summary.scraped += 1;
            summary.total_words += words;
            if url.selected {
                summary.selected += 1;
                summary.selected_words += words;
            }
        }

        summary.estimated_input_tokens =
            (summary.selected_words as f64 * pricing.tokens_per_word).round() as u64;
        summary.estimated_output_tokens = summary.selected * pricing.output_tokens_per_url;
        summary.estimated_cost_usd = summary.estimated_input_tokens as f64 / 1000.0
            * pricing.input_per_1k_tokens
            + summary.estimated_output_tokens as f64 / 1000.0 * pricing.output_per_1k_tokens;
        summary
    }
}

/// One page of a job's URLs.
#[derive(Debug, Clone, Serialize)]
pub struct UrlPage {
    pub urls: Vec<UrlRecord>,
    /// Matching URLs across all pages.
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
    pub selection: SelectionSummary,
}

/// Everything an operator needs to judge a job at a glance.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job: Job,
    pub phase: Phase,
    pub url_counts: StatusCounts,
    pub niches_found: u64,
    pub costs: CostSummary,
    /// Absent when the stored config no longer plans (e.g. limits tightened).
    pub estimate: Option<EstimateComparison>,
}

/// Read-only queries over persisted pipeline state.
#[derive(Clone)]
pub struct ResultsAggregator {
    store: Arc<dyn DiscoveryStore>,
    ledger: CostLedger,
    planner: QueryPlanner,
}

impl ResultsAggregator {
    pub fn new(store: Arc<dyn DiscoveryStore>, planner: QueryPlanner) -> Self {
        Self {
            ledger: CostLedger::new(store.clone()),
            store,
            planner,
        }
    }

    async fn job(&self, job_id: JobId) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(DiscoveryError::JobNotFound(job_id))
    }

    /// Paginated URL listing. `query.limit` defaults to 50 and is capped at 500.
    pub async fn list_urls(&self, job_id: JobId, query: &UrlQuery) -> Result<UrlPage> {
        self.job(job_id).await?;

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page_query = UrlQuery {
            limit: Some(limit),
            ..query.clone()
        };
        let urls = self.store.list_urls(job_id, &page_query).await?;
        let total = self.store.count_urls(job_id, query).await?;
        let selection = self.selection_summary(job_id).await?;

        Ok(UrlPage {
            urls,
            total,
            limit,
            offset: query.offset,
            selection,
        })
    }

    /// Word counts and extraction cost estimate over the `scraped` URLs.
    pub async fn selection_summary(&self, job_id: JobId) -> Result<SelectionSummary> {
        let scraped = self
            .store
            .list_urls(job_id, &UrlQuery::default().with_status(UrlStatus::Scraped))
            .await?;
        Ok(SelectionSummary::from_urls(&scraped, self.planner.pricing()))
    }

    pub async fn job_summary(&self, job_id: JobId) -> Result<JobSummary> {
        let job = self.job(job_id).await?;
        let url_counts = self.store.count_urls_by_status(job_id).await?;
        let niches_found = self.store.count_niches(job_id).await?;
        let costs = self.ledger.summary(job_id).await?;

        let estimate = match self.planner.estimate(&job.config) {
            Ok(estimate) => Some(EstimateComparison::new(estimate, costs.clone())),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "stored config no longer plans");
                None
            }
        };

        Ok(JobSummary {
            phase: job.phase(),
            job,
            url_counts,
            niches_found,
            costs,
            estimate,
        })
    }

    pub async fn niches(&self, job_id: JobId) -> Result<Vec<Niche>> {
        self.job(job_id).await?;
        Ok(self.store.list_niches(job_id).await?)
    }

    /// All niches of a job as delimited text with a header row.
    pub async fn export_niches_csv(&self, job_id: JobId, delimiter: char) -> Result<String> {
        let niches = self.niches(job_id).await?;
        tracing::debug!(job_id = %job_id, rows = niches.len(), "exporting niches");
        Ok(niches_to_csv(&niches, delimiter))
    }
}

/// Encode niches with RFC 4180 style quoting: a field containing the
/// delimiter, a comma, a quote or a line break is wrapped in quotes with
/// inner quotes doubled. Rows end with `\n`.
pub fn niches_to_csv(niches: &[Niche], delimiter: char) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADERS.iter().copied(), delimiter);

    for niche in niches {
        let id = niche.id.to_string();
        let created_at = niche.created_at.to_rfc3339();
        let fields = [
            id.as_str(),
            niche.problem.as_str(),
            niche.persona.as_str(),
            niche.functional_cause.as_str(),
            niche.emotional_load.as_str(),
            niche.evidence.as_str(),
            niche.alternatives.as_str(),
            niche.source_url.as_str(),
            created_at.as_str(),
        ];
        push_row(&mut out, fields, delimiter);
    }
    out
}

fn push_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>, delimiter: char) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        push_field(out, field, delimiter);
    }
    out.push('\n');
}

fn push_field(out: &mut String, field: &str, delimiter: char) {
    let needs_quotes = field
        .chars()
        .any(|c| c == delimiter || matches!(c, ',' | '"' | '\n' | '\r'));
    if needs_quotes {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}
