//! Cost ledger.
//!
//! Costs are append-only [`CostRecord`] rows. Every total reported anywhere
//! is a sum over those rows at read time; nothing keeps a running total.

use serde::Serialize;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::planner::Estimate;
use crate::traits::DiscoveryStore;
use crate::types::{CostRecord, CostType, JobId, UrlId};

/// Per-type totals for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostSummary {
    pub serp_usd: f64,
    pub firecrawl_usd: f64,
    pub llm_extraction_usd: f64,
    /// Always `serp_usd + firecrawl_usd + llm_extraction_usd`.
    pub total_usd: f64,
    pub serp_calls: u64,
    pub firecrawl_calls: u64,
    pub llm_calls: u64,
}

impl CostSummary {
    pub fn from_records(records: &[CostRecord]) -> Self {
        let mut summary = CostSummary::default();
        for record in records {
            let units = u64::from(record.units);
            match record.cost_type {
                CostType::Serp => {
                    summary.serp_usd += record.amount_usd;
                    summary.serp_calls += units;
                }
                CostType::Firecrawl => {
                    summary.firecrawl_usd += record.amount_usd;
                    summary.firecrawl_calls += units;
                }
                CostType::LlmExtraction => {
                    summary.llm_extraction_usd += record.amount_usd;
                    summary.llm_calls += units;
                }
            }
        }
        summary.total_usd = summary.serp_usd + summary.firecrawl_usd + summary.llm_extraction_usd;
        summary
    }

    pub fn total_for(&self, cost_type: CostType) -> f64 {
        match cost_type {
            CostType::Serp => self.serp_usd,
            CostType::Firecrawl => self.firecrawl_usd,
            CostType::LlmExtraction => self.llm_extraction_usd,
        }
    }
}

/// Pre-flight estimate next to what was actually billed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateComparison {
    pub estimate: Estimate,
    pub actual: CostSummary,
    /// `actual - estimate`, per stage.
    pub serp_delta_usd: f64,
    pub scrape_delta_usd: f64,
    pub extraction_delta_usd: f64,
    pub total_delta_usd: f64,
}

impl EstimateComparison {
    pub fn new(estimate: Estimate, actual: CostSummary) -> Self {
        Self {
            serp_delta_usd: actual.serp_usd - estimate.serp_cost_usd,
            scrape_delta_usd: actual.firecrawl_usd - estimate.scrape_cost_usd,
            extraction_delta_usd: actual.llm_extraction_usd - estimate.extraction_cost_usd,
            total_delta_usd: actual.total_usd - estimate.total_cost_usd,
            estimate,
            actual,
        }
    }
}

/// Appends cost records and aggregates them per job.
#[derive(Clone)]
pub struct CostLedger {
    store: Arc<dyn DiscoveryStore>,
}

impl CostLedger {
    pub fn new(store: Arc<dyn DiscoveryStore>) -> Self {
        Self { store }
    }

    /// Append one billed call.
    pub async fn charge(
        &self,
        job_id: JobId,
        cost_type: CostType,
        amount_usd: f64,
        url_id: Option<UrlId>,
    ) -> StoreResult<()> {
        let mut record = CostRecord::new(job_id, cost_type, amount_usd);
        if let Some(url_id) = url_id {
            record = record.with_url(url_id);
        }
        self.record(&record).await
    }

    pub async fn record(&self, record: &CostRecord) -> StoreResult<()> {
        tracing::debug!(
            job_id = %record.job_id,
            cost_type = %record.cost_type,
            cost_usd = record.amount_usd,
            "cost recorded"
        );
        self.store.record_cost(record).await
    }

    pub async fn summary(&self, job_id: JobId) -> StoreResult<CostSummary> {
        let records = self.store.list_costs(job_id).await?;
        Ok(CostSummary::from_records(&records))
    }

    pub async fn total(&self, job_id: JobId) -> StoreResult<f64> {
        Ok(self.summary(job_id).await?.total_usd)
    }

    pub async fn compare(&self, job_id: JobId, estimate: Estimate) -> StoreResult<EstimateComparison> {
        Ok(EstimateComparison::new(estimate, self.summary(job_id).await?))
    }
}
