//! Persistence trait for jobs, URLs, niches and cost records.
//!
//! Every stage reads its input from here and writes its output back here,
//! so a job can be picked up again after a restart using only persisted
//! status. URL status changes go through [`DiscoveryStore::transition_url`],
//! a compare-and-set keyed on the status the caller observed.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{
    CostRecord, Job, JobCounters, JobId, JobStatus, NewUrl, Niche, StatusCounts, UrlChange, UrlId,
    UrlQuery, UrlRecord, UrlStatus,
};

/// Next status for `record` under `change`, or `None` if the state machine
/// rejects it. Shared by every store implementation.
pub fn next_status(record: &UrlRecord, change: &UrlChange) -> Option<UrlStatus> {
    record.status.apply(change.event(record.has_content()))
}

/// Apply the side data of `change` to `record` (status excluded).
pub fn apply_change_fields(record: &mut UrlRecord, change: &UrlChange) {
    match change {
        UrlChange::Scraped {
            content,
            word_count,
            title,
        } => {
            record.content = Some(content.clone());
            record.word_count = Some(*word_count);
            if record.title.is_none() {
                record.title = title.clone();
            }
            record.error_message = None;
        }
        UrlChange::ScrapeFailed { error } | UrlChange::ExtractFailed { error } => {
            record.error_message = Some(error.clone());
        }
        UrlChange::Filtered { reason } => {
            record.filtered_reason = Some(reason.clone());
            record.error_message = None;
        }
        UrlChange::Extracted { .. } | UrlChange::Retried => {
            record.error_message = None;
        }
    }
}

/// Storage backend for the discovery pipeline.
#[async_trait]
pub trait DiscoveryStore: Send + Sync {
    // Jobs

    async fn create_job(&self, job: &Job) -> StoreResult<()>;

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>>;

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<()>;

    /// Move a job from `expected` to `next` and overwrite its error message.
    /// Returns false (and writes nothing) if the job is not in `expected`.
    async fn transition_job(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<bool>;

    /// Overwrite the cached counters. Callers recompute them from URL rows.
    async fn update_job_counters(&self, id: JobId, counters: &JobCounters) -> StoreResult<()>;

    // URLs

    /// Insert pending URLs, ignoring any whose normalized URL already exists
    /// for the job. Returns how many were inserted.
    async fn insert_urls(&self, job_id: JobId, urls: Vec<NewUrl>) -> StoreResult<usize>;

    async fn get_url(&self, id: UrlId) -> StoreResult<Option<UrlRecord>>;

    /// URLs of a job in insertion order, filtered and paginated by `query`.
    async fn list_urls(&self, job_id: JobId, query: &UrlQuery) -> StoreResult<Vec<UrlRecord>>;

    /// Number of URLs matching `query`, ignoring its limit/offset.
    async fn count_urls(&self, job_id: JobId, query: &UrlQuery) -> StoreResult<u64>;

    async fn count_urls_by_status(&self, job_id: JobId) -> StoreResult<StatusCounts>;

    /// Normalized URLs already stored for a job (dedup seed).
    async fn normalized_urls(&self, job_id: JobId) -> StoreResult<Vec<String>>;

    /// Returns false if the URL does not exist.
    async fn set_url_selected(&self, id: UrlId, selected: bool) -> StoreResult<bool>;

    /// Atomically move a URL from `expected` to the status implied by
    /// `change`, writing its side data (and, for extraction, its niches).
    ///
    /// Returns the new status, or `None` when the URL is no longer in
    /// `expected` or the transition is not allowed. Nothing is written then.
    async fn transition_url(
        &self,
        id: UrlId,
        expected: UrlStatus,
        change: UrlChange,
    ) -> StoreResult<Option<UrlStatus>>;

    // Niches

    async fn list_niches(&self, job_id: JobId) -> StoreResult<Vec<Niche>>;

    async fn count_niches(&self, job_id: JobId) -> StoreResult<u64>;

    // Costs

    /// Append a cost record. Records are never updated or deleted.
    async fn record_cost(&self, record: &CostRecord) -> StoreResult<()>;

    async fn list_costs(&self, job_id: JobId) -> StoreResult<Vec<CostRecord>>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
