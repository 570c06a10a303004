//! Extract stage: selected `scraped` URLs to niches.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::parser::{parse_extraction_output, ExtractionOutcome};
use super::prompts::{build_extraction_prompt, DEFAULT_EXTRACTION_PROMPT};
use super::retry::with_retry;
use super::{Stage, StageReport, UnitOutcome};
use crate::error::{DiscoveryError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::ledger::CostLedger;
use crate::traits::{DiscoveryStore, LlmProvider};
use crate::types::{
    CostType, Job, RetryPolicy, UrlChange, UrlId, UrlQuery, UrlRecord, UrlStatus,
};

/// Sends scraped page content to the LLM and stores what it finds.
///
/// Only URLs that are `scraped` and `selected` are dispatched, and every
/// write is a compare-and-set from `scraped`, so running the stage twice
/// never duplicates niches.
pub struct ExtractionEngine {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn DiscoveryStore>,
    ledger: CostLedger,
    events: Arc<dyn EventBus>,
    retry: RetryPolicy,
    max_content_chars: usize,
}

impl ExtractionEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn DiscoveryStore>,
        events: Arc<dyn EventBus>,
        retry: RetryPolicy,
        max_content_chars: usize,
    ) -> Self {
        let ledger = CostLedger::new(store.clone());
        Self {
            llm,
            store,
            ledger,
            events,
            retry,
            max_content_chars,
        }
    }

    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> Result<StageReport> {
        let candidates = self
            .store
            .list_urls(
                job.id,
                &UrlQuery::default()
                    .with_status(UrlStatus::Scraped)
                    .selected_only(),
            )
            .await?;

        let mut report = StageReport::new(Stage::Extract);
        report.dispatched = candidates.len();
        tracing::info!(
            job_id = %job.id,
            urls = candidates.len(),
            batch_size = job.config.batch_size,
            "extraction stage started"
        );

        let mut results = stream::iter(candidates)
            .map(|url| self.extract_record(job, url, cancel))
            .buffer_unordered(job.config.batch_size.max(1));

        while let Some(result) = results.next().await {
            let (outcome, cost) = result?;
            report.record(&outcome);
            report.cost_usd += cost;
        }

        report.cancelled = cancel.is_cancelled();
        tracing::info!(
            job_id = %job.id,
            extracted = report.succeeded,
            filtered = report.filtered,
            failed = report.failed,
            niches = report.niches_found,
            cost_usd = report.cost_usd,
            "extraction stage finished"
        );
        Ok(report)
    }

    /// Extract a single URL by id. A URL not in `scraped` is left alone.
    pub async fn extract_url(&self, job: &Job, url_id: UrlId) -> Result<UnitOutcome> {
        let url = self
            .store
            .get_url(url_id)
            .await?
            .ok_or(DiscoveryError::UrlNotFound(url_id))?;
        let (outcome, _) = self
            .extract_record(job, url, &CancellationToken::new())
            .await?;
        Ok(outcome)
    }

    async fn extract_record(
        &self,
        job: &Job,
        url: UrlRecord,
        cancel: &CancellationToken,
    ) -> Result<(UnitOutcome, f64)> {
        if cancel.is_cancelled() || url.status != UrlStatus::Scraped {
            return Ok((UnitOutcome::Skipped, 0.0));
        }

        let Some(content) = url.content.as_deref() else {
            let change = UrlChange::ExtractFailed {
                error: "no scraped content".to_string(),
            };
            return self.finish(job, &url, change, UnitOutcome::Failed, 0.0).await;
        };

        let template = job
            .config
            .extraction_prompt
            .as_deref()
            .unwrap_or(DEFAULT_EXTRACTION_PROMPT);
        let prompt =
            build_extraction_prompt(template, &job.config.variables, content, self.max_content_chars);

        let llm = &self.llm;
        let prompt_ref = prompt.as_str();
        let completion = match with_retry(&self.retry, llm.name(), move || {
            llm.complete(prompt_ref)
        })
        .await
        {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(job_id = %job.id, url = %url.url, error = %e, "extraction call failed");
                let change = UrlChange::ExtractFailed {
                    error: e.to_string(),
                };
                return self.finish(job, &url, change, UnitOutcome::Failed, 0.0).await;
            }
        };

        self.ledger
            .charge(
                job.id,
                CostType::LlmExtraction,
                completion.cost_usd,
                Some(url.id),
            )
            .await?;
        let cost = completion.cost_usd;

        let (change, outcome) = match parse_extraction_output(&completion.text, &url.url) {
            Ok(ExtractionOutcome::Ignored { reason }) => {
                tracing::debug!(url = %url.url, reason = %reason, "page ignored by extractor");
                (UrlChange::Filtered { reason }, UnitOutcome::Filtered)
            }
            Ok(ExtractionOutcome::Niches { niches, skipped }) => {
                tracing::debug!(url = %url.url, niches = niches.len(), skipped, "niches extracted");
                let count = niches.len();
                (
                    UrlChange::Extracted { niches },
                    UnitOutcome::Extracted { niches: count },
                )
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, url = %url.url, error = %e, "unparseable extraction output");
                (
                    UrlChange::ExtractFailed {
                        error: e.to_string(),
                    },
                    UnitOutcome::Failed,
                )
            }
        };

        self.finish(job, &url, change, outcome, cost).await
    }

    async fn finish(
        &self,
        job: &Job,
        url: &UrlRecord,
        change: UrlChange,
        outcome: UnitOutcome,
        cost: f64,
    ) -> Result<(UnitOutcome, f64)> {
        match self
            .store
            .transition_url(url.id, UrlStatus::Scraped, change)
            .await?
        {
            Some(status) => {
                self.events
                    .publish(PipelineEvent::UrlStatusChanged {
                        job_id: job.id,
                        url_id: url.id,
                        status,
                    })
                    .await;
                Ok((outcome, cost))
            }
            None => {
                tracing::debug!(url = %url.url, "url already extracted elsewhere, result dropped");
                Ok((UnitOutcome::Skipped, cost))
            }
        }
    }
}
