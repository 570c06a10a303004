//! Scrape stage: `pending` URLs to `scraped` or `failed`.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::retry::with_retry;
use super::{Stage, StageReport, UnitOutcome};
use crate::error::Result;
use crate::events::{EventBus, PipelineEvent};
use crate::ledger::CostLedger;
use crate::traits::{DiscoveryStore, ScrapeProvider};
use crate::types::{CostType, JobId, RetryPolicy, UrlChange, UrlQuery, UrlRecord, UrlStatus};

/// Fetches page content for every `pending` URL of a job.
///
/// Work is bounded by the job's `batch_size`. Each URL is independent: a
/// failed fetch marks that URL `failed` and never touches its siblings.
/// Every fetch attempt is billed, successful or not.
pub struct ScrapeOrchestrator {
    scraper: Arc<dyn ScrapeProvider>,
    store: Arc<dyn DiscoveryStore>,
    ledger: CostLedger,
    events: Arc<dyn EventBus>,
    retry: RetryPolicy,
}

impl ScrapeOrchestrator {
    pub fn new(
        scraper: Arc<dyn ScrapeProvider>,
        store: Arc<dyn DiscoveryStore>,
        events: Arc<dyn EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        let ledger = CostLedger::new(store.clone());
        Self {
            scraper,
            store,
            ledger,
            events,
            retry,
        }
    }

    pub async fn run(
        &self,
        job_id: JobId,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<StageReport> {
        let pending = self
            .store
            .list_urls(job_id, &UrlQuery::default().with_status(UrlStatus::Pending))
            .await?;

        let mut report = StageReport::new(Stage::Scrape);
        report.dispatched = pending.len();
        tracing::info!(job_id = %job_id, urls = pending.len(), batch_size, "scrape stage started");

        let mut results = stream::iter(pending)
            .map(|url| self.scrape_url(job_id, url, cancel))
            .buffer_unordered(batch_size.max(1));

        while let Some(result) = results.next().await {
            // Persistence failures stop dispatch; in-flight siblings are dropped
            let (outcome, cost) = result?;
            report.record(&outcome);
            report.cost_usd += cost;
        }

        report.cancelled = cancel.is_cancelled();
        tracing::info!(
            job_id = %job_id,
            scraped = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            cost_usd = report.cost_usd,
            "scrape stage finished"
        );
        Ok(report)
    }

    /// Scrape one URL, if it is still `pending`.
    pub async fn scrape_url(
        &self,
        job_id: JobId,
        url: UrlRecord,
        cancel: &CancellationToken,
    ) -> Result<(UnitOutcome, f64)> {
        if cancel.is_cancelled() || url.status != UrlStatus::Pending {
            return Ok((UnitOutcome::Skipped, 0.0));
        }

        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let scraper = &self.scraper;
        let target = url.url.as_str();
        let result = with_retry(&self.retry, scraper.name(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            scraper.fetch_content(target)
        })
        .await;

        // The provider bills every attempt; a successful one reports its own price
        let attempts = attempts.load(Ordering::SeqCst);
        let failed_attempts = if result.is_ok() { attempts.saturating_sub(1) } else { attempts };
        let mut cost = 0.0;
        for _ in 0..failed_attempts {
            let price = self.scraper.cost_per_call();
            self.ledger
                .charge(job_id, CostType::Firecrawl, price, Some(url.id))
                .await?;
            cost += price;
        }

        let (change, outcome) = match result {
            Ok(page) => {
                self.ledger
                    .charge(job_id, CostType::Firecrawl, page.cost_usd, Some(url.id))
                    .await?;
                cost += page.cost_usd;

                let word_count = page.markdown.split_whitespace().count() as u32;
                tracing::debug!(url = %url.url, word_count, "page scraped");
                (
                    UrlChange::Scraped {
                        content: page.markdown,
                        word_count,
                        title: page.title,
                    },
                    UnitOutcome::Scraped,
                )
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, url = %url.url, attempts, error = %e, "scrape failed");
                (
                    UrlChange::ScrapeFailed {
                        error: e.to_string(),
                    },
                    UnitOutcome::Failed,
                )
            }
        };

        match self
            .store
            .transition_url(url.id, UrlStatus::Pending, change)
            .await?
        {
            Some(status) => {
                self.events
                    .publish(PipelineEvent::UrlStatusChanged {
                        job_id,
                        url_id: url.id,
                        status,
                    })
                    .await;
                Ok((outcome, cost))
            }
            None => {
                tracing::debug!(url = %url.url, "url moved on concurrently, result dropped");
                Ok((UnitOutcome::Skipped, cost))
            }
        }
    }
}
