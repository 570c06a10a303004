//! Job driver: moves a job through the stages its persisted status says
//! are left, one `JobStatus::apply` transition at a time.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use super::extract::ExtractionEngine;
use super::scrape::ScrapeOrchestrator;
use super::search::SearchExecutor;
use super::{Stage, StageReport};
use crate::error::{DiscoveryError, Result};
use crate::events::{EventBus, NoopEventBus, PipelineEvent};
use crate::ledger::CostLedger;
use crate::planner::{Estimate, QueryPlanner};
use crate::traits::{DiscoveryStore, LlmProvider, ScrapeProvider, SearchProvider};
use crate::types::{
    EstimateHeuristics, Job, JobConfig, JobCounters, JobEvent, JobId, JobStatus, PipelineConfig,
    PricingConfig, ResumeCheckpoint, UrlChange, UrlId, UrlQuery, UrlStatus,
};

type RunningJobs = Mutex<HashMap<JobId, CancellationToken>>;

fn lock(running: &RunningJobs) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a job from the running set when its run ends, however it ends.
struct RunGuard<'a> {
    running: &'a RunningJobs,
    job_id: JobId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock(self.running).remove(&self.job_id);
    }
}

/// Result of one `run` call.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Reports of the stages this call executed, in order.
    pub reports: Vec<StageReport>,
    pub counters: JobCounters,
}

/// Builder for [`DiscoveryPipeline`].
pub struct DiscoveryPipelineBuilder {
    store: Arc<dyn DiscoveryStore>,
    searcher: Arc<dyn SearchProvider>,
    scraper: Arc<dyn ScrapeProvider>,
    llm: Arc<dyn LlmProvider>,
    events: Arc<dyn EventBus>,
    pricing: PricingConfig,
    heuristics: EstimateHeuristics,
    config: PipelineConfig,
}

impl DiscoveryPipelineBuilder {
    pub fn new(
        store: Arc<dyn DiscoveryStore>,
        searcher: Arc<dyn SearchProvider>,
        scraper: Arc<dyn ScrapeProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            store,
            searcher,
            scraper,
            llm,
            events: Arc::new(NoopEventBus),
            pricing: PricingConfig::default(),
            heuristics: EstimateHeuristics::default(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_heuristics(mut self, heuristics: EstimateHeuristics) -> Self {
        self.heuristics = heuristics;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> DiscoveryPipeline {
        let search = SearchExecutor::new(self.searcher, self.store.clone(), self.config.clone());
        let scrape = ScrapeOrchestrator::new(
            self.scraper,
            self.store.clone(),
            self.events.clone(),
            self.config.retry.clone(),
        );
        let extract = ExtractionEngine::new(
            self.llm,
            self.store.clone(),
            self.events.clone(),
            self.config.retry.clone(),
            self.config.max_content_chars,
        );

        DiscoveryPipeline {
            ledger: CostLedger::new(self.store.clone()),
            planner: QueryPlanner::new(self.pricing, self.heuristics),
            store: self.store,
            search,
            scrape,
            extract,
            events: self.events,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Resumable discovery pipeline.
///
/// All progress lives in the store. `run` reads the job's status and executes
/// only the stages that remain, so calling it again after a crash, a
/// cancellation followed by `resume`, or a manual URL retry picks up where
/// the persisted rows say the job is.
pub struct DiscoveryPipeline {
    store: Arc<dyn DiscoveryStore>,
    planner: QueryPlanner,
    search: SearchExecutor,
    scrape: ScrapeOrchestrator,
    extract: ExtractionEngine,
    ledger: CostLedger,
    events: Arc<dyn EventBus>,
    running: Arc<RunningJobs>,
}

impl DiscoveryPipeline {
    pub fn builder(
        store: Arc<dyn DiscoveryStore>,
        searcher: Arc<dyn SearchProvider>,
        scraper: Arc<dyn ScrapeProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> DiscoveryPipelineBuilder {
        DiscoveryPipelineBuilder::new(store, searcher, scraper, llm)
    }

    pub fn store(&self) -> &Arc<dyn DiscoveryStore> {
        &self.store
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    /// Validate and estimate `config`. Nothing is billed.
    pub fn estimate(&self, config: &JobConfig) -> Result<Estimate> {
        Ok(self.planner.estimate(config)?)
    }

    /// Validate `config` and persist a new `pending` job.
    pub async fn create_job(&self, project_id: impl Into<String>, config: JobConfig) -> Result<Job> {
        self.planner.estimate(&config)?;
        let job = Job::new(project_id, config.normalized());
        self.store.create_job(&job).await?;

        tracing::info!(
            job_id = %job.id,
            project_id = %job.project_id,
            combinations = job.config.total_combinations(),
            "job created"
        );
        self.events
            .publish(PipelineEvent::JobCreated {
                job_id: job.id,
                project_id: job.project_id.clone(),
            })
            .await;
        Ok(job)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(DiscoveryError::JobNotFound(job_id))
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        lock(&self.running).contains_key(&job_id)
    }

    /// Drive the job through its remaining stages.
    ///
    /// A terminal job is returned as is. Only one run per job may be active
    /// in this process at a time.
    pub async fn run(&self, job_id: JobId) -> Result<RunOutcome> {
        let job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            tracing::debug!(job_id = %job_id, status = %job.status, "job is terminal, nothing to run");
            let counters = self.refresh_counters(job_id).await?;
            return Ok(RunOutcome {
                job_id,
                status: job.status,
                reports: Vec::new(),
                counters,
            });
        }

        let cancel = {
            let mut running = lock(&self.running);
            if running.contains_key(&job_id) {
                return Err(DiscoveryError::InvalidTransition(format!(
                    "job {job_id} is already running"
                )));
            }
            let token = CancellationToken::new();
            running.insert(job_id, token.clone());
            token
        };
        let _guard = RunGuard {
            running: &self.running,
            job_id,
        };

        tracing::info!(job_id = %job_id, status = %job.status, "job run started");
        let mut reports = Vec::new();
        match self.drive(&job, &cancel, &mut reports).await {
            Ok(status) => {
                let counters = self.refresh_counters(job_id).await?;
                tracing::info!(
                    job_id = %job_id,
                    status = %status,
                    niches = counters.niches_found,
                    total_cost_usd = counters.total_cost_usd,
                    "job run finished"
                );
                self.events
                    .publish(PipelineEvent::JobFinished {
                        job_id,
                        status,
                        error: None,
                    })
                    .await;
                Ok(RunOutcome {
                    job_id,
                    status,
                    reports,
                    counters,
                })
            }
            Err(DiscoveryError::Cancelled(_)) => {
                tracing::info!(job_id = %job_id, "job run stopped by cancellation");
                let counters = self.refresh_counters(job_id).await?;
                Ok(RunOutcome {
                    job_id,
                    status: JobStatus::Cancelled,
                    reports,
                    counters,
                })
            }
            Err(e @ (DiscoveryError::Persistence(_) | DiscoveryError::Config(_))) => {
                tracing::error!(job_id = %job_id, error = %e, "job run aborted");
                self.fail_job(job_id, &e.to_string()).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(
        &self,
        job: &Job,
        cancel: &CancellationToken,
        reports: &mut Vec<StageReport>,
    ) -> Result<JobStatus> {
        let job_id = job.id;
        let mut status = job.status;

        loop {
            match status {
                JobStatus::Pending | JobStatus::SerpRunning => {
                    status = self.advance(job_id, status, JobEvent::BeginSearch).await?;
                    let plan = self.planner.plan(&job.config)?;
                    self.stage_started(job_id, Stage::Search).await;
                    let report = self.search.run(job_id, &plan, cancel).await?;
                    self.stage_completed(job_id, report, reports).await?;
                    status = self.advance(job_id, status, JobEvent::SearchFinished).await?;
                }
                JobStatus::SerpDone | JobStatus::Scraping => {
                    status = self.advance(job_id, status, JobEvent::BeginScrape).await?;
                    self.stage_started(job_id, Stage::Scrape).await;
                    let report = self
                        .scrape
                        .run(job_id, job.config.batch_size, cancel)
                        .await?;
                    self.stage_completed(job_id, report, reports).await?;
                    status = self.advance(job_id, status, JobEvent::ScrapeFinished).await?;
                }
                JobStatus::ScrapeDone | JobStatus::Extracting => {
                    status = self.advance(job_id, status, JobEvent::BeginExtraction).await?;
                    self.stage_started(job_id, Stage::Extract).await;
                    let report = self.extract.run(job, cancel).await?;
                    self.stage_completed(job_id, report, reports).await?;
                    status = self.advance(job_id, status, JobEvent::ExtractionFinished).await?;
                }
                JobStatus::Done => return Ok(status),
                JobStatus::Cancelled => return Err(DiscoveryError::Cancelled(job_id)),
                JobStatus::Failed => {
                    return Err(DiscoveryError::InvalidTransition(format!(
                        "job {job_id} failed during the run"
                    )))
                }
            }
        }
    }

    async fn stage_started(&self, job_id: JobId, stage: Stage) {
        tracing::info!(job_id = %job_id, stage = %stage, "stage started");
        self.events
            .publish(PipelineEvent::StageStarted { job_id, stage })
            .await;
    }

    async fn stage_completed(
        &self,
        job_id: JobId,
        report: StageReport,
        reports: &mut Vec<StageReport>,
    ) -> Result<()> {
        self.refresh_counters(job_id).await?;
        let cancelled = report.cancelled;
        self.events
            .publish(PipelineEvent::StageCompleted {
                job_id,
                report: report.clone(),
            })
            .await;
        reports.push(report);

        // A stage that stopped early has not finished its work
        if cancelled {
            return Err(DiscoveryError::Cancelled(job_id));
        }
        Ok(())
    }

    /// Persist `from --event--> next` as a compare-and-set.
    ///
    /// Loses to a concurrent `cancel`, which surfaces as `Cancelled`.
    async fn advance(&self, job_id: JobId, from: JobStatus, event: JobEvent) -> Result<JobStatus> {
        let next = from.apply(event).ok_or_else(|| {
            DiscoveryError::InvalidTransition(format!("job {job_id}: {event:?} not allowed from {from}"))
        })?;

        if self.store.transition_job(job_id, from, next, None).await? {
            if next != from {
                tracing::debug!(job_id = %job_id, from = %from, to = %next, "job status changed");
            }
            return Ok(next);
        }

        let current = self.get_job(job_id).await?.status;
        if current == JobStatus::Cancelled {
            Err(DiscoveryError::Cancelled(job_id))
        } else {
            Err(DiscoveryError::InvalidTransition(format!(
                "job {job_id} moved from {from} to {current} concurrently"
            )))
        }
    }

    /// Best effort: the store may be what failed.
    async fn fail_job(&self, job_id: JobId, message: &str) {
        let current = match self.store.get_job(job_id).await {
            Ok(Some(job)) => job.status,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "could not read job to mark it failed");
                return;
            }
        };
        let Some(next) = current.apply(JobEvent::Fail) else {
            return;
        };
        match self
            .store
            .transition_job(job_id, current, next, Some(message.to_string()))
            .await
        {
            Ok(true) => {
                self.events
                    .publish(PipelineEvent::JobFinished {
                        job_id,
                        status: next,
                        error: Some(message.to_string()),
                    })
                    .await;
            }
            Ok(false) => {
                tracing::warn!(job_id = %job_id, "job changed status before it could be marked failed");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "could not mark job failed");
            }
        }
    }

    /// Cooperatively cancel a job.
    ///
    /// New work stops being dispatched; calls already in flight complete and
    /// their results are persisted.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobStatus> {
        // The pipeline only moves forward, so a lost race converges quickly
        for _ in 0..3 {
            let current = self.get_job(job_id).await?.status;
            let next = current.apply(JobEvent::Cancel).ok_or_else(|| {
                DiscoveryError::InvalidTransition(format!("job {job_id} is already {current}"))
            })?;
            if self.store.transition_job(job_id, current, next, None).await? {
                if let Some(token) = lock(&self.running).get(&job_id) {
                    token.cancel();
                }
                tracing::info!(job_id = %job_id, from = %current, "job cancelled");
                self.events
                    .publish(PipelineEvent::JobFinished {
                        job_id,
                        status: next,
                        error: None,
                    })
                    .await;
                return Ok(next);
            }
        }
        Err(DiscoveryError::InvalidTransition(format!(
            "job {job_id} kept changing status while cancelling"
        )))
    }

    /// Re-open a `failed`, `cancelled` or `done` job at the checkpoint its
    /// URL rows imply. Call `run` afterwards to continue.
    pub async fn resume(&self, job_id: JobId) -> Result<JobStatus> {
        if self.is_running(job_id) {
            return Err(DiscoveryError::InvalidTransition(format!(
                "job {job_id} is still running"
            )));
        }
        let job = self.get_job(job_id).await?;
        let counts = self.store.count_urls_by_status(job_id).await?;
        let checkpoint = ResumeCheckpoint::from_counts(&counts);
        let next = job.status.apply(JobEvent::Resume(checkpoint)).ok_or_else(|| {
            DiscoveryError::InvalidTransition(format!(
                "job {job_id} is {}, only terminal jobs can be resumed",
                job.status
            ))
        })?;

        if !self.store.transition_job(job_id, job.status, next, None).await? {
            return Err(DiscoveryError::InvalidTransition(format!(
                "job {job_id} changed status while resuming"
            )));
        }
        tracing::info!(job_id = %job_id, from = %job.status, checkpoint = ?checkpoint, "job resumed");
        Ok(next)
    }

    /// Manual retry of a `failed` URL: back to `pending` for a re-scrape,
    /// or to `scraped` when its content was kept. The job must be resumed
    /// or run for the URL to be processed again.
    pub async fn retry_url(&self, url_id: UrlId) -> Result<UrlStatus> {
        let url = self
            .store
            .get_url(url_id)
            .await?
            .ok_or(DiscoveryError::UrlNotFound(url_id))?;

        let status = self
            .store
            .transition_url(url_id, UrlStatus::Failed, UrlChange::Retried)
            .await?
            .ok_or_else(|| {
                DiscoveryError::InvalidTransition(format!(
                    "url {url_id} is {}, only failed urls can be retried",
                    url.status
                ))
            })?;

        tracing::info!(job_id = %url.job_id, url = %url.url, to = %status, "url queued for retry");
        self.events
            .publish(PipelineEvent::UrlStatusChanged {
                job_id: url.job_id,
                url_id,
                status,
            })
            .await;
        self.refresh_counters(url.job_id).await?;
        Ok(status)
    }

    /// Include or exclude a URL from the extraction stage.
    pub async fn set_selected(&self, url_id: UrlId, selected: bool) -> Result<()> {
        if !self.store.set_url_selected(url_id, selected).await? {
            return Err(DiscoveryError::UrlNotFound(url_id));
        }
        tracing::debug!(url_id = %url_id, selected, "url selection changed");
        Ok(())
    }

    /// Heal a job whose stage finished without the status catching up
    /// (e.g. the process stopped right after the last URL was written).
    ///
    /// Jobs with a run in progress are left alone.
    pub async fn reconcile(&self, job_id: JobId) -> Result<JobStatus> {
        let job = self.get_job(job_id).await?;
        if self.is_running(job_id) {
            return Ok(job.status);
        }

        let event = match job.status {
            JobStatus::Scraping => {
                let counts = self.store.count_urls_by_status(job_id).await?;
                (counts.pending == 0).then_some(JobEvent::ScrapeFinished)
            }
            JobStatus::Extracting => {
                let remaining = self
                    .store
                    .count_urls(
                        job_id,
                        &UrlQuery::default()
                            .with_status(UrlStatus::Scraped)
                            .selected_only(),
                    )
                    .await?;
                (remaining == 0).then_some(JobEvent::ExtractionFinished)
            }
            _ => None,
        };

        let Some(next) = event.and_then(|event| job.status.apply(event)) else {
            return Ok(job.status);
        };
        if !self.store.transition_job(job_id, job.status, next, None).await? {
            return Ok(self.get_job(job_id).await?.status);
        }

        tracing::info!(job_id = %job_id, from = %job.status, to = %next, "job status reconciled");
        if next.is_terminal() {
            self.events
                .publish(PipelineEvent::JobFinished {
                    job_id,
                    status: next,
                    error: None,
                })
                .await;
        }
        Ok(next)
    }

    /// Recompute the job's cached counters from URL rows and cost records.
    pub async fn refresh_counters(&self, job_id: JobId) -> Result<JobCounters> {
        let counts = self.store.count_urls_by_status(job_id).await?;
        let niches = self.store.count_niches(job_id).await?;
        let total_cost = self.ledger.total(job_id).await?;
        let counters = JobCounters::from_counts(&counts, niches, total_cost);
        self.store.update_job_counters(job_id, &counters).await?;
        Ok(counters)
    }
}
