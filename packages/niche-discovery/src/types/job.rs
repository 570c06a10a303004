//! Job records and the job lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::config::JobConfig;
use super::url::StatusCounts;

/// Job identifier (time-ordered UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Persisted job status. `Done`, `Failed` and `Cancelled` are terminal
/// until an explicit resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    SerpRunning,
    SerpDone,
    Scraping,
    ScrapeDone,
    Extracting,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::SerpRunning => "serp_running",
            JobStatus::SerpDone => "serp_done",
            JobStatus::Scraping => "scraping",
            JobStatus::ScrapeDone => "scrape_done",
            JobStatus::Extracting => "extracting",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Coarse progress bucket shown to operators. Pure function of the status.
    pub fn phase(&self) -> Phase {
        match self {
            JobStatus::Pending | JobStatus::SerpRunning => Phase::Serp,
            JobStatus::SerpDone | JobStatus::Scraping => Phase::Scraping,
            JobStatus::ScrapeDone | JobStatus::Extracting => Phase::Extracting,
            JobStatus::Done => Phase::Done,
            JobStatus::Failed => Phase::Failed,
            JobStatus::Cancelled => Phase::Cancelled,
        }
    }

    /// Apply `event`, returning the next status or `None` when the
    /// transition is not allowed from here.
    pub fn apply(self, event: JobEvent) -> Option<JobStatus> {
        use JobStatus::*;

        match (self, event) {
            (Pending | SerpRunning, JobEvent::BeginSearch) => Some(SerpRunning),
            (SerpRunning, JobEvent::SearchFinished) => Some(SerpDone),
            (SerpDone | Scraping | ScrapeDone, JobEvent::BeginScrape) => Some(Scraping),
            (Scraping, JobEvent::ScrapeFinished) => Some(ScrapeDone),
            (ScrapeDone | Extracting, JobEvent::BeginExtraction) => Some(Extracting),
            (Extracting, JobEvent::ExtractionFinished) => Some(Done),
            (status, JobEvent::Fail) if !status.is_terminal() => Some(Failed),
            (status, JobEvent::Cancel) if !status.is_terminal() => Some(Cancelled),
            (Failed | Cancelled | Done, JobEvent::Resume(checkpoint)) => Some(checkpoint.status()),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "serp_running" => Ok(JobStatus::SerpRunning),
            "serp_done" => Ok(JobStatus::SerpDone),
            "scraping" => Ok(JobStatus::Scraping),
            "scrape_done" => Ok(JobStatus::ScrapeDone),
            "extracting" => Ok(JobStatus::Extracting),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Coarse operator-facing progress bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Serp,
    Scraping,
    Extracting,
    Done,
    Failed,
    Cancelled,
}

/// Where a resumed job restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeCheckpoint {
    /// No URLs yet: search from scratch.
    Search,
    /// Pending URLs remain.
    Scrape,
    /// Only scraped URLs remain unprocessed.
    Extract,
}

impl ResumeCheckpoint {
    /// Derive the checkpoint from what is actually persisted.
    pub fn from_counts(counts: &StatusCounts) -> Self {
        if counts.total() == 0 {
            ResumeCheckpoint::Search
        } else if counts.pending > 0 {
            ResumeCheckpoint::Scrape
        } else {
            ResumeCheckpoint::Extract
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            ResumeCheckpoint::Search => JobStatus::Pending,
            ResumeCheckpoint::Scrape => JobStatus::SerpDone,
            ResumeCheckpoint::Extract => JobStatus::ScrapeDone,
        }
    }
}

/// Events driving the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    BeginSearch,
    SearchFinished,
    BeginScrape,
    ScrapeFinished,
    BeginExtraction,
    ExtractionFinished,
    Fail,
    Cancel,
    Resume(ResumeCheckpoint),
}

/// Per-status URL counters and cost total cached on the job row.
///
/// Derived data: always recomputable from URL rows and cost records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobCounters {
    pub urls_total: u64,
    pub urls_pending: u64,
    pub urls_scraped: u64,
    pub urls_failed: u64,
    pub urls_filtered: u64,
    pub urls_extracted: u64,
    pub niches_found: u64,
    pub total_cost_usd: f64,
}

impl JobCounters {
    pub fn from_counts(counts: &StatusCounts, niches_found: u64, total_cost_usd: f64) -> Self {
        Self {
            urls_total: counts.total(),
            urls_pending: counts.pending,
            urls_scraped: counts.scraped,
            urls_failed: counts.failed,
            urls_filtered: counts.filtered,
            urls_extracted: counts.extracted,
            niches_found,
            total_cost_usd,
        }
    }
}

/// A discovery job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Owning project/session in the hosting application.
    pub project_id: String,
    pub status: JobStatus,
    pub config: JobConfig,
    pub counters: JobCounters,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(project_id: impl Into<String>, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            project_id: project_id.into(),
            status: JobStatus::Pending,
            config,
            counters: JobCounters::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> Phase {
        self.status.phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut status = JobStatus::Pending;
        for event in [
            JobEvent::BeginSearch,
            JobEvent::SearchFinished,
            JobEvent::BeginScrape,
            JobEvent::ScrapeFinished,
            JobEvent::BeginExtraction,
            JobEvent::ExtractionFinished,
        ] {
            status = status.apply(event).unwrap();
        }
        assert_eq!(status, JobStatus::Done);
    }

    #[test]
    fn test_stage_restart_is_idempotent() {
        assert_eq!(
            JobStatus::SerpRunning.apply(JobEvent::BeginSearch),
            Some(JobStatus::SerpRunning)
        );
        assert_eq!(
            JobStatus::Scraping.apply(JobEvent::BeginScrape),
            Some(JobStatus::Scraping)
        );
        assert_eq!(
            JobStatus::Extracting.apply(JobEvent::BeginExtraction),
            Some(JobStatus::Extracting)
        );
    }

    #[test]
    fn test_terminal_states_reject_stage_events() {
        for status in [JobStatus::Done, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
            assert_eq!(status.apply(JobEvent::BeginSearch), None);
            assert_eq!(status.apply(JobEvent::BeginScrape), None);
            assert_eq!(status.apply(JobEvent::Cancel), None);
            assert_eq!(status.apply(JobEvent::Fail), None);
        }
    }

    #[test]
    fn test_skipping_stages_is_rejected() {
        assert_eq!(JobStatus::Pending.apply(JobEvent::BeginScrape), None);
        assert_eq!(JobStatus::SerpDone.apply(JobEvent::BeginExtraction), None);
        assert_eq!(JobStatus::Scraping.apply(JobEvent::ExtractionFinished), None);
    }

    #[test]
    fn test_cancel_and_fail_from_any_active_state() {
        for status in [
            JobStatus::Pending,
            JobStatus::SerpRunning,
            JobStatus::SerpDone,
            JobStatus::Scraping,
            JobStatus::ScrapeDone,
            JobStatus::Extracting,
        ] {
            assert_eq!(status.apply(JobEvent::Cancel), Some(JobStatus::Cancelled));
            assert_eq!(status.apply(JobEvent::Fail), Some(JobStatus::Failed));
        }
    }

    #[test]
    fn test_resume_targets_checkpoint() {
        let resume = |c| JobEvent::Resume(c);
        assert_eq!(
            JobStatus::Failed.apply(resume(ResumeCheckpoint::Search)),
            Some(JobStatus::Pending)
        );
        assert_eq!(
            JobStatus::Cancelled.apply(resume(ResumeCheckpoint::Scrape)),
            Some(JobStatus::SerpDone)
        );
        assert_eq!(
            JobStatus::Done.apply(resume(ResumeCheckpoint::Extract)),
            Some(JobStatus::ScrapeDone)
        );
        assert_eq!(JobStatus::Scraping.apply(resume(ResumeCheckpoint::Scrape)), None);
    }

    #[test]
    fn test_checkpoint_from_counts() {
        let empty = StatusCounts::default();
        assert_eq!(ResumeCheckpoint::from_counts(&empty), ResumeCheckpoint::Search);

        let pending = StatusCounts {
            pending: 2,
            scraped: 3,
            ..Default::default()
        };
        assert_eq!(ResumeCheckpoint::from_counts(&pending), ResumeCheckpoint::Scrape);

        let scraped = StatusCounts {
            scraped: 3,
            extracted: 1,
            ..Default::default()
        };
        assert_eq!(ResumeCheckpoint::from_counts(&scraped), ResumeCheckpoint::Extract);
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(JobStatus::Pending.phase(), Phase::Serp);
        assert_eq!(JobStatus::SerpRunning.phase(), Phase::Serp);
        assert_eq!(JobStatus::SerpDone.phase(), Phase::Scraping);
        assert_eq!(JobStatus::Scraping.phase(), Phase::Scraping);
        assert_eq!(JobStatus::ScrapeDone.phase(), Phase::Extracting);
        assert_eq!(JobStatus::Extracting.phase(), Phase::Extracting);
        assert_eq!(JobStatus::Done.phase(), Phase::Done);
        assert_eq!(JobStatus::Cancelled.phase(), Phase::Cancelled);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::SerpRunning,
            JobStatus::ScrapeDone,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }
}
