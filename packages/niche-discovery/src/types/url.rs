//! Discovered URLs and the per-URL state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::job::JobId;

/// URL row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlId(pub Uuid);

impl UrlId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for UrlId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UrlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UrlId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a URL was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Reddit,
    GeneralForum,
    ThematicForum,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Reddit => "reddit",
            SourceType::GeneralForum => "general_forum",
            SourceType::ThematicForum => "thematic_forum",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reddit" => Ok(SourceType::Reddit),
            "general_forum" => Ok(SourceType::GeneralForum),
            "thematic_forum" => Ok(SourceType::ThematicForum),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// URL lifecycle. Every status change goes through [`UrlStatus::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Pending,
    Scraped,
    Failed,
    /// Extractor answered `IGNORAR`: page holds no niche.
    Filtered,
    Extracted,
}

impl UrlStatus {
    pub const ALL: [UrlStatus; 5] = [
        UrlStatus::Pending,
        UrlStatus::Scraped,
        UrlStatus::Failed,
        UrlStatus::Filtered,
        UrlStatus::Extracted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::Pending => "pending",
            UrlStatus::Scraped => "scraped",
            UrlStatus::Failed => "failed",
            UrlStatus::Filtered => "filtered",
            UrlStatus::Extracted => "extracted",
        }
    }

    /// Apply `event`, returning the next status or `None` if not allowed.
    pub fn apply(self, event: UrlEvent) -> Option<UrlStatus> {
        use UrlStatus::*;

        match (self, event) {
            (Pending, UrlEvent::ScrapeSucceeded) => Some(Scraped),
            (Pending, UrlEvent::ScrapeFailed) => Some(Failed),
            (Scraped, UrlEvent::ExtractIgnored) => Some(Filtered),
            (Scraped, UrlEvent::ExtractFound) => Some(Extracted),
            (Scraped, UrlEvent::ExtractFailed) => Some(Failed),
            (Failed, UrlEvent::ManualRetry { has_content: false }) => Some(Pending),
            (Failed, UrlEvent::ManualRetry { has_content: true }) => Some(Scraped),
            _ => None,
        }
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UrlStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UrlStatus::Pending),
            "scraped" => Ok(UrlStatus::Scraped),
            "failed" => Ok(UrlStatus::Failed),
            "filtered" => Ok(UrlStatus::Filtered),
            "extracted" => Ok(UrlStatus::Extracted),
            other => Err(format!("unknown url status: {other}")),
        }
    }
}

/// Events driving the URL state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlEvent {
    ScrapeSucceeded,
    ScrapeFailed,
    ExtractIgnored,
    ExtractFound,
    ExtractFailed,
    /// Operator retry of a failed URL. With retained content the URL goes
    /// straight back to extraction instead of being re-scraped.
    ManualRetry { has_content: bool },
}

/// A URL discovered by search, as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub id: UrlId,
    pub job_id: JobId,
    pub url: String,
    /// Dedup key; unique within a job.
    pub normalized_url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    /// 1-based SERP position across pages.
    pub position: u32,
    pub source_type: SourceType,
    pub life_context: String,
    pub product_word: String,
    pub indicator: Option<String>,
    pub status: UrlStatus,
    pub content: Option<String>,
    pub word_count: Option<u32>,
    pub error_message: Option<String>,
    /// Reason given by the extractor for `IGNORAR`.
    pub filtered_reason: Option<String>,
    /// Included in operator-facing cost/selection summaries.
    pub selected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UrlRecord {
    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// A search result ready to be inserted as a pending URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUrl {
    pub url: String,
    pub normalized_url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub position: u32,
    pub source_type: SourceType,
    pub life_context: String,
    pub product_word: String,
    pub indicator: Option<String>,
}

impl NewUrl {
    pub fn into_record(self, job_id: JobId) -> UrlRecord {
        let now = Utc::now();
        UrlRecord {
            id: UrlId::new(),
            job_id,
            url: self.url,
            normalized_url: self.normalized_url,
            title: self.title,
            snippet: self.snippet,
            position: self.position,
            source_type: self.source_type,
            life_context: self.life_context,
            product_word: self.product_word,
            indicator: self.indicator,
            status: UrlStatus::Pending,
            content: None,
            word_count: None,
            error_message: None,
            filtered_reason: None,
            selected: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Side data written together with a URL status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlChange {
    Scraped {
        content: String,
        word_count: u32,
        title: Option<String>,
    },
    ScrapeFailed {
        error: String,
    },
    Filtered {
        reason: String,
    },
    /// Niches are persisted in the same atomic step as the status.
    Extracted {
        niches: Vec<super::niche::NewNiche>,
    },
    ExtractFailed {
        error: String,
    },
    /// Manual retry; clears the error message and keeps content.
    Retried,
}

impl UrlChange {
    pub fn event(&self, has_content: bool) -> UrlEvent {
        match self {
            UrlChange::Scraped { .. } => UrlEvent::ScrapeSucceeded,
            UrlChange::ScrapeFailed { .. } => UrlEvent::ScrapeFailed,
            UrlChange::Filtered { .. } => UrlEvent::ExtractIgnored,
            UrlChange::Extracted { .. } => UrlEvent::ExtractFound,
            UrlChange::ExtractFailed { .. } => UrlEvent::ExtractFailed,
            UrlChange::Retried => UrlEvent::ManualRetry { has_content },
        }
    }
}

/// URL counts per status for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub scraped: u64,
    pub failed: u64,
    pub filtered: u64,
    pub extracted: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.scraped + self.failed + self.filtered + self.extracted
    }

    pub fn add(&mut self, status: UrlStatus, n: u64) {
        match status {
            UrlStatus::Pending => self.pending += n,
            UrlStatus::Scraped => self.scraped += n,
            UrlStatus::Failed => self.failed += n,
            UrlStatus::Filtered => self.filtered += n,
            UrlStatus::Extracted => self.extracted += n,
        }
    }

    pub fn get(&self, status: UrlStatus) -> u64 {
        match status {
            UrlStatus::Pending => self.pending,
            UrlStatus::Scraped => self.scraped,
            UrlStatus::Failed => self.failed,
            UrlStatus::Filtered => self.filtered,
            UrlStatus::Extracted => self.extracted,
        }
    }
}

/// Filter for listing a job's URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlQuery {
    #[serde(default)]
    pub status: Option<UrlStatus>,
    #[serde(default)]
    pub selected_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl UrlQuery {
    pub fn with_status(mut self, status: UrlStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn selected_only(mut self) -> Self {
        self.selected_only = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, record: &UrlRecord) -> bool {
        self.status.map_or(true, |s| record.status == s) && (!self.selected_only || record.selected)
    }
}
