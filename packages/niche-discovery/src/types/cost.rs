//! Cost records: one row per billed provider call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::job::JobId;
use super::url::UrlId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    Serp,
    Firecrawl,
    LlmExtraction,
}

impl CostType {
    pub const ALL: [CostType; 3] = [CostType::Serp, CostType::Firecrawl, CostType::LlmExtraction];

    pub fn as_str(&self) -> &'static str {
        match self {
            CostType::Serp => "serp",
            CostType::Firecrawl => "firecrawl",
            CostType::LlmExtraction => "llm_extraction",
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serp" => Ok(CostType::Serp),
            "firecrawl" => Ok(CostType::Firecrawl),
            "llm_extraction" => Ok(CostType::LlmExtraction),
            other => Err(format!("unknown cost type: {other}")),
        }
    }
}

/// Append-only record of one billed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub cost_type: CostType,
    pub amount_usd: f64,
    /// Number of billable units (pages, scrapes, completions).
    pub units: u32,
    pub url_id: Option<UrlId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CostRecord {
    pub fn new(job_id: JobId, cost_type: CostType, amount_usd: f64) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            cost_type,
            amount_usd,
            units: 1,
            url_id: None,
            note: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_url(mut self, url_id: UrlId) -> Self {
        self.url_id = Some(url_id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}
