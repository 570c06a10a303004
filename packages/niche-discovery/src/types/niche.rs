//! Extracted niche rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobId;
use super::url::UrlId;

/// A problem/persona pair extracted from one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Niche {
    pub id: Uuid,
    pub job_id: JobId,
    pub url_id: UrlId,
    pub problem: String,
    pub persona: String,
    pub functional_cause: String,
    pub emotional_load: String,
    pub evidence: String,
    pub alternatives: String,
    /// Page the evidence came from; falls back to the URL it was extracted from.
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

/// A parsed niche row not yet attached to a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewNiche {
    pub problem: String,
    pub persona: String,
    pub functional_cause: String,
    pub emotional_load: String,
    pub evidence: String,
    pub alternatives: String,
    pub source_url: String,
}

impl NewNiche {
    pub fn into_niche(self, job_id: JobId, url_id: UrlId) -> Niche {
        Niche {
            id: Uuid::now_v7(),
            job_id,
            url_id,
            problem: self.problem,
            persona: self.persona,
            functional_cause: self.functional_cause,
            emotional_load: self.emotional_load,
            evidence: self.evidence,
            alternatives: self.alternatives,
            source_url: self.source_url,
            created_at: Utc::now(),
        }
    }
}
