//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::{PersistenceError, StoreResult};
use crate::traits::store::{apply_change_fields, next_status, DiscoveryStore};
use crate::types::{
    CostRecord, Job, JobCounters, JobId, JobStatus, NewUrl, Niche, StatusCounts, UrlChange, UrlId,
    UrlQuery, UrlRecord, UrlStatus,
};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    urls: IndexMap<UrlId, UrlRecord>,
    url_keys: HashSet<(JobId, String)>,
    niches: Vec<Niche>,
    costs: Vec<CostRecord>,
}

/// In-memory store.
///
/// A single lock guards all tables, so URL transitions and their niche
/// inserts are atomic. Data is lost on restart.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_url_writes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> PersistenceError {
    PersistenceError::new("memory store lock poisoned")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            fail_url_writes: AtomicBool::new(false),
        }
    }

    /// Make every URL write fail with a `PersistenceError` (fault injection).
    pub fn set_fail_url_writes(&self, fail: bool) {
        self.fail_url_writes.store(fail, Ordering::SeqCst);
    }

    fn check_url_writes(&self) -> StoreResult<()> {
        if self.fail_url_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::new("url writes disabled"));
        }
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.inner.read().map(|i| i.jobs.len()).unwrap_or_default()
    }

    pub fn url_count(&self) -> usize {
        self.inner.read().map(|i| i.urls.len()).unwrap_or_default()
    }

    pub fn cost_count(&self) -> usize {
        self.inner.read().map(|i| i.costs.len()).unwrap_or_default()
    }
}

#[async_trait]
impl DiscoveryStore for MemoryStore {
    async fn create_job(&self, job: &Job) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.jobs.get(&id).cloned())
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.status = status;
            job.error_message = error_message;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn transition_job(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == expected => {
                job.status = next;
                job.error_message = error_message;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_job_counters(&self, id: JobId, counters: &JobCounters) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.counters = counters.clone();
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_urls(&self, job_id: JobId, urls: Vec<NewUrl>) -> StoreResult<usize> {
        self.check_url_writes()?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        let mut inserted = 0;
        for url in urls {
            if !inner.url_keys.insert((job_id, url.normalized_url.clone())) {
                continue;
            }
            let record = url.into_record(job_id);
            inner.urls.insert(record.id, record);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_url(&self, id: UrlId) -> StoreResult<Option<UrlRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.urls.get(&id).cloned())
    }

    async fn list_urls(&self, job_id: JobId, query: &UrlQuery) -> StoreResult<Vec<UrlRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let matching = inner
            .urls
            .values()
            .filter(|u| u.job_id == job_id && query.matches(u))
            .skip(query.offset);
        Ok(match query.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        })
    }

    async fn count_urls(&self, job_id: JobId, query: &UrlQuery) -> StoreResult<u64> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .urls
            .values()
            .filter(|u| u.job_id == job_id && query.matches(u))
            .count() as u64)
    }

    async fn count_urls_by_status(&self, job_id: JobId) -> StoreResult<StatusCounts> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut counts = StatusCounts::default();
        for url in inner.urls.values().filter(|u| u.job_id == job_id) {
            counts.add(url.status, 1);
        }
        Ok(counts)
    }

    async fn normalized_urls(&self, job_id: JobId) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .urls
            .values()
            .filter(|u| u.job_id == job_id)
            .map(|u| u.normalized_url.clone())
            .collect())
    }

    async fn set_url_selected(&self, id: UrlId, selected: bool) -> StoreResult<bool> {
        self.check_url_writes()?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        match inner.urls.get_mut(&id) {
            Some(url) => {
                url.selected = selected;
                url.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn transition_url(
        &self,
        id: UrlId,
        expected: UrlStatus,
        change: UrlChange,
    ) -> StoreResult<Option<UrlStatus>> {
        self.check_url_writes()?;
        let mut inner = self.inner.write().map_err(poisoned)?;

        let Some(record) = inner.urls.get_mut(&id) else {
            return Ok(None);
        };
        if record.status != expected {
            return Ok(None);
        }
        let Some(next) = next_status(record, &change) else {
            return Ok(None);
        };

        apply_change_fields(record, &change);
        record.status = next;
        record.updated_at = Utc::now();
        let (job_id, url_id) = (record.job_id, record.id);

        if let UrlChange::Extracted { niches } = change {
            inner
                .niches
                .extend(niches.into_iter().map(|n| n.into_niche(job_id, url_id)));
        }
        Ok(Some(next))
    }

    async fn list_niches(&self, job_id: JobId) -> StoreResult<Vec<Niche>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .niches
            .iter()
            .filter(|n| n.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn count_niches(&self, job_id: JobId) -> StoreResult<u64> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.niches.iter().filter(|n| n.job_id == job_id).count() as u64)
    }

    async fn record_cost(&self, record: &CostRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.costs.push(record.clone());
        Ok(())
    }

    async fn list_costs(&self, job_id: JobId) -> StoreResult<Vec<CostRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .costs
            .iter()
            .filter(|c| c.job_id == job_id)
            .cloned()
            .collect())
    }
}
