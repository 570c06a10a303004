//! SQLite storage implementation.
//!
//! A file-based storage backend using SQLite. Good for:
//! - Local development
//! - Single-server deployments
//! - Resuming jobs across process restarts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{PersistenceError, StoreResult};
use crate::traits::store::{apply_change_fields, next_status, DiscoveryStore};
use crate::types::{
    CostRecord, Job, JobCounters, JobId, JobStatus, NewUrl, Niche, StatusCounts, UrlChange, UrlId,
    UrlQuery, UrlRecord, UrlStatus,
};

fn storage(e: impl std::error::Error + Send + Sync + 'static) -> PersistenceError {
    PersistenceError::new(e)
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::new(format!("invalid {what}: {detail}"))
}

fn parse_time(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("date", e))
}

fn parse_uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| corrupt("uuid", e))
}

/// SQLite-based discovery store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite://niche_discovery.db?mode=rwc` - File-based, create if missing
    /// - `sqlite::memory:` - In-memory database (use [`SqliteStore::in_memory`])
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::connect(SqlitePoolOptions::new().max_connections(5), database_url).await
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Pinned to one long-lived connection: every `:memory:` connection is its own database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::connect(options, "sqlite::memory:").await
    }

    async fn connect(options: SqlitePoolOptions, database_url: &str) -> StoreResult<Self> {
        let pool = options
            .connect(database_url)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables if they do not exist.
    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                status TEXT NOT NULL,
                config TEXT NOT NULL,
                counters TEXT NOT NULL DEFAULT '{}',
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_project_id ON jobs(project_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS urls (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                url TEXT NOT NULL,
                normalized_url TEXT NOT NULL,
                title TEXT,
                snippet TEXT,
                position INTEGER NOT NULL,
                source_type TEXT NOT NULL,
                life_context TEXT NOT NULL,
                product_word TEXT NOT NULL,
                indicator TEXT,
                status TEXT NOT NULL,
                content TEXT,
                word_count INTEGER,
                error_message TEXT,
                filtered_reason TEXT,
                selected INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (job_id, normalized_url)
            );

            CREATE INDEX IF NOT EXISTS idx_urls_job_status ON urls(job_id, status);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS niches (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                url_id TEXT NOT NULL REFERENCES urls(id),
                problem TEXT NOT NULL,
                persona TEXT NOT NULL,
                functional_cause TEXT NOT NULL,
                emotional_load TEXT NOT NULL,
                evidence TEXT NOT NULL,
                alternatives TEXT NOT NULL,
                source_url TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_niches_job_id ON niches(job_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS costs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                cost_type TEXT NOT NULL,
                amount_usd REAL NOT NULL,
                units INTEGER NOT NULL DEFAULT 1,
                url_id TEXT,
                note TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_costs_job_id ON costs(job_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// Row types for sqlx queries

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    project_id: String,
    status: String,
    config: String,
    counters: String,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_job(self) -> StoreResult<Job> {
        Ok(Job {
            id: JobId(parse_uuid(&self.id)?),
            project_id: self.project_id,
            status: self
                .status
                .parse::<JobStatus>()
                .map_err(|e| corrupt("job status", e))?,
            config: serde_json::from_str(&self.config).map_err(|e| corrupt("config JSON", e))?,
            counters: serde_json::from_str(&self.counters)
                .map_err(|e| corrupt("counters JSON", e))?,
            error_message: self.error_message,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

const URL_COLUMNS: &str = "id, job_id, url, normalized_url, title, snippet, position, source_type, \
    life_context, product_word, indicator, status, content, word_count, error_message, \
    filtered_reason, selected, created_at, updated_at";

#[derive(Debug, FromRow)]
struct UrlRow {
    id: String,
    job_id: String,
    url: String,
    normalized_url: String,
    title: Option<String>,
    snippet: Option<String>,
    position: i64,
    source_type: String,
    life_context: String,
    product_word: String,
    indicator: Option<String>,
    status: String,
    content: Option<String>,
    word_count: Option<i64>,
    error_message: Option<String>,
    filtered_reason: Option<String>,
    selected: i64,
    created_at: String,
    updated_at: String,
}

impl UrlRow {
    fn into_record(self) -> StoreResult<UrlRecord> {
        Ok(UrlRecord {
            id: UrlId(parse_uuid(&self.id)?),
            job_id: JobId(parse_uuid(&self.job_id)?),
            url: self.url,
            normalized_url: self.normalized_url,
            title: self.title,
            snippet: self.snippet,
            position: u32::try_from(self.position).map_err(|e| corrupt("position", e))?,
            source_type: self
                .source_type
                .parse()
                .map_err(|e| corrupt("source type", e))?,
            life_context: self.life_context,
            product_word: self.product_word,
            indicator: self.indicator,
            status: self.status.parse().map_err(|e| corrupt("url status", e))?,
            content: self.content,
            word_count: self
                .word_count
                .map(u32::try_from)
                .transpose()
                .map_err(|e| corrupt("word count", e))?,
            error_message: self.error_message,
            filtered_reason: self.filtered_reason,
            selected: self.selected != 0,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct NicheRow {
    id: String,
    job_id: String,
    url_id: String,
    problem: String,
    persona: String,
    functional_cause: String,
    emotional_load: String,
    evidence: String,
    alternatives: String,
    source_url: String,
    created_at: String,
}

impl NicheRow {
    fn into_niche(self) -> StoreResult<Niche> {
        Ok(Niche {
            id: parse_uuid(&self.id)?,
            job_id: JobId(parse_uuid(&self.job_id)?),
            url_id: UrlId(parse_uuid(&self.url_id)?),
            problem: self.problem,
            persona: self.persona,
            functional_cause: self.functional_cause,
            emotional_load: self.emotional_load,
            evidence: self.evidence,
            alternatives: self.alternatives,
            source_url: self.source_url,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct CostRow {
    id: String,
    job_id: String,
    cost_type: String,
    amount_usd: f64,
    units: i64,
    url_id: Option<String>,
    note: Option<String>,
    created_at: String,
}

impl CostRow {
    fn into_record(self) -> StoreResult<CostRecord> {
        Ok(CostRecord {
            id: parse_uuid(&self.id)?,
            job_id: JobId(parse_uuid(&self.job_id)?),
            cost_type: self
                .cost_type
                .parse()
                .map_err(|e| corrupt("cost type", e))?,
            amount_usd: self.amount_usd,
            units: u32::try_from(self.units).map_err(|e| corrupt("units", e))?,
            url_id: self
                .url_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?
                .map(UrlId),
            note: self.note,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[async_trait]
impl DiscoveryStore for SqliteStore {
    async fn create_job(&self, job: &Job) -> StoreResult<()> {
        let config = serde_json::to_string(&job.config).map_err(storage)?;
        let counters = serde_json::to_string(&job.counters).map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, project_id, status, config, counters, error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.project_id)
        .bind(job.status.as_str())
        .bind(&config)
        .bind(&counters)
        .bind(&job.error_message)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, project_id, status, config, counters, error_message, created_at, updated_at FROM jobs WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET status = ?, error_message = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&error_message)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(())
    }

    async fn transition_job(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, error_message = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(&error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_job_counters(&self, id: JobId, counters: &JobCounters) -> StoreResult<()> {
        let counters = serde_json::to_string(counters).map_err(storage)?;

        sqlx::query("UPDATE jobs SET counters = ?, updated_at = ? WHERE id = ?")
            .bind(&counters)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(())
    }

    async fn insert_urls(&self, job_id: JobId, urls: Vec<NewUrl>) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut inserted = 0;

        for url in urls {
            let record = url.into_record(job_id);
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO urls (id, job_id, url, normalized_url, title, snippet, position,
                    source_type, life_context, product_word, indicator, status, selected, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                "#,
            )
            .bind(record.id.to_string())
            .bind(job_id.to_string())
            .bind(&record.url)
            .bind(&record.normalized_url)
            .bind(&record.title)
            .bind(&record.snippet)
            .bind(i64::from(record.position))
            .bind(record.source_type.as_str())
            .bind(&record.life_context)
            .bind(&record.product_word)
            .bind(&record.indicator)
            .bind(record.status.as_str())
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            inserted += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(storage)?;
        Ok(inserted)
    }

    async fn get_url(&self, id: UrlId) -> StoreResult<Option<UrlRecord>> {
        let row = sqlx::query_as::<_, UrlRow>(&format!("SELECT {URL_COLUMNS} FROM urls WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(UrlRow::into_record).transpose()
    }

    async fn list_urls(&self, job_id: JobId, query: &UrlQuery) -> StoreResult<Vec<UrlRecord>> {
        // LIMIT -1 means no limit in SQLite
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        let status = query.status.map(|s| s.as_str());

        let rows = sqlx::query_as::<_, UrlRow>(&format!(
            "SELECT {URL_COLUMNS} FROM urls \
             WHERE job_id = ? AND (? IS NULL OR status = ?) AND (? = 0 OR selected = 1) \
             ORDER BY rowid LIMIT ? OFFSET ?"
        ))
        .bind(job_id.to_string())
        .bind(status)
        .bind(status)
        .bind(query.selected_only)
        .bind(limit)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(UrlRow::into_record).collect()
    }

    async fn count_urls(&self, job_id: JobId, query: &UrlQuery) -> StoreResult<u64> {
        let status = query.status.map(|s| s.as_str());

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM urls \
             WHERE job_id = ? AND (? IS NULL OR status = ?) AND (? = 0 OR selected = 1)",
        )
        .bind(job_id.to_string())
        .bind(status)
        .bind(status)
        .bind(query.selected_only)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(count.0 as u64)
    }

    async fn count_urls_by_status(&self, job_id: JobId) -> StoreResult<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM urls WHERE job_id = ? GROUP BY status")
                .bind(job_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            let status: UrlStatus = status.parse().map_err(|e| corrupt("url status", e))?;
            counts.add(status, n as u64);
        }
        Ok(counts)
    }

    async fn normalized_urls(&self, job_id: JobId) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT normalized_url FROM urls WHERE job_id = ? ORDER BY rowid")
                .bind(job_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;

        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    async fn set_url_selected(&self, id: UrlId, selected: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE urls SET selected = ?, updated_at = ? WHERE id = ?")
            .bind(selected)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition_url(
        &self,
        id: UrlId,
        expected: UrlStatus,
        change: UrlChange,
    ) -> StoreResult<Option<UrlStatus>> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query_as::<_, UrlRow>(&format!("SELECT {URL_COLUMNS} FROM urls WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;

        let Some(mut record) = row.map(UrlRow::into_record).transpose()? else {
            return Ok(None);
        };
        if record.status != expected {
            return Ok(None);
        }
        let Some(next) = next_status(&record, &change) else {
            return Ok(None);
        };
        apply_change_fields(&mut record, &change);
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE urls SET status = ?, content = ?, word_count = ?, title = ?,
                error_message = ?, filtered_reason = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(next.as_str())
        .bind(&record.content)
        .bind(record.word_count.map(i64::from))
        .bind(&record.title)
        .bind(&record.error_message)
        .bind(&record.filtered_reason)
        .bind(&now)
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        if let UrlChange::Extracted { niches } = change {
            for niche in niches {
                let niche = niche.into_niche(record.job_id, record.id);
                sqlx::query(
                    r#"
                    INSERT INTO niches (id, job_id, url_id, problem, persona, functional_cause,
                        emotional_load, evidence, alternatives, source_url, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(niche.id.to_string())
                .bind(niche.job_id.to_string())
                .bind(niche.url_id.to_string())
                .bind(&niche.problem)
                .bind(&niche.persona)
                .bind(&niche.functional_cause)
                .bind(&niche.emotional_load)
                .bind(&niche.evidence)
                .bind(&niche.alternatives)
                .bind(&niche.source_url)
                .bind(niche.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            }
        }

        tx.commit().await.map_err(storage)?;
        Ok(Some(next))
    }

    async fn list_niches(&self, job_id: JobId) -> StoreResult<Vec<Niche>> {
        let rows = sqlx::query_as::<_, NicheRow>(
            "SELECT id, job_id, url_id, problem, persona, functional_cause, emotional_load, evidence, alternatives, source_url, created_at FROM niches WHERE job_id = ? ORDER BY rowid",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(NicheRow::into_niche).collect()
    }

    async fn count_niches(&self, job_id: JobId) -> StoreResult<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM niches WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        Ok(count.0 as u64)
    }

    async fn record_cost(&self, record: &CostRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO costs (id, job_id, cost_type, amount_usd, units, url_id, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.job_id.to_string())
        .bind(record.cost_type.as_str())
        .bind(record.amount_usd)
        .bind(i64::from(record.units))
        .bind(record.url_id.map(|u| u.to_string()))
        .bind(&record.note)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn list_costs(&self, job_id: JobId) -> StoreResult<Vec<CostRecord>> {
        let rows = sqlx::query_as::<_, CostRow>(
            "SELECT id, job_id, cost_type, amount_usd, units, url_id, note, created_at FROM costs WHERE job_id = ? ORDER BY rowid",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(CostRow::into_record).collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CostType, JobConfig, NewNiche, SourceType};

    fn new_url(url: &str) -> NewUrl {
        NewUrl {
            url: url.to_string(),
            normalized_url: url.to_string(),
            title: Some("A thread".to_string()),
            snippet: None,
            position: 3,
            source_type: SourceType::GeneralForum,
            life_context: "boda".to_string(),
            product_word: "fotógrafo".to_string(),
            indicator: Some("me frustra".to_string()),
        }
    }

    async fn store_with_job() -> (SqliteStore, Job) {
        let store = SqliteStore::in_memory().await.unwrap();
        let job = Job::new("project-1", JobConfig::new(["boda"], ["fotógrafo"]));
        store.create_job(&job).await.unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn test_job_roundtrip() {
        let (store, job) = store_with_job().await;

        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.project_id, "project-1");
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.config, job.config);

        store
            .update_job_status(job.id, JobStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_transition_job_checks_expected_status() {
        let (store, job) = store_with_job().await;

        assert!(store
            .transition_job(job.id, JobStatus::Pending, JobStatus::SerpRunning, None)
            .await
            .unwrap());
        assert!(!store
            .transition_job(job.id, JobStatus::Pending, JobStatus::Cancelled, None)
            .await
            .unwrap());

        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::SerpRunning);
    }

    #[tokio::test]
    async fn test_url_dedup_and_listing() {
        let (store, job) = store_with_job().await;

        let inserted = store
            .insert_urls(
                job.id,
                vec![new_url("https://a"), new_url("https://b"), new_url("https://a")],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let urls = store.list_urls(job.id, &UrlQuery::default()).await.unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].url, "https://a");
        assert_eq!(urls[0].indicator.as_deref(), Some("me frustra"));
        assert!(urls[0].selected);

        assert_eq!(
            store.normalized_urls(job.id).await.unwrap(),
            vec!["https://a".to_string(), "https://b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_transition_and_niches() {
        let (store, job) = store_with_job().await;
        store.insert_urls(job.id, vec![new_url("https://a")]).await.unwrap();
        let url_id = store.list_urls(job.id, &UrlQuery::default()).await.unwrap()[0].id;

        let scraped = store
            .transition_url(
                url_id,
                UrlStatus::Pending,
                UrlChange::Scraped {
                    content: "some page text".into(),
                    word_count: 3,
                    title: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(scraped, Some(UrlStatus::Scraped));

        let change = UrlChange::Extracted {
            niches: vec![NewNiche {
                problem: "no encuentro fotógrafo".into(),
                persona: "novia".into(),
                source_url: "https://a".into(),
                ..Default::default()
            }],
        };
        assert_eq!(
            store
                .transition_url(url_id, UrlStatus::Scraped, change.clone())
                .await
                .unwrap(),
            Some(UrlStatus::Extracted)
        );
        assert_eq!(
            store
                .transition_url(url_id, UrlStatus::Scraped, change)
                .await
                .unwrap(),
            None
        );

        let niches = store.list_niches(job.id).await.unwrap();
        assert_eq!(niches.len(), 1);
        assert_eq!(niches[0].url_id, url_id);

        let counts = store.count_urls_by_status(job.id).await.unwrap();
        assert_eq!(counts.extracted, 1);
        assert_eq!(counts.total(), 1);
    }

    #[tokio::test]
    async fn test_selection_and_costs() {
        let (store, job) = store_with_job().await;
        store.insert_urls(job.id, vec![new_url("https://a")]).await.unwrap();
        let url_id = store.list_urls(job.id, &UrlQuery::default()).await.unwrap()[0].id;

        assert!(store.set_url_selected(url_id, false).await.unwrap());
        assert!(!store.set_url_selected(UrlId::new(), false).await.unwrap());
        assert_eq!(
            store
                .count_urls(job.id, &UrlQuery::default().selected_only())
                .await
                .unwrap(),
            0
        );

        store
            .record_cost(&CostRecord::new(job.id, CostType::Firecrawl, 0.001).with_url(url_id))
            .await
            .unwrap();
        let costs = store.list_costs(job.id).await.unwrap();
        assert_eq!(costs.len(), 1);
        assert_eq!(costs[0].url_id, Some(url_id));
        assert_eq!(costs[0].cost_type, CostType::Firecrawl);
    }
}
