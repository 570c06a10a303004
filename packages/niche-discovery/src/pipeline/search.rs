//! Search stage: planned queries to deduplicated `pending` URLs.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::retry::with_retry;
use super::{Stage, StageReport};
use crate::error::Result;
use crate::filter::{normalize_url, QualityFilter};
use crate::ledger::CostLedger;
use crate::planner::{QueryPlan, SearchQuery};
use crate::traits::{DiscoveryStore, SearchHit, SearchProvider};
use crate::types::{CostType, JobId, NewUrl, PipelineConfig};

/// Results per SERP page; used to turn per-page rank into an overall position.
const RESULTS_PER_PAGE: u32 = 10;

/// Runs a job's query plan against the search provider.
///
/// Queries run one after another; the pages of one query fan out up to
/// `PipelineConfig::search_concurrency`. A failed page is logged and
/// skipped. URLs are deduplicated by normalized form across every page and
/// query of the job, including URLs stored by an earlier run.
pub struct SearchExecutor {
    searcher: Arc<dyn SearchProvider>,
    store: Arc<dyn DiscoveryStore>,
    ledger: CostLedger,
    config: PipelineConfig,
}

impl SearchExecutor {
    pub fn new(
        searcher: Arc<dyn SearchProvider>,
        store: Arc<dyn DiscoveryStore>,
        config: PipelineConfig,
    ) -> Self {
        let ledger = CostLedger::new(store.clone());
        Self {
            searcher,
            store,
            ledger,
            config,
        }
    }

    pub async fn run(
        &self,
        job_id: JobId,
        plan: &QueryPlan,
        cancel: &CancellationToken,
    ) -> Result<StageReport> {
        let mut report = StageReport::new(Stage::Search);
        let mut seen: HashSet<String> = self
            .store
            .normalized_urls(job_id)
            .await?
            .into_iter()
            .collect();

        tracing::info!(
            job_id = %job_id,
            queries = plan.queries.len(),
            serp_pages = plan.serp_pages,
            known_urls = seen.len(),
            "search stage started"
        );

        for query in &plan.queries {
            if cancel.is_cancelled() {
                tracing::info!(job_id = %job_id, "search cancelled");
                report.cancelled = true;
                break;
            }
            self.run_query(job_id, query, plan.serp_pages, &mut seen, &mut report)
                .await?;
        }

        tracing::info!(
            job_id = %job_id,
            pages_ok = report.succeeded,
            pages_failed = report.failed,
            urls_found = report.urls_found,
            cost_usd = report.cost_usd,
            "search stage finished"
        );
        Ok(report)
    }

    async fn run_query(
        &self,
        job_id: JobId,
        query: &SearchQuery,
        serp_pages: u32,
        seen: &mut HashSet<String>,
        report: &mut StageReport,
    ) -> Result<()> {
        let provider = self.searcher.name();
        let mut pages: Vec<_> = stream::iter(1..=serp_pages)
            .map(move |page| async move {
                let result = with_retry(&self.config.retry, provider, move || {
                    self.searcher.search(&query.query, page)
                })
                .await;
                (page, result)
            })
            .buffer_unordered(self.config.search_concurrency.max(1))
            .collect()
            .await;
        // Rank order across pages decides which duplicate wins
        pages.sort_by_key(|(page, _)| *page);

        let filter = QualityFilter::for_query(&query.query, self.config.min_url_quality);
        let mut new_urls = Vec::new();
        let mut dropped = 0;

        for (page, result) in pages {
            report.dispatched += 1;
            let search_page = match result {
                Ok(search_page) => search_page,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        query = %query.query,
                        page,
                        error = %e,
                        "search page failed, skipping"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            report.succeeded += 1;
            report.cost_usd += search_page.cost_usd;
            self.ledger
                .charge(job_id, CostType::Serp, search_page.cost_usd, None)
                .await?;

            tracing::debug!(
                query = %query.query,
                page,
                results = search_page.results.len(),
                "search page received"
            );

            for hit in search_page.results {
                let Some(normalized) = normalize_url(&hit.url) else {
                    tracing::debug!(url = %hit.url, "dropping unparseable result url");
                    continue;
                };
                if !filter.accepts(&hit.url) {
                    dropped += 1;
                    continue;
                }
                if !seen.insert(normalized.clone()) {
                    continue;
                }
                new_urls.push(to_new_url(query, page, hit, normalized));
            }
        }

        if dropped > 0 {
            tracing::info!(query = %query.query, dropped, "low-quality results filtered");
        }
        report.filtered += dropped;

        if !new_urls.is_empty() {
            report.urls_found += self.store.insert_urls(job_id, new_urls).await?;
        }
        Ok(())
    }
}

fn to_new_url(query: &SearchQuery, page: u32, hit: SearchHit, normalized_url: String) -> NewUrl {
    NewUrl {
        url: hit.url,
        normalized_url,
        title: Some(hit.title).filter(|t| !t.trim().is_empty()),
        snippet: hit.snippet,
        position: (page - 1) * RESULTS_PER_PAGE + hit.rank,
        source_type: query.source_type,
        life_context: query.life_context.clone(),
        product_word: query.product_word.clone(),
        indicator: query.indicator.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::QueryPlanner;
    use crate::stores::MemoryStore;
    use crate::testing::MockSearchProvider;
    use crate::types::{JobConfig, RetryPolicy, SourcesConfig, UrlQuery};

    fn config() -> PipelineConfig {
        PipelineConfig::default().with_retry(RetryPolicy::no_retry())
    }

    fn single_query_plan(pages: u32) -> QueryPlan {
        let job_config = JobConfig::new(["autonomos"], ["facturacion"]).with_serp_pages(pages);
        QueryPlanner::default().plan(&job_config).unwrap()
    }

    const QUERY: &str = "site:reddit.com \"autonomos\" \"facturacion\"";

    #[tokio::test]
    async fn test_dedups_across_pages() {
        let search = MockSearchProvider::new()
            .with_page(
                QUERY,
                1,
                vec![
                    SearchHit::new("https://www.reddit.com/r/a/comments/1/", 1),
                    SearchHit::new("https://reddit.com/r/a/comments/2", 2),
                ],
            )
            .with_page(
                QUERY,
                2,
                vec![
                    SearchHit::new("https://reddit.com/r/a/comments/1?utm_source=x", 1),
                    SearchHit::new("https://reddit.com/r/a/comments/3", 2),
                ],
            );
        let store = Arc::new(MemoryStore::new());
        let executor = SearchExecutor::new(Arc::new(search), store.clone(), config());
        let job_id = JobId::new();

        let report = executor
            .run(job_id, &single_query_plan(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.urls_found, 3);
        assert_eq!(report.succeeded, 2);
        let urls = store.list_urls(job_id, &UrlQuery::default()).await.unwrap();
        let first = urls
            .iter()
            .find(|u| u.normalized_url == "https://reddit.com/r/a/comments/1")
            .unwrap();
        // First occurrence (page 1, rank 1) wins
        assert_eq!(first.position, 1);
        assert_eq!(urls.iter().find(|u| u.url.ends_with("/3")).unwrap().position, 12);
    }

    #[tokio::test]
    async fn test_failed_page_is_skipped_and_not_billed() {
        let search = MockSearchProvider::new()
            .with_page(QUERY, 1, vec![SearchHit::new("https://reddit.com/r/a/comments/1", 1)])
            .with_failing_page(QUERY, 2);
        let store = Arc::new(MemoryStore::new());
        let executor = SearchExecutor::new(Arc::new(search), store.clone(), config());
        let job_id = JobId::new();

        let report = executor
            .run(job_id, &single_query_plan(3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.dispatched, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.urls_found, 1);
        // Two successful pages (one empty) billed
        assert_eq!(store.list_costs(job_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_seeded_with_stored_urls() {
        let hits = vec![SearchHit::new("https://reddit.com/r/a/comments/1", 1)];
        let search = MockSearchProvider::new().with_page(QUERY, 1, hits);
        let store = Arc::new(MemoryStore::new());
        let executor = SearchExecutor::new(Arc::new(search), store.clone(), config());
        let job_id = JobId::new();
        let plan = single_query_plan(1);

        let first = executor.run(job_id, &plan, &CancellationToken::new()).await.unwrap();
        let second = executor.run(job_id, &plan, &CancellationToken::new()).await.unwrap();

        assert_eq!(first.urls_found, 1);
        assert_eq!(second.urls_found, 0);
        assert_eq!(store.url_count(), 1);
    }

    #[tokio::test]
    async fn test_quality_filter_applies_to_open_web_queries() {
        let query = "site:example.org \"autonomos\" \"facturacion\"";
        let search = MockSearchProvider::new().with_page(
            query,
            1,
            vec![
                SearchHit::new("https://medium.com/@x/post", 1),
                SearchHit::new("https://example.org/forum/thread/9", 2),
            ],
        );
        let job_config = JobConfig::new(["autonomos"], ["facturacion"])
            .with_sources(SourcesConfig::default().with_reddit(false).with_general_forum("example.org"))
            .with_serp_pages(1);
        let plan = QueryPlanner::default().plan(&job_config).unwrap();
        let store = Arc::new(MemoryStore::new());
        let executor = SearchExecutor::new(Arc::new(search), store.clone(), config());

        let report = executor
            .run(JobId::new(), &plan, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.filtered, 1);
        assert_eq!(report.urls_found, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_issues_no_calls() {
        let search = Arc::new(MockSearchProvider::new().with_generated_results(5));
        let store = Arc::new(MemoryStore::new());
        let executor = SearchExecutor::new(search.clone(), store, config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = executor.run(JobId::new(), &single_query_plan(2), &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(search.call_count(), 0);
    }
}
