//! Integration tests for the full discovery pipeline.
//!
//! These drive jobs end to end against `MemoryStore` and the mock
//! providers:
//! 1. Plan and validate
//! 2. Search and dedup
//! 3. Scrape under bounded concurrency
//! 4. Extract and parse
//! 5. Cost accounting, cancellation and resume

use std::sync::Arc;
use std::time::Duration;

use niche_discovery::{
    testing::{MockLlm, MockScrapeProvider, MockSearchProvider},
    types::{NewUrl, UrlChange},
    BroadcastEventBus, ConfigValidationError, CostType, DiscoveryError, DiscoveryPipeline,
    DiscoveryStore, JobConfig, JobStatus, MemoryStore, PipelineConfig, PipelineEvent,
    QueryPlanner, ResultsAggregator, RetryPolicy, SearchHit, SourceType, SourcesConfig, UrlQuery,
    UrlStatus,
};

const ROW: &str = "\"Problem\";\"Persona\";\"Functional Cause\";\"Emotional Load\";\"Evidence\";\"Alternatives\";\"URL\"\n\
\"No sé cuánto IVA cobrar\";\"Autónomo primerizo\";\"Normativa confusa\";\"Ansiedad\";\"nadie me lo explica\";\"Gestoría\";\"\"";

struct Harness {
    store: Arc<MemoryStore>,
    search: MockSearchProvider,
    scrape: MockScrapeProvider,
    llm: MockLlm,
    pipeline: Arc<DiscoveryPipeline>,
}

/// Helper to wire a pipeline around mock providers with retries disabled.
fn harness(search: MockSearchProvider, scrape: MockScrapeProvider, llm: MockLlm) -> Harness {
    harness_with_events(search, scrape, llm, None)
}

fn harness_with_events(
    search: MockSearchProvider,
    scrape: MockScrapeProvider,
    llm: MockLlm,
    events: Option<BroadcastEventBus>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mut builder = DiscoveryPipeline::builder(
        store.clone(),
        Arc::new(search.clone()),
        Arc::new(scrape.clone()),
        Arc::new(llm.clone()),
    )
    .with_config(PipelineConfig::default().with_retry(RetryPolicy::no_retry()));
    if let Some(events) = events {
        builder = builder.with_events(Arc::new(events));
    }

    Harness {
        store,
        search,
        scrape,
        llm,
        pipeline: Arc::new(builder.build()),
    }
}

/// URL the mock search generates for the single-pair query.
fn generated_url(page: u32, rank: u32) -> String {
    format!("https://www.reddit.com/r/siteredditcomautonomosfacturacion/comments/p{page}r{rank}/")
}

fn single_pair() -> JobConfig {
    JobConfig::new(["autonomos"], ["facturacion"])
        .with_sources(SourcesConfig::reddit_only())
        .with_serp_pages(1)
}

#[tokio::test]
async fn test_single_pair_plans_one_query_and_at_most_ten_results() {
    let h = harness(
        MockSearchProvider::new().with_generated_results(10),
        MockScrapeProvider::new().with_default_content("contenido"),
        MockLlm::new(),
    );

    let plan = QueryPlanner::default().plan(&single_pair()).unwrap();
    assert_eq!(plan.queries.len(), 1);
    assert_eq!(plan.queries[0].query, "site:reddit.com \"autonomos\" \"facturacion\"");

    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();
    let outcome = h.pipeline.run(job.id).await.unwrap();

    assert_eq!(h.search.call_count(), 1);
    assert!(outcome.counters.urls_total <= 10);
    assert_eq!(outcome.counters.urls_total, 10);
}

#[tokio::test]
async fn test_limits_rejected_before_any_provider_call() {
    let h = harness(
        MockSearchProvider::new().with_generated_results(10),
        MockScrapeProvider::new(),
        MockLlm::new(),
    );
    let contexts: Vec<String> = (0..11).map(|i| format!("contexto {i}")).collect();
    let words: Vec<String> = (0..10).map(|i| format!("palabra {i}")).collect();

    let err = h
        .pipeline
        .create_job("p1", JobConfig::new(contexts, words))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::Config(ConfigValidationError::TooManyCombinations {
            max: 100,
            actual: 110,
            ..
        })
    ));
    assert_eq!(h.search.call_count(), 0);
    assert_eq!(h.store.job_count(), 0);
}

#[tokio::test]
async fn test_duplicate_urls_across_queries_and_pages_stored_once() {
    let shared = "https://www.reddit.com/r/autonomos/comments/abc/facturas/";
    let q1 = "site:reddit.com \"autonomos\" \"facturacion\"";
    let q2 = "site:reddit.com \"autonomos\" \"impuestos\"";
    let search = MockSearchProvider::new()
        .with_page(q1, 1, vec![SearchHit::new(shared, 1)])
        .with_page(
            q1,
            2,
            vec![SearchHit::new("https://reddit.com/r/autonomos/comments/abc/facturas", 3)],
        )
        .with_page(
            q2,
            1,
            vec![
                SearchHit::new(format!("{shared}?utm_source=share"), 1),
                SearchHit::new("https://reddit.com/r/autonomos/comments/def", 2),
            ],
        );
    let h = harness(
        search,
        MockScrapeProvider::new().with_default_content("contenido"),
        MockLlm::new(),
    );
    let config = JobConfig::new(["autonomos"], ["facturacion", "impuestos"])
        .with_sources(SourcesConfig::reddit_only())
        .with_serp_pages(2);

    let job = h.pipeline.create_job("p1", config).await.unwrap();
    h.pipeline.run(job.id).await.unwrap();

    let urls = h.store.list_urls(job.id, &UrlQuery::default()).await.unwrap();
    assert_eq!(urls.len(), 2);
    let first = urls
        .iter()
        .find(|u| u.normalized_url == "https://reddit.com/r/autonomos/comments/abc/facturas")
        .unwrap();
    assert_eq!(first.position, 1);
    assert_eq!(first.product_word, "facturacion");
}

#[tokio::test]
async fn test_ignorar_output_filters_url() {
    let h = harness(
        MockSearchProvider::new().with_generated_results(1),
        MockScrapeProvider::new().with_default_content("hilo sin relación"),
        MockLlm::new().with_default_response("IGNORAR - not relevant"),
    );

    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();
    let outcome = h.pipeline.run(job.id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Done);
    assert_eq!(outcome.counters.urls_filtered, 1);
    assert_eq!(outcome.counters.niches_found, 0);
    let urls = h.store.list_urls(job.id, &UrlQuery::default()).await.unwrap();
    assert_eq!(urls[0].status, UrlStatus::Filtered);
    assert_eq!(urls[0].filtered_reason.as_deref(), Some("not relevant"));
}

#[tokio::test]
async fn test_malformed_line_skipped_without_failing() {
    let output = "\"Facturas\";\"Autónomo\";\"Clientes\";\"Estrés\";\"cita\";\"Excel\";\"\"\n\
                  \"Cobros\";\"Freelance\";\"Retrasos\";\"Miedo\";\"cita\";\"Alt";
    let h = harness(
        MockSearchProvider::new().with_generated_results(1),
        MockScrapeProvider::new().with_default_content("hilo"),
        MockLlm::new().with_default_response(output),
    );

    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();
    let outcome = h.pipeline.run(job.id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Done);
    assert_eq!(outcome.counters.urls_extracted, 1);
    let niches = h.store.list_niches(job.id).await.unwrap();
    assert_eq!(niches.len(), 1);
    assert_eq!(niches[0].problem, "Facturas");
    // Falls back to the page URL
    assert!(niches[0].source_url.starts_with("https://www.reddit.com/r/"));
}

#[tokio::test]
async fn test_resumed_extraction_does_not_duplicate_niches() {
    let h = harness(
        MockSearchProvider::new().with_generated_results(4),
        MockScrapeProvider::new().with_default_content("contenido"),
        MockLlm::new().with_default_response(ROW),
    );
    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();
    h.pipeline.run(job.id).await.unwrap();
    let niches_before = h.store.count_niches(job.id).await.unwrap();
    let llm_calls = h.llm.call_count();

    assert_eq!(h.pipeline.resume(job.id).await.unwrap(), JobStatus::ScrapeDone);
    let outcome = h.pipeline.run(job.id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Done);
    assert_eq!(h.store.count_niches(job.id).await.unwrap(), niches_before);
    assert_eq!(niches_before, 4);
    assert_eq!(h.llm.call_count(), llm_calls);
}

#[tokio::test]
async fn test_cost_ledger_matches_reported_total() {
    let h = harness(
        MockSearchProvider::new().with_generated_results(5),
        MockScrapeProvider::new().with_default_content("contenido"),
        MockLlm::new().with_default_response(ROW),
    );
    let config = single_pair().with_serp_pages(2);
    let job = h.pipeline.create_job("p1", config).await.unwrap();

    let outcome = h.pipeline.run(job.id).await.unwrap();
    let summary = h.pipeline.ledger().summary(job.id).await.unwrap();

    let sum = summary.total_for(CostType::Serp)
        + summary.total_for(CostType::Firecrawl)
        + summary.total_for(CostType::LlmExtraction);
    assert!((sum - summary.total_usd).abs() < 1e-9);
    assert!((summary.total_usd - outcome.counters.total_cost_usd).abs() < 1e-9);
    assert_eq!(summary.serp_calls, 2);
    assert_eq!(summary.firecrawl_calls, 10);
    assert_eq!(summary.llm_calls, 10);
}

#[tokio::test]
async fn test_item_failures_do_not_fail_the_job() {
    let h = harness(
        MockSearchProvider::new().with_generated_results(3),
        MockScrapeProvider::new()
            .with_default_content("contenido")
            .with_failure(generated_url(1, 2)),
        MockLlm::new()
            .with_default_response(ROW)
            .with_response_for("rompe", "Lo siento, no puedo procesar esto."),
    );
    h.scrape.clone().with_page(generated_url(1, 3), "esto rompe el modelo");
    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();

    let outcome = h.pipeline.run(job.id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Done);
    assert_eq!(outcome.counters.urls_extracted, 1);
    assert_eq!(outcome.counters.urls_failed, 2);
    let failed = h
        .store
        .list_urls(job.id, &UrlQuery::default().with_status(UrlStatus::Failed))
        .await
        .unwrap();
    assert!(failed.iter().all(|u| u.error_message.is_some()));
    // The extraction failure keeps its content for a retry
    let unparsed = failed.iter().find(|u| u.url == generated_url(1, 3)).unwrap();
    assert!(unparsed.content.is_some());
}

#[tokio::test]
async fn test_failed_scrape_retried_after_resume() {
    let target = generated_url(1, 1);
    let h = harness(
        MockSearchProvider::new().with_generated_results(2),
        MockScrapeProvider::new()
            .with_default_content("contenido")
            .with_failure(target.clone()),
        MockLlm::new().with_default_response(ROW),
    );
    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();
    let first = h.pipeline.run(job.id).await.unwrap();
    assert_eq!(first.status, JobStatus::Done);
    assert_eq!(first.counters.urls_failed, 1);

    let failed = h
        .store
        .list_urls(job.id, &UrlQuery::default().with_status(UrlStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed[0].url, target);

    // Provider recovers; the operator retries and resumes
    h.scrape.clone().with_page(target.clone(), "contenido nuevo");
    assert_eq!(h.pipeline.retry_url(failed[0].id).await.unwrap(), UrlStatus::Pending);
    assert_eq!(h.pipeline.resume(job.id).await.unwrap(), JobStatus::SerpDone);
    let second = h.pipeline.run(job.id).await.unwrap();

    assert_eq!(second.status, JobStatus::Done);
    assert_eq!(second.counters.urls_failed, 0);
    assert_eq!(second.counters.urls_extracted, 2);
    assert_eq!(h.scrape.calls_for(&target), 2);
}

#[tokio::test]
async fn test_retry_rejected_for_non_failed_url() {
    let h = harness(
        MockSearchProvider::new().with_generated_results(1),
        MockScrapeProvider::new().with_default_content("contenido"),
        MockLlm::new().with_default_response(ROW),
    );
    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();
    h.pipeline.run(job.id).await.unwrap();
    let url = h.store.list_urls(job.id, &UrlQuery::default()).await.unwrap().remove(0);

    assert!(matches!(
        h.pipeline.retry_url(url.id).await,
        Err(DiscoveryError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn test_unselected_urls_skip_extraction() {
    let h = harness(
        MockSearchProvider::new(),
        MockScrapeProvider::new(),
        MockLlm::new().with_default_response(ROW),
    );
    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();

    // A job paused between scrape and extract
    let new_urls = (1..=3)
        .map(|rank| NewUrl {
            url: generated_url(1, rank),
            normalized_url: generated_url(1, rank),
            title: None,
            snippet: None,
            position: rank,
            source_type: SourceType::Reddit,
            life_context: "autonomos".to_string(),
            product_word: "facturacion".to_string(),
            indicator: None,
        })
        .collect();
    h.store.insert_urls(job.id, new_urls).await.unwrap();
    for url in h.store.list_urls(job.id, &UrlQuery::default()).await.unwrap() {
        h.store
            .transition_url(
                url.id,
                UrlStatus::Pending,
                UrlChange::Scraped {
                    content: "uno dos tres".to_string(),
                    word_count: 3,
                    title: None,
                },
            )
            .await
            .unwrap();
    }
    h.store
        .update_job_status(job.id, JobStatus::ScrapeDone, None)
        .await
        .unwrap();

    let urls = h.store.list_urls(job.id, &UrlQuery::default()).await.unwrap();
    h.pipeline.set_selected(urls[0].id, false).await.unwrap();

    let results = ResultsAggregator::new(h.store.clone(), QueryPlanner::default());
    let page = results.list_urls(job.id, &UrlQuery::default()).await.unwrap();
    assert_eq!(page.selection.scraped, 3);
    assert_eq!(page.selection.selected, 2);
    assert_eq!(page.selection.selected_words, 6);

    let outcome = h.pipeline.run(job.id).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Done);
    assert_eq!(h.llm.call_count(), 2);
    assert_eq!(outcome.counters.urls_extracted, 2);
    assert_eq!(outcome.counters.urls_scraped, 1);
    let summary = h.pipeline.ledger().summary(job.id).await.unwrap();
    assert_eq!(summary.llm_calls, 2);
}

#[tokio::test]
async fn test_cancel_mid_scrape_keeps_in_flight_results() {
    let h = harness(
        MockSearchProvider::new().with_generated_results(10),
        MockScrapeProvider::new()
            .with_default_content("contenido")
            .with_delay(Duration::from_millis(40)),
        MockLlm::new().with_default_response(ROW),
    );
    let job = h
        .pipeline
        .create_job("p1", single_pair().with_batch_size(1))
        .await
        .unwrap();

    let pipeline = h.pipeline.clone();
    let run = tokio::spawn(async move { pipeline.run(job.id).await });

    while h.scrape.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.pipeline.cancel(job.id).await.unwrap(), JobStatus::Cancelled);
    let outcome = run.await.unwrap().unwrap();

    assert_eq!(outcome.status, JobStatus::Cancelled);
    let counts = h.store.count_urls_by_status(job.id).await.unwrap();
    assert!(counts.scraped >= 1, "in-flight scrape result must be kept");
    assert!(counts.pending >= 1, "no new work after cancel");
    assert_eq!(h.llm.call_count(), 0);
    assert!(!h.pipeline.is_running(job.id));

    assert_eq!(h.pipeline.resume(job.id).await.unwrap(), JobStatus::SerpDone);
    let resumed = h.pipeline.run(job.id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Done);
    assert_eq!(resumed.counters.urls_extracted, 10);
    // Every URL scraped exactly once across both runs
    assert_eq!(h.scrape.call_count(), 10);
}

#[tokio::test]
async fn test_events_published_for_each_stage() {
    let events = BroadcastEventBus::new();
    let h = harness_with_events(
        MockSearchProvider::new().with_generated_results(1),
        MockScrapeProvider::new().with_default_content("contenido"),
        MockLlm::new().with_default_response(ROW),
        Some(events.clone()),
    );
    let job = h.pipeline.create_job("p1", single_pair()).await.unwrap();
    let mut rx = events.subscribe(job.id).await;

    h.pipeline.run(job.id).await.unwrap();

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
        if let PipelineEvent::JobFinished { status, .. } = event {
            assert_eq!(status, JobStatus::Done);
        }
    }
    assert_eq!(
        names,
        vec![
            "stage.started",
            "stage.completed",
            "stage.started",
            "url.status_changed",
            "stage.completed",
            "stage.started",
            "url.status_changed",
            "stage.completed",
            "job.finished",
        ]
    );
}
