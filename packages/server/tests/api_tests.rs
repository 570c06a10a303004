//! HTTP API tests.
//!
//! Each test builds the full router over an in-memory store and mock
//! providers, then drives it with one-shot requests.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use niche_discovery::testing::{MockLlm, MockScrapeProvider, MockSearchProvider};
use serde_json::json;
use tower::ServiceExt;

use crate::common::{TestHarness, ROW};

const UNKNOWN_ID: &str = "0191c3e4-7a1b-7c00-8000-000000000000";

fn generated_url(page: u32, rank: u32) -> String {
    format!("https://www.reddit.com/r/siteredditcomautonomosfacturacion/comments/p{page}r{rank}/")
}

// ============================================================================
// Health and estimates
// ============================================================================

#[tokio::test]
async fn health_reports_store_ok() {
    let harness = TestHarness::new(3);

    let response = harness.get("/health").await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["status"], "ok");
}

#[tokio::test]
async fn estimate_counts_planned_queries() {
    let harness = TestHarness::new(3);

    let response = harness
        .post(
            "/api/estimate",
            Some(json!({
                "life_contexts": ["autonomos", "recien casados"],
                "product_words": ["facturacion"],
                "serp_pages": 2
            })),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    let body = response.json();
    assert_eq!(body["total_combinations"], 2);
    assert_eq!(body["total_queries"], 2);
    assert_eq!(body["total_searches"], 4);
    assert_eq!(harness.search.call_count(), 0);
}

// ============================================================================
// Job creation
// ============================================================================

#[tokio::test]
async fn create_job_returns_id_and_estimate() {
    let harness = TestHarness::new(3);

    let response = harness
        .post(
            "/api/jobs",
            Some(json!({
                "project_id": "proyecto-1",
                "config": { "life_contexts": ["autonomos"], "product_words": ["facturacion"] }
            })),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
    let body = response.json();
    assert!(body["job_id"].is_string());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["estimate"]["total_queries"], 1);
    assert_eq!(harness.store.job_count(), 1);
}

#[tokio::test]
async fn create_job_rejects_invalid_config() {
    let harness = TestHarness::new(3);

    let response = harness
        .post(
            "/api/jobs",
            Some(json!({
                "project_id": "proyecto-1",
                "config": { "life_contexts": ["autonomos"], "product_words": [] }
            })),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["kind"], "invalid_config");
    assert_eq!(harness.store.job_count(), 0);
}

#[tokio::test]
async fn create_job_rejects_blank_project() {
    let harness = TestHarness::new(3);

    let response = harness
        .post(
            "/api/jobs",
            Some(json!({
                "project_id": "  ",
                "config": { "life_contexts": ["autonomos"], "product_words": ["facturacion"] }
            })),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(harness.store.job_count(), 0);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let harness = TestHarness::new(3);

    let response = harness.get(&format!("/api/jobs/{UNKNOWN_ID}")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["kind"], "not_found");

    let response = harness.get("/api/jobs/not-a-uuid").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Running, cancelling, resuming
// ============================================================================

#[tokio::test]
async fn run_completes_job_in_background() {
    let harness = TestHarness::new(3);

    let job_id = harness.completed_job().await;
    let body = harness.get(&format!("/api/jobs/{job_id}")).await.json();

    assert_eq!(body["phase"], "done");
    assert_eq!(body["niches_found"], 3);
    assert_eq!(body["url_counts"]["extracted"], 3);
    assert_eq!(body["job"]["counters"]["urls_total"], 3);
    assert!(body["costs"]["total_usd"].as_f64().unwrap_or(0.0) > 0.0);
    assert_eq!(harness.search.call_count(), 1);
    assert_eq!(harness.llm.call_count(), 3);
}

#[tokio::test]
async fn run_on_finished_job_conflicts() {
    let harness = TestHarness::new(2);
    let job_id = harness.completed_job().await;

    let response = harness.post(&format!("/api/jobs/{job_id}/run"), None).await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(harness.search.call_count(), 1);
}

#[tokio::test]
async fn cancel_then_resume() {
    let harness = TestHarness::new(2);
    let job_id = harness.create_job().await;

    let response = harness.post(&format!("/api/jobs/{job_id}/cancel"), None).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    assert_eq!(response.json()["status"], "cancelled");

    let response = harness.post(&format!("/api/jobs/{job_id}/cancel"), None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["kind"], "invalid_transition");

    let response = harness.post(&format!("/api/jobs/{job_id}/resume"), None).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    assert_ne!(response.json()["status"], "cancelled");

    // Resumed job is no longer terminal
    let response = harness.post(&format!("/api/jobs/{job_id}/resume"), None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = harness.post(&format!("/api/jobs/{job_id}/run"), None).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    let body = harness.wait_for_status(&job_id, "done").await;
    assert_eq!(body["niches_found"], 2);
}

// ============================================================================
// URL review
// ============================================================================

#[tokio::test]
async fn list_urls_paginates_without_content() {
    let harness = TestHarness::new(3);
    let job_id = harness.completed_job().await;

    let response = harness
        .get(&format!("/api/jobs/{job_id}/urls?limit=2"))
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    let body = response.json();
    assert_eq!(body["total"], 3);
    assert_eq!(body["limit"], 2);
    let urls = body["urls"].as_array().cloned().unwrap_or_default();
    assert_eq!(urls.len(), 2);
    assert!(urls[0].get("content").is_none());
    assert_eq!(urls[0]["status"], "extracted");

    let response = harness
        .get(&format!("/api/jobs/{job_id}/urls?status=extracted&offset=2"))
        .await;
    let body = response.json();
    assert_eq!(body["total"], 3);
    assert_eq!(body["urls"].as_array().map(Vec::len), Some(1));

    let response = harness
        .get(&format!("/api/jobs/{job_id}/urls?status=bogus"))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patch_url_selection_scoped_to_job() {
    let harness = TestHarness::new(2);
    let job_id = harness.completed_job().await;
    let other_job = harness.create_job().await;

    let body = harness.get(&format!("/api/jobs/{job_id}/urls")).await.json();
    let url_id = body["urls"][0]["id"].as_str().unwrap().to_string();

    let response = harness
        .patch(
            &format!("/api/jobs/{job_id}/urls/{url_id}"),
            json!({ "selected": false }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    assert_eq!(response.json()["selected"], false);

    let body = harness
        .get(&format!("/api/jobs/{job_id}/urls?selected_only=true"))
        .await
        .json();
    assert_eq!(body["total"], 1);

    let response = harness
        .patch(
            &format!("/api/jobs/{other_job}/urls/{url_id}"),
            json!({ "selected": true }),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retry_rejects_url_that_did_not_fail() {
    let harness = TestHarness::new(1);
    let job_id = harness.completed_job().await;
    let body = harness.get(&format!("/api/jobs/{job_id}/urls")).await.json();
    let url_id = body["urls"][0]["id"].as_str().unwrap().to_string();

    let response = harness
        .post(&format!("/api/jobs/{job_id}/urls/{url_id}/retry"), None)
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["kind"], "invalid_transition");
}

#[tokio::test]
async fn retry_failed_scrape_after_resume() {
    let failing = generated_url(1, 2);
    let harness = TestHarness::with_providers(
        MockSearchProvider::new().with_generated_results(3),
        MockScrapeProvider::new()
            .with_default_content("contenido del hilo")
            .with_failure(failing.clone()),
        MockLlm::new().with_default_response(ROW),
    );
    let job_id = harness.completed_job().await;

    let body = harness
        .get(&format!("/api/jobs/{job_id}/urls?status=failed"))
        .await
        .json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["urls"][0]["url"], failing.as_str());
    let url_id = body["urls"][0]["id"].as_str().unwrap().to_string();

    // The page recovers
    harness.scrape.clone().with_page(failing.clone(), "ya funciona");

    let response = harness
        .post(&format!("/api/jobs/{job_id}/urls/{url_id}/retry"), None)
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    assert_eq!(response.json()["status"], "pending");

    let response = harness.post(&format!("/api/jobs/{job_id}/resume"), None).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    let response = harness.post(&format!("/api/jobs/{job_id}/run"), None).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);

    let body = harness.wait_for_status(&job_id, "done").await;
    assert_eq!(body["url_counts"]["failed"], 0);
    assert_eq!(body["niches_found"], 3);
    assert_eq!(harness.scrape.calls_for(&failing), 2);
}

// ============================================================================
// Export and events
// ============================================================================

#[tokio::test]
async fn export_niches_as_csv() {
    let harness = TestHarness::new(2);
    let job_id = harness.completed_job().await;

    let response = harness
        .get(&format!("/api/jobs/{job_id}/niches/export"))
        .await;

    assert_eq!(response.status, StatusCode::OK, "{}", response.text);
    assert!(response
        .content_type
        .as_deref()
        .unwrap_or_default()
        .starts_with("text/csv"));
    assert!(response
        .disposition
        .as_deref()
        .unwrap_or_default()
        .contains(&format!("niches-{job_id}.csv")));
    let lines: Vec<&str> = response.text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("ID;Problem;Persona;"));
    assert!(lines[1].contains("No sé cuánto IVA cobrar"));

    let response = harness
        .get(&format!("/api/jobs/{job_id}/niches/export?delimiter=,"))
        .await;
    assert!(response.text.starts_with("ID,Problem,Persona,"));

    let response = harness
        .get(&format!("/api/jobs/{job_id}/niches/export?delimiter=ab"))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn events_stream_opens_for_known_job() {
    let harness = TestHarness::new(1);
    let job_id = harness.create_job().await;

    let request = Request::builder()
        .uri(format!("/api/jobs/{job_id}/events"))
        .body(Body::empty())
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let response = harness.get(&format!("/api/jobs/{UNKNOWN_ID}/events")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
