//! Test harness: the full router over `MemoryStore` and mock providers.
//!
//! Requests go through `tower::ServiceExt::oneshot`, so no socket is bound.
//! Run with `RUST_LOG=debug cargo test -- --nocapture` to see pipeline logs.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use niche_discovery::{
    testing::{MockLlm, MockScrapeProvider, MockSearchProvider},
    BroadcastEventBus, DiscoveryPipeline, MemoryStore, PipelineConfig, RetryPolicy,
};
use serde_json::Value;
use server_core::server::{build_app, AppState};

/// One niche row in the extractor's output format.
pub const ROW: &str = "\"Problem\";\"Persona\";\"Functional Cause\";\"Emotional Load\";\"Evidence\";\"Alternatives\";\"URL\"\n\
\"No sé cuánto IVA cobrar\";\"Autónomo primerizo\";\"Normativa confusa\";\"Ansiedad\";\"nadie me lo explica\";\"Gestoría\";\"\"";

pub struct TestHarness {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub search: MockSearchProvider,
    pub scrape: MockScrapeProvider,
    pub llm: MockLlm,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub disposition: Option<String>,
    pub text: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }
}

impl TestHarness {
    /// Every generated URL scrapes to a short page; every page yields one niche.
    pub fn new(results_per_page: u32) -> Self {
        Self::with_providers(
            MockSearchProvider::new().with_generated_results(results_per_page),
            MockScrapeProvider::new().with_default_content("contenido del hilo"),
            MockLlm::new().with_default_response(ROW),
        )
    }

    pub fn with_providers(
        search: MockSearchProvider,
        scrape: MockScrapeProvider,
        llm: MockLlm,
    ) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let events = BroadcastEventBus::new();
        let pipeline = DiscoveryPipeline::builder(
            store.clone(),
            Arc::new(search.clone()),
            Arc::new(scrape.clone()),
            Arc::new(llm.clone()),
        )
        .with_events(Arc::new(events.clone()))
        .with_config(PipelineConfig::default().with_retry(RetryPolicy::no_retry()))
        .build();

        let app = build_app(AppState::new(Arc::new(pipeline), events), &[]);

        Self {
            app,
            store,
            search,
            scrape,
            llm,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        use tower::ServiceExt;

        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let header_value = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header_value(header::CONTENT_TYPE);
        let disposition = header_value(header::CONTENT_DISPOSITION);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        TestResponse {
            status,
            content_type,
            disposition,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Option<Value>) -> TestResponse {
        self.request(Method::POST, uri, body).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::PATCH, uri, Some(body)).await
    }

    /// Create a single-pair job and return its id.
    pub async fn create_job(&self) -> String {
        let response = self
            .post(
                "/api/jobs",
                Some(serde_json::json!({
                    "project_id": "proyecto-1",
                    "config": {
                        "life_contexts": ["autonomos"],
                        "product_words": ["facturacion"],
                        "serp_pages": 1,
                        "batch_size": 2
                    }
                })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
        response.json()["job_id"]
            .as_str()
            .map(str::to_string)
            .unwrap()
    }

    /// Poll the status endpoint until the job reaches `status`.
    pub async fn wait_for_status(&self, job_id: &str, status: &str) -> Value {
        for _ in 0..200 {
            let body = self.get(&format!("/api/jobs/{job_id}")).await.json();
            if body["job"]["status"] == status && body["running"] == false {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached {status}");
    }

    /// Create and run a job to completion.
    pub async fn completed_job(&self) -> String {
        let job_id = self.create_job().await;
        let response = self.post(&format!("/api/jobs/{job_id}/run"), None).await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{}", response.text);
        self.wait_for_status(&job_id, "done").await;
        job_id
    }
}
