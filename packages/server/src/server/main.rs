// Main entry point for the niche discovery API server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use niche_discovery::{
    BroadcastEventBus, DiscoveryPipeline, EstimateHeuristics, FirecrawlScraper, OpenRouterLlm,
    RateLimitedSearcher, SerperSearcher, SqliteStore,
};
use server_core::{
    server::{build_app, AppState},
    Config,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,server_core=debug,niche_discovery=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting niche discovery API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(model = %config.extraction_model, "Configuration loaded");

    // Open store (schema is created on connect)
    tracing::info!("Opening database...");
    let store = SqliteStore::new(&config.database_url)
        .await
        .context("Failed to open database")?;
    tracing::info!("Database ready");

    // Providers
    let searcher = RateLimitedSearcher::new(
        SerperSearcher::new(config.serper_api_key.clone())
            .context("Failed to build search client")?,
        config.search_requests_per_second,
    );
    let scraper =
        FirecrawlScraper::new(config.firecrawl_api_key.clone()).context("Failed to build scraper")?;
    let mut llm = OpenRouterLlm::new(config.openrouter_api_key.clone())
        .context("Failed to build LLM client")?
        .with_model(config.extraction_model.clone());
    if let Some(base_url) = &config.llm_base_url {
        llm = llm.with_base_url(base_url.clone());
    }

    let mut heuristics = EstimateHeuristics::default();
    if let Some(fill_rate) = config.estimate_fill_rate {
        heuristics = heuristics.with_fill_rate(fill_rate);
    }
    if let Some(dedup_rate) = config.estimate_dedup_rate {
        heuristics = heuristics.with_dedup_rate(dedup_rate);
    }

    let events = BroadcastEventBus::new();
    let pipeline = DiscoveryPipeline::builder(
        Arc::new(store),
        Arc::new(searcher),
        Arc::new(scraper),
        Arc::new(llm),
    )
    .with_events(Arc::new(events.clone()))
    .with_heuristics(heuristics)
    .build();

    // Drop SSE channels nobody listens to
    let cleanup_events = events.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            cleanup_events.cleanup().await;
        }
    });

    let app = build_app(
        AppState::new(Arc::new(pipeline), events),
        &config.allowed_origins,
    );

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
