use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub serper_api_key: String,
    pub firecrawl_api_key: String,
    pub openrouter_api_key: String,
    pub extraction_model: String,
    /// OpenAI-compatible endpoint; OpenRouter when unset
    pub llm_base_url: Option<String>,
    pub search_requests_per_second: u32,
    pub estimate_fill_rate: Option<f64>,
    pub estimate_dedup_rate: Option<f64>,
    /// Empty means any origin
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://niche_discovery.db?mode=rwc".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            serper_api_key: env::var("SERPER_API_KEY").context("SERPER_API_KEY must be set")?,
            firecrawl_api_key: env::var("FIRECRAWL_API_KEY")
                .context("FIRECRAWL_API_KEY must be set")?,
            openrouter_api_key: env::var("OPENROUTER_API_KEY")
                .context("OPENROUTER_API_KEY must be set")?,
            extraction_model: env::var("EXTRACTION_MODEL")
                .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string()),
            llm_base_url: env::var("LLM_BASE_URL").ok().filter(|v| !v.trim().is_empty()),
            search_requests_per_second: env::var("SEARCH_REQUESTS_PER_SECOND")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("SEARCH_REQUESTS_PER_SECOND must be a valid number")?,
            estimate_fill_rate: parse_optional_rate("ESTIMATE_FILL_RATE")?,
            estimate_dedup_rate: parse_optional_rate("ESTIMATE_DEDUP_RATE")?,
            allowed_origins: parse_origins(&env::var("ALLOWED_ORIGINS").unwrap_or_default()),
        })
    }
}

fn parse_optional_rate(name: &str) -> Result<Option<f64>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a number")),
        _ => Ok(None),
    }
}

/// Comma-separated origins; blanks dropped.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
