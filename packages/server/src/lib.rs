// Niche Discovery - API Core
//
// HTTP surface over the niche-discovery pipeline: job creation and status,
// URL review and selection, CSV export, and a per-job SSE progress stream.
// Pipeline runs execute in background tasks; all progress lives in the store.

pub mod config;
pub mod server;

pub use config::*;
