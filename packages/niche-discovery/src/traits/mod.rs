//! Trait seams for external collaborators.
//!
//! Providers and the store are injected as `Arc<dyn Trait>` so tests can
//! substitute the doubles in [`crate::testing`].

pub mod llm;
pub mod scraper;
pub mod searcher;
pub mod store;

pub use llm::{Completion, LlmProvider};
pub use scraper::{ScrapeProvider, ScrapedPage};
pub use searcher::{SearchHit, SearchPage, SearchProvider};
pub use store::DiscoveryStore;
