//! Rate-limited search wrapper.
//!
//! Wraps any `SearchProvider` with a governor rate limiter so page fan-out
//! stays within the provider's request quota.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::ProviderResult;
use crate::traits::searcher::{SearchPage, SearchProvider};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A search provider wrapper that enforces a request rate.
pub struct RateLimitedSearcher<S: SearchProvider> {
    inner: S,
    limiter: Arc<DefaultRateLimiter>,
}

impl<S: SearchProvider> RateLimitedSearcher<S> {
    /// `requests_per_second` of zero is treated as one.
    pub fn new(searcher: S, requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        Self::with_quota(searcher, Quota::per_second(rps))
    }

    /// Sustained rate plus a burst allowance.
    pub fn with_burst(searcher: S, requests_per_second: u32, burst: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(burst).unwrap_or(rps);
        Self::with_quota(searcher, Quota::per_second(rps).allow_burst(burst))
    }

    pub fn with_quota(searcher: S, quota: Quota) -> Self {
        Self {
            inner: searcher,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: SearchProvider> SearchProvider for RateLimitedSearcher<S> {
    async fn search(&self, query: &str, page: u32) -> ProviderResult<SearchPage> {
        self.limiter.until_ready().await;
        self.inner.search(query, page).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSearchProvider;
    use crate::traits::searcher::SearchHit;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_delegates_to_inner() {
        let mock = MockSearchProvider::new()
            .with_page("q", 1, vec![SearchHit::new("https://reddit.com/r/a", 1)]);
        let searcher = RateLimitedSearcher::new(mock, 100);

        let page = searcher.search("q", 1).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(searcher.inner().call_count(), 1);
        assert_eq!(searcher.name(), "mock-search");
    }

    #[tokio::test]
    async fn test_limits_rate() {
        let searcher = RateLimitedSearcher::with_burst(MockSearchProvider::new(), 10, 1);

        let start = Instant::now();
        for page in 1..=3 {
            searcher.search("q", page).await.unwrap();
        }
        // Burst of one at 10 rps: two waits of ~100ms
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
