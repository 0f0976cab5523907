//! Crawl error taxonomy shared by the FastPath and SlowPath executors.
//!
//! Executors map every transport- and DOM-level observation onto these
//! variants before surfacing to the orchestrator, which therefore never
//! sees a raw `reqwest` or driver error. Messages stay short and free of
//! internal identifiers.

/// Errors an executor can produce for one candidate search.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// The list page rendered but contained zero matches.
    #[error("no product matched the query")]
    ProductNotFound,

    /// The aggregator refused us: 429/403 or an anti-bot page body.
    #[error("request blocked by the target site")]
    Blocked,

    /// The candidate's deadline elapsed before extraction completed.
    #[error("search timed out")]
    Timeout,

    /// Required DOM structure was missing (site template drift).
    #[error("page structure not recognized: {0}")]
    Parse(String),

    /// Transport-level failure below HTTP semantics.
    #[error("network error: {0}")]
    Network(String),

    /// The leased browser page died (frame detached, context closed).
    #[error("browser session lost: {0}")]
    BrowserCrash(String),
}

impl CrawlError {
    /// Blocked and Timeout feed the circuit breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(self, CrawlError::Blocked | CrawlError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages_are_clean() {
        // No file paths, no query text, no internal identifiers.
        assert_eq!(
            CrawlError::ProductNotFound.to_string(),
            "no product matched the query"
        );
        assert_eq!(CrawlError::Timeout.to_string(), "search timed out");
        assert!(CrawlError::Parse("offer table missing".into())
            .to_string()
            .contains("offer table"));
    }

    #[test]
    fn test_breaker_classification() {
        assert!(CrawlError::Blocked.trips_breaker());
        assert!(CrawlError::Timeout.trips_breaker());
        assert!(!CrawlError::ProductNotFound.trips_breaker());
        assert!(!CrawlError::Parse("x".into()).trips_breaker());
        assert!(!CrawlError::Network("refused".into()).trips_breaker());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CrawlError>();
    }
}
