//! SlowPath executor: the same extraction contract as FastPath, driven
//! through a pooled headless-browser page for cases where the HTTP path
//! is blocked, dynamic, or parsing-broken.
//!
//! Every lease is released on every exit path: cleanly after success or a
//! timeout, dirty (`ok=false`) after a crash so the pool destroys the
//! page's context instead of reusing it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::browser::{BrowserPool, Page};
use crate::config::AggregatorConfig;
use crate::error::CrawlError;
use crate::extract;
use crate::models::SearchHit;
use crate::orchestrator::{CrawlRequest, SearchExecutor};
use crate::resources::RuleSet;

const SEARCH_READY_SELECTOR: &str = ".prod_item";
const DETAIL_READY_SELECTOR: &str = "#lowPriceCompanyArea";

pub struct SlowPathExecutor {
    pool: Arc<BrowserPool>,
    config: AggregatorConfig,
    rules: Arc<RuleSet>,
}

impl SlowPathExecutor {
    pub fn new(pool: Arc<BrowserPool>, config: AggregatorConfig, rules: Arc<RuleSet>) -> Self {
        Self {
            pool,
            config,
            rules,
        }
    }

    fn url_with_params(&self, base: &str, params: &[(&str, &str)]) -> Result<String, CrawlError> {
        reqwest::Url::parse_with_params(base, params)
            .map(|u| u.to_string())
            .map_err(|e| CrawlError::Parse(format!("bad aggregator url: {e}")))
    }

    /// Navigate, wait for the ready signal, and return the DOM.
    async fn load_page(
        &self,
        page: &mut dyn Page,
        url: &str,
        ready_selector: &str,
        deadline: Duration,
    ) -> Result<String, CrawlError> {
        let started = Instant::now();
        page.goto(url, deadline).await?;

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(CrawlError::Timeout);
        }
        page.wait_for_selector(ready_selector, remaining).await?;

        let html = page.content().await?;
        // Blocking is detected from the DOM here, not from a status code.
        if extract::is_blocked_html(&html) {
            return Err(CrawlError::Blocked);
        }
        Ok(html)
    }

    async fn drive(
        &self,
        page: &mut dyn Page,
        request: &CrawlRequest,
        deadline: Duration,
    ) -> Result<SearchHit, CrawlError> {
        let started = Instant::now();

        let pcode = match &request.product_code {
            Some(code) => code.clone(),
            None => {
                let search_url = self.url_with_params(
                    &self.config.search_url,
                    &[("query", request.query.as_str())],
                )?;
                let slice = deadline.mul_f64(0.6);
                let html = self
                    .load_page(page, &search_url, SEARCH_READY_SELECTOR, slice)
                    .await?;

                if extract::is_no_results_html(&html) {
                    return Err(CrawlError::ProductNotFound);
                }
                extract::parse_search_candidates(&self.rules, &html, &request.query, 12)
                    .into_iter()
                    .next()
                    .ok_or(CrawlError::ProductNotFound)?
            }
        };

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(CrawlError::Timeout);
        }

        let detail_url = self.url_with_params(
            &self.config.product_url,
            &[("pcode", pcode.as_str()), ("keyword", request.query.as_str())],
        )?;
        let html = self
            .load_page(page, &detail_url, DETAIL_READY_SELECTOR, remaining)
            .await?;

        let detail = extract::parse_product_detail(
            &html,
            &request.query,
            &self.config.product_url,
            self.config.min_price_threshold,
            3,
        )
        .ok_or_else(|| CrawlError::Parse("offer table missing".into()))?;

        let best = detail.offers[0].clone();
        Ok(SearchHit {
            product_id: Some(pcode),
            product_name: detail.product_name,
            lowest_price: best.price,
            link: best.link,
            mall: Some(best.mall),
            free_shipping: Some(best.free_shipping),
            top_offers: detail.offers,
        })
    }
}

#[async_trait]
impl SearchExecutor for SlowPathExecutor {
    async fn execute(
        &self,
        request: &CrawlRequest,
        deadline: Duration,
    ) -> Result<SearchHit, CrawlError> {
        let started = Instant::now();
        // The lease wait shares the candidate deadline: contention on the
        // pool must not extend the request.
        let mut lease = self.pool.lease(deadline).await?;

        let remaining = deadline.saturating_sub(started.elapsed());
        let result = self.drive(lease.page(), request, remaining).await;

        match &result {
            // A crashed page must not return to the free list.
            Err(CrawlError::BrowserCrash(_)) => lease.release(false).await,
            _ => lease.release(true).await,
        }

        if let Ok(hit) = &result {
            tracing::debug!(
                price = hit.lowest_price,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "slowpath success"
            );
        }
        result
    }
}
