//! FastPath executor: HTTP + HTML extraction against the aggregator.
//!
//! Two requests per candidate — the search list page (to pick a product
//! code) and the product detail page (to pull the top offers) — sharing
//! one deadline, split roughly 60/40 in favour of the search page. No
//! in-line retries: the candidate loop above and the circuit breaker are
//! the only retry mechanisms.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AggregatorConfig;
use crate::error::CrawlError;
use crate::extract;
use crate::models::SearchHit;
use crate::orchestrator::{CrawlRequest, SearchExecutor};
use crate::resources::RuleSet;

/// Realistic browser User-Agent strings, rotated per client.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Floor for the search-page slice so a tiny deadline still issues one
/// meaningful request.
const SEARCH_SLICE_FLOOR: Duration = Duration::from_millis(500);

const MAX_PCODE_CANDIDATES: usize = 12;

pub struct FastPathExecutor {
    client: reqwest::Client,
    config: AggregatorConfig,
    /// Shared rule tables; list-page scoring needs the accessory set.
    rules: Arc<RuleSet>,
}

impl FastPathExecutor {
    pub fn new(config: AggregatorConfig, rules: Arc<RuleSet>) -> anyhow::Result<Self> {
        let ua = config
            .user_agent
            .clone()
            .unwrap_or_else(|| random_user_agent().to_string());

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(ua)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            config,
            rules,
        })
    }

    /// Fetch one page with the blocked/invalid defences applied.
    async fn fetch_html(
        &self,
        url: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String, CrawlError> {
        if timeout.is_zero() {
            return Err(CrawlError::Timeout);
        }

        let response = self
            .client
            .get(url)
            .query(params)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "ko-KR,ko;q=0.9,en-US;q=0.8")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CrawlError::Timeout
                } else {
                    CrawlError::Network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 403 {
            return Err(CrawlError::Blocked);
        }
        if !status.is_success() {
            return Err(CrawlError::Network(format!("unexpected status {status}")));
        }

        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout
            } else {
                CrawlError::Network(format!("body read failed: {e}"))
            }
        })?;

        if extract::is_probably_invalid_html(&html, self.config.min_html_length) {
            tracing::debug!(len = html.len(), "invalid or challenge body");
            return Err(CrawlError::Blocked);
        }
        Ok(html)
    }

    /// Pick the best-matching product code from the search list page.
    async fn resolve_product_code(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<String, CrawlError> {
        let html = self
            .fetch_html(
                &self.config.search_url,
                &[("query", query), ("originalQuery", query)],
                timeout,
            )
            .await?;

        if extract::is_no_results_html(&html) {
            return Err(CrawlError::ProductNotFound);
        }
        if !extract::has_search_fingerprint(&html) {
            return Err(CrawlError::Parse("search layout unrecognized".into()));
        }

        extract::parse_search_candidates(&self.rules, &html, query, MAX_PCODE_CANDIDATES)
            .into_iter()
            .next()
            .ok_or(CrawlError::ProductNotFound)
    }

    async fn fetch_detail(
        &self,
        pcode: &str,
        query: &str,
        timeout: Duration,
    ) -> Result<SearchHit, CrawlError> {
        let html = self
            .fetch_html(
                &self.config.product_url,
                &[("pcode", pcode), ("keyword", query)],
                timeout,
            )
            .await?;

        if !extract::has_product_fingerprint(&html) {
            return Err(CrawlError::Parse("product layout unrecognized".into()));
        }

        let detail = extract::parse_product_detail(
            &html,
            query,
            &self.config.product_url,
            self.config.min_price_threshold,
            3,
        )
        .ok_or_else(|| CrawlError::Parse("offer table missing".into()))?;

        let best = detail.offers[0].clone();
        Ok(SearchHit {
            product_id: Some(pcode.to_string()),
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
impl SearchExecutor for FastPathExecutor {
    async fn execute(
        &self,
        request: &CrawlRequest,
        deadline: Duration,
    ) -> Result<SearchHit, CrawlError> {
        let started = Instant::now();
        tracing::debug!(query = %request.query, deadline_ms = deadline.as_millis() as u64, "fastpath start");

        let pcode = match &request.product_code {
            // A known product code skips the list page entirely.
            Some(code) => code.clone(),
            None => {
                let search_slice = deadline.mul_f64(0.6).max(SEARCH_SLICE_FLOOR).min(deadline);
                self.resolve_product_code(&request.query, search_slice).await?
            }
        };

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(CrawlError::Timeout);
        }

        let hit = self.fetch_detail(&pcode, &request.query, remaining).await?;
        tracing::debug!(
            pcode = %pcode,
            price = hit.lowest_price,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fastpath success"
        );
        Ok(hit)
    }
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SEARCH_HTML: &str = r#"<html><body>
<div class="prod_item"><div class="prod_name">
  <a href="https://prod.example.com/info/?pcode=111222">삼성전자 갤럭시 버즈3 프로</a>
</div></div>
</body></html>"#;

    const DETAIL_HTML: &str = r#"<html><body>
<h3 class="prod_tit">삼성전자 갤럭시 버즈3 프로</h3>
<div id="lowPriceCompanyArea"><div class="box__mall-price"><ul class="list__mall-price">
<li class="list-item">
  <div class="box__logo"><img alt="몰A"></div>
  <div class="sell-price"><span class="text__num">219,000원</span></div>
  <div class="box__delivery">무료배송</div>
  <a class="link__full-cover" href="https://malla.example.com/p/1"></a>
</li>
<li class="list-item">
  <div class="box__logo"><img alt="몰B"></div>
  <div class="sell-price"><span class="text__num">215,500원</span></div>
  <div class="box__delivery">배송비 2,500원</div>
  <a class="link__full-cover" href="https://mallb.example.com/p/2"></a>
</li>
</ul></div></div>
</body></html>"#;

    fn executor_for(server: &MockServer) -> FastPathExecutor {
        FastPathExecutor::new(
            AggregatorConfig {
                search_url: format!("{}/dsearch.php", server.uri()),
                product_url: format!("{}/info/", server.uri()),
                origin: "mock".into(),
                user_agent: Some("pscout-test/1.0".into()),
                min_html_length: 10,
                min_price_threshold: 0,
            },
            Arc::new(RuleSet::builtin()),
        )
        .unwrap()
    }

    fn request(query: &str) -> CrawlRequest {
        CrawlRequest {
            query: query.to_string(),
            product_code: None,
        }
    }

    #[tokio::test]
    async fn test_happy_path_search_then_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dsearch.php"))
            .and(query_param("query", "갤럭시 버즈3 프로"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_HTML))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info/"))
            .and(query_param("pcode", "111222"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_HTML))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let hit = executor
            .execute(&request("갤럭시 버즈3 프로"), Duration::from_secs(4))
            .await
            .unwrap();

        assert_eq!(hit.product_id.as_deref(), Some("111222"));
        assert_eq!(hit.lowest_price, 215_500);
        assert_eq!(hit.link, "https://mallb.example.com/p/2");
        assert_eq!(hit.top_offers.len(), 2);
        assert_eq!(hit.lowest_price, hit.top_offers[0].price);
    }

    #[tokio::test]
    async fn test_known_product_code_skips_search() {
        let server = MockServer::start().await;
        // Only the detail route exists; hitting search would 404 → Network.
        Mock::given(method("GET"))
            .and(path("/info/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_HTML))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let req = CrawlRequest {
            query: "갤럭시 버즈3 프로".into(),
            product_code: Some("111222".into()),
        };
        let hit = executor.execute(&req, Duration::from_secs(4)).await.unwrap();
        assert_eq!(hit.product_id.as_deref(), Some("111222"));
    }

    #[tokio::test]
    async fn test_http_403_maps_to_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .execute(&request("아이폰 15"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Blocked));
    }

    #[tokio::test]
    async fn test_challenge_body_maps_to_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>Just a moment... verifying</html>"),
            )
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .execute(&request("아이폰 15"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Blocked));
    }

    #[tokio::test]
    async fn test_no_results_page_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>검색 결과가 없습니다</body></html>"),
            )
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .execute(&request("화이트 b182w13"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::ProductNotFound));
    }

    #[tokio::test]
    async fn test_unrecognized_layout_maps_to_parse() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>totally different site layout</body></html>"),
            )
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .execute(&request("아이폰 15"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Parse(_)));
    }

    #[tokio::test]
    async fn test_slow_upstream_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(SEARCH_HTML)
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .execute(&request("아이폰 15"), Duration::from_millis(600))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Timeout));
    }
}
