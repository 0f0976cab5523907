//! The per-request search pipeline.
//!
//! ```text
//! START → NORMALIZE → CACHE_POS → CACHE_NEG → FASTPATH → SLOWPATH
//!                        │hit          │hit       │success    │success
//!                        ▼             ▼          ▼           ▼
//!                    CacheHit      NotFound   VALIDATE → WRITE_POS → return
//!                                                  │all failed
//!                                                  ▼
//!                                      WRITE_NEG → LOG_FAILURE → return
//! ```
//!
//! The orchestrator owns the [`Budget`], consults `can_run` before each
//! stage, and bounds every candidate search with a per-candidate slice so
//! one slow candidate cannot starve the rest. Candidates are tried in
//! order, never in parallel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::budget::{Budget, BudgetConfig, Stage};
use crate::cache::CacheAdapter;
use crate::error::CrawlError;
use crate::failures::{FailureEvent, FailureSink};
use crate::gate;
use crate::models::{
    Candidate, CandidateLevel, NormalizedQuery, SearchHit, SearchOutcome, SearchQuery,
    SearchStatus, Source,
};
use crate::normalize::Normalizer;
use crate::resources::RuleSet;

/// One candidate search handed to an executor.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub query: String,
    /// A known aggregator product code lets the executor skip the list page.
    pub product_code: Option<String>,
}

/// Contract both crawl paths implement. Executors map every failure onto
/// [`CrawlError`] before returning; the orchestrator never sees transport
/// errors.
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &CrawlRequest,
        deadline: Duration,
    ) -> Result<SearchHit, CrawlError>;
}

/// What a path attempt left behind, used to pick the terminal status.
struct PathState {
    last_error: Option<CrawlError>,
    attempted: usize,
    gate_rejections: usize,
}

impl PathState {
    fn new() -> Self {
        Self {
            last_error: None,
            attempted: 0,
            gate_rejections: 0,
        }
    }
}

pub struct Orchestrator {
    normalizer: Normalizer,
    rules: Arc<RuleSet>,
    cache: Arc<CacheAdapter>,
    fastpath: Arc<dyn SearchExecutor>,
    slowpath: Option<Arc<dyn SearchExecutor>>,
    recorder: FailureSink,
    budget_config: BudgetConfig,
    /// FastPath sub-budget substituted for broad queries.
    broad_fastpath: Duration,
    origin: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: Arc<RuleSet>,
        cache: Arc<CacheAdapter>,
        fastpath: Arc<dyn SearchExecutor>,
        slowpath: Option<Arc<dyn SearchExecutor>>,
        recorder: FailureSink,
        budget_config: BudgetConfig,
        broad_fastpath: Duration,
        origin: String,
    ) -> anyhow::Result<Self> {
        budget_config.validate()?;
        Ok(Self {
            normalizer: Normalizer::new(rules.clone()),
            rules,
            cache,
            fastpath,
            slowpath,
            recorder,
            budget_config,
            broad_fastpath,
            origin,
        })
    }

    /// Run the full pipeline for one request.
    pub async fn search(&self, query: &SearchQuery) -> SearchOutcome {
        let mut budget = match Budget::new(self.budget_config.clone()) {
            Ok(b) => b,
            Err(e) => {
                return SearchOutcome {
                    status: SearchStatus::ParseError {
                        message: format!("engine misconfigured: {e}"),
                    },
                    query: query.product_name.clone(),
                    elapsed_ms: 0.0,
                }
            }
        };
        budget.start();
        let request_id = uuid::Uuid::new_v4();

        let norm = self.normalizer.run(&query.product_name);
        budget.checkpoint("normalized");
        tracing::info!(
            %request_id,
            primary = %norm.primary,
            candidates = norm.candidates.len(),
            hard_mapped = norm.hard_mapped,
            broad = norm.broad,
            "search started"
        );

        // The single budget-redistribution policy: broad queries widen
        // FastPath and lose SlowPath, decided once, here.
        if norm.broad {
            budget.widen_fastpath(self.broad_fastpath);
        }

        // ---- CACHE_POS ----
        if let Some(cached) = self.cache.get_positive(&norm.primary).await {
            budget.checkpoint("cache_hit");
            tracing::info!(provenance = cached.source.as_str(), "positive cache hit");
            return SearchOutcome {
                status: SearchStatus::CacheHit(cached.hit),
                query: query.product_name.clone(),
                elapsed_ms: budget.elapsed_ms(),
            };
        }

        // ---- CACHE_NEG ----
        if let Some(reason) = self.cache.get_negative(&norm.primary).await {
            budget.checkpoint("negative_hit");
            tracing::info!("negative cache hit");
            return SearchOutcome {
                status: SearchStatus::NotFound { message: reason },
                query: query.product_name.clone(),
                elapsed_ms: budget.elapsed_ms(),
            };
        }
        budget.checkpoint("cache_miss");

        let mut state = PathState::new();

        // ---- FASTPATH ----
        if self.cache.breaker_open(&self.origin).await {
            budget.checkpoint("fastpath_skipped_breaker");
            tracing::warn!(origin = %self.origin, "fastpath skipped: circuit breaker open");
            state.last_error = Some(CrawlError::Blocked);
        } else if budget.can_run(Stage::FastPath) {
            if let Some(hit) = self
                .run_path(
                    self.fastpath.as_ref(),
                    Stage::FastPath,
                    &norm,
                    query,
                    &mut budget,
                    &mut state,
                )
                .await
            {
                budget.checkpoint("fastpath_success");
                self.cache.breaker_reset(&self.origin).await;
                self.cache
                    .set_positive(&norm.primary, Source::FastPath, &hit)
                    .await;
                return SearchOutcome {
                    status: SearchStatus::FastPathSuccess(hit),
                    query: query.product_name.clone(),
                    elapsed_ms: budget.elapsed_ms(),
                };
            }
            budget.checkpoint("fastpath_failed");
        }

        // ---- SLOWPATH ----
        let timed_out_without_room = matches!(state.last_error, Some(CrawlError::Timeout))
            && !budget.can_run(Stage::SlowPath);
        let slowpath_allowed = !norm.broad
            && !timed_out_without_room
            && self.slowpath.is_some()
            && budget.can_run(Stage::SlowPath)
            && !budget.is_exhausted();

        if slowpath_allowed {
            let slowpath = self.slowpath.as_ref().map(Arc::clone);
            if let Some(slowpath) = slowpath {
                if let Some(hit) = self
                    .run_path(
                        slowpath.as_ref(),
                        Stage::SlowPath,
                        &norm,
                        query,
                        &mut budget,
                        &mut state,
                    )
                    .await
                {
                    budget.checkpoint("slowpath_success");
                    self.cache
                        .set_positive(&norm.primary, Source::SlowPath, &hit)
                        .await;
                    return SearchOutcome {
                        status: SearchStatus::SlowPathSuccess(hit),
                        query: query.product_name.clone(),
                        elapsed_ms: budget.elapsed_ms(),
                    };
                }
                budget.checkpoint("slowpath_failed");
            }
        }

        // ---- terminal ----
        self.finish_failed(query, &norm, &mut budget, state).await
    }

    /// Iterate a path's candidates under their per-candidate deadlines.
    /// Returns the first accepted hit, leaving failure context in `state`.
    async fn run_path(
        &self,
        executor: &dyn SearchExecutor,
        stage: Stage,
        norm: &NormalizedQuery,
        query: &SearchQuery,
        budget: &mut Budget,
        state: &mut PathState,
    ) -> Option<SearchHit> {
        let stage_default = budget.stage_default(stage);
        let candidates: &[Candidate] = &norm.candidates;

        for (index, candidate) in candidates.iter().enumerate() {
            if budget.is_exhausted() {
                break;
            }
            // A single slow candidate cannot starve the others: each one
            // gets an equal share of what the stage was allotted.
            let remaining_candidates = (candidates.len() - index) as u32;
            let slice = (stage_default / remaining_candidates).min(budget.remaining());
            if slice.is_zero() {
                break;
            }

            let request = CrawlRequest {
                query: candidate.query.clone(),
                // The caller-supplied product code applies to the product
                // itself; retrying it across candidates is pointless.
                product_code: if index == 0 {
                    query.product_code.clone()
                } else {
                    None
                },
            };

            state.attempted += 1;
            match executor.execute(&request, slice).await {
                Ok(hit) => {
                    // The gate runs for meaning-reducing candidates only.
                    if candidate.level == CandidateLevel::Fallback {
                        if let Err(rejection) =
                            gate::validate(&self.rules, &query.product_name, &hit)
                        {
                            tracing::debug!(
                                candidate = %candidate.query,
                                reason = %rejection,
                                "fallback result rejected by gate"
                            );
                            state.gate_rejections += 1;
                            continue;
                        }
                    }
                    return Some(hit);
                }
                Err(error) => {
                    tracing::debug!(candidate = %candidate.query, error = %error, "candidate failed");
                    let stop = match stage {
                        Stage::FastPath => {
                            if error.trips_breaker() {
                                self.cache.breaker_trip(&self.origin).await;
                            }
                            // Blocked and Parse advance to SlowPath at once.
                            matches!(error, CrawlError::Blocked | CrawlError::Parse(_))
                        }
                        Stage::SlowPath => {
                            if matches!(error, CrawlError::Blocked) {
                                self.cache.breaker_trip(&self.origin).await;
                            }
                            matches!(error, CrawlError::Blocked)
                        }
                        Stage::Cache => false,
                    };
                    state.last_error = Some(error);
                    if stop {
                        break;
                    }
                }
            }
        }
        None
    }

    /// Map the accumulated failure context onto a terminal outcome, write
    /// the negative marker when warranted, and log the failure.
    async fn finish_failed(
        &self,
        query: &SearchQuery,
        norm: &NormalizedQuery,
        budget: &mut Budget,
        state: PathState,
    ) -> SearchOutcome {
        let (status, write_negative) = match &state.last_error {
            Some(CrawlError::Blocked) => (
                SearchStatus::Blocked {
                    message: "search temporarily blocked by the target site".to_string(),
                },
                false,
            ),
            Some(CrawlError::Timeout) => (
                SearchStatus::Timeout {
                    message: "search timed out".to_string(),
                },
                false,
            ),
            Some(CrawlError::ProductNotFound) => (
                SearchStatus::NotFound {
                    message: "no product matched".to_string(),
                },
                true,
            ),
            Some(CrawlError::Parse(_))
            | Some(CrawlError::Network(_))
            | Some(CrawlError::BrowserCrash(_)) => (
                SearchStatus::ParseError {
                    message: "search results could not be processed".to_string(),
                },
                false,
            ),
            None if state.gate_rejections > 0 => (
                SearchStatus::NotFound {
                    message: "no plausible product matched".to_string(),
                },
                true,
            ),
            None => (
                SearchStatus::BudgetExhausted {
                    message: "time budget exhausted before search could run".to_string(),
                },
                false,
            ),
        };

        // Only a completed NotFound is worth remembering; transient
        // failures must not suppress retries for other users.
        if write_negative {
            let reason = match &status {
                SearchStatus::NotFound { message } => message.clone(),
                _ => String::new(),
            };
            self.cache.set_negative(&norm.primary, &reason).await;
        }

        let error_message = state
            .last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidate passed validation".to_string());
        self.recorder.record(FailureEvent {
            original_query: query.product_name.clone(),
            normalized_query: norm.primary.clone(),
            candidates: norm.candidates.iter().map(|c| c.query.clone()).collect(),
            attempted_count: state.attempted as i64,
            error_message,
            category: Some(norm.category.as_str().to_string()),
            brand: norm.brand.clone(),
            model: norm.model.clone(),
        });

        let report = budget.report();
        tracing::warn!(
            elapsed = report.elapsed,
            attempted = state.attempted,
            "search failed terminally"
        );

        SearchOutcome {
            status,
            query: query.product_name.clone(),
            elapsed_ms: budget.elapsed_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheAdapter, CachePolicy, MemoryStore};
    use crate::failures::detached_sink;
    use crate::models::Offer;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted executor responses, consumed per call in order. An empty
    /// script answers ProductNotFound.
    enum Scripted {
        Hit(SearchHit),
        NotFound,
        Blocked,
        Timeout,
        Parse,
        Network,
        Crash,
        /// Sleep this long, then time out.
        Hang(Duration),
    }

    struct ScriptedExecutor {
        script: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<(String, Duration)>>,
    }

    impl ScriptedExecutor {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn calls(&self) -> Vec<(String, Duration)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            request: &CrawlRequest,
            deadline: Duration,
        ) -> Result<SearchHit, CrawlError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.query.clone(), deadline));
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Hit(hit)) => Ok(hit),
                Some(Scripted::Blocked) => Err(CrawlError::Blocked),
                Some(Scripted::Timeout) => Err(CrawlError::Timeout),
                Some(Scripted::Parse) => Err(CrawlError::Parse("layout drift".into())),
                Some(Scripted::Network) => Err(CrawlError::Network("refused".into())),
                Some(Scripted::Crash) => Err(CrawlError::BrowserCrash("detached".into())),
                Some(Scripted::Hang(d)) => {
                    tokio::time::sleep(d).await;
                    Err(CrawlError::Timeout)
                }
                Some(Scripted::NotFound) | None => Err(CrawlError::ProductNotFound),
            }
        }
    }

    fn hit_for(name: &str, price: i64) -> SearchHit {
        let offer = Offer {
            rank: 1,
            mall: "몰A".into(),
            price,
            free_shipping: true,
            delivery: "무료배송".into(),
            link: "https://mall.example/p/1".into(),
        };
        SearchHit {
            product_id: Some("111222".into()),
            product_name: name.into(),
            lowest_price: price,
            link: offer.link.clone(),
            top_offers: vec![offer],
            mall: Some("몰A".into()),
            free_shipping: Some(true),
        }
    }

    fn test_budget() -> BudgetConfig {
        BudgetConfig {
            total: Duration::from_millis(3_000),
            cache: Duration::from_millis(100),
            fastpath: Duration::from_millis(800),
            slowpath: Duration::from_millis(900),
            min_remaining: Duration::from_millis(50),
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        fastpath: Arc<ScriptedExecutor>,
        slowpath: Arc<ScriptedExecutor>,
        cache: Arc<CacheAdapter>,
        sink: FailureSink,
    }

    fn harness(fast: Vec<Scripted>, slow: Vec<Scripted>) -> Harness {
        harness_with(fast, slow, test_budget(), true)
    }

    fn harness_with(
        fast: Vec<Scripted>,
        slow: Vec<Scripted>,
        budget: BudgetConfig,
        slowpath_enabled: bool,
    ) -> Harness {
        let fastpath = ScriptedExecutor::new(fast);
        let slowpath = ScriptedExecutor::new(slow);
        let cache = Arc::new(CacheAdapter::new(
            Box::new(MemoryStore::default()),
            CachePolicy::default(),
        ));
        let sink = detached_sink(64);
        let fastpath_dyn: Arc<dyn SearchExecutor> = fastpath.clone();
        let slowpath_dyn: Option<Arc<dyn SearchExecutor>> = if slowpath_enabled {
            Some(slowpath.clone())
        } else {
            None
        };
        let orchestrator = Orchestrator::new(
            Arc::new(RuleSet::builtin()),
            cache.clone(),
            fastpath_dyn,
            slowpath_dyn,
            sink.clone(),
            budget,
            Duration::from_millis(2_000),
            "danawa".into(),
        )
        .unwrap();
        Harness {
            orchestrator,
            fastpath,
            slowpath,
            cache,
            sink,
        }
    }

    fn query(name: &str) -> SearchQuery {
        SearchQuery::new(name, Some(300_000), None, None).unwrap()
    }

    #[tokio::test]
    async fn test_fastpath_success_writes_positive_cache() {
        let h = harness(
            vec![Scripted::Hit(hit_for("농심 신라면 120g 5개입", 2_980))],
            vec![],
        );
        let outcome = h.orchestrator.search(&query("농심 신라면 120g")).await;

        assert!(matches!(outcome.status, SearchStatus::FastPathSuccess(_)));
        assert_eq!(outcome.source(), Some(Source::FastPath));
        assert_eq!(h.slowpath.call_count(), 0);

        // Second identical request is served from the cache.
        let second = h.orchestrator.search(&query("농심 신라면 120g")).await;
        assert!(matches!(second.status, SearchStatus::CacheHit(_)));
        assert_eq!(second.source(), Some(Source::Cache));
        assert_eq!(h.fastpath.call_count(), 1);
    }

    #[tokio::test]
    async fn test_blocked_fastpath_advances_to_slowpath_immediately() {
        let h = harness(
            vec![Scripted::Blocked],
            vec![Scripted::Hit(hit_for("소니 wh-1000xm5", 379_000))],
        );
        let outcome = h.orchestrator.search(&query("소니 WH-1000XM5")).await;

        assert!(matches!(outcome.status, SearchStatus::SlowPathSuccess(_)));
        // Blocked must not burn further fastpath candidates.
        assert_eq!(h.fastpath.call_count(), 1);
        assert!(h.slowpath.call_count() >= 1);
    }

    #[tokio::test]
    async fn test_parse_error_advances_to_slowpath() {
        let h = harness(
            vec![Scripted::Parse],
            vec![Scripted::Hit(hit_for("소니 wh-1000xm5", 379_000))],
        );
        let outcome = h.orchestrator.search(&query("소니 WH-1000XM5")).await;
        assert!(matches!(outcome.status, SearchStatus::SlowPathSuccess(_)));
        assert_eq!(h.fastpath.call_count(), 1);
    }

    #[tokio::test]
    async fn test_terminal_not_found_writes_negative_and_records() {
        let h = harness(vec![], vec![]);
        let outcome = h.orchestrator.search(&query("화이트 B182W13")).await;
        assert!(matches!(outcome.status, SearchStatus::NotFound { .. }));

        // Negative cache short-circuits the repeat without touching the
        // executors.
        let fast_calls = h.fastpath.call_count();
        let slow_calls = h.slowpath.call_count();
        let repeat = h.orchestrator.search(&query("화이트 B182W13")).await;
        assert!(matches!(repeat.status, SearchStatus::NotFound { .. }));
        assert_eq!(h.fastpath.call_count(), fast_calls);
        assert_eq!(h.slowpath.call_count(), slow_calls);

        // Exactly one failure event was recorded (the negative-cache hit
        // is not a new failure).
        let events = h.sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].original_query, "화이트 B182W13");
        assert!(events[0].attempted_count >= 1);
    }

    #[tokio::test]
    async fn test_timeout_does_not_write_negative() {
        // The last candidate times out with SlowPath disabled, so the
        // terminal status is Timeout (one trip, breaker stays closed).
        let h = harness_with(
            vec![
                Scripted::NotFound,
                Scripted::NotFound,
                Scripted::NotFound,
                Scripted::Timeout,
            ],
            vec![],
            test_budget(),
            false,
        );
        let outcome = h.orchestrator.search(&query("소니 WH-1000XM5")).await;
        assert!(matches!(outcome.status, SearchStatus::Timeout { .. }));

        // A transient failure must not be cached: the repeat hits the
        // executors again.
        let calls_before = h.fastpath.call_count();
        let _ = h.orchestrator.search(&query("소니 WH-1000XM5")).await;
        assert!(h.fastpath.call_count() > calls_before);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_skips_fastpath() {
        // SlowPath disabled so each request ends Blocked (no negative
        // cache entry that would short-circuit the repeats).
        let h = harness_with(
            vec![Scripted::Blocked, Scripted::Blocked, Scripted::Blocked],
            vec![],
            test_budget(),
            false,
        );
        for _ in 0..3 {
            let _ = h.orchestrator.search(&query("아이폰 15 프로")).await;
        }
        assert!(h.cache.breaker_open("danawa").await);
        assert_eq!(h.fastpath.call_count(), 3);

        // Fourth request: FastPath is skipped without any executor call.
        let outcome = h.orchestrator.search(&query("아이폰 15 프로")).await;
        assert_eq!(h.fastpath.call_count(), 3);
        assert!(matches!(outcome.status, SearchStatus::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_broad_query_disables_slowpath() {
        let h = harness(
            vec![
                Scripted::Timeout,
                Scripted::Timeout,
                Scripted::Timeout,
                Scripted::Timeout,
                Scripted::Timeout,
                Scripted::Timeout,
                Scripted::Timeout,
                Scripted::Timeout,
            ],
            vec![Scripted::Hit(hit_for("아이폰 15", 1_250_000))],
        );
        let outcome = h.orchestrator.search(&query("아이폰")).await;

        // A broad query ends in Timeout, never SlowPathSuccess.
        assert!(matches!(outcome.status, SearchStatus::Timeout { .. }));
        assert_eq!(h.slowpath.call_count(), 0);
    }

    #[tokio::test]
    async fn test_gate_rejects_fallback_result_and_advances() {
        // Candidate list for this query: 1 synonym-level + 4 fallbacks.
        // First candidate finds nothing; the first fallback result is a
        // different product (gate rejects); the next one is plausible.
        let h = harness(
            vec![
                Scripted::NotFound,
                Scripted::Hit(hit_for("LG전자 트롬 세탁기 21kg", 890_000)),
                Scripted::Hit(hit_for("소니 WH-1000XM5 헤드폰 블랙", 379_000)),
            ],
            vec![],
        );
        let outcome = h.orchestrator.search(&query("소니 WH-1000XM5 헤드폰")).await;

        match &outcome.status {
            SearchStatus::FastPathSuccess(hit) => {
                assert_eq!(hit.product_name, "소니 WH-1000XM5 헤드폰 블랙");
            }
            other => panic!("expected FastPathSuccess, got {other:?}"),
        }
        assert_eq!(h.fastpath.call_count(), 3);
    }

    #[tokio::test]
    async fn test_timeout_without_room_for_slowpath_is_terminal() {
        let budget = BudgetConfig {
            total: Duration::from_millis(500),
            cache: Duration::from_millis(50),
            fastpath: Duration::from_millis(200),
            slowpath: Duration::from_millis(200),
            min_remaining: Duration::from_millis(20),
        };
        // The single hang consumes most of the envelope; SlowPath's full
        // default no longer fits, so the Timeout is terminal.
        let h = harness_with(
            vec![Scripted::Hang(Duration::from_millis(350))],
            vec![Scripted::Hit(hit_for("x", 1_000))],
            budget,
            true,
        );
        let outcome = h.orchestrator.search(&query("몽벨 경량 다운")).await;
        assert!(matches!(outcome.status, SearchStatus::Timeout { .. }));
        assert_eq!(h.slowpath.call_count(), 0);
    }

    #[tokio::test]
    async fn test_network_and_crash_advance_to_next_candidate() {
        // A network failure on FastPath and a browser crash on SlowPath
        // both skip to the next candidate rather than ending the request.
        let h = harness(
            vec![
                Scripted::Network,
                Scripted::NotFound,
                Scripted::NotFound,
                Scripted::NotFound,
            ],
            vec![
                Scripted::Crash,
                Scripted::Hit(hit_for("소니 wh-1000xm5", 379_000)),
            ],
        );
        let outcome = h.orchestrator.search(&query("소니 WH-1000XM5")).await;

        assert!(matches!(outcome.status, SearchStatus::SlowPathSuccess(_)));
        assert_eq!(h.fastpath.call_count(), 4);
        assert_eq!(h.slowpath.call_count(), 2);
    }

    #[tokio::test]
    async fn test_per_candidate_deadline_is_bounded() {
        let h = harness(vec![], vec![]);
        let _ = h.orchestrator.search(&query("소니 WH-1000XM5 헤드폰")).await;

        let calls = h.fastpath.calls();
        assert!(calls.len() > 1);
        let stage_default = Duration::from_millis(800);
        let n = calls.len() as u32;
        // First candidate gets at most stage_default / candidate_count.
        assert!(calls[0].1 <= stage_default / n + Duration::from_millis(5));
        for (_, deadline) in &calls {
            assert!(*deadline <= stage_default);
        }
    }

    #[tokio::test]
    async fn test_cached_outcome_relabels_source() {
        let h = harness(vec![], vec![]);
        // Seed the cache as if SlowPath had produced the hit earlier.
        h.cache
            .set_positive("농심 신라면 120g", Source::SlowPath, &hit_for("농심 신라면 120g", 2_980))
            .await;

        let outcome = h.orchestrator.search(&query("농심 신라면 120g")).await;
        assert!(matches!(outcome.status, SearchStatus::CacheHit(_)));
        assert_eq!(outcome.source(), Some(Source::Cache));
        assert_eq!(outcome.hit().unwrap().lowest_price, 2_980);
    }
}
