//! JSON HTTP adapter over the search engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/price/search` | Run the search pipeline for a product name |
//! | `GET`  | `/api/v1/health` | Per-dependency health (cache, database, browser) |
//! | `GET`  | `/api/v1/analytics/dashboard` | Failure statistics overview |
//! | `GET`  | `/api/v1/analytics/common-failures` | Most repeated failing queries (`limit` 1..500) |
//! | `GET`  | `/api/v1/analytics/improvements` | Rule-improvement suggestions |
//! | `GET`  | `/api/v1/analytics/export` | Failure data dump (`format=json\|csv`) |
//! | `POST` | `/api/v1/analytics/resolve/{id}` | Mark a failure record resolved |
//!
//! # Error Contract
//!
//! Engine failures map onto HTTP as: NotFound → 503 `PRODUCT_NOT_FOUND`,
//! Timeout/BudgetExhausted → 503 `TIMEOUT`, Blocked → 503 `BLOCKED`,
//! internal errors → 500 `INTERNAL_ERROR`, invalid input → 400.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::browser::BrowserPool;
use crate::cache::CacheAdapter;
use crate::config::Config;
use crate::failures;
use crate::models::{Offer, SearchOutcome, SearchQuery, SearchStatus};
use crate::orchestrator::Orchestrator;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub cache: Arc<CacheAdapter>,
    pub browser: Arc<BrowserPool>,
    pub pool: SqlitePool,
}

/// Starts the HTTP server and runs until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/price/search", post(handle_search))
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/analytics/dashboard", get(handle_dashboard))
        .route("/api/v1/analytics/common-failures", get(handle_common_failures))
        .route("/api/v1/analytics/improvements", get(handle_improvements))
        .route("/api/v1/analytics/export", get(handle_export))
        .route("/api/v1/analytics/resolve/{id}", post(handle_resolve))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "price search API listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /api/v1/price/search ============

#[derive(Deserialize)]
struct SearchRequestBody {
    product_name: String,
    #[serde(default)]
    current_price: Option<i64>,
    #[serde(default)]
    current_url: Option<String>,
    #[serde(default)]
    product_code: Option<String>,
}

#[derive(Serialize)]
pub struct PriceSearchResponse {
    pub status: String,
    pub data: Option<PriceData>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Serialize)]
pub struct PriceData {
    pub product_name: String,
    pub product_id: Option<String>,
    pub is_cheaper: bool,
    pub price_diff: i64,
    pub lowest_price: i64,
    pub link: String,
    pub mall: Option<String>,
    pub free_shipping: Option<bool>,
    pub top_prices: Vec<Offer>,
    pub price_trend: Vec<serde_json::Value>,
    pub source: String,
    pub elapsed_ms: f64,
}

/// Pull a product code out of an aggregator URL's `pcode` parameter.
fn product_code_from_url(url: &str) -> Option<String> {
    crate::extract::extract_pcode(url)
}

/// Pure mapping from an engine outcome to the HTTP response pair.
pub fn outcome_to_response(
    outcome: &SearchOutcome,
    current_price: Option<i64>,
) -> (StatusCode, PriceSearchResponse) {
    match &outcome.status {
        SearchStatus::CacheHit(hit)
        | SearchStatus::FastPathSuccess(hit)
        | SearchStatus::SlowPathSuccess(hit) => {
            let (is_cheaper, price_diff) = match current_price {
                Some(current) => (hit.lowest_price < current, hit.lowest_price - current),
                None => (false, 0),
            };
            let source = outcome
                .source()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default();
            (
                StatusCode::OK,
                PriceSearchResponse {
                    status: "success".to_string(),
                    data: Some(PriceData {
                        product_name: hit.product_name.clone(),
                        product_id: hit.product_id.clone(),
                        is_cheaper,
                        price_diff,
                        lowest_price: hit.lowest_price,
                        link: hit.link.clone(),
                        mall: hit.mall.clone(),
                        free_shipping: hit.free_shipping,
                        top_prices: hit.top_offers.clone(),
                        price_trend: Vec::new(),
                        source,
                        elapsed_ms: outcome.elapsed_ms,
                    }),
                    message: "최저가를 찾았습니다.".to_string(),
                    error_code: None,
                },
            )
        }
        SearchStatus::NotFound { message } => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_response("PRODUCT_NOT_FOUND", message),
        ),
        SearchStatus::Timeout { message } | SearchStatus::BudgetExhausted { message } => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_response("TIMEOUT", message),
        ),
        SearchStatus::Blocked { message } => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_response("BLOCKED", message),
        ),
        SearchStatus::ParseError { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("INTERNAL_ERROR", message),
        ),
    }
}

fn error_response(code: &str, message: &str) -> PriceSearchResponse {
    PriceSearchResponse {
        status: "error".to_string(),
        data: None,
        message: message.to_string(),
        error_code: Some(code.to_string()),
    }
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchRequestBody>,
) -> Result<Response, AppError> {
    let product_code = body
        .product_code
        .clone()
        .or_else(|| body.current_url.as_deref().and_then(product_code_from_url));

    let query = SearchQuery::new(
        &body.product_name,
        body.current_price,
        body.current_url.clone(),
        product_code,
    )
    .map_err(bad_request)?;

    let outcome = state.orchestrator.search(&query).await;
    let (status, response) = outcome_to_response(&outcome, body.current_price);
    Ok((status, Json(response)).into_response())
}

// ============ GET /api/v1/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    cache: String,
    database: String,
    browser: String,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache = if state.cache.ping().await {
        "connected"
    } else {
        "disconnected"
    };

    let database = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let browser = if !state.browser.is_enabled() {
        "disabled"
    } else if state.browser.is_ready() {
        "ready"
    } else {
        "disconnected"
    };

    let status = if database == "disconnected" {
        "error"
    } else if cache == "disconnected" || browser == "disconnected" {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        cache: cache.to_string(),
        database: database.to_string(),
        browser: browser.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/v1/analytics/* ============

#[derive(Serialize)]
struct DashboardResponse {
    stats: failures::FailureStats,
    common_failures: Vec<failures::CommonFailure>,
    resolution_rate: f64,
    pending_rate: f64,
}

async fn handle_dashboard(
    State(state): State<AppState>,
) -> Result<Json<DashboardResponse>, AppError> {
    let stats = failures::stats(&state.pool, 30)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    let common = failures::common_failures(&state.pool, 20)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    let (resolution_rate, pending_rate) = if stats.total > 0 {
        (
            stats.resolved as f64 / stats.total as f64 * 100.0,
            stats.pending as f64 / stats.total as f64 * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    Ok(Json(DashboardResponse {
        stats,
        common_failures: common,
        resolution_rate,
        pending_rate,
    }))
}

async fn handle_common_failures(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit: i64 = params
        .get("limit")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| bad_request("limit must be an integer"))?
        .unwrap_or(20);
    if !(1..=500).contains(&limit) {
        return Err(bad_request("limit must be between 1 and 500"));
    }

    let list = failures::common_failures(&state.pool, limit)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(serde_json::json!({ "failures": list })))
}

async fn handle_improvements(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let list = failures::suggestions(&state.pool)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "total": list.len(),
        "suggestions": list,
    })))
}

async fn handle_export(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let format = params.get("format").map(String::as_str).unwrap_or("json");
    if format != "json" && format != "csv" {
        return Err(bad_request("format must be json or csv"));
    }

    let body = failures::export(&state.pool, format, 30, 500)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    let content_type = if format == "csv" {
        "text/csv; charset=utf-8"
    } else {
        "application/json"
    };
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, content_type)],
        body,
    )
        .into_response())
}

#[derive(Deserialize)]
struct ResolveBody {
    status: String,
    #[serde(default)]
    correct_name: Option<String>,
    #[serde(default)]
    correct_product_id: Option<String>,
}

async fn handle_resolve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    match body.status.as_str() {
        "manual_fixed" | "auto_learned" | "not_product" => {}
        other => {
            return Err(bad_request(format!(
                "Unknown resolution status: {other}. Use manual_fixed, auto_learned, or not_product."
            )))
        }
    }

    let updated = failures::mark_resolved(
        &state.pool,
        id,
        &body.status,
        body.correct_name.as_deref(),
        body.correct_product_id.as_deref(),
    )
    .await
    .map_err(|e| internal_error(e.to_string()))?
    .ok_or_else(|| not_found(format!("failure record {id} not found")))?;

    Ok(Json(serde_json::json!({ "resolved": updated })))
}
