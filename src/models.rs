//! Core data models used throughout Price Scout.
//!
//! These types represent the queries, offers, and outcomes that flow through
//! the search pipeline. The data lifecycle is:
//!
//! ```text
//! HTTP adapter → SearchQuery → normalize() → NormalizedQuery
//!                                                  ↓
//!                              FastPath / SlowPath → SearchHit + Vec<Offer>
//!                                                  ↓
//!                                  orchestrator → SearchOutcome
//! ```
//!
//! # Type Relationships
//!
//! - A **[`SearchQuery`]** is the validated, immutable input bundle built by
//!   the HTTP adapter (or the CLI).
//! - A **[`NormalizedQuery`]** is produced by the normalizer: a primary query
//!   string plus ordered fallback candidates and detected product signals.
//! - An **[`Offer`]** is one seller's listing as extracted from the
//!   aggregator's detail page.
//! - A **[`SearchHit`]** is the successful payload shared by every source
//!   (cache, FastPath, SlowPath).
//! - A **[`SearchOutcome`]** is the tagged result envelope the orchestrator
//!   hands back to the adapter, which pattern-matches it into HTTP.

use serde::{Deserialize, Serialize};

/// Validated search input. Built once by the adapter, never mutated.
///
/// | Field | Constraint |
/// |-------|-----------|
/// | `product_name` | 1..500 chars, no angle brackets / `script` / `javascript` tokens |
/// | `current_price` | optional, `0..=1_000_000_000` |
/// | `current_url` | optional, scheme `http` or `https` |
/// | `product_code` | optional, digits only (the aggregator's stable product code) |
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub product_name: String,
    pub current_price: Option<i64>,
    pub current_url: Option<String>,
    pub product_code: Option<String>,
}

impl SearchQuery {
    /// Validate raw adapter input into a `SearchQuery`.
    ///
    /// Returns a human-readable rejection reason on invalid input; the
    /// adapter maps it to HTTP 400.
    pub fn new(
        product_name: &str,
        current_price: Option<i64>,
        current_url: Option<String>,
        product_code: Option<String>,
    ) -> Result<Self, String> {
        let name = product_name.trim();
        if name.is_empty() {
            return Err("product_name must not be empty".to_string());
        }
        if name.chars().count() > 500 {
            return Err("product_name must be at most 500 characters".to_string());
        }
        let lowered = name.to_lowercase();
        if name.contains('<') || name.contains('>') {
            return Err("product_name must not contain angle brackets".to_string());
        }
        if lowered.contains("script") || lowered.contains("javascript") {
            return Err("product_name contains a disallowed token".to_string());
        }
        if let Some(price) = current_price {
            if !(0..=1_000_000_000).contains(&price) {
                return Err("current_price must be between 0 and 1000000000".to_string());
            }
        }
        if let Some(ref url) = current_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err("current_url must use the http or https scheme".to_string());
            }
        }
        if let Some(ref code) = product_code {
            if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
                return Err("product_code must contain only digits".to_string());
            }
        }
        Ok(Self {
            product_name: name.to_string(),
            current_price,
            current_url,
            product_code,
        })
    }
}

/// Product category detected from the query text.
///
/// Categories gate the fallback validation: a `Phone` query must not be
/// satisfied by a `Food` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Phone,
    Laptop,
    Audio,
    Food,
    Appliance,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Phone => "phone",
            Category::Laptop => "laptop",
            Category::Audio => "audio",
            Category::Food => "food",
            Category::Appliance => "appliance",
            Category::Other => "other",
        }
    }
}

/// Which normalization level produced a candidate.
///
/// Level-2 candidates reduce meaning (brand-only, category-only searches),
/// so their results must pass the validation gate before acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateLevel {
    /// Hard-mapped canonical query.
    HardMap,
    /// Synonym expansion of the full query (meaning-preserving).
    Synonym,
    /// Meaning-reducing fallback (brand+model, model, brand, category tag).
    Fallback,
}

/// One query string the executors will try, tagged with its origin level.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub query: String,
    pub level: CandidateLevel,
}

/// Output of the normalizer: a primary query plus ordered fallbacks.
///
/// Invariants: the primary equals the first candidate; 1..=8 candidates;
/// all candidates are non-empty, lowercase, whitespace-normalized.
#[derive(Debug, Clone)]
pub struct NormalizedQuery {
    pub primary: String,
    pub candidates: Vec<Candidate>,
    pub category: Category,
    pub brand: Option<String>,
    pub model: Option<String>,
    /// The hard map matched; levels 1 and 2 were skipped.
    pub hard_mapped: bool,
    /// The broad-query rule matched (≤2 tokens containing a broad keyword):
    /// FastPath gets the widened budget and SlowPath is disabled.
    pub broad: bool,
}

/// One seller's listing from the aggregator's price-comparison table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    /// 1-based rank as presented by the aggregator.
    pub rank: u32,
    pub mall: String,
    /// Price in won. Always `0..=1_000_000_000`.
    pub price: i64,
    pub free_shipping: bool,
    /// Delivery description as displayed (e.g. "무료배송").
    pub delivery: String,
    /// Absolute purchase link, scheme http or https.
    pub link: String,
}

/// Where a successful result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    FastPath,
    SlowPath,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::FastPath => "fastpath",
            Source::SlowPath => "slowpath",
        }
    }
}

/// The successful payload shared by cache hits and both crawl paths.
///
/// Invariants: `lowest_price == top_offers[0].price` and
/// `link == top_offers[0].link`; `top_offers` holds at most 3 entries,
/// sorted by price ascending with source rank preserved on ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub product_id: Option<String>,
    pub product_name: String,
    pub lowest_price: i64,
    pub link: String,
    pub top_offers: Vec<Offer>,
    pub mall: Option<String>,
    pub free_shipping: Option<bool>,
}

/// Terminal result of one engine run.
///
/// The orchestrator returns exactly one of these per request; the HTTP
/// adapter pattern-matches the status into a response code.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub status: SearchStatus,
    pub query: String,
    pub elapsed_ms: f64,
}

/// Tagged union over success and failure cases.
#[derive(Debug, Clone)]
pub enum SearchStatus {
    CacheHit(SearchHit),
    FastPathSuccess(SearchHit),
    SlowPathSuccess(SearchHit),
    /// The pipeline ran to completion without finding the product.
    NotFound { message: String },
    /// A stage deadline elapsed and no later stage could run.
    Timeout { message: String },
    /// Both paths were blocked by the aggregator's bot defences.
    Blocked { message: String },
    /// An unexpected extraction failure escaped an executor.
    ParseError { message: String },
    /// The budget was exhausted before a stage could start.
    BudgetExhausted { message: String },
}

impl SearchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            SearchStatus::CacheHit(_)
                | SearchStatus::FastPathSuccess(_)
                | SearchStatus::SlowPathSuccess(_)
        )
    }

    /// The successful payload, if any.
    pub fn hit(&self) -> Option<&SearchHit> {
        match &self.status {
            SearchStatus::CacheHit(hit)
            | SearchStatus::FastPathSuccess(hit)
            | SearchStatus::SlowPathSuccess(hit) => Some(hit),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<Source> {
        match self.status {
            SearchStatus::CacheHit(_) => Some(Source::Cache),
            SearchStatus::FastPathSuccess(_) => Some(Source::FastPath),
            SearchStatus::SlowPathSuccess(_) => Some(Source::SlowPath),
            _ => None,
        }
    }
}

/// A durable record of a failed search, kept for rule curation.
///
/// Created by the failure recorder on any terminal engine failure; mutated
/// only through the analytics resolve endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub id: i64,
    pub original_query: String,
    pub normalized_query: String,
    /// JSON array of the candidate strings that were attempted.
    pub candidates: String,
    pub attempted_count: i64,
    pub error_message: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    /// `pending`, `manual_fixed`, `auto_learned`, or `not_product`.
    pub status: String,
    pub correct_name: Option<String>,
    pub correct_product_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
