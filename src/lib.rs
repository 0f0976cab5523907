//! # Price Scout
//!
//! **A lowest-price search engine for a price-comparison frontend.**
//!
//! Given a free-form product name, Price Scout returns the lowest price
//! currently advertised on the target aggregator, the top-three seller
//! offers, and a purchase link — within a hard 12-second budget per
//! request.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────────────────────┐
//! │   HTTP   │──▶│Orchestrator│──▶│ Cache → FastPath → SlowPath│
//! │  (axum)  │   │  + Budget  │   │ (moka)  (HTTP)   (browser) │
//! └──────────┘   └─────┬──────┘   └───────────┬───────────────┘
//!                      │                      │
//!                ┌─────▼──────┐        ┌──────▼──────┐
//!                │ Normalizer │        │   SQLite    │
//!                │ 3 levels   │        │  failures   │
//!                └────────────┘        └─────────────┘
//! ```
//!
//! ## Request Flow
//!
//! 1. The **HTTP adapter** ([`server`]) validates the request into a
//!    [`models::SearchQuery`].
//! 2. The **normalizer** ([`normalize`]) rewrites the product name into a
//!    primary query plus fallback candidates (hard map → synonyms →
//!    meaning-reducing fallbacks).
//! 3. The **orchestrator** ([`orchestrator`]) consults the positive and
//!    negative caches ([`cache`]), then tries the **FastPath** HTTP
//!    executor ([`fastpath`]) and, if needed, the **SlowPath** browser
//!    executor ([`slowpath`]) over a shared [`browser`] pool — all under
//!    one [`budget::Budget`].
//! 4. Fallback results pass the **validation gate** ([`gate`]) before
//!    acceptance; terminal failures are logged durably ([`failures`]) for
//!    rule curation.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Core data types: `SearchQuery`, `Offer`, `SearchOutcome` |
//! | [`budget`] | Per-request wall-clock budget with stage sub-budgets |
//! | [`textnorm`] | Normalization function, grade tokens, similarity |
//! | [`resources`] | Static rule tables (hard map, synonyms, brands) |
//! | [`normalize`] | Three-level query normalizer |
//! | [`gate`] | Post-hoc validation of fallback results |
//! | [`extract`] | Aggregator HTML parsing and safe accessors |
//! | [`fastpath`] | HTTP+HTML crawl executor |
//! | [`slowpath`] | Headless-browser crawl executor |
//! | [`browser`] | Capacity-bounded browser pool (driver behind a trait) |
//! | [`cache`] | Positive/negative caches and circuit-breaker state |
//! | [`orchestrator`] | The per-request pipeline state machine |
//! | [`failures`] | Durable failure recording and analytics queries |
//! | [`server`] | JSON HTTP API |

pub mod browser;
pub mod budget;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod failures;
pub mod fastpath;
pub mod gate;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod resources;
pub mod server;
pub mod slowpath;
pub mod textnorm;
