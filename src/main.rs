//! # Price Scout CLI (`pscout`)
//!
//! The `pscout` binary runs the lowest-price search engine: database
//! initialization, one-shot searches from the terminal, the HTTP API
//! server, and failure-analytics queries.
//!
//! ## Usage
//!
//! ```bash
//! pscout --config ./config/pscout.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pscout init` | Create the SQLite database and run schema migrations |
//! | `pscout search "<name>"` | Run the full search pipeline once and print the result |
//! | `pscout serve` | Start the JSON HTTP API |
//! | `pscout failures stats` | Failure counts for the recent window |
//! | `pscout failures common` | Most repeated failing queries |
//! | `pscout failures export` | Dump failure data as JSON or CSV |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use price_scout::browser::BrowserPool;
use price_scout::cache::{CacheAdapter, CachePolicy, MemoryStore};
use price_scout::config::{self, Config};
use price_scout::db;
use price_scout::failures;
use price_scout::fastpath::FastPathExecutor;
use price_scout::migrate;
use price_scout::models::{SearchQuery, SearchStatus};
use price_scout::orchestrator::{Orchestrator, SearchExecutor};
use price_scout::resources::RuleSet;
use price_scout::server::{self, AppState};
use price_scout::slowpath::SlowPathExecutor;

/// Price Scout — lowest-price search against a price aggregator under a
/// hard per-request time budget.
#[derive(Parser)]
#[command(
    name = "pscout",
    about = "Lowest-price search engine: cache-first HTTP/browser crawling pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults are used if
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/pscout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the failure-learning table.
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Run the search pipeline once and print the outcome.
    Search {
        /// The product name to search for.
        name: String,

        /// Reference price for the is-it-cheaper comparison.
        #[arg(long)]
        price: Option<i64>,

        /// Aggregator URL of the product the user is looking at.
        #[arg(long)]
        url: Option<String>,
    },

    /// Start the JSON HTTP API server.
    Serve,

    /// Failure-learning analytics.
    Failures {
        #[command(subcommand)]
        action: FailuresAction,
    },
}

#[derive(Subcommand)]
enum FailuresAction {
    /// Aggregate counts for the recent window.
    Stats {
        /// Window in days.
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Most repeated failing queries.
    Common {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Dump failure data for offline rule curation.
    Export {
        /// Output format: json or csv.
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        config::default_config()?
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Database initialized at {}", config.database.path.display());
        }

        Commands::Search { name, price, url } => {
            let state = build_state(config).await?;
            let product_code = url.as_deref().and_then(price_scout::extract::extract_pcode);
            let query = SearchQuery::new(&name, price, url, product_code)
                .map_err(|e| anyhow::anyhow!("invalid query: {e}"))?;

            let outcome = state.orchestrator.search(&query).await;
            print_outcome(&outcome, price);
        }

        Commands::Serve => {
            let state = build_state(config).await?;
            server::run_server(state).await?;
        }

        Commands::Failures { action } => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations_on(&pool).await?;
            match action {
                FailuresAction::Stats { days } => {
                    let stats = failures::stats(&pool, days).await?;
                    println!(
                        "last {} days: {} total, {} pending, {} resolved",
                        days, stats.total, stats.pending, stats.resolved
                    );
                    for c in &stats.by_category {
                        println!("  {}: {}", c.category, c.count);
                    }
                }
                FailuresAction::Common { limit } => {
                    for f in failures::common_failures(&pool, limit).await? {
                        println!(
                            "{:4}x  {}  (normalized: {})",
                            f.failure_count, f.original_query, f.normalized_query
                        );
                    }
                }
                FailuresAction::Export { format } => {
                    println!("{}", failures::export(&pool, &format, 30, 500).await?);
                }
            }
            pool.close().await;
        }
    }

    Ok(())
}

/// Wire the engine from configuration.
///
/// The headless-browser driver is an external integration implementing
/// [`price_scout::browser::BrowserBackend`]; without one linked in, the
/// pool reports `disabled` and the orchestrator runs FastPath-only.
async fn build_state(config: Config) -> Result<AppState> {
    let config = Arc::new(config);

    let pool = db::connect(&config).await?;
    migrate::run_migrations_on(&pool).await?;

    let rules = match &config.resources.rules_path {
        Some(path) => Arc::new(RuleSet::load(path)?),
        None => Arc::new(RuleSet::builtin()),
    };

    let cache = Arc::new(CacheAdapter::new(
        Box::new(MemoryStore::default()),
        CachePolicy {
            positive_ttl: Duration::from_secs(config.cache.positive_ttl_secs),
            negative_ttl: Duration::from_secs(config.cache.negative_ttl_secs),
            op_timeout: Duration::from_millis(config.cache.op_timeout_ms),
            breaker_threshold: config.breaker.fail_threshold,
            breaker_open: Duration::from_secs(config.breaker.open_secs),
        },
    ));

    let browser = Arc::new(BrowserPool::disabled());
    if config.features.slowpath_enabled {
        tracing::info!("no browser driver linked in this build; SlowPath is skipped");
    }

    let fastpath: Arc<dyn SearchExecutor> = Arc::new(FastPathExecutor::new(
        config.aggregator.clone(),
        rules.clone(),
    )?);
    let slowpath: Option<Arc<dyn SearchExecutor>> =
        if config.features.slowpath_enabled && browser.is_enabled() {
            Some(Arc::new(SlowPathExecutor::new(
                browser.clone(),
                config.aggregator.clone(),
                rules.clone(),
            )))
        } else {
            None
        };

    let sink = failures::spawn_recorder(pool.clone(), config.failures.queue_capacity);

    let orchestrator = Arc::new(Orchestrator::new(
        rules,
        cache.clone(),
        fastpath,
        slowpath,
        sink,
        config.budget_config(),
        Duration::from_millis(config.budget.broad_fastpath_ms),
        config.aggregator.origin.clone(),
    )?);

    Ok(AppState {
        config,
        orchestrator,
        cache,
        browser,
        pool,
    })
}

fn print_outcome(outcome: &price_scout::models::SearchOutcome, reference_price: Option<i64>) {
    match &outcome.status {
        SearchStatus::CacheHit(hit)
        | SearchStatus::FastPathSuccess(hit)
        | SearchStatus::SlowPathSuccess(hit) => {
            let source = outcome.source().map(|s| s.as_str()).unwrap_or("?");
            println!("{} — {}원", hit.product_name, hit.lowest_price);
            println!("    link: {}", hit.link);
            if let Some(mall) = &hit.mall {
                println!("    mall: {}", mall);
            }
            for offer in &hit.top_offers {
                println!(
                    "    {}. {} {}원{}",
                    offer.rank,
                    offer.mall,
                    offer.price,
                    if offer.free_shipping { " (무료배송)" } else { "" }
                );
            }
            if let Some(current) = reference_price {
                let diff = hit.lowest_price - current;
                if diff < 0 {
                    println!("    {}원 cheaper than the reference price", -diff);
                } else {
                    println!("    not cheaper (diff {}원)", diff);
                }
            }
            println!("    source: {}, elapsed: {:.0}ms", source, outcome.elapsed_ms);
        }
        SearchStatus::NotFound { message }
        | SearchStatus::Timeout { message }
        | SearchStatus::Blocked { message }
        | SearchStatus::ParseError { message }
        | SearchStatus::BudgetExhausted { message } => {
            println!("search failed: {} ({:.0}ms)", message, outcome.elapsed_ms);
        }
    }
}
