//! Post-hoc validation of fallback search results.
//!
//! Level-2 candidates reduce meaning (brand-only or category-only
//! searches), so a result they produce can plausibly be the wrong product
//! entirely. The gate rejects such results; rejection routes the
//! orchestrator to the next candidate and is never a terminal failure.

use crate::models::{Category, SearchHit};
use crate::resources::RuleSet;
use crate::textnorm::{jaccard, tokens};

/// Minimum token-set Jaccard similarity between the original input and the
/// returned product name.
const MIN_SIMILARITY: f64 = 0.30;

/// Why a result was rejected, for logging and failure records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    CategoryMismatch,
    LowSimilarity,
    BrandMismatch,
    NonPositivePrice,
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GateRejection::CategoryMismatch => "category mismatch",
            GateRejection::LowSimilarity => "similarity below threshold",
            GateRejection::BrandMismatch => "brand mismatch",
            GateRejection::NonPositivePrice => "non-positive price",
        };
        f.write_str(s)
    }
}

/// Both categories detected and different means incompatible; an
/// undetected side (`Other`) is treated as compatible.
fn categories_compatible(query: Category, result: Category) -> bool {
    query == result || query == Category::Other || result == Category::Other
}

/// Accept a fallback result iff all four conditions hold:
///
/// 1. query and result categories are compatible,
/// 2. token Jaccard(original raw input, result product name) ≥ 0.30,
/// 3. when both sides yield a brand from the lexicon, the brands match,
/// 4. the result carries a positive price.
pub fn validate(rules: &RuleSet, original_input: &str, hit: &SearchHit) -> Result<(), GateRejection> {
    if hit.lowest_price <= 0 {
        return Err(GateRejection::NonPositivePrice);
    }

    let query_category = rules.detect_category(original_input);
    let result_category = rules.detect_category(&hit.product_name);
    if !categories_compatible(query_category, result_category) {
        return Err(GateRejection::CategoryMismatch);
    }

    if jaccard(original_input, &hit.product_name) < MIN_SIMILARITY {
        return Err(GateRejection::LowSimilarity);
    }

    let query_brand = rules.detect_brand(&tokens(original_input));
    let result_brand = rules.detect_brand(&tokens(&hit.product_name));
    if let (Some(qb), Some(rb)) = (query_brand, result_brand) {
        if qb != rb {
            return Err(GateRejection::BrandMismatch);
        }
    }

    Ok(())
}
