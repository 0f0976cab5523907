//! Three-level query normalization with early exit.
//!
//! Transforms a raw product name into a canonical primary query plus
//! progressively broader fallback candidates:
//!
//! ```text
//! Level 0  hard map        exact match → Done(canonical), skip the rest
//! Level 1  synonym expand  [q, q_stripped, q_hangul, q_latin]  (never contracts)
//! Level 2  fallback        [brand+model, model, brand, category_tag]
//! ```
//!
//! Level-2 candidates reduce meaning, so the orchestrator only accepts
//! their results after the validation gate ([`crate::gate`]).

use std::sync::Arc;

use crate::models::{Candidate, CandidateLevel, NormalizedQuery};
use crate::resources::RuleSet;
use crate::textnorm::{normalize, preserves_grade_tokens, tokens};

/// Result of one normalization level, consumed by the linear driver.
enum LevelOutcome {
    /// The level produced a final canonical query; stop here.
    Done(String),
    /// No decision; the next level sees the same normalized input.
    PassThrough,
}

/// At most this many candidates are ever emitted.
const MAX_CANDIDATES: usize = 8;

/// Rule-driven query normalizer. Cheap to clone; the rule tables are shared.
#[derive(Clone)]
pub struct Normalizer {
    rules: Arc<RuleSet>,
}

impl Normalizer {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// Run the full pipeline on a raw product name.
    pub fn run(&self, raw: &str) -> NormalizedQuery {
        let q = normalize(raw);
        let query_tokens = tokens(raw);
        let category = self.rules.detect_category(raw);
        let brand = self.rules.detect_brand(&query_tokens);
        let model = self.residual_model(&query_tokens);

        if let LevelOutcome::Done(canonical) = self.level0_hard_map(raw, &q) {
            let primary = normalize(&canonical);
            let broad = self.is_broad(&primary);
            return NormalizedQuery {
                primary: primary.clone(),
                candidates: vec![Candidate {
                    query: primary,
                    level: CandidateLevel::HardMap,
                }],
                category,
                brand,
                model,
                hard_mapped: true,
                broad,
            };
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for query in self.level1_synonyms(&q) {
            push_unique(&mut candidates, query, CandidateLevel::Synonym);
        }
        for query in self.level2_fallback(&query_tokens, brand.as_deref(), category) {
            push_unique(&mut candidates, query, CandidateLevel::Fallback);
        }
        candidates.truncate(MAX_CANDIDATES);

        // The normalized input is always emitted first, so a non-empty
        // candidate list is guaranteed for any non-empty query.
        let primary = candidates
            .first()
            .map(|c| c.query.clone())
            .unwrap_or_else(|| q.clone());
        let broad = self.is_broad(&primary);

        NormalizedQuery {
            primary,
            candidates,
            category,
            brand,
            model,
            hard_mapped: false,
            broad,
        }
    }

    /// Level 0: exact hard-map lookup with the accessory guard and the
    /// brand/grade validation gate.
    fn level0_hard_map(&self, raw: &str, q: &str) -> LevelOutcome {
        if self.rules.is_accessory(raw) {
            tracing::debug!(query = %q, "hard map skipped: accessory token present");
            return LevelOutcome::PassThrough;
        }
        let Some(mapping) = self.rules.find_hard_mapping(q, raw) else {
            return LevelOutcome::PassThrough;
        };

        // The canonical must still name a brand and keep every grade token
        // of the raw input; otherwise the mapping changed the product.
        let canonical_tokens = tokens(&mapping.canonical);
        if self.rules.detect_brand(&canonical_tokens).is_none() {
            tracing::warn!(canonical = %mapping.canonical, "hard map rejected: no brand token");
            return LevelOutcome::PassThrough;
        }
        if !preserves_grade_tokens(raw, &mapping.canonical) {
            tracing::warn!(canonical = %mapping.canonical, "hard map rejected: grade token lost");
            return LevelOutcome::PassThrough;
        }

        tracing::debug!(query = %q, canonical = %mapping.canonical, "hard map matched");
        LevelOutcome::Done(mapping.canonical.clone())
    }

    /// Level 1: meaning-preserving expansions of the normalized query.
    ///
    /// Emits, in order: the query itself, the query with color and
    /// purchase-condition tokens stripped, a Hangul-only transliteration,
    /// and a Latin-only transliteration. Candidates that would lose a grade
    /// token are dropped.
    fn level1_synonyms(&self, q: &str) -> Vec<String> {
        let base: Vec<String> = q.split_whitespace().map(String::from).collect();

        let stripped: Vec<String> = base
            .iter()
            .filter(|t| !self.rules.is_color(t) && !self.rules.is_condition(t))
            .cloned()
            .collect();

        let hangul: Vec<String> = stripped
            .iter()
            .map(|t| self.rules.to_hangul(t).unwrap_or(t).to_string())
            .collect();

        let latin: Vec<String> = stripped
            .iter()
            .map(|t| self.rules.to_latin(t).unwrap_or(t).to_string())
            .collect();

        [base, stripped, hangul, latin]
            .into_iter()
            .map(|toks| toks.join(" "))
            .map(|c| normalize(&c))
            .filter(|c| !c.is_empty() && preserves_grade_tokens(q, c))
            .collect()
    }

    /// Level 2: meaning-reducing fallbacks, gated downstream.
    fn level2_fallback(
        &self,
        query_tokens: &[String],
        brand: Option<&str>,
        category: crate::models::Category,
    ) -> Vec<String> {
        let model = self.residual_model(query_tokens);
        let mut out = Vec::new();

        if let (Some(brand), Some(model)) = (brand, model.as_deref()) {
            out.push(format!("{brand} {model}"));
        }
        if let Some(model) = model {
            out.push(model);
        }
        if let Some(brand) = brand {
            out.push(brand.to_string());
        }
        if let Some(tag) = self.rules.category_tag(category) {
            out.push(tag.to_string());
        }

        out.into_iter()
            .map(|c| normalize(&c))
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Model string: the first few tokens that are not brand-lexicon entries.
    fn residual_model(&self, query_tokens: &[String]) -> Option<String> {
        let residual: Vec<&str> = query_tokens
            .iter()
            .filter(|t| self.rules.detect_brand(std::slice::from_ref(t)).is_none())
            .map(String::as_str)
            .take(3)
            .collect();
        if residual.is_empty() {
            None
        } else {
            Some(residual.join(" "))
        }
    }

    /// Broad-query rule: at most two tokens, one of them a broad keyword.
    fn is_broad(&self, primary: &str) -> bool {
        let toks: Vec<&str> = primary.split_whitespace().collect();
        toks.len() <= 2 && toks.iter().any(|t| self.rules.is_broad_keyword(t))
    }
}

fn push_unique(candidates: &mut Vec<Candidate>, query: String, level: CandidateLevel) {
    if candidates.len() >= MAX_CANDIDATES {
        return;
    }
    if !candidates.iter().any(|c| c.query == query) {
        candidates.push(Candidate { query, level });
    }
}
