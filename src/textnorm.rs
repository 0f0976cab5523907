//! Text normalization primitives shared by the normalizer and the
//! validation gate.
//!
//! The single normalization function [`normalize`] is applied both to
//! incoming queries and to hard-mapping keys at load time, so exact string
//! equality between the two is well-defined.

use std::collections::HashMap;

/// Hangul syllable range used for boundary detection and filtering.
fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

/// Canonical normalization `N(s)`:
///
/// 1. lowercase
/// 2. collapse whitespace runs, trim
/// 3. insert a space at every Hangul↔Latin letter boundary
/// 4. drop every char that is not alphanumeric, Hangul, `-`, `_`, or space
/// 5. collapse whitespace and trim again
pub fn normalize(s: &str) -> String {
    let lowered = s.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut spaced = String::with_capacity(collapsed.len() + 8);
    let mut prev: Option<char> = None;
    for c in collapsed.chars() {
        if let Some(p) = prev {
            let boundary = (is_hangul(p) && c.is_ascii_alphabetic())
                || (p.is_ascii_alphabetic() && is_hangul(c));
            if boundary {
                spaced.push(' ');
            }
        }
        spaced.push(c);
        prev = Some(c);
    }

    let filtered: String = spaced
        .chars()
        .filter(|&c| c.is_ascii_alphanumeric() || is_hangul(c) || c == '-' || c == '_' || c == ' ')
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace tokens of the normalized form.
pub fn tokens(s: &str) -> Vec<String> {
    normalize(s)
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// Latin grade keywords. Korean spellings are folded onto these before
/// extraction so `갤럭시 버즈 프로` and `galaxy buds pro` agree.
const GRADE_KEYWORDS: &[&str] = &["pro", "max", "ultra", "fe", "plus"];

const KOREAN_GRADE_FORMS: &[(&str, &str)] = &[
    ("프로", " pro "),
    ("맥스", " max "),
    ("울트라", " ultra "),
    ("플러스", " plus "),
];

/// Extract the multiset of grade tokens from a string: every digit run plus
/// every standalone grade keyword (`pro`, `max`, `ultra`, `fe`, `plus`),
/// with Korean spellings counted as their Latin equivalents.
///
/// Grade tokens distinguish product generations and tiers; rewrites that
/// lose one ("버즈3 프로" → "버즈") change the product being searched.
pub fn grade_tokens(s: &str) -> Vec<String> {
    let mut folded = normalize(s);
    for (korean, latin) in KOREAN_GRADE_FORMS {
        folded = folded.replace(korean, latin);
    }

    let mut out = Vec::new();
    for token in folded.split_whitespace() {
        if GRADE_KEYWORDS.contains(&token) {
            out.push(token.to_string());
            continue;
        }
        // Digit runs can be embedded ("s24", "버즈3").
        let mut run = String::new();
        for c in token.chars() {
            if c.is_ascii_digit() {
                run.push(c);
            } else if !run.is_empty() {
                out.push(std::mem::take(&mut run));
            }
        }
        if !run.is_empty() {
            out.push(run);
        }
    }
    out.sort();
    out
}

/// True iff every grade token of `source` (with multiplicity) also appears
/// in `candidate`.
pub fn preserves_grade_tokens(source: &str, candidate: &str) -> bool {
    let mut available: HashMap<String, usize> = HashMap::new();
    for t in grade_tokens(candidate) {
        *available.entry(t).or_default() += 1;
    }
    for t in grade_tokens(source) {
        match available.get_mut(&t) {
            Some(n) if *n > 0 => *n -= 1,
            _ => return false,
        }
    }
    true
}

/// Jaccard similarity of whitespace token sets after normalization.
///
/// Returns 0.0 when either side has no tokens.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: std::collections::HashSet<String> = tokens(a).into_iter().collect();
    let set_b: std::collections::HashSet<String> = tokens(b).into_iter().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}
