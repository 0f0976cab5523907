//! HTML extraction for the aggregator's list and detail pages, plus the
//! safe-access helpers used at every extraction point.
//!
//! Parsing is kept free of networking so every function here can be tested
//! against mock HTML. Missing DOM structure produces typed defaults or
//! `None`, never a panic: a malformed offer is dropped, not the request.

use scraper::{Html, Selector};
use std::collections::HashSet;

use crate::models::Offer;
use crate::resources::RuleSet;
use crate::textnorm::{preserves_grade_tokens, tokens};

/// Upper bound accepted for any parsed price (won).
pub const MAX_PRICE: i64 = 1_000_000_000;

/// Body fragments that identify an anti-bot interstitial. Checked
/// case-insensitively against the whole body.
const BLOCK_SIGNATURES: &[&str] = &[
    "로봇",
    "robot",
    "captcha",
    "캡차",
    "접근이 제한",
    "access denied",
    "차단",
    "cloudflare",
    "just a moment",
    "verify you are human",
];

const NO_RESULTS_SIGNATURES: &[&str] = &[
    "검색 결과가 없습니다",
    "검색결과가 없습니다",
    "검색 결과가 없",
    "검색결과가 없",
    "결과가 없습니다",
];

// ============ Safe accessors ============

/// Parse a price by stripping every non-digit character. Returns `None`
/// for empty input, zero digits, or values outside `[1, MAX_PRICE]`.
pub fn safe_price(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() > 10 {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    if (1..=MAX_PRICE).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Trim and cap a text field; empty input becomes the default.
pub fn safe_text(text: &str, default: &str, max_len: usize) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return default.to_string();
    }
    trimmed.chars().take(max_len).collect()
}

/// Resolve an href to an absolute http(s) URL. Protocol-relative and
/// site-relative links are resolved against `base`; anything else
/// (javascript:, data:, empty) is rejected.
pub fn absolutize(href: &str, base: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if href.starts_with('/') {
        let origin = base
            .find("://")
            .and_then(|i| base[i + 3..].find('/').map(|j| &base[..i + 3 + j]))
            .unwrap_or(base);
        return Some(format!("{}{}", origin.trim_end_matches('/'), href));
    }
    None
}

// ============ Page classification ============

pub fn is_blocked_html(html: &str) -> bool {
    if html.is_empty() {
        return true;
    }
    let lowered = html.to_lowercase();
    BLOCK_SIGNATURES.iter().any(|k| lowered.contains(k))
}

/// A 200 response can still be a challenge or an empty shell; length plus
/// the signature list is the first line of defence.
pub fn is_probably_invalid_html(html: &str, min_len: usize) -> bool {
    html.len() < min_len || is_blocked_html(html)
}

pub fn is_no_results_html(html: &str) -> bool {
    let lowered = html.to_lowercase();
    NO_RESULTS_SIGNATURES.iter().any(|k| lowered.contains(k))
}

pub fn has_search_fingerprint(html: &str) -> bool {
    let doc = Html::parse_document(html);
    select_first(&doc, ".prod_item").is_some() || select_first(&doc, r#"a[href*="pcode="]"#).is_some()
}

pub fn has_product_fingerprint(html: &str) -> bool {
    let doc = Html::parse_document(html);
    select_first(&doc, "#lowPriceCompanyArea").is_some() || select_first(&doc, ".prod_tit").is_some()
}

fn select_first<'a>(doc: &'a Html, selector: &str) -> Option<scraper::ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next()
}

// ============ List page ============

/// Score how well a list-page link text matches the query.
///
/// Token overlap weighted toward the query side, with three demotions:
/// an accessory listing (case, film, cover) against a non-accessory
/// query scores zero outright; a candidate that lost a grade token is
/// halved; a candidate whose model codes share nothing with the query's
/// is cut hard. Listing order never decides between a product and its
/// accessories.
pub fn weighted_match_score(rules: &RuleSet, query: &str, candidate_text: &str) -> f64 {
    if rules.is_accessory_trap(query, candidate_text) {
        return 0.0;
    }

    let query_tokens: HashSet<String> = tokens(query).into_iter().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let cand_tokens: HashSet<String> = tokens(candidate_text).into_iter().collect();
    let overlap = query_tokens.intersection(&cand_tokens).count() as f64;
    let mut score = overlap / query_tokens.len() as f64;

    if !preserves_grade_tokens(query, candidate_text) {
        score *= 0.5;
    }

    let query_codes = model_codes(&query_tokens);
    if !query_codes.is_empty() {
        let cand_codes = model_codes(&cand_tokens);
        if !cand_codes.is_empty() && query_codes.is_disjoint(&cand_codes) {
            score *= 0.3;
        }
    }

    score
}

/// Model-code-shaped tokens: mixed ASCII letters and digits ("s24",
/// "wh-1000xm5", "b182w13").
fn model_codes(token_set: &HashSet<String>) -> HashSet<String> {
    token_set
        .iter()
        .filter(|t| {
            t.chars().count() >= 3
                && t.chars().any(|c| c.is_ascii_alphabetic())
                && t.chars().any(|c| c.is_ascii_digit())
        })
        .cloned()
        .collect()
}

/// Pull the `pcode` value out of a product link.
pub fn extract_pcode(href: &str) -> Option<String> {
    let idx = href.find("pcode=")?;
    let digits: String = href[idx + 6..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Extract product-code candidates from a search list page, best match
/// first. Links are scored against the query so a close listing beats an
/// earlier but unrelated (or accessory) one.
pub fn parse_search_candidates(
    rules: &RuleSet,
    html: &str,
    query: &str,
    max_candidates: usize,
) -> Vec<String> {
    let doc = Html::parse_document(html);

    let primary = Selector::parse(".prod_item .prod_name a").ok();
    let fallback = Selector::parse(r#"a[href*="pcode="]"#).ok();

    let mut links: Vec<scraper::ElementRef<'_>> = Vec::new();
    if let Some(sel) = &primary {
        links = doc.select(sel).collect();
    }
    if links.is_empty() {
        if let Some(sel) = &fallback {
            links = doc.select(sel).collect();
        }
    }

    let mut scored: Vec<(f64, String)> = Vec::new();
    for node in links.into_iter().take(max_candidates * 3) {
        let Some(href) = node.value().attr("href") else {
            continue;
        };
        let Some(pcode) = extract_pcode(href) else {
            continue;
        };
        let text: String = node.text().collect();
        let score = weighted_match_score(rules, query, text.trim());
        scored.push((score, pcode));
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored.into_iter().take(max_candidates).map(|(_, p)| p).collect()
}

// ============ Detail page ============

/// Product name and top offers parsed off a detail page.
#[derive(Debug, Clone)]
pub struct DetailExtract {
    pub product_name: String,
    pub offers: Vec<Offer>,
}

/// Parse the seller price table from a product detail page.
///
/// Offers with an unparsable price are dropped. The survivors are sorted
/// by price ascending (source order kept on ties) and re-ranked from 1.
/// Returns `None` when the price table is missing entirely.
pub fn parse_product_detail(
    html: &str,
    fallback_name: &str,
    base_url: &str,
    min_price: i64,
    top_n: usize,
) -> Option<DetailExtract> {
    let doc = Html::parse_document(html);

    let product_name = select_first(&doc, ".prod_tit")
        .map(|el| el.text().collect::<String>())
        .map(|t| safe_text(&t, fallback_name, 300))
        .unwrap_or_else(|| fallback_name.to_string());

    let items_sel =
        Selector::parse("#lowPriceCompanyArea .box__mall-price .list__mall-price .list-item")
            .ok()?;
    let price_sel = Selector::parse(".sell-price .text__num").ok()?;
    let mall_sel = Selector::parse(".box__logo img").ok()?;
    let delivery_sel = Selector::parse(".box__delivery").ok()?;
    let link_sel = Selector::parse("a.link__full-cover").ok()?;

    let mut offers: Vec<Offer> = Vec::new();
    for item in doc.select(&items_sel) {
        let price_text: String = item
            .select(&price_sel)
            .next()
            .map(|el| el.text().collect())
            .unwrap_or_default();
        let Some(price) = safe_price(&price_text) else {
            continue;
        };
        if min_price > 0 && price < min_price {
            continue;
        }

        let mall = item
            .select(&mall_sel)
            .next()
            .and_then(|el| el.value().attr("alt"))
            .map(|alt| safe_text(alt, "알 수 없음", 100))
            .unwrap_or_else(|| "알 수 없음".to_string());

        let delivery = item
            .select(&delivery_sel)
            .next()
            .map(|el| safe_text(&el.text().collect::<String>(), "", 100))
            .unwrap_or_default();
        let free_shipping = delivery.contains("무료");

        let link = item
            .select(&link_sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| absolutize(href, base_url))
            .unwrap_or_else(|| base_url.to_string());

        offers.push(Offer {
            rank: offers.len() as u32 + 1,
            mall,
            price,
            free_shipping,
            delivery,
            link,
        });
        if offers.len() >= top_n {
            break;
        }
    }

    if offers.is_empty() {
        return None;
    }

    offers.sort_by_key(|o| o.price);
    for (idx, offer) in offers.iter_mut().enumerate() {
        offer.rank = idx as u32 + 1;
    }

    Some(DetailExtract {
        product_name,
        offers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOCK_SEARCH_HTML: &str = r#"<!DOCTYPE html>
<html><body>
<div class="prod_item">
  <div class="prod_name"><a href="https://prod.example.com/info/?pcode=111222">삼성전자 갤럭시 버즈3 프로</a></div>
</div>
<div class="prod_item">
  <div class="prod_name"><a href="https://prod.example.com/info/?pcode=333444">갤럭시 버즈3 프로 케이스</a></div>
</div>
<div class="prod_item">
  <div class="prod_name"><a href="https://prod.example.com/info/?pcode=555666">갤럭시 버즈 라이브</a></div>
</div>
</body></html>"#;

    const MOCK_DETAIL_HTML: &str = r#"<!DOCTYPE html>
<html><body>
<h3 class="prod_tit">삼성전자 갤럭시 버즈3 프로</h3>
<div id="lowPriceCompanyArea"><div class="box__mall-price"><ul class="list__mall-price">
<li class="list-item">
  <div class="box__logo"><img alt="몰A"></div>
  <div class="sell-price"><span class="text__num">219,000원</span></div>
  <div class="box__delivery">무료배송</div>
  <a class="link__full-cover" href="/bridge/loadingBridge?pcode=111222"></a>
</li>
<li class="list-item">
  <div class="box__logo"><img alt="몰B"></div>
  <div class="sell-price"><span class="text__num">215,500원</span></div>
  <div class="box__delivery">배송비 2,500원</div>
  <a class="link__full-cover" href="https://mallb.example.com/p/1"></a>
</li>
<li class="list-item">
  <div class="box__logo"><img alt="몰C"></div>
  <div class="sell-price"><span class="text__num">가격문의</span></div>
  <div class="box__delivery"></div>
  <a class="link__full-cover" href="https://mallc.example.com/p/2"></a>
</li>
<li class="list-item">
  <div class="box__logo"><img alt="몰D"></div>
  <div class="sell-price"><span class="text__num">222,000원</span></div>
  <div class="box__delivery">무료배송</div>
  <a class="link__full-cover" href="//malld.example.com/p/3"></a>
</li>
</ul></div></div>
</body></html>"#;

    #[test]
    fn test_safe_price() {
        assert_eq!(safe_price("219,000원"), Some(219_000));
        assert_eq!(safe_price("1,234"), Some(1_234));
        assert_eq!(safe_price("가격문의"), None);
        assert_eq!(safe_price(""), None);
        assert_eq!(safe_price("0원"), None);
        assert_eq!(safe_price("99999999999"), None);
    }

    #[test]
    fn test_absolutize() {
        let base = "https://prod.example.com/info/?pcode=1";
        assert_eq!(
            absolutize("https://mall.example.com/p", base).as_deref(),
            Some("https://mall.example.com/p")
        );
        assert_eq!(
            absolutize("//mall.example.com/p", base).as_deref(),
            Some("https://mall.example.com/p")
        );
        assert_eq!(
            absolutize("/bridge/x", base).as_deref(),
            Some("https://prod.example.com/bridge/x")
        );
        assert_eq!(absolutize("javascript:void(0)", base), None);
        assert_eq!(absolutize("", base), None);
    }

    #[test]
    fn test_block_and_no_results_signatures() {
        assert!(is_blocked_html("<html>Just a Moment...</html>"));
        assert!(is_blocked_html("접근이 제한되었습니다"));
        assert!(!is_blocked_html(MOCK_SEARCH_HTML));
        assert!(is_no_results_html("<p>검색 결과가 없습니다</p>"));
        assert!(!is_no_results_html(MOCK_SEARCH_HTML));
    }

    #[test]
    fn test_invalid_html_length_floor() {
        assert!(is_probably_invalid_html("<html></html>", 5000));
        assert!(!is_probably_invalid_html(MOCK_SEARCH_HTML, 10));
    }

    #[test]
    fn test_fingerprints() {
        assert!(has_search_fingerprint(MOCK_SEARCH_HTML));
        assert!(!has_search_fingerprint("<html><body>hello</body></html>"));
        assert!(has_product_fingerprint(MOCK_DETAIL_HTML));
        assert!(!has_product_fingerprint("<html><body>hello</body></html>"));
    }

    #[test]
    fn test_extract_pcode() {
        assert_eq!(
            extract_pcode("https://x.example/info/?pcode=123456&cate=1"),
            Some("123456".to_string())
        );
        assert_eq!(extract_pcode("https://x.example/info/?code=1"), None);
        assert_eq!(extract_pcode("?pcode="), None);
    }

    #[test]
    fn test_weighted_score_zeroes_accessory_trap() {
        let rules = RuleSet::builtin();
        assert_eq!(
            weighted_match_score(&rules, "갤럭시 버즈3 프로", "갤럭시 버즈3 프로 케이스"),
            0.0
        );
        // An accessory-seeking query scores accessory listings normally.
        assert!(weighted_match_score(&rules, "아이폰 15 케이스", "아이폰 15 투명 케이스") > 0.5);
    }

    #[test]
    fn test_weighted_score_prefers_grade_match() {
        let rules = RuleSet::builtin();
        let with = weighted_match_score(&rules, "버즈3 프로", "삼성 갤럭시 버즈3 프로");
        let without = weighted_match_score(&rules, "버즈3 프로", "삼성 갤럭시 버즈 라이브");
        assert!(with > without);
    }

    #[test]
    fn test_weighted_score_penalizes_disjoint_model_codes() {
        let rules = RuleSet::builtin();
        let same = weighted_match_score(&rules, "소니 wh-1000xm5 헤드폰", "소니 wh-1000xm5 헤드폰");
        let other = weighted_match_score(&rules, "소니 wh-1000xm5 헤드폰", "소니 wh-ch520 헤드폰");
        assert!(same > other);
        assert!(other < 0.5);
    }

    #[test]
    fn test_search_candidates_scored_by_match() {
        let rules = RuleSet::builtin();
        let pcodes = parse_search_candidates(&rules, MOCK_SEARCH_HTML, "갤럭시 버즈3 프로", 12);
        assert!(!pcodes.is_empty());
        // The full-match listing must outrank the case and the older model.
        assert_eq!(pcodes[0], "111222");
        // The accessory listing ranks behind even the older model.
        assert_eq!(pcodes.last().map(String::as_str), Some("333444"));
    }

    #[test]
    fn test_search_candidates_accessory_listed_first_still_loses() {
        // A sponsored case bundle ahead of the base product is common on
        // real list pages; scoring, not listing order, must decide.
        let accessory_first = r#"<!DOCTYPE html>
<html><body>
<div class="prod_item">
  <div class="prod_name"><a href="https://prod.example.com/info/?pcode=333444">갤럭시 버즈3 프로 케이스</a></div>
</div>
<div class="prod_item">
  <div class="prod_name"><a href="https://prod.example.com/info/?pcode=111222">삼성전자 갤럭시 버즈3 프로</a></div>
</div>
</body></html>"#;

        let rules = RuleSet::builtin();
        let pcodes = parse_search_candidates(&rules, accessory_first, "갤럭시 버즈3 프로", 12);
        assert_eq!(pcodes[0], "111222");
    }

    #[test]
    fn test_search_candidates_empty_on_blank_page() {
        let rules = RuleSet::builtin();
        assert!(parse_search_candidates(&rules, "<html></html>", "갤럭시", 12).is_empty());
    }

    #[test]
    fn test_detail_parse_drops_bad_offer_and_sorts() {
        let extract = parse_product_detail(
            MOCK_DETAIL_HTML,
            "fallback",
            "https://prod.example.com/info/?pcode=111222",
            0,
            3,
        )
        .unwrap();
        assert_eq!(extract.product_name, "삼성전자 갤럭시 버즈3 프로");
        // 몰C has no parsable price and is dropped; three remain.
        assert_eq!(extract.offers.len(), 3);
        // Sorted ascending, re-ranked from 1.
        assert_eq!(extract.offers[0].price, 215_500);
        assert_eq!(extract.offers[0].mall, "몰B");
        assert_eq!(extract.offers[0].rank, 1);
        assert_eq!(extract.offers[1].price, 219_000);
        assert!(extract.offers[1].free_shipping);
        assert_eq!(extract.offers[2].price, 222_000);
        assert_eq!(extract.offers[2].rank, 3);
        // Relative and protocol-relative links made absolute.
        assert!(extract.offers[1].link.starts_with("https://prod.example.com/"));
        assert!(extract.offers[2].link.starts_with("https://malld.example.com/"));
    }

    #[test]
    fn test_detail_parse_min_price_floor() {
        let extract = parse_product_detail(
            MOCK_DETAIL_HTML,
            "fallback",
            "https://prod.example.com",
            216_000,
            3,
        )
        .unwrap();
        assert!(extract.offers.iter().all(|o| o.price >= 216_000));
    }

    #[test]
    fn test_detail_parse_missing_table() {
        assert!(parse_product_detail("<html></html>", "x", "https://e.com", 0, 3).is_none());
    }
}
