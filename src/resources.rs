//! Static normalization resources: the hard-mapping table, synonym pairs,
//! accessory/color/condition token lists, category keywords, the brand
//! lexicon, and broad-query keywords.
//!
//! All tables are domain-curated **data**, not code: they ship with a
//! compiled-in default set and can be overridden from a TOML rules file at
//! startup. Hot reload is not supported; the tables are read-only after
//! load.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::models::Category;
use crate::textnorm::normalize;

/// One hard-mapping rule. The stored key is already normalized with the
/// same function applied to queries, so matching is plain string equality.
#[derive(Debug, Clone)]
pub struct HardMapping {
    pub key: String,
    pub canonical: String,
    /// Extra per-rule skip tokens on top of the global accessory set.
    pub skip_if_contains: Vec<String>,
}

/// The full rule set, loaded once at startup.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Sorted by descending raw-key length so the longest key wins.
    hard_map: Vec<HardMapping>,
    hangul_to_latin: HashMap<String, String>,
    latin_to_hangul: HashMap<String, String>,
    accessory_tokens: Vec<String>,
    colors: HashSet<String>,
    conditions: HashSet<String>,
    categories: Vec<(Category, Vec<String>)>,
    brands: HashMap<String, String>,
    broad_keywords: HashSet<String>,
}

/// Serde shape of the optional TOML rules file. Absent sections fall back
/// to the builtin tables.
#[derive(Debug, Deserialize, Default)]
struct RulesFile {
    #[serde(default)]
    hard_map: Vec<HardMapEntry>,
    #[serde(default)]
    synonyms: Option<HashMap<String, String>>,
    #[serde(default)]
    accessory_tokens: Option<Vec<String>>,
    #[serde(default)]
    colors: Option<Vec<String>>,
    #[serde(default)]
    conditions: Option<Vec<String>>,
    #[serde(default)]
    brands: Option<HashMap<String, String>>,
    #[serde(default)]
    broad_keywords: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct HardMapEntry {
    key: String,
    canonical: String,
    #[serde(default)]
    skip_if_contains: Vec<String>,
}

impl RuleSet {
    /// The compiled-in default tables.
    pub fn builtin() -> Self {
        let hard_map = vec![
            ("맥북 에어 15", "Apple 맥북 에어 15", vec![]),
            ("macbook air 15", "Apple 맥북 에어 15", vec![]),
            ("맥북 에어 13", "Apple 맥북 에어 13", vec![]),
            ("아이폰 15 프로", "Apple 아이폰 15 프로", vec![]),
            ("아이폰 15", "Apple 아이폰 15", vec![]),
            ("samsung 갤럭시 버즈", "삼성전자 갤럭시 버즈", vec![]),
            ("갤럭시 s24 울트라", "삼성전자 갤럭시 S24 울트라", vec![]),
            ("갤럭시 s24", "삼성전자 갤럭시 S24", vec![]),
            ("에어팟 프로 2", "Apple 에어팟 프로 2", vec![]),
            ("lg 그램 16", "LG전자 그램 16", vec![]),
        ];

        let synonyms: Vec<(&str, &str)> = vec![
            ("맥북", "macbook"),
            ("아이폰", "iphone"),
            ("아이패드", "ipad"),
            ("에어팟", "airpods"),
            ("애플워치", "apple watch"),
            ("갤럭시", "galaxy"),
            ("버즈", "buds"),
            ("에어", "air"),
            ("미니", "mini"),
            ("프로", "pro"),
            ("맥스", "max"),
            ("울트라", "ultra"),
            ("플러스", "plus"),
            ("애플", "apple"),
            ("삼성전자", "samsung"),
            ("삼성", "samsung"),
            ("엘지", "lg"),
            ("샤오미", "xiaomi"),
            ("다이슨", "dyson"),
        ];

        let accessory_tokens = [
            "케이스", "커버", "필름", "보호필름", "보호", "거치대", "스탠드", "파우치",
            "가방", "포함", "번들", "세트", "구성", "충전기", "어댑터", "케이블", "허브",
            "렌즈캡", "마운트", "삼각대", "case", "cover", "film", "stand", "bundle",
        ];

        let colors = [
            "화이트", "블랙", "실버", "골드", "그레이", "블루", "핑크", "레드", "그린",
            "퍼플", "로즈", "샴페인", "차콜", "브론즈", "건메탈", "white", "black",
            "silver", "gold", "gray", "blue", "pink", "red", "green", "purple",
        ];

        let conditions = ["자급제", "정품", "리퍼", "새제품", "중고", "리뉴얼", "미개봉"];

        // Order matters: first match wins. Audio before Phone so that
        // "갤럭시 버즈" classifies by the product, not the brand line.
        let categories: Vec<(Category, Vec<&str>)> = vec![
            (
                Category::Audio,
                vec![
                    "이어폰", "에어팟", "버즈", "이어버드", "헤드폰", "스피커", "airpods",
                    "buds", "headphone", "earphone",
                ],
            ),
            (
                Category::Laptop,
                vec![
                    "노트북", "랩탑", "맥북", "그램", "갤럭시북", "macbook", "laptop",
                    "notebook",
                ],
            ),
            (
                Category::Phone,
                vec!["아이폰", "갤럭시", "스마트폰", "핸드폰", "iphone", "galaxy", "폰"],
            ),
            (
                Category::Food,
                vec![
                    "라면", "컵라면", "과자", "김치", "참치", "햇반", "우유", "커피", "생수",
                ],
            ),
            (
                Category::Appliance,
                vec![
                    "냉장고", "세탁기", "에어컨", "청소기", "건조기", "공기청정기",
                    "전자레인지", "tv", "티비",
                ],
            ),
        ];

        let brands: Vec<(&str, &str)> = vec![
            ("apple", "apple"),
            ("애플", "apple"),
            ("samsung", "samsung"),
            ("삼성", "samsung"),
            ("삼성전자", "samsung"),
            ("lg", "lg"),
            ("lg전자", "lg"),
            ("엘지", "lg"),
            ("sony", "sony"),
            ("소니", "sony"),
            ("bose", "bose"),
            ("보스", "bose"),
            ("jbl", "jbl"),
            ("beats", "beats"),
            ("dell", "dell"),
            ("hp", "hp"),
            ("asus", "asus"),
            ("lenovo", "lenovo"),
            ("레노버", "lenovo"),
            ("xiaomi", "xiaomi"),
            ("샤오미", "xiaomi"),
            ("dyson", "dyson"),
            ("다이슨", "dyson"),
            ("농심", "농심"),
            ("오뚜기", "오뚜기"),
            ("삼양", "삼양"),
        ];

        let broad_keywords = [
            "아이폰", "갤럭시", "맥북", "노트북", "이어폰", "에어팟", "버즈", "아이패드",
            "iphone", "galaxy", "macbook",
        ];

        Self::assemble(
            hard_map
                .into_iter()
                .map(|(k, c, s)| HardMapEntry {
                    key: k.to_string(),
                    canonical: c.to_string(),
                    skip_if_contains: s,
                })
                .collect(),
            synonyms
                .into_iter()
                .map(|(h, l)| (h.to_string(), l.to_string()))
                .collect(),
            accessory_tokens.iter().map(|s| s.to_string()).collect(),
            colors.iter().map(|s| s.to_string()).collect(),
            conditions.iter().map(|s| s.to_string()).collect(),
            categories
                .into_iter()
                .map(|(c, kws)| (c, kws.into_iter().map(String::from).collect()))
                .collect(),
            brands
                .into_iter()
                .map(|(t, c)| (t.to_string(), c.to_string()))
                .collect(),
            broad_keywords.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Load rules from a TOML file, overlaying the builtin defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RulesFile = toml::from_str(content).context("Failed to parse rules file")?;
        let builtin = Self::builtin();

        let hard_map = if file.hard_map.is_empty() {
            builtin
                .hard_map
                .iter()
                .map(|m| HardMapEntry {
                    key: m.key.clone(),
                    canonical: m.canonical.clone(),
                    skip_if_contains: m.skip_if_contains.clone(),
                })
                .collect()
        } else {
            file.hard_map
        };

        Ok(Self::assemble(
            hard_map,
            file.synonyms
                .map(|m| m.into_iter().collect())
                .unwrap_or_else(|| {
                    builtin
                        .hangul_to_latin
                        .iter()
                        .map(|(h, l)| (h.clone(), l.clone()))
                        .collect()
                }),
            file.accessory_tokens
                .unwrap_or_else(|| builtin.accessory_tokens.clone()),
            file.colors
                .map(|v| v.into_iter().collect())
                .unwrap_or_else(|| builtin.colors.clone().into_iter().collect()),
            file.conditions
                .map(|v| v.into_iter().collect())
                .unwrap_or_else(|| builtin.conditions.clone().into_iter().collect()),
            builtin.categories.clone(),
            file.brands.unwrap_or_else(|| builtin.brands.clone()),
            file.broad_keywords
                .map(|v| v.into_iter().collect())
                .unwrap_or_else(|| builtin.broad_keywords.clone().into_iter().collect()),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        entries: Vec<HardMapEntry>,
        synonyms: Vec<(String, String)>,
        accessory_tokens: Vec<String>,
        colors: Vec<String>,
        conditions: Vec<String>,
        categories: Vec<(Category, Vec<String>)>,
        brands: HashMap<String, String>,
        broad_keywords: Vec<String>,
    ) -> Self {
        // Keys are normalized with the query-side function, then sorted by
        // descending raw-key length so longest-match-first is a plain scan.
        let mut hard_map: Vec<HardMapping> = entries
            .into_iter()
            .map(|e| HardMapping {
                key: normalize(&e.key),
                canonical: e.canonical,
                skip_if_contains: e
                    .skip_if_contains
                    .into_iter()
                    .map(|t| t.to_lowercase())
                    .collect(),
            })
            .collect();
        hard_map.sort_by(|a, b| b.key.chars().count().cmp(&a.key.chars().count()));

        let mut hangul_to_latin = HashMap::new();
        let mut latin_to_hangul = HashMap::new();
        for (hangul, latin) in synonyms {
            latin_to_hangul.insert(latin.clone(), hangul.clone());
            hangul_to_latin.insert(hangul, latin);
        }

        Self {
            hard_map,
            hangul_to_latin,
            latin_to_hangul,
            accessory_tokens: accessory_tokens
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            colors: colors.into_iter().map(|t| t.to_lowercase()).collect(),
            conditions: conditions.into_iter().map(|t| t.to_lowercase()).collect(),
            categories,
            brands: brands
                .into_iter()
                .map(|(t, c)| (t.to_lowercase(), c))
                .collect(),
            broad_keywords: broad_keywords
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    /// True if the raw input mentions any accessory token (global set).
    pub fn is_accessory(&self, raw: &str) -> bool {
        let lowered = raw.to_lowercase();
        self.accessory_tokens.iter().any(|t| lowered.contains(t))
    }

    /// An accessory listing offered against a non-accessory query. The
    /// list-page scorer zeroes these so a case or film never outranks the
    /// product itself, regardless of listing order.
    pub fn is_accessory_trap(&self, query: &str, candidate: &str) -> bool {
        self.is_accessory(candidate) && !self.is_accessory(query)
    }

    /// Find the hard mapping whose stored key exactly equals the normalized
    /// query, scanning longest raw key first. Per-rule skip tokens are
    /// checked against the raw input.
    pub fn find_hard_mapping(&self, normalized: &str, raw: &str) -> Option<&HardMapping> {
        let raw_lower = raw.to_lowercase();
        self.hard_map.iter().find(|m| {
            m.key == normalized && !m.skip_if_contains.iter().any(|t| raw_lower.contains(t))
        })
    }

    /// First-match category detection over the keyword table.
    pub fn detect_category(&self, text: &str) -> Category {
        let lowered = text.to_lowercase();
        for (category, keywords) in &self.categories {
            if keywords.iter().any(|k| lowered.contains(k.as_str())) {
                return *category;
            }
        }
        Category::Other
    }

    /// Representative search term for a category, used as the last fallback
    /// candidate. `Other` has none.
    pub fn category_tag(&self, category: Category) -> Option<&'static str> {
        match category {
            Category::Phone => Some("스마트폰"),
            Category::Laptop => Some("노트북"),
            Category::Audio => Some("이어폰"),
            Category::Food => Some("식품"),
            Category::Appliance => Some("가전"),
            Category::Other => None,
        }
    }

    /// Canonical brand for the first lexicon token found, if any.
    pub fn detect_brand(&self, tokens: &[String]) -> Option<String> {
        tokens.iter().find_map(|t| self.brands.get(t).cloned())
    }

    pub fn is_color(&self, token: &str) -> bool {
        self.colors.contains(token)
    }

    pub fn is_condition(&self, token: &str) -> bool {
        self.conditions.contains(token)
    }

    pub fn is_broad_keyword(&self, token: &str) -> bool {
        self.broad_keywords.contains(token)
    }

    pub fn to_latin(&self, token: &str) -> Option<&str> {
        self.hangul_to_latin.get(token).map(String::as_str)
    }

    pub fn to_hangul(&self, token: &str) -> Option<&str> {
        self.latin_to_hangul.get(token).map(String::as_str)
    }
}
