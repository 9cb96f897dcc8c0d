//! Search queries and candidate URL selection for one disease.

use std::collections::HashSet;

use reqwest::Url;

use crate::entities::disease::DiseaseInfo;
use crate::entities::search_config::SearchConfig;

/// Organ-system group names in the catalog; they are not searched.
const CATEGORY_ENTRIES: [&str; 16] = [
    "代謝系疾患",
    "神経・筋疾患",
    "循環器系疾患",
    "免疫系疾患",
    "皮膚・結合組織疾患",
    "血液系疾患",
    "腎・泌尿器系疾患",
    "呼吸器系疾患",
    "骨・関節系疾患",
    "内分泌系疾患",
    "視覚系疾患",
    "聴覚・平衡機能系疾患",
    "筋萎縮性側索硬化症",
    "球脊髄性筋萎縮症",
    "消化器系疾患",
    "耳鼻科系疾患",
];

/// General entries that are searched even though they group diseases.
const ALWAYS_INCLUDED: [&str; 4] = [
    "染色体または遺伝子に変化を伴う症候群",
    "遺伝検査用疾患群",
    "難病",
    "指定難病",
];

/// Search engines, social media, shopping and blog hosts.
const IRRELEVANT_DOMAINS: [&str; 16] = [
    "google.com",
    "youtube.com",
    "facebook.com",
    "twitter.com",
    "instagram.com",
    "linkedin.com",
    "amazon.com",
    "wikipedia.org",
    "yahoo.co.jp",
    "amazon.co.jp",
    "rakuten.co.jp",
    "mercari.com",
    "note.com",
    "ameblo.jp",
    "livedoor.jp",
    "fc2.com",
];

const FALLBACK_JA_SUFFIXES: [&str; 8] = [
    "患者会",
    "家族会",
    "支援団体",
    "患者支援",
    "難病 支援",
    "患者団体",
    "自助グループ",
    "情報サイト",
];

const FALLBACK_EN_SUFFIXES: [&str; 4] = [
    "patient association japan",
    "support group japan",
    "patient organization japan",
    "rare disease japan",
];

pub fn is_category_entry(disease: &DiseaseInfo) -> bool {
    let name = disease.name_ja.trim();
    CATEGORY_ENTRIES.contains(&name) && !ALWAYS_INCLUDED.contains(&name)
}

/// Queries from the enabled terms, or the default query set when none are enabled.
pub fn build_queries(disease: &DiseaseInfo, config: &SearchConfig) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut queries: Vec<String> = config
        .enabled_terms()
        .map(|term| term.query())
        .filter(|q| seen.insert(q.clone()))
        .collect();
    if !queries.is_empty() {
        return queries;
    }

    queries.extend(
        FALLBACK_JA_SUFFIXES
            .iter()
            .map(|suffix| format!("{} {suffix}", disease.name_ja.trim())),
    );
    if let Some(name_en) = disease.name_en.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        queries.extend(
            FALLBACK_EN_SUFFIXES
                .iter()
                .map(|suffix| format!("{name_en} {suffix}")),
        );
    }
    queries
}

pub fn is_irrelevant_domain(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return true;
    };
    IRRELEVANT_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Deduplicates in first-seen order, drops irrelevant hosts, keeps at most `cap`.
pub fn select_candidates(urls: impl IntoIterator<Item = String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !is_irrelevant_domain(url))
        .filter(|url| seen.insert(url.clone()))
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::search_config::{Language, SearchTerm, TermType};

    fn disease(name_ja: &str, name_en: Option<&str>) -> DiseaseInfo {
        DiseaseInfo {
            disease_id: "NANDO:1".into(),
            name_ja: name_ja.into(),
            name_en: name_en.map(str::to_string),
            synonyms_ja: None,
            synonyms_en: None,
            is_intractable: true,
            is_childhood_chronic: false,
        }
    }

    #[test]
    fn category_entries_are_skipped_but_general_terms_are_not() {
        assert!(is_category_entry(&disease("代謝系疾患", None)));
        assert!(is_category_entry(&disease("球脊髄性筋萎縮症", None)));
        assert!(!is_category_entry(&disease("指定難病", None)));
        assert!(!is_category_entry(&disease("ファブリー病", None)));
    }

    #[test]
    fn queries_follow_enabled_terms() {
        let d = disease("ファブリー病", Some("Fabry disease"));
        let mut config = SearchConfig::defaults_for(&d);
        let queries = build_queries(&d, &config);
        assert_eq!(
            queries,
            vec![
                "ファブリー病 患者会",
                "ファブリー病 家族会",
                "ファブリー病 支援団体",
                "Fabry disease 患者会",
                "Fabry disease 支援団体",
            ]
        );

        config.search_terms = vec![SearchTerm::new("アンダーソン病", Language::Ja, TermType::General)];
        assert_eq!(build_queries(&d, &config), vec!["アンダーソン病".to_string()]);
    }

    #[test]
    fn no_enabled_terms_uses_fallback_queries() {
        let d = disease("ファブリー病", Some("Fabry disease"));
        let mut config = SearchConfig::defaults_for(&d);
        for term in &mut config.search_terms {
            term.enabled = false;
        }
        let queries = build_queries(&d, &config);
        assert_eq!(queries.len(), 12);
        assert_eq!(queries[3], "ファブリー病 患者支援");
        assert_eq!(queries[8], "Fabry disease patient association japan");

        let ja_only = disease("ファブリー病", None);
        let mut config = SearchConfig::defaults_for(&ja_only);
        config.search_terms.clear();
        assert_eq!(build_queries(&ja_only, &config).len(), 8);
    }

    #[test]
    fn irrelevant_domains_include_subdomains() {
        assert!(is_irrelevant_domain("https://www.facebook.com/group"));
        assert!(is_irrelevant_domain("https://ja.wikipedia.org/wiki/x"));
        assert!(is_irrelevant_domain("https://someone.ameblo.jp/"));
        assert!(!is_irrelevant_domain("https://fabry.example.jp/"));
        assert!(!is_irrelevant_domain("https://notfacebook.com.example.org/"));
        assert!(is_irrelevant_domain("not a url"));
    }

    #[test]
    fn select_candidates_dedupes_filters_and_caps() {
        let urls = vec![
            "https://a.example.jp/".to_string(),
            "https://www.youtube.com/watch".to_string(),
            "https://a.example.jp/".to_string(),
            "https://b.example.jp/".to_string(),
            "https://c.example.jp/".to_string(),
        ];
        assert_eq!(
            select_candidates(urls, 2),
            vec!["https://a.example.jp/".to_string(), "https://b.example.jp/".to_string()]
        );
    }
}
