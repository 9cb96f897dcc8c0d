//! Web search backend and organization page fetching.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use reqwest_middleware::ClientWithMiddleware;
use tracing::debug;

use crate::error::FinderError;
use crate::transform::html::{self, PageText};

const SEARCH_API: &str = "web-search";
const PAGE_API: &str = "page-fetch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

#[derive(Clone)]
pub struct WebClient {
    client: ClientWithMiddleware,
    search_base: String,
    page_timeout: Duration,
}

impl WebClient {
    pub fn new(search_base: &str, page_timeout: Duration) -> Result<Self, FinderError> {
        Ok(Self {
            client: crate::sources::scrape_client()?,
            search_base: search_base.trim().to_string(),
            page_timeout,
        })
    }

    /// Runs one query against the HTML search backend.
    ///
    /// # Errors
    ///
    /// Returns an upstream error when the backend is unreachable or answers non-2xx.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, FinderError> {
        let resp = self
            .client
            .get(&self.search_base)
            .query(&[("q", query)])
            .header(ACCEPT_LANGUAGE, "ja,en-US;q=0.9,en;q=0.8")
            .send()
            .await?;
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, SEARCH_API).await?;
        if !status.is_success() {
            return Err(FinderError::Api {
                api: SEARCH_API.to_string(),
                message: format!("HTTP {status}: {}", crate::sources::body_excerpt(&bytes)),
            });
        }
        let hits = parse_search_results(&String::from_utf8_lossy(&bytes), limit);
        debug!(query, hits = hits.len(), "Web search completed");
        Ok(hits)
    }

    /// Fetches `url` and extracts its readable text.
    ///
    /// # Errors
    ///
    /// Returns an upstream error for transport failures or non-2xx responses.
    pub async fn fetch_page(&self, url: &str) -> Result<PageText, FinderError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.page_timeout)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5")
            .header(ACCEPT_LANGUAGE, "ja,en-US;q=0.9,en;q=0.8")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FinderError::Api {
                api: PAGE_API.to_string(),
                message: format!("HTTP {status} for {url}"),
            });
        }
        let bytes = crate::sources::read_limited_body(resp, PAGE_API).await?;
        Ok(html::extract_page_text(&String::from_utf8_lossy(&bytes)))
    }
}

/// Result links from a search page, deduplicated, in page order.
///
/// DuckDuckGo-style `result__a` anchors are preferred; other backends fall
/// back to every absolute http(s) anchor.
pub fn parse_search_results(body: &str, limit: usize) -> Vec<SearchHit> {
    static ANCHOR_RE: OnceLock<Regex> = OnceLock::new();
    static HREF_RE: OnceLock<Regex> = OnceLock::new();
    let anchor = ANCHOR_RE.get_or_init(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").expect("valid regex"));
    let href_re = HREF_RE.get_or_init(|| {
        Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
    });

    let mut result_links = Vec::new();
    let mut other_links = Vec::new();
    for caps in anchor.captures_iter(body) {
        let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let Some(href) = href_re
            .captures(attrs)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| html::decode_html_entities(m.as_str()))
        else {
            continue;
        };
        let Some(url) = resolve_result_url(&href) else {
            continue;
        };
        let hit = SearchHit {
            title: html::clean_inline(caps.get(2).map(|m| m.as_str()).unwrap_or_default()),
            url,
        };
        if attrs.contains("result__a") {
            result_links.push(hit);
        } else {
            other_links.push(hit);
        }
    }

    let candidates = if result_links.is_empty() {
        other_links
    } else {
        result_links
    };
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|hit| seen.insert(hit.url.clone()))
        .take(limit)
        .collect()
}

/// Unwraps redirect links (`/l/?uddg=...`, `/url?q=...`) to the target URL.
fn resolve_result_url(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;

    let is_redirect = parsed.path().starts_with("/l/") || parsed.path() == "/url";
    if is_redirect {
        let target = parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg" || k == "q")
            .map(|(_, v)| v.into_owned())?;
        let target = Url::parse(&target).ok()?;
        return matches!(target.scheme(), "http" | "https").then(|| target.to_string());
    }

    if !matches!(parsed.scheme(), "http" | "https") || href.starts_with('/') {
        return None;
    }
    Some(parsed.to_string())
}
