//! Outbound HTTP: shared clients, web search and page scraping, website
//! probes and LLM provider adapters.

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::HeaderValue;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::warn;

use crate::error::FinderError;

pub mod llm;
pub mod probe;
pub(crate) mod rate_limit;
pub mod web;

const ERROR_BODY_MAX_BYTES: usize = 2048;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
pub(crate) const USER_AGENT: &str = concat!("support-finder/", env!("CARGO_PKG_VERSION"));

static SCRAPE_CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();
static LLM_CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();

pub(crate) fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    match crate::config::env_value(env_var) {
        Some(value) => Cow::Owned(value),
        None => Cow::Borrowed(default),
    }
}

/// Returns the shared client for search-backend queries and page fetches.
///
/// - Retry: 3 attempts with exponential backoff for transient errors
/// - Pacing: per-origin rate limiting (see [`rate_limit`])
pub(crate) fn scrape_client() -> Result<ClientWithMiddleware, FinderError> {
    if let Some(client) = SCRAPE_CLIENT.get() {
        return Ok(client.clone());
    }

    let base_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()
        .map_err(FinderError::HttpClientInit)?;

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
    let client = ClientBuilder::new(base_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(rate_limit::RateLimitMiddleware::new())
        .build();

    match SCRAPE_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => SCRAPE_CLIENT.get().cloned().ok_or_else(|| FinderError::Api {
            api: "http-client".into(),
            message: "Shared scrape client initialization race".into(),
        }),
    }
}

/// Returns the shared client for LLM backends.
///
/// Local inference servers are not paced; a single retry covers a backend
/// that is still loading its model. Callers set the per-request timeout.
pub(crate) fn llm_client() -> Result<ClientWithMiddleware, FinderError> {
    if let Some(client) = LLM_CLIENT.get() {
        return Ok(client.clone());
    }

    let base_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()
        .map_err(FinderError::HttpClientInit)?;

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(1);
    let client = ClientBuilder::new(base_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

    match LLM_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => LLM_CLIENT.get().cloned().ok_or_else(|| FinderError::Api {
            api: "http-client".into(),
            message: "Shared LLM client initialization race".into(),
        }),
    }
}

pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let full = String::from_utf8_lossy(bytes);

    let truncated: &str = if full.len() > ERROR_BODY_MAX_BYTES {
        let mut end = ERROR_BODY_MAX_BYTES;
        while end > 0 && !full.is_char_boundary(end) {
            end -= 1;
        }
        &full[..end]
    } else {
        full.as_ref()
    };

    let mut s = truncated.trim().replace(['\n', '\r', '\t'], " ");
    if full.len() > ERROR_BODY_MAX_BYTES {
        s.push_str(" …");
    }
    s
}

pub(crate) fn ensure_json_content_type(
    api: &str,
    content_type: Option<&HeaderValue>,
    body: &[u8],
) -> Result<(), FinderError> {
    let Some(content_type) = content_type else {
        return Ok(());
    };

    let raw = match content_type.to_str() {
        Ok(v) => v.trim(),
        Err(_) => {
            warn!(
                source = api,
                "Response content-type header was not valid UTF-8; attempting JSON parse"
            );
            return Ok(());
        }
    };
    if raw.is_empty() {
        return Ok(());
    }

    let media_type = raw
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or_default()
        .to_ascii_lowercase();
    if matches!(media_type.as_str(), "text/html" | "application/xhtml+xml") {
        return Err(FinderError::Api {
            api: api.to_string(),
            message: format!(
                "Unexpected HTML response (content-type: {raw}): {}",
                body_excerpt(body)
            ),
        });
    }

    Ok(())
}

pub(crate) async fn read_limited_body(
    mut resp: reqwest::Response,
    api: &str,
) -> Result<Vec<u8>, FinderError> {
    let mut body: Vec<u8> = Vec::new();

    while let Some(chunk) = resp.chunk().await? {
        let next_len = body.len().saturating_add(chunk.len());
        if next_len > DEFAULT_MAX_BODY_BYTES {
            return Err(FinderError::Api {
                api: api.to_string(),
                message: format!("Response body exceeded {DEFAULT_MAX_BODY_BYTES} bytes"),
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

/// Joins a base URL and a path with exactly one `/`.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_json_content_type_rejects_html() {
        let err = ensure_json_content_type(
            "ollama",
            Some(&HeaderValue::from_static("text/html; charset=utf-8")),
            b"<html><body>proxy error</body></html>",
        )
        .expect_err("html should be rejected");
        let msg = err.to_string();
        assert!(msg.contains("ollama"));
        assert!(msg.contains("HTML"));
    }

    #[test]
    fn ensure_json_content_type_accepts_json_and_missing_header() {
        assert!(
            ensure_json_content_type(
                "lmstudio",
                Some(&HeaderValue::from_static("application/json")),
                b"{}"
            )
            .is_ok()
        );
        assert!(ensure_json_content_type("lmstudio", None, b"{}").is_ok());
    }

    #[test]
    fn body_excerpt_flattens_and_truncates() {
        assert_eq!(body_excerpt(b" a\nb\tc "), "a b c");
        let long = "あ".repeat(2000);
        let excerpt = body_excerpt(long.as_bytes());
        assert!(excerpt.ends_with('…'));
        assert!(excerpt.len() <= ERROR_BODY_MAX_BYTES + 4);
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://localhost:11434/", "/api/tags"), "http://localhost:11434/api/tags");
        assert_eq!(join_url("http://h:1234/v1", "models"), "http://h:1234/v1/models");
    }
}
