//! Single-request website availability probe.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::entities::organization::WebsiteAvailabilityRecord;
use crate::error::FinderError;

/// Probes are one request each: no retry, no pacing, bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, FinderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(crate::sources::USER_AGENT)
            .build()
            .map_err(FinderError::HttpClientInit)?;
        Ok(Self { client })
    }

    /// GETs `url` and records the outcome. Network failures become data.
    pub async fn check(&self, url: &str) -> WebsiteAvailabilityRecord {
        let start = Instant::now();
        let resp = self.client.get(url).send().await;
        let elapsed = elapsed_ms(start.elapsed());

        let record = match resp {
            Ok(resp) => {
                let status = resp.status();
                let is_available = (200..400).contains(&status.as_u16());
                WebsiteAvailabilityRecord {
                    url: url.to_string(),
                    check_date: crate::utils::date::now(),
                    is_available,
                    status_code: Some(status.as_u16()),
                    response_time_ms: Some(elapsed),
                    error_message: (!is_available).then(|| status_message(status)),
                }
            }
            Err(err) => {
                let kind = if err.is_timeout() {
                    "timeout"
                } else if err.is_connect() {
                    "connect"
                } else if err.is_builder() {
                    "invalid url"
                } else {
                    "error"
                };
                WebsiteAvailabilityRecord {
                    url: url.to_string(),
                    check_date: crate::utils::date::now(),
                    is_available: false,
                    status_code: None,
                    response_time_ms: None,
                    error_message: Some(format!("{kind}: {err}")),
                }
            }
        };
        debug!(
            url,
            available = record.is_available,
            status = record.status_code,
            elapsed_ms = elapsed,
            "Probed website"
        );
        record
    }
}

fn status_message(status: reqwest::StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {reason}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    }
}

/// Whole milliseconds, rounded up and never zero.
fn elapsed_ms(elapsed: Duration) -> u64 {
    let micros = elapsed.as_micros();
    let ms = micros.div_ceil(1000);
    u64::try_from(ms).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober() -> Prober {
        Prober::new(Duration::from_secs(2)).expect("client")
    }

    #[tokio::test]
    async fn server_error_is_unavailable_with_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let record = prober().check(&format!("{}/down", server.uri())).await;
        assert!(!record.is_available);
        assert_eq!(record.status_code, Some(500));
        let message = record.error_message.expect("message");
        assert!(!message.is_empty());
        assert!(message.contains("500"));
    }

    #[tokio::test]
    async fn ok_response_is_available_with_positive_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let record = prober().check(&format!("{}/", server.uri())).await;
        assert!(record.is_available);
        assert_eq!(record.status_code, Some(200));
        assert!(record.response_time_ms.expect("latency") > 0);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn redirect_target_status_decides_availability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let record = prober().check(&format!("{}/old", server.uri())).await;
        assert!(!record.is_available);
        assert_eq!(record.status_code, Some(404));
        assert_eq!(record.error_message.as_deref(), Some("HTTP 404 Not Found"));
    }

    #[tokio::test]
    async fn timeout_is_recorded_as_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let prober = Prober::new(Duration::from_millis(100)).expect("client");
        let record = prober.check(&server.uri()).await;
        assert!(!record.is_available);
        assert!(record.status_code.is_none());
        assert!(record.error_message.expect("message").starts_with("timeout"));
    }

    #[test]
    fn elapsed_ms_is_at_least_one() {
        assert_eq!(elapsed_ms(Duration::from_micros(10)), 1);
        assert_eq!(elapsed_ms(Duration::from_micros(1500)), 2);
        assert_eq!(elapsed_ms(Duration::ZERO), 1);
    }
}
