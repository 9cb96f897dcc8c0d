use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::config::Config;
use crate::error::FinderError;
use crate::sources::llm::ProviderKind;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Support Finder Health Check\n\n");
        out.push_str("| Component | Status | Latency |\n");
        out.push_str("|-----------|--------|---------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.api, row.status, row.latency
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} components healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

async fn check_one(client: reqwest::Client, api: String, url: String) -> HealthRow {
    let start = Instant::now();
    let resp = client.get(&url).send().await;

    match resp {
        Ok(resp) => {
            let status = resp.status();
            let elapsed = start.elapsed().as_millis();
            if status.is_success() {
                HealthRow {
                    api,
                    status: "ok".into(),
                    latency: format!("{elapsed}ms"),
                }
            } else {
                HealthRow {
                    api,
                    status: "error".into(),
                    latency: format!("{elapsed}ms (HTTP {})", status.as_u16()),
                }
            }
        }
        Err(err) => {
            let reason = if err.is_timeout() {
                "timeout"
            } else if err.is_connect() {
                "connect"
            } else {
                "error"
            };
            HealthRow {
                api,
                status: "error".into(),
                latency: reason.into(),
            }
        }
    }
}

fn health_http_client() -> Result<reqwest::Client, FinderError> {
    static HEALTH_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    if let Some(client) = HEALTH_HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(3))
        .user_agent(crate::sources::USER_AGENT)
        .build()
        .map_err(FinderError::HttpClientInit)?;

    match HEALTH_HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => HEALTH_HTTP_CLIENT
            .get()
            .cloned()
            .ok_or_else(|| FinderError::Api {
                api: "health".into(),
                message: "Health HTTP client initialization race".into(),
            }),
    }
}

/// The cheapest endpoint each backend answers when it is up.
fn provider_probe_url(kind: ProviderKind) -> String {
    let base = kind.default_base_url();
    let base = base.trim_end_matches('/');
    match kind {
        ProviderKind::Ollama => format!("{base}/api/tags"),
        ProviderKind::LmStudio => format!("{}/v1/models", base.trim_end_matches("/v1")),
        ProviderKind::Mlx => format!("{base}/"),
        ProviderKind::LlamaCpp => format!("{base}/health"),
    }
}

async fn check_data_dir(dir: &Path) -> HealthRow {
    let start = Instant::now();
    let suffix = uuid::Uuid::new_v4();
    let probe = dir.join(format!(".support-finder-healthcheck-{suffix}.tmp"));

    let result = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&probe, b"ok").await?;
        match tokio::fs::remove_file(&probe).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
    .await;

    match result {
        Ok(()) => HealthRow {
            api: format!("Data dir ({})", dir.display()),
            status: "ok".into(),
            latency: format!("{}ms", start.elapsed().as_millis()),
        },
        Err(err) => HealthRow {
            api: format!("Data dir ({})", dir.display()),
            status: "error".into(),
            latency: format!("{:?}", err.kind()),
        },
    }
}

/// Checks the search backend, every local LLM backend and the data directory.
///
/// # Errors
///
/// Returns an error when the shared HTTP client cannot be created.
pub async fn check(config: &Config, apis_only: bool) -> Result<HealthReport, FinderError> {
    let client = health_http_client()?;

    let mut targets = vec![("Web search".to_string(), config.search_base.clone())];
    targets.extend(
        ProviderKind::ALL
            .into_iter()
            .map(|kind| (kind.display_name().to_string(), provider_probe_url(kind))),
    );
    let mut rows = join_all(
        targets
            .into_iter()
            .map(|(api, url)| check_one(client.clone(), api, url)),
    )
    .await;

    if !apis_only {
        rows.push(check_data_dir(&config.data_dir).await);
    }
    let healthy = rows.iter().filter(|r| r.status == "ok").count();
    Ok(HealthReport {
        healthy,
        total: rows.len(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn check_one_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let client = health_http_client().expect("client");

        let ok = check_one(client.clone(), "ok".into(), format!("{}/ok", server.uri())).await;
        assert_eq!(ok.status, "ok");
        let broken = check_one(client, "broken".into(), format!("{}/broken", server.uri())).await;
        assert_eq!(broken.status, "error");
        assert!(broken.latency.contains("HTTP 503"));
    }

    #[tokio::test]
    async fn writable_data_dir_is_healthy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let row = check_data_dir(dir.path()).await;
        assert_eq!(row.status, "ok");
        assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 0);
    }

    #[test]
    fn markdown_lists_every_row() {
        let report = HealthReport {
            healthy: 1,
            total: 2,
            rows: vec![
                HealthRow {
                    api: "Ollama".into(),
                    status: "ok".into(),
                    latency: "3ms".into(),
                },
                HealthRow {
                    api: "MLX".into(),
                    status: "error".into(),
                    latency: "connect".into(),
                },
            ],
        };
        let md = report.to_markdown();
        assert!(md.contains("| MLX | error | connect |"));
        assert!(md.contains("Status: 1/2 components healthy"));
        assert!(!report.all_healthy());
    }
}
