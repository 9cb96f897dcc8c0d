//! Command-line surface. Every command renders markdown by default and JSON with `--json`.

pub mod health;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::config::Config;
use crate::render::{json, markdown};
use crate::services::Services;
use crate::services::jobs::{JobKind, JobSnapshot};
use crate::sources::llm::{self, ProviderConfig};

#[derive(Parser, Debug)]
#[command(
    name = "support-finder",
    version,
    about = "Find patient associations, family groups and support organizations for Japanese rare diseases"
)]
pub struct Cli {
    /// Print JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,

    /// Data directory (overrides SUPPORT_FINDER_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the REST API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Search the disease catalog by Japanese or English name
    Search {
        query: String,
        /// Match names only, not synonyms
        #[arg(long)]
        no_synonyms: bool,
    },
    /// Show one disease with its organizations
    Disease { id: String },
    /// Probe organization websites for one disease, one URL, or everything
    Check {
        /// Disease id
        id: Option<String>,
        /// Probe a single URL and record it for every disease listing it
        #[arg(long, conflicts_with_all = ["id", "all"])]
        url: Option<String>,
        /// Check every stored collection and wait for the job to finish
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Website availability for one disease, or the overview
    Status { id: Option<String> },
    /// Probe history of one website
    History { url: String },
    /// Local LLM providers and the extraction pipeline
    Llm {
        #[command(subcommand)]
        command: LlmCommand,
    },
    /// Approve, reject or reset an organization's validation
    Validate {
        disease_id: String,
        /// Organization id or URL
        organization: String,
        #[arg(long, conflicts_with_all = ["reject", "reset"])]
        approve: bool,
        #[arg(long, conflicts_with = "reset")]
        reject: bool,
        /// Return the record to pending
        #[arg(long)]
        reset: bool,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Check the search backend, LLM backends and the data directory
    Health {
        /// Skip the data directory check
        #[arg(long)]
        apis_only: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ProviderArgs {
    /// ollama, lmstudio, mlx or llamacpp
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long = "model")]
    pub model_name: Option<String>,
    #[arg(long)]
    pub base_url: Option<String>,
}

impl ProviderArgs {
    fn resolve(&self, config: &Config) -> anyhow::Result<ProviderConfig> {
        Ok(ProviderConfig::resolve(
            config,
            self.provider.as_deref(),
            self.model_name.as_deref(),
            self.base_url.as_deref(),
        )?)
    }
}

#[derive(Subcommand, Debug)]
pub enum LlmCommand {
    /// List supported providers
    Providers,
    /// List a provider's models
    Models {
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Search, extract and verify organizations for one disease
    Run {
        id: String,
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Run the pipeline over the catalog and wait for it to finish
    RunAll {
        #[command(flatten)]
        provider: ProviderArgs,
        /// Stop after this many diseases (0 = all)
        #[arg(long, default_value_t = 0)]
        max_diseases: usize,
    },
}

/// Environment config with the CLI's `--data-dir` applied.
///
/// # Errors
///
/// Returns an error when an environment variable holds an invalid value.
pub fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    Ok(config)
}

fn render<T: Serialize>(
    as_json: bool,
    value: &T,
    to_markdown: impl FnOnce(&T) -> Result<String, crate::error::FinderError>,
) -> anyhow::Result<String> {
    if as_json {
        Ok(json::to_pretty(value)?)
    } else {
        Ok(to_markdown(value)?)
    }
}

async fn wait_for(services: &Services, kind: JobKind) -> JobSnapshot {
    loop {
        let snapshot = services.jobs.snapshot(kind);
        if !snapshot.is_running() {
            return snapshot;
        }
        tracing::info!(job = %kind, done = snapshot.done, total = snapshot.total, "Waiting for job");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn job_markdown(snapshot: &JobSnapshot) -> String {
    let mut out = format!(
        "{}: {:?} ({}/{} done, {} failed)\n",
        snapshot.kind, snapshot.state, snapshot.done, snapshot.total, snapshot.failed
    );
    if let Some(message) = &snapshot.message {
        out.push_str(message);
        out.push('\n');
    }
    out
}

/// Runs every command except `serve` and returns the rendered output.
///
/// # Errors
///
/// Returns an error when the command fails; the binary prints it and exits 1.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let as_json = cli.json;
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Health { apis_only } => {
            let report = health::check(&config, apis_only).await?;
            if !report.all_healthy() {
                tracing::warn!(healthy = report.healthy, total = report.total, "Some components are unhealthy");
            }
            if as_json {
                Ok(json::to_pretty(&report)?)
            } else {
                Ok(markdown::health_markdown(&report))
            }
        }
        Commands::Llm {
            command: LlmCommand::Providers,
        } => render(as_json, &llm::providers(), |p| markdown::providers_markdown(p)),
        command => {
            let services = Services::open(config).await?;
            run_with_services(&services, command, as_json).await
        }
    }
}

async fn run_with_services(services: &Services, command: Commands, as_json: bool) -> anyhow::Result<String> {
    match command {
        Commands::Search { query, no_synonyms } => {
            let response = services.search(&query, !no_synonyms).await?;
            render(as_json, &response, |r| markdown::disease_search_markdown(&query, r))
        }
        Commands::Disease { id } => {
            let detail = services.disease(&id).await?;
            render(as_json, &detail, markdown::disease_markdown)
        }
        Commands::Check { id, url, all } => {
            if let Some(url) = url {
                let record = services.tracker.check_one(&url).await?;
                return Ok(json::to_pretty(&record)?);
            }
            if all {
                services.tracker.start_check_all().await?;
                let snapshot = wait_for(services, JobKind::WebsiteCheckAll).await;
                return if as_json {
                    Ok(json::to_pretty(&snapshot)?)
                } else {
                    Ok(job_markdown(&snapshot))
                };
            }
            let Some(id) = id else {
                anyhow::bail!("pass a disease id, --url or --all");
            };
            let report = services.tracker.check_disease(&id).await?;
            render(as_json, &report, markdown::check_report_markdown)
        }
        Commands::Status { id: Some(id) } => {
            let status = services.tracker.status(&id).await?;
            render(as_json, &status, markdown::website_status_markdown)
        }
        Commands::Status { id: None } => {
            let overview = services.tracker.status_all().await;
            render(as_json, &overview, markdown::website_overview_markdown)
        }
        Commands::History { url } => {
            let history = services.tracker.history(&url).await?;
            render(as_json, &history, markdown::url_history_markdown)
        }
        Commands::Llm { command } => run_llm(services, command, as_json).await,
        Commands::Validate {
            disease_id,
            organization,
            approve,
            reject,
            reset,
            notes,
        } => {
            let org = if reset {
                services.pipeline.reset(&disease_id, &organization).await?
            } else if approve || reject {
                services
                    .pipeline
                    .validate(&disease_id, &organization, approve, notes)
                    .await?
            } else {
                anyhow::bail!("pass one of --approve, --reject or --reset");
            };
            if as_json {
                Ok(json::to_pretty(&org)?)
            } else {
                Ok(format!("{} ({}): {}\n", org.name, org.url, org.validation_status))
            }
        }
        Commands::Serve { .. } | Commands::Health { .. } => {
            anyhow::bail!("this command does not read the data directory")
        }
    }
}

async fn run_llm(services: &Services, command: LlmCommand, as_json: bool) -> anyhow::Result<String> {
    match command {
        LlmCommand::Providers => {
            let providers = llm::providers();
            render(as_json, &providers, |p| markdown::providers_markdown(p))
        }
        LlmCommand::Models { provider } => {
            let provider = llm::build(&provider.resolve(&services.config)?)?;
            let listing = llm::list_models_with_fallback(provider.as_ref()).await;
            render(as_json, &listing, markdown::models_markdown)
        }
        LlmCommand::Run { id, provider } => {
            let config = provider.resolve(&services.config)?;
            let report = services.pipeline.run_with_config(&id, &config).await?;
            render(as_json, &report, markdown::run_report_markdown)
        }
        LlmCommand::RunAll {
            provider,
            max_diseases,
        } => {
            let config = provider.resolve(&services.config)?;
            services.pipeline.start_run_all(&config, max_diseases)?;
            let snapshot = wait_for(services, JobKind::LlmSearchAll).await;
            if as_json {
                Ok(json::to_pretty(&snapshot)?)
            } else {
                Ok(job_markdown(&snapshot))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_json_after_subcommand() {
        let cli = Cli::try_parse_from(["support-finder", "search", "ファブリー", "--json"]).expect("parse");
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Search { ref query, no_synonyms: false } if query == "ファブリー"
        ));
    }

    #[test]
    fn llm_run_takes_provider_flags() {
        let cli = Cli::try_parse_from([
            "support-finder",
            "llm",
            "run",
            "NANDO:1200019",
            "--provider",
            "lmstudio",
            "--model",
            "Qwen32B",
        ])
        .expect("parse");
        let Commands::Llm {
            command: LlmCommand::Run { id, provider },
        } = cli.command
        else {
            panic!("expected llm run");
        };
        assert_eq!(id, "NANDO:1200019");
        assert_eq!(provider.provider.as_deref(), Some("lmstudio"));
        assert_eq!(provider.model_name.as_deref(), Some("Qwen32B"));
    }

    #[test]
    fn approve_and_reject_conflict() {
        let err = Cli::try_parse_from([
            "support-finder",
            "validate",
            "NANDO:1200019",
            "https://fabry.example.jp/",
            "--approve",
            "--reject",
        ]);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn search_renders_markdown_from_a_fresh_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cli = Cli::try_parse_from([
            "support-finder",
            "--data-dir",
            dir.path().to_str().expect("utf-8 path"),
            "search",
            "fabry",
        ])
        .expect("parse");
        let out = run(cli).await.expect("run");
        assert!(out.contains("| NANDO:1200019 | ファブリー病 | Fabry disease | 0 |"));
    }
}
