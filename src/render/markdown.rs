use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::cli::health::HealthReport;
use crate::entities::disease::{DiseaseWithOrganizations, SearchResponse};
use crate::error::FinderError;
use crate::services::availability::{AvailabilityOverview, CheckReport, DiseaseAvailability, UrlHistory};
use crate::services::pipeline::RunReport;
use crate::sources::llm::{ModelListing, ProviderInfo};

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn env() -> Result<&'static Environment<'static>, FinderError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("truncate", |s: String, max_chars: usize| -> String {
        if s.chars().count() <= max_chars {
            return s;
        }
        let mut out: String = s.chars().take(max_chars).collect::<String>().trim_end().to_string();
        out.push('…');
        out
    });
    env.add_filter("yesno", |v: bool| -> String { if v { "yes".into() } else { "no".into() } });
    env.add_filter("score", |v: f64| -> String { format!("{v:.2}") });
    env.add_filter("percent", |v: f64| -> String { format!("{:.1}%", v * 100.0) });
    env.add_template(
        "disease_search.md.j2",
        include_str!("../../templates/disease_search.md.j2"),
    )?;
    env.add_template("disease.md.j2", include_str!("../../templates/disease.md.j2"))?;
    env.add_template(
        "check_report.md.j2",
        include_str!("../../templates/check_report.md.j2"),
    )?;
    env.add_template(
        "website_status.md.j2",
        include_str!("../../templates/website_status.md.j2"),
    )?;
    env.add_template(
        "website_overview.md.j2",
        include_str!("../../templates/website_overview.md.j2"),
    )?;
    env.add_template(
        "url_history.md.j2",
        include_str!("../../templates/url_history.md.j2"),
    )?;
    env.add_template(
        "run_report.md.j2",
        include_str!("../../templates/run_report.md.j2"),
    )?;
    env.add_template("models.md.j2", include_str!("../../templates/models.md.j2"))?;
    env.add_template(
        "providers.md.j2",
        include_str!("../../templates/providers.md.j2"),
    )?;

    let _ = ENV.set(env);
    ENV.get()
        .ok_or_else(|| FinderError::Config("markdown templates failed to initialize".into()))
}

pub fn disease_search_markdown(query: &str, response: &SearchResponse) -> Result<String, FinderError> {
    let tmpl = env()?.get_template("disease_search.md.j2")?;
    Ok(tmpl.render(context! {
        query => query,
        results => &response.results,
        total => response.total,
    })?)
}

pub fn disease_markdown(detail: &DiseaseWithOrganizations) -> Result<String, FinderError> {
    let tmpl = env()?.get_template("disease.md.j2")?;
    Ok(tmpl.render(context! {
        disease => &detail.disease,
        organizations => &detail.organizations,
    })?)
}

pub fn check_report_markdown(report: &CheckReport) -> Result<String, FinderError> {
    Ok(env()?.get_template("check_report.md.j2")?.render(report)?)
}

pub fn website_status_markdown(status: &DiseaseAvailability) -> Result<String, FinderError> {
    Ok(env()?.get_template("website_status.md.j2")?.render(status)?)
}

pub fn website_overview_markdown(overview: &AvailabilityOverview) -> Result<String, FinderError> {
    Ok(env()?.get_template("website_overview.md.j2")?.render(overview)?)
}

pub fn url_history_markdown(history: &UrlHistory) -> Result<String, FinderError> {
    Ok(env()?.get_template("url_history.md.j2")?.render(history)?)
}

pub fn run_report_markdown(report: &RunReport) -> Result<String, FinderError> {
    Ok(env()?.get_template("run_report.md.j2")?.render(report)?)
}

pub fn models_markdown(listing: &ModelListing) -> Result<String, FinderError> {
    Ok(env()?.get_template("models.md.j2")?.render(listing)?)
}

pub fn providers_markdown(providers: &[ProviderInfo]) -> Result<String, FinderError> {
    let tmpl = env()?.get_template("providers.md.j2")?;
    Ok(tmpl.render(context! { providers => providers })?)
}

pub fn health_markdown(report: &HealthReport) -> String {
    report.to_markdown()
}
