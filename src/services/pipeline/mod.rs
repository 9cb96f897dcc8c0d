//! LLM extraction and validation of support organizations found on the web.
//!
//! One run for a disease searches the web with the disease's enabled terms,
//! fetches each candidate page, optionally asks the model whether the page
//! matches the disease, and then extracts and verifies organization details.
//! Results are merged into the disease's collection, moving records forward
//! through [`ValidationStatus`] only.

pub mod candidates;
mod parse;
mod prompts;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::entities::collection::OrganizationCollection;
use crate::entities::disease::DiseaseInfo;
use crate::entities::organization::{Organization, OrganizationType, Source, TokenUsage};
use crate::entities::search_config::SearchConfig;
use crate::entities::stats::{DiseaseSearchStats, SkippedCandidate};
use crate::entities::validation::ValidationStatus;
use crate::error::FinderError;
use crate::services::jobs::{JobController, JobKind, JobSnapshot};
use crate::sources::llm::{self, CompletionRequest, LlmProvider, ProviderConfig};
use crate::sources::web::WebClient;
use crate::store::Store;
use crate::transform::html;
use crate::utils::date::HoursMinutesSeconds;

use parse::Extraction;

/// Summary of one disease run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub disease_id: String,
    pub disease_name: String,
    pub provider: String,
    pub model: String,
    pub skipped_category: bool,
    pub queries: Vec<String>,
    pub candidates: usize,
    pub approximate_matches: usize,
    pub added: usize,
    pub updated: usize,
    pub organizations: Vec<Organization>,
    pub skipped: Vec<SkippedCandidate>,
    pub token_usage: TokenTotals,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub requests: u64,
}

impl TokenTotals {
    fn add(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
        self.requests += 1;
    }

    fn from_usage<'a>(usage: impl IntoIterator<Item = &'a TokenUsage>) -> Self {
        let mut totals = Self::default();
        for u in usage {
            totals.add(u);
        }
        totals
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    #[serde(flatten)]
    pub totals: TokenTotals,
    pub diseases_with_usage: usize,
    pub by_model: BTreeMap<String, TokenTotals>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStatus {
    pub daily_search_running: bool,
    pub stats_count: usize,
    pub collections_count: usize,
    pub job: JobSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchProgress {
    pub total_diseases: usize,
    pub searched_diseases: usize,
    pub progress_percentage: f64,
    pub remaining_diseases: usize,
    pub estimated_remaining_time: Option<HoursMinutesSeconds>,
    pub job: JobSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationStats {
    pub total_organizations: usize,
    pub by_status: BTreeMap<String, usize>,
    pub human_verified_count: usize,
    pub disease_count: usize,
}

/// What happened to one candidate URL.
enum CandidateOutcome {
    Kept {
        organization: Box<Organization>,
        matched: bool,
        usage: Vec<TokenUsage>,
    },
    Skipped {
        skipped: SkippedCandidate,
        matched: bool,
        usage: Vec<TokenUsage>,
    },
}

impl CandidateOutcome {
    fn skipped(url: &str, reason: impl Into<String>, matched: bool, usage: Vec<TokenUsage>) -> Self {
        Self::Skipped {
            skipped: SkippedCandidate {
                url: url.to_string(),
                reason: reason.into(),
            },
            matched,
            usage,
        }
    }
}

/// Per-run inputs shared by every candidate.
struct RunContext<'a> {
    provider: &'a dyn LlmProvider,
    disease: &'a DiseaseInfo,
    search_config: &'a SearchConfig,
    terms: Vec<String>,
    system: String,
}

fn fallback_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn join_notes(existing: Option<String>, extra: &str) -> Option<String> {
    match existing.filter(|n| !n.trim().is_empty()) {
        Some(notes) => Some(format!("{notes}\n{extra}")),
        None => Some(extra.to_string()),
    }
}

/// Moves `target` forward to `incoming`'s state and copies the fields the run learned.
fn merge_into(target: &mut Organization, incoming: Organization) {
    if target.validation_status.can_advance_to(incoming.validation_status) {
        target.validation_status = incoming.validation_status;
        target.validation_score = incoming.validation_score;
        target.validation_notes = incoming.validation_notes;
        target.name = incoming.name;
        target.org_type = incoming.org_type;
        if incoming.description.is_some() {
            target.description = incoming.description;
        }
        if incoming.additional_info.is_some() {
            target.additional_info = incoming.additional_info;
        }
    } else if incoming.validation_notes.is_some() && target.validation_status == incoming.validation_status {
        target.validation_notes = incoming.validation_notes;
    }
    target.token_usage.extend(incoming.token_usage);
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    catalog: Arc<Catalog>,
    store: Arc<Store>,
    jobs: JobController,
    web: WebClient,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<Catalog>,
        store: Arc<Store>,
        jobs: JobController,
        web: WebClient,
    ) -> Self {
        Self {
            config,
            catalog,
            store,
            jobs,
            web,
        }
    }

    /// Searchable catalog entries: everything except organ-system category rows.
    fn searchable_diseases(&self) -> impl Iterator<Item = &DiseaseInfo> {
        self.catalog
            .all()
            .iter()
            .filter(|d| !candidates::is_category_entry(d))
    }

    async fn page_content(&self, url: &str) -> Result<String, FinderError> {
        if let Some(cached) = self.store.content.get(url).await {
            debug!(url, "Page content served from cache");
            return Ok(cached);
        }
        let page = self.web.fetch_page(url).await?;
        let content = page.to_prompt_text();
        if let Err(err) = self.store.content.put(url, &content).await {
            warn!(url, error = %err, "Failed to cache page content");
        }
        Ok(content)
    }

    async fn ask(
        &self,
        ctx: &RunContext<'_>,
        prompt: String,
        usage: &mut Vec<TokenUsage>,
    ) -> Result<String, FinderError> {
        let request = CompletionRequest::new(prompt).with_system(ctx.system.clone());
        let completion = ctx.provider.complete(&request).await?;
        usage.push(completion.usage);
        Ok(completion.text)
    }

    async fn process_candidate(&self, ctx: &RunContext<'_>, url: &str) -> CandidateOutcome {
        let content = match self.page_content(url).await {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => return CandidateOutcome::skipped(url, "page has no text", false, Vec::new()),
            Err(err) => {
                return CandidateOutcome::skipped(url, format!("fetch failed: {err}"), false, Vec::new());
            }
        };
        let content = html::truncate_chars(&content, ctx.search_config.max_token_limit);
        let disease_name = ctx.disease.name_ja.as_str();
        let mut usage = Vec::new();

        let mut matched = false;
        if ctx.search_config.use_approximate_matching {
            let verdict = match prompts::match_check(&ctx.terms, url, &content) {
                Ok(prompt) => match self.ask(ctx, prompt, &mut usage).await {
                    Ok(text) => parse::parse_match(&text),
                    Err(err) => {
                        return CandidateOutcome::skipped(url, format!("match check failed: {err}"), false, usage);
                    }
                },
                Err(err) => {
                    return CandidateOutcome::skipped(url, format!("match check failed: {err}"), false, usage);
                }
            };
            if !verdict.is_match || verdict.confidence <= self.config.match_threshold {
                let reason = format!(
                    "not a match (confidence {:.2}{})",
                    verdict.confidence,
                    verdict.reason.map(|r| format!(": {r}")).unwrap_or_default()
                );
                return CandidateOutcome::skipped(url, reason, false, usage);
            }
            matched = true;
        }

        let mut org = Organization::new(&fallback_name(url), url, OrganizationType::Other, Source::Auto);
        if ctx.search_config.two_step_validation {
            self.extract_and_verify(ctx, url, &content, disease_name, &mut org, &mut usage)
                .await;
        } else if let Some(outcome) = self
            .classify(ctx, url, &content, disease_name, &mut org, &mut usage)
            .await
        {
            return CandidateOutcome::Skipped {
                skipped: outcome,
                matched,
                usage,
            };
        }

        if org.validation_status == ValidationStatus::Verified
            && org.validation_score < self.config.auto_reject_threshold
            && !ctx.search_config.require_human_verification
        {
            org.validation_status = ValidationStatus::Rejected;
            org.validation_notes = join_notes(
                org.validation_notes.take(),
                &format!(
                    "auto-rejected: score {:.2} below {:.2}",
                    org.validation_score, self.config.auto_reject_threshold
                ),
            );
        }
        org.token_usage.clone_from(&usage);
        CandidateOutcome::Kept {
            organization: Box::new(org),
            matched,
            usage,
        }
    }

    fn apply_extraction(org: &mut Organization, extraction: &Extraction) {
        if let Some(name) = extraction.name.as_deref().filter(|n| !n.trim().is_empty()) {
            org.name = name.trim().to_string();
        }
        org.org_type = extraction
            .organization_type
            .as_deref()
            .map(OrganizationType::from_label)
            .unwrap_or(OrganizationType::Other);
        org.description.clone_from(&extraction.activities);
        org.additional_info = extraction.additional_info();
    }

    /// Two calls: extraction moves the record to `extracted`, verification to `verified`.
    async fn extract_and_verify(
        &self,
        ctx: &RunContext<'_>,
        url: &str,
        content: &str,
        disease_name: &str,
        org: &mut Organization,
        usage: &mut Vec<TokenUsage>,
    ) {
        let extracted = match prompts::extract(disease_name, url, content) {
            Ok(prompt) => self.ask(ctx, prompt, usage).await,
            Err(err) => Err(err),
        };
        let mut extraction = match extracted.map(|text| parse::parse_extraction(&text)) {
            Ok(Some(extraction)) => extraction,
            Ok(None) => {
                org.validation_notes = Some("extraction failed: reply had no JSON object".into());
                return;
            }
            Err(err) => {
                org.validation_notes = Some(format!("extraction failed: {err}"));
                return;
            }
        };
        Self::apply_extraction(org, &extraction);
        org.validation_score = extraction.confidence.unwrap_or(0.5);
        org.validation_status = ValidationStatus::Extracted;

        let extracted_json = serde_json::json!({
            "name": org.name,
            "organization_type": extraction.organization_type,
            "contact_info": extraction.contact_info,
            "activities": extraction.activities,
            "disease_specificity": extraction.disease_specificity,
            "url": url,
        });
        let verified = match prompts::verify(disease_name, &extracted_json, content) {
            Ok(prompt) => self.ask(ctx, prompt, usage).await,
            Err(err) => Err(err),
        };
        let verification = match verified.map(|text| parse::parse_verification(&text)) {
            Ok(Some(verification)) => verification,
            Ok(None) => {
                org.validation_notes = Some("verification failed: reply had no JSON object".into());
                return;
            }
            Err(err) => {
                org.validation_notes = Some(format!("verification failed: {err}"));
                return;
            }
        };
        verification.apply_to(&mut extraction);
        Self::apply_extraction(org, &extraction);
        org.validation_score = verification.score;
        org.validation_notes = verification.notes;
        org.validation_status = ValidationStatus::Verified;
    }

    /// Single call that classifies and verifies in one step. Returns the skip
    /// entry when the model judges the page irrelevant.
    async fn classify(
        &self,
        ctx: &RunContext<'_>,
        url: &str,
        content: &str,
        disease_name: &str,
        org: &mut Organization,
        usage: &mut Vec<TokenUsage>,
    ) -> Option<SkippedCandidate> {
        let reply = match prompts::classify(disease_name, url, content) {
            Ok(prompt) => self.ask(ctx, prompt, usage).await,
            Err(err) => Err(err),
        };
        let classification = match reply.map(|text| parse::parse_classification(&text)) {
            Ok(Some(c)) => c,
            Ok(None) => {
                org.validation_notes = Some("classification failed: reply had no JSON object".into());
                return None;
            }
            Err(err) => {
                org.validation_notes = Some(format!("classification failed: {err}"));
                return None;
            }
        };
        if !classification.is_relevant {
            return Some(SkippedCandidate {
                url: url.to_string(),
                reason: format!(
                    "classified as not relevant{}",
                    classification.reason.map(|r| format!(": {r}")).unwrap_or_default()
                ),
            });
        }
        Self::apply_extraction(org, &classification.extraction);
        org.validation_score = classification.confidence;
        org.validation_notes = classification.reason;
        org.validation_status = ValidationStatus::Verified;
        None
    }

    /// Runs search, scraping and validation for one disease and merges the results.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::NotFound`] for an unknown disease and
    /// persistence errors. Per-candidate failures are reported in the result.
    pub async fn run_for_disease(
        &self,
        disease_id: &str,
        provider: &dyn LlmProvider,
    ) -> Result<RunReport, FinderError> {
        let started = Instant::now();
        let disease = self.catalog.require(disease_id)?.clone();
        let search_config = crate::services::search_terms::load_or_init(&self.store, &disease).await?;
        let mut report = RunReport {
            disease_id: disease.disease_id.clone(),
            disease_name: disease.name_ja.clone(),
            provider: provider.kind().to_string(),
            model: provider.model().to_string(),
            skipped_category: false,
            queries: Vec::new(),
            candidates: 0,
            approximate_matches: 0,
            added: 0,
            updated: 0,
            organizations: Vec::new(),
            skipped: Vec::new(),
            token_usage: TokenTotals::default(),
            duration_ms: 0,
        };

        if candidates::is_category_entry(&disease) {
            info!(disease_id = %disease.disease_id, name = %disease.name_ja, "Skipping category-level catalog entry");
            report.skipped_category = true;
            return Ok(report);
        }

        let max_results = self.config.max_results_per_disease;
        report.queries = candidates::build_queries(&disease, &search_config);
        let mut urls = Vec::new();
        for query in &report.queries {
            match self.web.search(query, max_results).await {
                Ok(hits) => urls.extend(hits.into_iter().map(|h| h.url)),
                Err(err) => warn!(query = %query, error = %err, "Web search failed"),
            }
        }
        let candidate_urls = candidates::select_candidates(urls, max_results * 2);
        report.candidates = candidate_urls.len();

        let existing = self.store.collections.get(&disease.disease_id).await;
        let terminal: HashMap<String, ValidationStatus> = existing
            .iter()
            .flat_map(|c| c.organizations.iter())
            .filter(|o| o.validation_status.is_terminal())
            .map(|o| (o.url.clone(), o.validation_status))
            .collect();

        let mut terms = vec![disease.name_ja.clone()];
        terms.extend(search_config.enabled_terms().map(|t| t.term.clone()));
        let mut seen = HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        let ctx = RunContext {
            provider,
            disease: &disease,
            search_config: &search_config,
            terms,
            system: prompts::system()?,
        };

        let mut to_process = Vec::new();
        for (index, url) in candidate_urls.into_iter().enumerate() {
            match terminal.get(&url) {
                Some(status) => report.skipped.push(SkippedCandidate {
                    url,
                    reason: format!("already {status}"),
                }),
                None => to_process.push((index, url)),
            }
        }

        let ctx_ref = &ctx;
        let mut outcomes: Vec<(usize, CandidateOutcome)> = stream::iter(to_process)
            .map(|(index, url)| async move { (index, self.process_candidate(ctx_ref, &url).await) })
            .buffer_unordered(self.config.llm_concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut kept = Vec::new();
        let mut all_usage = Vec::new();
        for (_, outcome) in outcomes {
            match outcome {
                CandidateOutcome::Kept {
                    organization,
                    matched,
                    usage,
                } => {
                    report.approximate_matches += usize::from(matched);
                    all_usage.extend(usage);
                    if kept.len() < max_results {
                        kept.push(*organization);
                    } else {
                        report.skipped.push(SkippedCandidate {
                            url: organization.url,
                            reason: format!("result limit of {max_results} reached"),
                        });
                    }
                }
                CandidateOutcome::Skipped {
                    skipped,
                    matched,
                    usage,
                } => {
                    report.approximate_matches += usize::from(matched);
                    all_usage.extend(usage);
                    report.skipped.push(skipped);
                }
            }
        }

        let kept_urls: HashSet<String> = kept.iter().map(|o| o.url.clone()).collect();
        let run_usage = all_usage.clone();
        let (collection, added, updated) = self
            .store
            .collections
            .mutate(
                &disease.disease_id,
                || OrganizationCollection::new(&disease.disease_id, &disease.name_ja),
                |collection| {
                    let mut added = 0;
                    let mut updated = 0;
                    for org in kept {
                        match collection.find_by_url_mut(&org.url) {
                            Some(existing) if existing.validation_status.is_terminal() => {}
                            Some(existing) => {
                                merge_into(existing, org);
                                updated += 1;
                            }
                            None => {
                                collection.organizations.push(org);
                                added += 1;
                            }
                        }
                    }
                    collection.token_usage.extend(run_usage);
                    collection.touch();
                    Ok((collection.clone(), added, updated))
                },
            )
            .await?;
        report.added = added;
        report.updated = updated;

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        report.token_usage = TokenTotals::from_usage(&all_usage);
        let queries = report.queries.clone();
        let skipped = report.skipped.clone();
        let approximate_matches = report.approximate_matches;
        let duration_ms = report.duration_ms;
        self.store
            .stats
            .mutate(
                &disease.disease_id,
                || DiseaseSearchStats::new(&disease.disease_id, &disease.name_ja),
                |stats| {
                    stats.search_count += 1;
                    stats.last_searched = Some(crate::utils::date::now());
                    stats.refresh_counts(&collection.organizations);
                    stats.token_usage.extend(all_usage);
                    stats.search_terms_used = queries;
                    stats.approximate_matches_found = approximate_matches;
                    stats.skipped_candidates = skipped;
                    stats.last_run_duration_ms = Some(duration_ms);
                    Ok(())
                },
            )
            .await?;

        report.organizations = collection
            .organizations
            .into_iter()
            .filter(|o| kept_urls.contains(&o.url))
            .collect();
        info!(
            disease_id = %report.disease_id,
            candidates = report.candidates,
            added = report.added,
            updated = report.updated,
            skipped = report.skipped.len(),
            tokens = report.token_usage.total_tokens,
            "LLM search finished"
        );
        Ok(report)
    }

    /// Resolves the provider and runs one disease.
    ///
    /// # Errors
    ///
    /// As [`Pipeline::run_for_disease`], plus invalid provider settings.
    pub async fn run_with_config(
        &self,
        disease_id: &str,
        provider_config: &ProviderConfig,
    ) -> Result<RunReport, FinderError> {
        let provider = llm::build(provider_config)?;
        self.run_for_disease(disease_id, provider.as_ref()).await
    }

    /// Starts a sequential run over the catalog in the background.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::AlreadyRunning`] while another run-all is in flight.
    pub fn start_run_all(
        &self,
        provider_config: &ProviderConfig,
        max_diseases: usize,
    ) -> Result<JobSnapshot, FinderError> {
        let provider = llm::build(provider_config)?;
        let limit = if max_diseases == 0 { usize::MAX } else { max_diseases };
        let disease_ids: Vec<String> = self
            .searchable_diseases()
            .take(limit)
            .map(|d| d.disease_id.clone())
            .collect();
        let ticket = self.jobs.try_start(JobKind::LlmSearchAll, disease_ids.len())?;
        let pipeline = self.clone();
        tokio::spawn(async move {
            let mut tokens = 0u64;
            let mut failures = 0usize;
            for disease_id in &disease_ids {
                ticket.set_current(disease_id);
                match pipeline.run_for_disease(disease_id, provider.as_ref()).await {
                    Ok(report) => {
                        tokens += report.token_usage.total_tokens;
                        ticket.item_done(true);
                    }
                    Err(err) => {
                        failures += 1;
                        warn!(%disease_id, error = %err, "LLM search failed for disease");
                        ticket.item_done(false);
                    }
                }
            }
            ticket.complete(format!(
                "{} diseases processed, {failures} failed, {tokens} tokens used",
                disease_ids.len()
            ));
        });
        Ok(self.jobs.snapshot(JobKind::LlmSearchAll))
    }

    pub async fn status(&self) -> SearchStatus {
        let job = self.jobs.snapshot(JobKind::LlmSearchAll);
        SearchStatus {
            daily_search_running: job.is_running(),
            stats_count: self.store.stats.keys().await.len(),
            collections_count: self.store.collections.keys().await.len(),
            job,
        }
    }

    /// Catalog coverage by stored stats, plus the running job's ETA.
    pub async fn progress(&self) -> SearchProgress {
        let mut total = 0;
        let mut searched = 0;
        for disease in self.searchable_diseases() {
            total += 1;
            if self
                .store
                .stats
                .get(&disease.disease_id)
                .await
                .is_some_and(|s| s.search_count > 0)
            {
                searched += 1;
            }
        }
        let job = self.jobs.snapshot(JobKind::LlmSearchAll);
        let progress_percentage = if total == 0 {
            0.0
        } else {
            (searched as f64 / total as f64 * 10_000.0).round() / 100.0
        };
        SearchProgress {
            total_diseases: total,
            searched_diseases: searched,
            progress_percentage,
            remaining_diseases: total - searched,
            estimated_remaining_time: job.estimated_remaining,
            job,
        }
    }

    /// Records a human decision on a `verified` organization.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::NotFound`] for an unknown collection or
    /// organization, and [`FinderError::Conflict`] when the record is not `verified`.
    pub async fn validate(
        &self,
        disease_id: &str,
        organization_key: &str,
        approve: bool,
        notes: Option<String>,
    ) -> Result<Organization, FinderError> {
        let (org, organizations) = self
            .store
            .collections
            .mutate_existing(disease_id, |collection| {
                let org = collection
                    .find_mut(organization_key)
                    .ok_or_else(|| FinderError::not_found("organization", organization_key))?;
                org.apply_human_decision(approve, notes)?;
                let org = org.clone();
                collection.touch();
                Ok((org, collection.organizations.clone()))
            })
            .await?;
        info!(disease_id, organization = %org.name, approve, "Recorded human validation");
        self.refresh_stats(disease_id, &organizations).await?;
        Ok(org)
    }

    /// Returns an organization to `pending`, clearing any human decision.
    pub async fn reset(&self, disease_id: &str, organization_key: &str) -> Result<Organization, FinderError> {
        let (org, organizations) = self
            .store
            .collections
            .mutate_existing(disease_id, |collection| {
                let org = collection
                    .find_mut(organization_key)
                    .ok_or_else(|| FinderError::not_found("organization", organization_key))?;
                org.reset_validation();
                let org = org.clone();
                collection.touch();
                Ok((org, collection.organizations.clone()))
            })
            .await?;
        self.refresh_stats(disease_id, &organizations).await?;
        Ok(org)
    }

    async fn refresh_stats(&self, disease_id: &str, organizations: &[Organization]) -> Result<(), FinderError> {
        let name = self
            .catalog
            .get(disease_id)
            .map(|d| d.name_ja.clone())
            .unwrap_or_default();
        self.store
            .stats
            .mutate(
                disease_id,
                || DiseaseSearchStats::new(disease_id, &name),
                |stats| {
                    stats.refresh_counts(organizations);
                    Ok(())
                },
            )
            .await
    }

    /// Organizations of one disease, optionally filtered by status.
    pub async fn organizations_by_status(
        &self,
        disease_id: &str,
        status: Option<ValidationStatus>,
    ) -> Result<Vec<Organization>, FinderError> {
        let Some(collection) = self.store.collections.get(disease_id).await else {
            self.catalog.require(disease_id)?;
            return Ok(Vec::new());
        };
        Ok(collection
            .organizations
            .into_iter()
            .filter(|o| status.is_none_or(|s| o.validation_status == s))
            .collect())
    }

    pub async fn validation_stats(&self) -> ValidationStats {
        let collections = self.store.collections.all().await;
        let mut by_status: BTreeMap<String, usize> = ValidationStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut total = 0;
        let mut human_verified_count = 0;
        for org in collections.iter().flat_map(|c| c.organizations.iter()) {
            total += 1;
            *by_status
                .entry(org.validation_status.as_str().to_string())
                .or_default() += 1;
            if org.human_verified {
                human_verified_count += 1;
            }
        }
        ValidationStats {
            total_organizations: total,
            by_status,
            human_verified_count,
            disease_count: collections.len(),
        }
    }

    /// Token totals across every disease's stats, with a per-model breakdown.
    pub async fn token_summary(&self) -> TokenSummary {
        let stats = self.store.stats.all().await;
        let mut totals = TokenTotals::default();
        let mut by_model: BTreeMap<String, TokenTotals> = BTreeMap::new();
        let mut diseases_with_usage = 0;
        for entry in &stats {
            if !entry.token_usage.is_empty() {
                diseases_with_usage += 1;
            }
            for usage in &entry.token_usage {
                totals.add(usage);
                by_model.entry(usage.model.clone()).or_default().add(usage);
            }
        }
        TokenSummary {
            totals,
            diseases_with_usage,
            by_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::jobs::JobState;
    use crate::sources::llm::{Completion, ModelInfo, ProviderKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Answers each prompt kind with canned JSON keyed on the page path.
    #[derive(Default)]
    struct ScriptedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Ollama
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, FinderError> {
            Ok(Vec::new())
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FinderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let p = &request.prompt;
            let text = if p.contains("verification_result") {
                if p.contains("/weak") {
                    r#"{"verification_result": true, "verification_score": 0.1, "verification_notes": "weak"}"#
                } else {
                    r#"{"verification_result": false, "verification_score": 0.9, "corrected_name": "ファブリー病患者会"}"#
                }
            } else if p.contains("extraction_confidence") {
                r#"```json
{"name": "ファブリー患者会", "organization_type": "患者会", "contact_info": "info@example.jp",
 "activities": "交流会", "disease_specificity": 0.9, "extraction_confidence": 0.8}
```"#
            } else if p.contains("is_relevant") {
                r#"{"is_relevant": true, "confidence": 0.7, "organization_name": "家族の会", "organization_type": "家族会"}"#
            } else if p.contains("/other") {
                r#"{"is_match": false, "confidence": 0.2, "reason": "別の疾患"}"#
            } else {
                r#"{"is_match": true, "confidence": 0.9}"#
            };
            Ok(Completion {
                text: text.to_string(),
                usage: TokenUsage::new("scripted", 100, 10),
            })
        }
    }

    const PAGE: &str = "<html><head><title>ファブリー病</title></head><body><p>ファブリー病の患者と家族の会です。</p></body></html>";

    async fn web_server(paths: &[&str]) -> MockServer {
        let server = MockServer::start().await;
        let links: String = paths
            .iter()
            .map(|p| format!(r#"<a class="result__a" href="{}{p}">{p}</a>"#, server.uri()))
            .collect();
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(links, "text/html"))
            .mount(&server)
            .await;
        for p in paths {
            Mock::given(method("GET"))
                .and(path(*p))
                .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"))
                .expect(1)
                .mount(&server)
                .await;
        }
        server
    }

    async fn pipeline(dir: &std::path::Path, server: &MockServer) -> (Pipeline, Arc<Store>) {
        let mut config = Config::with_data_dir(dir);
        config.search_base = format!("{}/search", server.uri());
        let store = Arc::new(Store::open(&config).await.expect("store"));
        let catalog = Arc::new(Catalog::load(None).await.expect("catalog"));
        let web = WebClient::new(&config.search_base, Duration::from_secs(5)).expect("web");
        let pipeline = Pipeline::new(Arc::new(config), catalog, store.clone(), JobController::new(), web);
        (pipeline, store)
    }

    #[tokio::test]
    async fn two_step_run_extracts_verifies_and_auto_rejects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = web_server(&["/good", "/weak", "/other"]).await;
        let (pipeline, store) = pipeline(dir.path(), &server).await;
        let provider = ScriptedProvider::default();

        let report = pipeline
            .run_for_disease("NANDO:1200019", &provider)
            .await
            .expect("run");
        assert_eq!(report.queries.len(), 5);
        assert_eq!(report.candidates, 3);
        assert_eq!(report.approximate_matches, 2);
        assert_eq!(report.added, 2);
        assert_eq!(report.token_usage.requests, 7);
        assert_eq!(report.token_usage.total_tokens, 770);
        assert!(report.skipped[0].url.ends_with("/other"));
        assert!(report.skipped[0].reason.starts_with("not a match"));

        let collection = store.collections.get("NANDO:1200019").await.expect("collection");
        let good_url = format!("{}/good", server.uri());
        let good = collection.find(&good_url).expect("good");
        assert_eq!(good.validation_status, ValidationStatus::Verified);
        assert_eq!(good.name, "ファブリー病患者会");
        assert_eq!(good.org_type, OrganizationType::Patient);
        assert_eq!(good.validation_score, 0.9);
        assert_eq!(
            good.additional_info.as_deref(),
            Some("連絡先: info@example.jp\n活動内容: 交流会")
        );
        let weak = collection.find(&format!("{}/weak", server.uri())).expect("weak");
        assert_eq!(weak.validation_status, ValidationStatus::Rejected);
        assert!(weak.validation_notes.as_deref().unwrap_or_default().contains("auto-rejected"));

        let stats = store.stats.get("NANDO:1200019").await.expect("stats");
        assert_eq!(stats.search_count, 1);
        assert_eq!(stats.approximate_matches_found, 2);
        assert_eq!(stats.verified_organizations, 1);
        assert_eq!(stats.rejected_organizations, 1);
        assert_eq!(stats.token_usage.len(), 7);
    }

    #[tokio::test]
    async fn rerun_skips_terminal_records_and_reuses_cached_pages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = web_server(&["/good", "/weak"]).await;
        let (pipeline, store) = pipeline(dir.path(), &server).await;
        let provider = ScriptedProvider::default();
        pipeline
            .run_for_disease("NANDO:1200019", &provider)
            .await
            .expect("first run");

        let good_url = format!("{}/good", server.uri());
        let approved = pipeline
            .validate("NANDO:1200019", &good_url, true, Some("確認済み".into()))
            .await
            .expect("approve");
        assert_eq!(approved.validation_status, ValidationStatus::HumanApproved);
        assert!(approved.human_verified);

        let report = pipeline
            .run_for_disease("NANDO:1200019", &provider)
            .await
            .expect("second run");
        assert_eq!(report.added, 0);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped.iter().any(|s| s.reason == "already human_approved"));
        assert!(report.skipped.iter().any(|s| s.reason == "already rejected"));

        let stats = store.stats.get("NANDO:1200019").await.expect("stats");
        assert_eq!(stats.search_count, 2);
        assert_eq!(stats.human_approved_organizations, 1);

        let summary = pipeline.validation_stats().await;
        assert_eq!(summary.total_organizations, 2);
        assert_eq!(summary.by_status["human_approved"], 1);
        assert_eq!(summary.by_status["pending"], 0);
        assert_eq!(summary.human_verified_count, 1);
        assert_eq!(summary.disease_count, 1);

        let tokens = pipeline.token_summary().await;
        assert_eq!(tokens.totals.requests, 6);
        assert_eq!(tokens.by_model["scripted"].total_tokens, 660);
    }

    #[tokio::test]
    async fn single_step_classification_marks_relevant_pages_verified() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = web_server(&["/family"]).await;
        let (pipeline, store) = pipeline(dir.path(), &server).await;
        let disease = pipeline.catalog.require("NANDO:1200019").expect("disease").clone();
        let mut config = SearchConfig::defaults_for(&disease);
        config.two_step_validation = false;
        config.use_approximate_matching = false;
        store
            .search_configs
            .mutate("NANDO:1200019", || config.clone(), |_| Ok(()))
            .await
            .expect("config");

        let provider = ScriptedProvider::default();
        let report = pipeline
            .run_for_disease("NANDO:1200019", &provider)
            .await
            .expect("run");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.organizations.len(), 1);
        assert_eq!(report.organizations[0].name, "家族の会");
        assert_eq!(report.organizations[0].org_type, OrganizationType::Family);
        assert_eq!(report.organizations[0].validation_status, ValidationStatus::Verified);
    }

    #[tokio::test]
    async fn validating_a_rejected_record_conflicts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = web_server(&["/weak"]).await;
        let (pipeline, _store) = pipeline(dir.path(), &server).await;
        pipeline
            .run_for_disease("NANDO:1200019", &ScriptedProvider::default())
            .await
            .expect("run");

        let weak_url = format!("{}/weak", server.uri());
        let err = pipeline
            .validate("NANDO:1200019", &weak_url, true, None)
            .await
            .expect_err("rejected is terminal");
        assert!(matches!(err, FinderError::Conflict(_)));

        let reset = pipeline.reset("NANDO:1200019", &weak_url).await.expect("reset");
        assert_eq!(reset.validation_status, ValidationStatus::Pending);

        let err = pipeline
            .validate("NANDO:1200021", "missing", true, None)
            .await
            .expect_err("no collection");
        assert!(matches!(err, FinderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn category_entries_are_not_searched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = web_server(&[]).await;
        let (pipeline, store) = pipeline(dir.path(), &server).await;
        let provider = ScriptedProvider::default();
        let report = pipeline
            .run_for_disease("NANDO:1200001", &provider)
            .await
            .expect("run");
        assert!(report.skipped_category);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(store.collections.get("NANDO:1200001").await.is_none());
    }

    #[tokio::test]
    async fn second_run_all_is_refused_while_first_is_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = web_server(&[]).await;
        let (pipeline, _store) = pipeline(dir.path(), &server).await;
        let provider_config = ProviderConfig::resolve(
            &Config::with_data_dir(dir.path()),
            Some("ollama"),
            None,
            Some("http://127.0.0.1:9"),
        )
        .expect("provider config");

        let started = pipeline.start_run_all(&provider_config, 2).expect("start");
        assert_eq!(started.state, JobState::Running);
        assert_eq!(started.total, 2);
        let err = pipeline
            .start_run_all(&provider_config, 2)
            .expect_err("already running");
        assert!(matches!(err, FinderError::AlreadyRunning(_)));
        assert!(pipeline.status().await.daily_search_running);

        for _ in 0..100 {
            if !pipeline.jobs.is_running(JobKind::LlmSearchAll) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let snapshot = pipeline.jobs.snapshot(JobKind::LlmSearchAll);
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.done, 2);

        let progress = pipeline.progress().await;
        assert_eq!(progress.searched_diseases, 2);
        assert_eq!(progress.remaining_diseases, progress.total_diseases - 2);
    }
}
