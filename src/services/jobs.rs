//! Fire-and-poll background jobs, at most one in flight per [`JobKind`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::FinderError;
use crate::utils::date::HoursMinutesSeconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    LlmSearchAll,
    WebsiteCheckAll,
}

impl JobKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::LlmSearchAll => "LLM search for all diseases",
            Self::WebsiteCheckAll => "Website check for all diseases",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub kind: JobKind,
    pub state: JobState,
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Remaining time from the mean duration of finished items.
    pub estimated_remaining: Option<HoursMinutesSeconds>,
}

impl JobSnapshot {
    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }
}

#[derive(Debug)]
struct Job {
    state: JobState,
    total: usize,
    done: usize,
    failed: usize,
    current: Option<String>,
    started_at: Option<OffsetDateTime>,
    finished_at: Option<OffsetDateTime>,
    message: Option<String>,
    started: Option<Instant>,
}

impl Job {
    fn idle() -> Self {
        Self {
            state: JobState::Idle,
            total: 0,
            done: 0,
            failed: 0,
            current: None,
            started_at: None,
            finished_at: None,
            message: None,
            started: None,
        }
    }

    fn eta(&self) -> Option<Duration> {
        if self.state != JobState::Running || self.done == 0 {
            return None;
        }
        let elapsed = self.started?.elapsed();
        let remaining = self.total.saturating_sub(self.done) as u32;
        Some(elapsed / self.done as u32 * remaining)
    }

    fn snapshot(&self, kind: JobKind) -> JobSnapshot {
        JobSnapshot {
            kind,
            state: self.state,
            total: self.total,
            done: self.done,
            failed: self.failed,
            current: self.current.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            message: self.message.clone(),
            estimated_remaining: self.eta().map(HoursMinutesSeconds::from),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobController {
    jobs: Arc<Mutex<HashMap<JobKind, Job>>>,
}

impl JobController {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobKind, Job>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Marks `kind` running unless it already is.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::AlreadyRunning`] when a job of this kind is in flight.
    pub fn try_start(&self, kind: JobKind, total: usize) -> Result<JobTicket, FinderError> {
        let mut jobs = self.jobs();
        let job = jobs.entry(kind).or_insert_with(Job::idle);
        if job.state == JobState::Running {
            return Err(FinderError::AlreadyRunning(kind.label().to_string()));
        }
        *job = Job {
            state: JobState::Running,
            total,
            started_at: Some(crate::utils::date::now()),
            started: Some(Instant::now()),
            ..Job::idle()
        };
        info!(job = %kind, total, "Job started");
        Ok(JobTicket {
            controller: self.clone(),
            kind,
            finished: false,
        })
    }

    pub fn snapshot(&self, kind: JobKind) -> JobSnapshot {
        let jobs = self.jobs();
        match jobs.get(&kind) {
            Some(job) => job.snapshot(kind),
            None => Job::idle().snapshot(kind),
        }
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.jobs()
            .get(&kind)
            .is_some_and(|job| job.state == JobState::Running)
    }

    fn update(&self, kind: JobKind, f: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs();
        f(jobs.entry(kind).or_insert_with(Job::idle));
    }
}

/// Exclusive handle on a running job. Dropping it unfinished marks the job failed.
#[derive(Debug)]
pub struct JobTicket {
    controller: JobController,
    kind: JobKind,
    finished: bool,
}

impl JobTicket {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn set_current(&self, item: &str) {
        let item = item.to_string();
        self.controller.update(self.kind, |job| job.current = Some(item));
    }

    /// Records one finished item.
    pub fn item_done(&self, ok: bool) {
        self.controller.update(self.kind, |job| {
            job.done += 1;
            if !ok {
                job.failed += 1;
            }
        });
    }

    pub fn complete(mut self, message: impl Into<String>) {
        self.finish(JobState::Completed, message.into());
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.finish(JobState::Failed, message.into());
    }

    fn finish(&mut self, state: JobState, message: String) {
        self.finished = true;
        let kind = self.kind;
        self.controller.update(kind, |job| {
            job.state = state;
            job.current = None;
            job.finished_at = Some(crate::utils::date::now());
            job.message = Some(message);
        });
        info!(job = %kind, ?state, "Job finished");
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        if !self.finished {
            warn!(job = %self.kind, "Job ended without reporting a result");
            self.finish(JobState::Failed, "job ended unexpectedly".to_string());
        }
    }
}
