// src/engine/job.rs

//! Per-job record owned by the scheduler core.

use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::artifact::ArtifactLocation;
use crate::classify::ClassifiedError;
use crate::types::{JobId, OutputFormat};
use crate::workspace::Workspace;

/// Lifecycle state of a render job. Ordered: a job only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn can_move_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the caller submitted.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: JobId,
    pub source: Arc<str>,
    pub format: OutputFormat,
    pub submitted_at: SystemTime,
}

/// What a worker needs to run a job. The job record itself stays in the core.
#[derive(Debug, Clone)]
pub struct JobLaunch {
    pub id: JobId,
    pub source: Arc<str>,
    pub format: OutputFormat,
}

/// Output of a successful run: the workspace stays alive because it holds
/// the artifact.
#[derive(Debug)]
pub struct CompletedRender {
    pub workspace: Workspace,
    pub artifact: ArtifactLocation,
}

/// Result a worker reports back to the core.
pub type JobResult = Result<CompletedRender, ClassifiedError>;

/// A render job as tracked by the scheduler core.
#[derive(Debug)]
pub struct RenderJob {
    pub id: JobId,
    /// Scene text, handed to the worker on launch and not kept afterwards.
    source: Option<Arc<str>>,
    pub format: OutputFormat,
    pub submitted_at: SystemTime,
    /// blake3 digest of the scene source, hex encoded.
    pub source_digest: String,
    state: JobState,
    pub progress: u8,
    pub cancel_requested: bool,
    workspace: Option<Workspace>,
    artifact: Option<ArtifactLocation>,
    error: Option<ClassifiedError>,
    finished_at: Option<Instant>,
}

impl RenderJob {
    pub fn new(request: JobRequest) -> Self {
        let source_digest = blake3::hash(request.source.as_bytes()).to_hex().to_string();
        Self {
            id: request.id,
            source: Some(request.source),
            format: request.format,
            submitted_at: request.submitted_at,
            source_digest,
            state: JobState::Queued,
            progress: 0,
            cancel_requested: false,
            workspace: None,
            artifact: None,
            error: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn error(&self) -> Option<&ClassifiedError> {
        self.error.as_ref()
    }

    pub fn artifact(&self) -> Option<&ArtifactLocation> {
        self.artifact.as_ref()
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    /// Build the worker's launch record. The source moves out of the job;
    /// only its digest stays for the retention window.
    pub fn launch(&mut self) -> JobLaunch {
        JobLaunch {
            id: self.id,
            source: self.source.take().unwrap_or_else(|| Arc::from("")),
            format: self.format,
        }
    }

    /// Move to `next` if that is a forward transition. Returns whether the
    /// state changed.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_move_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    /// Record a worker result. Only the first terminal write is kept; a late
    /// result is handed back so its workspace can be released.
    pub fn complete(&mut self, result: JobResult, now: Instant) -> Option<JobResult> {
        let next = if result.is_ok() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        if !self.transition(next) {
            return Some(result);
        }

        match result {
            Ok(done) => {
                self.progress = 100;
                self.artifact = Some(done.artifact);
                self.workspace = Some(done.workspace);
            }
            Err(err) => self.error = Some(err),
        }
        self.finished_at = Some(now);
        None
    }

    /// Fail a job that has not produced a result (e.g. cancelled while queued).
    pub fn fail(&mut self, err: ClassifiedError, now: Instant) -> bool {
        if !self.transition(JobState::Failed) {
            return false;
        }
        self.error = Some(err);
        self.finished_at = Some(now);
        true
    }

    /// Whether a terminal job has outlived the retention window.
    pub fn is_expired(&self, now: Instant, retention: std::time::Duration) -> bool {
        match self.finished_at {
            Some(done) => now.saturating_duration_since(done) >= retention,
            None => false,
        }
    }

    /// Hand over the workspace (if any) for release.
    pub fn take_workspace(&mut self) -> Option<Workspace> {
        self.workspace.take()
    }

    pub fn snapshot(&self, queue_position: Option<usize>) -> JobSnapshot {
        let submitted_at_ms = self
            .submitted_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        JobSnapshot {
            id: self.id,
            state: self.state,
            format: self.format,
            progress: self.progress,
            submitted_at_ms,
            source_digest: self.source_digest.clone(),
            queue_position,
            cancel_requested: self.cancel_requested,
            error: self.error.clone(),
            artifact_size: self.artifact.as_ref().map(|a| a.size),
        }
    }
}

/// Point-in-time view of a job returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub format: OutputFormat,
    pub progress: u8,
    pub submitted_at_ms: u64,
    pub source_digest: String,
    /// 0-based position in the admission queue while `Queued`.
    pub queue_position: Option<usize>,
    pub cancel_requested: bool,
    pub error: Option<ClassifiedError>,
    pub artifact_size: Option<u64>,
}
