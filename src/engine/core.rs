// src/engine/core.rs

//! Pure scheduler state machine.
//!
//! The core owns every [`RenderJob`] and the admission queue. It consumes
//! [`CoreEvent`]s (plus synchronous queries) and returns [`CoreStep`]s that
//! describe what the IO shell should do next: launch a worker, signal a
//! cancellation, release workspaces.
//!
//! It has **no** channels, no Tokio types, and does not perform any IO, so
//! admission order, cancellation and eviction can be tested without
//! processes. Time is passed in explicitly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::artifact::{self, ArtifactLocation};
use crate::config::SchedulerSettings;
use crate::engine::event_handlers::{
    CancelOutcome, CoreStep, SchedulerState, handle_cancel, handle_finish, handle_progress,
    handle_shutdown, handle_submit, handle_sweep,
};
use crate::engine::job::{JobRequest, JobResult, JobSnapshot, RenderJob};
use crate::engine::queue::AdmissionQueue;
use crate::errors::{FramewrightError, Result};
use crate::types::JobId;

/// Lifecycle events fed into the core.
#[derive(Debug)]
pub enum CoreEvent {
    Submitted(JobRequest),
    Progressed { id: JobId, percent: u8 },
    Finished { id: JobId, result: JobResult },
    SweepTick,
    ShutdownRequested,
}

#[derive(Debug)]
pub struct CoreScheduler {
    state: SchedulerState,
    retention: Duration,
}

impl CoreScheduler {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            state: SchedulerState {
                jobs: HashMap::new(),
                queue: AdmissionQueue::new(),
                running: 0,
                max_concurrent: settings.max_concurrent.max(1),
                shutting_down: false,
            },
            retention: settings.retention,
        }
    }

    /// Handle a single lifecycle event at time `now`.
    pub fn step(&mut self, event: CoreEvent, now: Instant) -> CoreStep {
        match event {
            CoreEvent::Submitted(request) => {
                handle_submit(&mut self.state, RenderJob::new(request), now)
            }
            CoreEvent::Progressed { id, percent } => {
                handle_progress(&mut self.state, id, percent)
            }
            CoreEvent::Finished { id, result } => {
                handle_finish(&mut self.state, id, result, now)
            }
            CoreEvent::SweepTick => handle_sweep(&mut self.state, now, self.retention),
            CoreEvent::ShutdownRequested => handle_shutdown(&mut self.state, now),
        }
    }

    /// Cancel a job. `None` means the id is unknown (or already evicted).
    pub fn cancel(&mut self, id: JobId, now: Instant) -> Option<(CancelOutcome, CoreStep)> {
        handle_cancel(&mut self.state, id, now)
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        let job = self.state.jobs.get(&id)?;
        Some(job.snapshot(self.state.queue.position(id)))
    }

    /// Snapshots of every retained job, oldest submission first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<_> = self
            .state
            .jobs
            .values()
            .map(|job| job.snapshot(self.state.queue.position(job.id)))
            .collect();
        jobs.sort_by_key(|s| (s.submitted_at_ms, s.id));
        jobs
    }

    /// Where the artifact of a succeeded job lives.
    pub fn artifact(&self, id: JobId) -> Result<ArtifactLocation> {
        let job = self
            .state
            .jobs
            .get(&id)
            .ok_or(FramewrightError::JobNotFound(id))?;
        artifact::resolve(job)
    }

    pub fn running(&self) -> usize {
        self.state.running
    }

    pub fn queued(&self) -> usize {
        self.state.queue.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.shutting_down
    }
}
