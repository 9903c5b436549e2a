// src/engine/event_handlers.rs

//! Event handling logic for the scheduler core.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::classify::ClassifiedError;
use crate::engine::job::{JobLaunch, JobResult, JobState, RenderJob};
use crate::engine::queue::AdmissionQueue;
use crate::types::JobId;
use crate::workspace::Workspace;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Start a worker for this job.
    Launch(JobLaunch),
    /// Ask the worker of a running job to stop.
    SignalCancel(JobId),
    /// Remove these workspaces (evicted jobs, late results).
    ReleaseWorkspaces(Vec<Workspace>),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn new(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Result of a cancel request on a known job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and is now `Failed` with `CancelledError`.
    Cancelled,
    /// The job is running; its worker has been signalled.
    Signalled,
    /// The job had already finished; nothing changed.
    AlreadyTerminal,
}

/// Mutable state shared by the handlers.
#[derive(Debug)]
pub struct SchedulerState {
    pub jobs: HashMap<JobId, RenderJob>,
    pub queue: AdmissionQueue,
    pub running: usize,
    pub max_concurrent: usize,
    pub shutting_down: bool,
}

/// Register a new job and admit whatever fits.
pub fn handle_submit(state: &mut SchedulerState, job: RenderJob, now: Instant) -> CoreStep {
    let id = job.id;
    state.jobs.insert(id, job);

    if state.shutting_down {
        if let Some(job) = state.jobs.get_mut(&id) {
            job.fail(
                ClassifiedError::cancelled("scheduler is shutting down"),
                now,
            );
        }
        return CoreStep::new(Vec::new());
    }

    state.queue.push(id);
    CoreStep::new(admit_ready(state))
}

/// Pop queued jobs into free running slots, oldest first.
pub fn admit_ready(state: &mut SchedulerState) -> Vec<CoreCommand> {
    let mut commands = Vec::new();
    while state.running < state.max_concurrent {
        let Some(id) = state.queue.pop() else { break };
        let Some(job) = state.jobs.get_mut(&id) else {
            continue;
        };
        if !job.transition(JobState::Running) {
            continue;
        }
        state.running += 1;
        debug!(job_id = %id, running = state.running, "job admitted");
        commands.push(CoreCommand::Launch(job.launch()));
    }
    commands
}

pub fn handle_cancel(
    state: &mut SchedulerState,
    id: JobId,
    now: Instant,
) -> Option<(CancelOutcome, CoreStep)> {
    let job = state.jobs.get_mut(&id)?;
    job.cancel_requested = true;

    let outcome = match job.state() {
        JobState::Queued => {
            state.queue.remove(id);
            job.fail(ClassifiedError::cancelled("cancelled while queued"), now);
            info!(job_id = %id, "queued job cancelled");
            return Some((CancelOutcome::Cancelled, CoreStep::new(Vec::new())));
        }
        JobState::Running => CancelOutcome::Signalled,
        JobState::Succeeded | JobState::Failed => CancelOutcome::AlreadyTerminal,
    };

    let commands = if outcome == CancelOutcome::Signalled {
        info!(job_id = %id, "signalling running job to cancel");
        vec![CoreCommand::SignalCancel(id)]
    } else {
        Vec::new()
    };
    Some((outcome, CoreStep::new(commands)))
}

pub fn handle_progress(state: &mut SchedulerState, id: JobId, percent: u8) -> CoreStep {
    if let Some(job) = state.jobs.get_mut(&id) {
        if job.state() == JobState::Running {
            // Progress never goes backwards and 100 is reserved for success.
            job.progress = job.progress.max(percent.min(99));
        }
    }
    CoreStep::new(Vec::new())
}

/// Record a worker's result, free its slot and admit the next job.
pub fn handle_finish(
    state: &mut SchedulerState,
    id: JobId,
    result: JobResult,
    now: Instant,
) -> CoreStep {
    let mut commands = Vec::new();

    match state.jobs.get_mut(&id) {
        Some(job) => {
            let was_running = job.state() == JobState::Running;
            match job.complete(result, now) {
                None => match job.error() {
                    Some(err) => info!(
                        job_id = %id,
                        kind = %err.kind,
                        stage = %err.stage,
                        detail = %err.detail,
                        "job failed"
                    ),
                    None => info!(job_id = %id, "job succeeded"),
                },
                Some(Ok(late)) => {
                    warn!(job_id = %id, "dropping late result for finished job");
                    commands.push(CoreCommand::ReleaseWorkspaces(vec![late.workspace]));
                }
                Some(Err(_)) => debug!(job_id = %id, "ignoring late failure for finished job"),
            }
            if state.shutting_down {
                if let Some(ws) = job.take_workspace() {
                    commands.push(CoreCommand::ReleaseWorkspaces(vec![ws]));
                }
            }
            if was_running {
                state.running = state.running.saturating_sub(1);
            }
        }
        None => {
            warn!(job_id = %id, "result for unknown job");
            if let Ok(done) = result {
                commands.push(CoreCommand::ReleaseWorkspaces(vec![done.workspace]));
            }
        }
    }

    commands.extend(admit_ready(state));
    CoreStep {
        commands,
        keep_running: !(state.shutting_down && state.running == 0),
    }
}

/// Evict terminal jobs older than `retention`.
pub fn handle_sweep(
    state: &mut SchedulerState,
    now: Instant,
    retention: std::time::Duration,
) -> CoreStep {
    let expired: Vec<JobId> = state
        .jobs
        .values()
        .filter(|job| job.is_expired(now, retention))
        .map(|job| job.id)
        .collect();

    let mut workspaces = Vec::new();
    for id in expired {
        if let Some(mut job) = state.jobs.remove(&id) {
            debug!(job_id = %id, state = %job.state(), "evicting job");
            workspaces.extend(job.take_workspace());
        }
    }

    let commands = if workspaces.is_empty() {
        Vec::new()
    } else {
        vec![CoreCommand::ReleaseWorkspaces(workspaces)]
    };
    CoreStep::new(commands)
}

/// Stop admitting, fail queued jobs and signal running ones. The loop keeps
/// going until every running worker has reported back.
pub fn handle_shutdown(state: &mut SchedulerState, now: Instant) -> CoreStep {
    state.shutting_down = true;

    for id in state.queue.drain() {
        if let Some(job) = state.jobs.get_mut(&id) {
            job.cancel_requested = true;
            job.fail(ClassifiedError::cancelled("scheduler shut down"), now);
        }
    }

    let mut commands = Vec::new();
    let mut retained = Vec::new();
    for job in state.jobs.values_mut() {
        if job.state() == JobState::Running {
            job.cancel_requested = true;
            commands.push(CoreCommand::SignalCancel(job.id));
        }
        retained.extend(job.take_workspace());
    }
    if !retained.is_empty() {
        commands.push(CoreCommand::ReleaseWorkspaces(retained));
    }

    info!(running = state.running, "scheduler shutting down");
    CoreStep {
        commands,
        keep_running: state.running > 0,
    }
}
