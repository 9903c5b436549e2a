// src/engine/mod.rs

//! Job scheduling engine for framewright.
//!
//! This module ties together:
//! - the per-job record and its state machine (`job`)
//! - the FIFO admission queue (`queue`)
//! - the pure scheduler core (`core`, `event_handlers`)
//! - the async coordinator that owns the core and runs workers (`runtime`)
//! - the cloneable handle callers use to talk to the coordinator (`handle`)

use tokio::sync::oneshot;

use crate::artifact::ArtifactLocation;
use crate::errors::Result;
use crate::types::JobId;

pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod job;
pub mod queue;
pub mod runtime;

pub use core::{CoreEvent, CoreScheduler};
pub use event_handlers::{CancelOutcome, CoreCommand, CoreStep};
pub use handle::{SchedulerHandle, spawn_scheduler};
pub use job::{
    CompletedRender, JobLaunch, JobRequest, JobResult, JobSnapshot, JobState, RenderJob,
};
pub use queue::AdmissionQueue;
pub use runtime::Runtime;

/// Events flowing into the coordinator from handles and workers.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A new job was submitted; its id was already handed to the caller.
    Submit(JobRequest),
    Status {
        id: JobId,
        reply: oneshot::Sender<Option<JobSnapshot>>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<Option<CancelOutcome>>,
    },
    List {
        reply: oneshot::Sender<Vec<JobSnapshot>>,
    },
    Artifact {
        id: JobId,
        reply: oneshot::Sender<Result<ArtifactLocation>>,
    },
    /// A worker reached a progress milestone.
    Progress { id: JobId, percent: u8 },
    /// A worker finished (or crashed).
    Finished { id: JobId, result: JobResult },
    /// Graceful shutdown requested.
    Shutdown,
}
