// src/engine/handle.rs

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::artifact::ArtifactLocation;
use crate::engine::core::CoreScheduler;
use crate::engine::event_handlers::CancelOutcome;
use crate::engine::job::{JobRequest, JobSnapshot};
use crate::engine::runtime::Runtime;
use crate::engine::RuntimeEvent;
use crate::errors::{FramewrightError, Result};
use crate::pipeline::PipelineContext;
use crate::types::{JobId, OutputFormat};

/// Cloneable client of the scheduler coordinator.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

/// Start the coordinator on the current Tokio runtime.
pub fn spawn_scheduler(pipeline: Arc<PipelineContext>) -> (SchedulerHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let core = CoreScheduler::new(&pipeline.config.scheduler);
    let runtime = Runtime::new(core, rx, pipeline);
    let join = tokio::spawn(runtime.run());
    (SchedulerHandle { tx }, join)
}

impl SchedulerHandle {
    fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| FramewrightError::SchedulerClosed)
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> RuntimeEvent) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| FramewrightError::SchedulerClosed)
    }

    /// Enqueue a job. Never waits for admission.
    pub fn submit(&self, source: impl Into<Arc<str>>, format: OutputFormat) -> Result<JobId> {
        let id = JobId::new();
        self.send(RuntimeEvent::Submit(JobRequest {
            id,
            source: source.into(),
            format,
            submitted_at: SystemTime::now(),
        }))?;
        Ok(id)
    }

    pub async fn status(&self, id: JobId) -> Result<JobSnapshot> {
        self.ask(|reply| RuntimeEvent::Status { id, reply })
            .await?
            .ok_or(FramewrightError::JobNotFound(id))
    }

    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome> {
        self.ask(|reply| RuntimeEvent::Cancel { id, reply })
            .await?
            .ok_or(FramewrightError::JobNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<JobSnapshot>> {
        self.ask(|reply| RuntimeEvent::List { reply }).await
    }

    pub async fn artifact_location(&self, id: JobId) -> Result<ArtifactLocation> {
        self.ask(|reply| RuntimeEvent::Artifact { id, reply }).await?
    }

    /// Ask the coordinator to stop. Running jobs are cancelled.
    pub fn shutdown(&self) -> Result<()> {
        self.send(RuntimeEvent::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
