// src/service/mod.rs

//! Inbound boundary used by an HTTP layer (or the CLI).
//!
//! [`RenderService`] owns the scheduler coordinator and exposes the five
//! operations callers need: submit, status, cancel, fetch and readiness,
//! plus `list` and `shutdown`. Errors carry an [`ErrorKind`] via
//! [`FramewrightError::kind`] so a transport can map them to status codes.
//!
//! [`ErrorKind`]: crate::classify::ErrorKind

pub mod readiness;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::artifact::{self, ArtifactHandle};
use crate::config::EngineConfig;
use crate::engine::{CancelOutcome, JobSnapshot, SchedulerHandle, spawn_scheduler};
use crate::errors::{FramewrightError, Result};
use crate::exec::{ProcessBackend, ToolchainBackend};
use crate::pipeline::PipelineContext;
use crate::types::{JobId, OutputFormat};
use crate::workspace::WorkspaceManager;

pub use readiness::{ProgramCheck, ProgramStatus, ReadinessReport, check_programs};

/// A render submission.
#[derive(Debug, Clone)]
pub struct SceneRequest {
    pub source: String,
    /// `None` means the configured default format.
    pub format: Option<OutputFormat>,
}

impl SceneRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }
}

#[derive(Debug)]
pub struct RenderService {
    config: Arc<EngineConfig>,
    scheduler: SchedulerHandle,
    workspaces: WorkspaceManager,
    join: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl RenderService {
    /// Start with the real process backend. Must be called inside a Tokio
    /// runtime.
    pub fn start(config: EngineConfig) -> Result<Self> {
        Self::start_with_backend(config, Arc::new(ProcessBackend::new()))
    }

    pub fn start_with_backend(
        config: EngineConfig,
        backend: Arc<dyn ToolchainBackend>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let workspaces = WorkspaceManager::new(&config.workspace)?;
        if config.workspace.sweep_stale_on_start {
            workspaces.sweep_stale()?;
        }

        let pipeline = Arc::new(PipelineContext {
            config: Arc::clone(&config),
            workspaces: workspaces.clone(),
            backend,
        });
        let (scheduler, join) = spawn_scheduler(pipeline);

        info!(
            root = %workspaces.root().display(),
            stages = config.stages.len(),
            "render service started"
        );

        Ok(Self {
            config,
            scheduler,
            workspaces,
            join: Mutex::new(Some(join)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Enqueue a render. Returns as soon as the job is registered.
    pub fn submit(&self, request: SceneRequest) -> Result<JobId> {
        let format = request
            .format
            .unwrap_or(self.config.engine.default_format);
        self.scheduler.submit(request.source, format)
    }

    pub async fn status(&self, id: JobId) -> Result<JobSnapshot> {
        self.scheduler.status(id).await
    }

    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome> {
        self.scheduler.cancel(id).await
    }

    pub async fn list(&self) -> Result<Vec<JobSnapshot>> {
        self.scheduler.list().await
    }

    /// Open the artifact of a succeeded job, optionally for one byte range
    /// (`range` is the raw `Range` header value).
    pub async fn fetch(&self, id: JobId, range: Option<&str>) -> Result<ArtifactHandle> {
        let location = self.scheduler.artifact_location(id).await?;
        artifact::open(&location, range).await
    }

    /// Healthy only if every required program, and every program a stage
    /// runs, is present and executable.
    pub fn readiness(&self) -> ReadinessReport {
        check_programs(&self.config.toolchain_programs())
    }

    /// Poll until the job is terminal.
    pub async fn wait_for_terminal(&self, id: JobId, poll: Duration) -> Result<JobSnapshot> {
        loop {
            let snapshot = self.status(id).await?;
            if snapshot.state.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stop the coordinator, cancelling running jobs, and wait for it.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.scheduler.shutdown() {
            warn!(error = %err, "scheduler already stopped");
        }

        let join = self
            .join
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match join {
            Some(join) => join
                .await
                .map_err(|e| FramewrightError::Other(anyhow::Error::new(e)))?,
            None => Ok(()),
        }
    }
}
