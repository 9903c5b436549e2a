// src/pipeline/mod.rs

//! Per-job render routine.
//!
//! One call to [`run_job`] owns one job from admission to its result:
//!
//! 1. discover the scenes defined in the source (none → `InputError`),
//! 2. acquire a workspace and write the scene file into it,
//! 3. run every configured stage in order through the [`ToolchainBackend`],
//!    once per scene for `per_scene` stages, skipping `multi_scene` stages
//!    when there is a single scene,
//! 4. classify each invocation and stop at the first failure,
//! 5. locate and verify the artifact of the last stage that ran.
//!
//! Every failure path releases the workspace before returning; on success it
//! is handed to the scheduler together with the artifact.

pub mod scenes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::artifact;
use crate::classify::{ClassifiedError, ErrorKind, Outcome, classify};
use crate::config::{EngineConfig, StageSpec};
use crate::engine::{CompletedRender, JobLaunch, JobResult, RuntimeEvent};
use crate::exec::template::{TemplateVars, render, render_argv};
use crate::exec::{CancelSignal, InvocationRequest, ToolchainBackend};
use crate::types::{JobId, RunCondition, ToolchainStage};
use crate::workspace::{Workspace, WorkspaceManager};

pub use scenes::discover_scenes;

/// Name of the ffmpeg concat list written into the workspace.
pub const CONCAT_LIST: &str = "concat.txt";

/// File name stem of a multi-scene output.
pub const OUTPUT_STEM: &str = "output";

/// Progress milestones.
const PROGRESS_WORKSPACE_READY: u8 = 10;
const PROGRESS_STAGES_START: u8 = 20;
const PROGRESS_STAGES_SPAN: u8 = 70;

/// Everything a worker needs besides its job.
pub struct PipelineContext {
    pub config: Arc<EngineConfig>,
    pub workspaces: WorkspaceManager,
    pub backend: Arc<dyn ToolchainBackend>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("workspaces", &self.workspaces)
            .finish_non_exhaustive()
    }
}

/// Sends progress milestones of one job back to the coordinator.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    id: JobId,
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl ProgressReporter {
    pub fn new(id: JobId, tx: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self { id, tx }
    }

    pub fn report(&self, percent: u8) {
        let _ = self.tx.send(RuntimeEvent::Progress {
            id: self.id,
            percent,
        });
    }
}

/// Run one job to completion.
pub async fn run_job(
    ctx: &PipelineContext,
    launch: JobLaunch,
    cancel: CancelSignal,
    progress: ProgressReporter,
) -> JobResult {
    let span = info_span!("job", job_id = %launch.id, format = %launch.format);
    async move {
        let scenes = discover_scenes(&launch.source, &ctx.config.engine.scene_pattern);
        if scenes.is_empty() {
            return Err(ClassifiedError::new(
                ErrorKind::Input,
                ToolchainStage::Rendering,
                "scene source does not define any scene class",
            ));
        }
        if cancel.is_cancelled() {
            return Err(ClassifiedError::cancelled("cancelled before start"));
        }

        let workspace = ctx.workspaces.acquire(launch.id).map_err(|e| {
            ClassifiedError::new(
                ErrorKind::Resource,
                ToolchainStage::Orchestration,
                e.to_string(),
            )
        })?;

        let mut run = StageRun {
            ctx,
            launch: &launch,
            workspace: &workspace,
            scenes: &scenes,
            cancel,
            progress: &progress,
        };

        match run.execute().await {
            Ok(artifact) => {
                info!(
                    path = %artifact.path.display(),
                    size = artifact.size,
                    scenes = scenes.len(),
                    "render finished"
                );
                Ok(CompletedRender {
                    workspace,
                    artifact,
                })
            }
            Err(err) => {
                let workspaces = ctx.workspaces.clone();
                match tokio::task::spawn_blocking(move || workspaces.release(workspace)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(release_err)) => {
                        warn!(error = %release_err, "failed to release workspace");
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "workspace release task failed");
                    }
                }
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

/// One job's walk through the configured stages.
struct StageRun<'a> {
    ctx: &'a PipelineContext,
    launch: &'a JobLaunch,
    workspace: &'a Workspace,
    scenes: &'a [String],
    cancel: CancelSignal,
    progress: &'a ProgressReporter,
}

impl StageRun<'_> {
    async fn execute(&mut self) -> Result<artifact::ArtifactLocation, ClassifiedError> {
        let config = Arc::clone(&self.ctx.config);
        let engine = &config.engine;
        let ws = self.workspace.path().to_path_buf();

        self.workspace
            .write_file(&engine.scene_file, self.launch.source.as_bytes())
            .await
            .map_err(|e| orchestration(ErrorKind::Resource, e.to_string()))?;
        self.progress.report(PROGRESS_WORKSPACE_READY);

        let multi = self.scenes.len() > 1;
        let plan: Vec<&StageSpec> = config
            .stages
            .iter()
            .filter(|s| s.when == RunCondition::Always || multi)
            .collect();
        let total: usize = plan
            .iter()
            .map(|s| if s.per_scene { self.scenes.len() } else { 1 })
            .sum();

        let ext = self.launch.format.extension();
        let mut vars = TemplateVars::new();
        vars.set("workspace", ws.to_string_lossy())
            .set("scene_file", engine.scene_file.clone())
            .set("format", ext)
            .set("ext", ext)
            .set("output_name", format!("{OUTPUT_STEM}.{ext}"))
            .set("job_id", self.launch.id.to_string())
            .set_scenes(self.scenes);

        let mut done = 0usize;
        let mut scene_outputs: Vec<PathBuf> = Vec::new();
        let mut final_output: Option<String> = None;

        for stage in plan {
            if stage.uses_placeholder("concat_list") {
                let list = write_concat_list(self.workspace, &scene_outputs).await?;
                vars.set("concat_list", list.to_string_lossy());
            }

            let scene_iter: Vec<Option<&String>> = if stage.per_scene {
                self.scenes.iter().map(Some).collect()
            } else {
                vec![None]
            };
            if stage.per_scene && stage.output.is_some() {
                scene_outputs.clear();
            }

            for scene in scene_iter {
                if let Some(scene) = scene {
                    vars.set("scene", scene.clone());
                }
                self.run_stage(stage, &vars, &ws).await?;

                if let Some(output) = &stage.output {
                    let pattern = render(output, &vars)
                        .map_err(|e| orchestration(ErrorKind::Environment, e))?;
                    if stage.per_scene {
                        let path = artifact::locate(&ws, &pattern)
                            .map_err(|e| e.with_step(stage.name.clone()))?;
                        scene_outputs.push(path);
                    }
                    final_output = Some(pattern);
                }

                done += 1;
                let pct = PROGRESS_STAGES_START as usize
                    + PROGRESS_STAGES_SPAN as usize * done / total.max(1);
                self.progress.report(pct as u8);
            }
        }

        let pattern = final_output.ok_or_else(|| {
            orchestration(ErrorKind::CorruptArtifact, "no stage that ran declares an output")
        })?;
        artifact::verify(&ws, &pattern, self.launch.format)
    }

    async fn run_stage(
        &mut self,
        stage: &StageSpec,
        vars: &TemplateVars,
        ws: &Path,
    ) -> Result<(), ClassifiedError> {
        if self.cancel.is_cancelled() {
            return Err(ClassifiedError::cancelled(format!(
                "cancelled before step '{}'",
                stage.name
            ))
            .with_step(stage.name.clone()));
        }

        let argv = render_argv(&stage.cmd, vars).map_err(|e| {
            orchestration(ErrorKind::Environment, e).with_step(stage.name.clone())
        })?;
        debug!(stage = %stage.name, ?argv, "invoking toolchain");

        let request = InvocationRequest {
            stage: stage.name.clone(),
            argv,
            cwd: ws.to_path_buf(),
            env: self.ctx.config.engine.env.clone(),
            limits: stage.limits(),
        };
        let invocation = self.ctx.backend.invoke(request, self.cancel.clone()).await;

        info!(
            stage = %stage.name,
            termination = ?invocation.termination,
            exit_code = invocation.exit.and_then(|e| e.code),
            elapsed_ms = invocation.elapsed.as_millis() as u64,
            stderr_truncated = invocation.stderr.truncated,
            "stage finished"
        );

        match classify(&invocation, stage.kind) {
            Outcome::Success => Ok(()),
            Outcome::Failed(err) => Err(err.with_step(stage.name.clone())),
        }
    }
}

fn orchestration(kind: ErrorKind, detail: impl Into<String>) -> ClassifiedError {
    ClassifiedError::new(kind, ToolchainStage::Orchestration, detail)
}

/// Write an ffmpeg concat-demuxer list of `inputs` and return its path.
async fn write_concat_list(
    workspace: &Workspace,
    inputs: &[PathBuf],
) -> Result<PathBuf, ClassifiedError> {
    let mut list = String::new();
    for input in inputs {
        let escaped = input.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    workspace
        .write_file(CONCAT_LIST, list)
        .await
        .map_err(|e| orchestration(ErrorKind::Resource, e.to_string()))
}
