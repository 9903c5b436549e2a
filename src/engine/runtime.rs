// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::classify::{ClassifiedError, ErrorKind};
use crate::engine::core::{CoreEvent, CoreScheduler};
use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::job::JobLaunch;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::{CancelTrigger, cancel_pair};
use crate::pipeline::{PipelineContext, ProgressReporter, run_job};
use crate::types::{JobId, ToolchainStage};
use crate::workspace::Workspace;

/// Coordinator task: owns the [`CoreScheduler`], answers queries, and runs
/// one worker task per admitted job.
///
/// This is an IO shell around the core, which contains all the scheduling
/// semantics. Workers report back through their own channel, so the
/// coordinator keeps running until every worker has finished even after all
/// handles are gone.
pub struct Runtime {
    core: CoreScheduler,
    inbound_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    inbound_open: bool,
    worker_tx: mpsc::UnboundedSender<RuntimeEvent>,
    worker_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    pipeline: Arc<PipelineContext>,
    cancels: HashMap<JobId, CancelTrigger>,
    sweep_interval: Duration,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("workers", &self.cancels.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        core: CoreScheduler,
        inbound_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        pipeline: Arc<PipelineContext>,
    ) -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let sweep_interval = pipeline.config.scheduler.sweep_interval;
        Self {
            core,
            inbound_rx,
            inbound_open: true,
            worker_tx,
            worker_rx,
            pipeline,
            cancels: HashMap::new(),
            sweep_interval,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from handles and workers.
    /// - Answers queries directly from the core.
    /// - Feeds lifecycle events into the core and executes its commands.
    pub async fn run(mut self) -> Result<()> {
        info!(
            max_concurrent = self.pipeline.config.scheduler.max_concurrent,
            "framewright scheduler started"
        );

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                biased;
                Some(event) = self.worker_rx.recv() => event,
                maybe = self.inbound_rx.recv(), if self.inbound_open => match maybe {
                    Some(event) => event,
                    None => {
                        info!("all scheduler handles dropped; shutting down");
                        self.inbound_open = false;
                        RuntimeEvent::Shutdown
                    }
                },
                _ = sweep.tick() => {
                    let step = self.core.step(CoreEvent::SweepTick, Instant::now());
                    self.execute(step);
                    continue;
                }
            };

            if !self.handle_event(event) {
                info!("scheduler idle after shutdown; stopping");
                break;
            }
        }

        info!("scheduler exiting");
        Ok(())
    }

    /// Returns whether the loop should keep running.
    fn handle_event(&mut self, event: RuntimeEvent) -> bool {
        let now = Instant::now();
        let step = match event {
            RuntimeEvent::Submit(request) => {
                debug!(job_id = %request.id, format = %request.format, "job submitted");
                self.core.step(CoreEvent::Submitted(request), now)
            }
            RuntimeEvent::Status { id, reply } => {
                let _ = reply.send(self.core.snapshot(id));
                return true;
            }
            RuntimeEvent::List { reply } => {
                let _ = reply.send(self.core.list());
                return true;
            }
            RuntimeEvent::Artifact { id, reply } => {
                let _ = reply.send(self.core.artifact(id));
                return true;
            }
            RuntimeEvent::Cancel { id, reply } => match self.core.cancel(id, now) {
                Some((outcome, step)) => {
                    let _ = reply.send(Some(outcome));
                    step
                }
                None => {
                    let _ = reply.send(None);
                    return true;
                }
            },
            RuntimeEvent::Progress { id, percent } => {
                self.core.step(CoreEvent::Progressed { id, percent }, now)
            }
            RuntimeEvent::Finished { id, result } => {
                self.cancels.remove(&id);
                self.core.step(CoreEvent::Finished { id, result }, now)
            }
            RuntimeEvent::Shutdown => {
                if self.core.is_shutting_down() {
                    return self.core.running() > 0;
                }
                self.core.step(CoreEvent::ShutdownRequested, now)
            }
        };

        let keep_running = step.keep_running;
        self.execute(step);
        keep_running
    }

    fn execute(&mut self, step: CoreStep) {
        for command in step.commands {
            match command {
                CoreCommand::Launch(launch) => self.spawn_worker(launch),
                CoreCommand::SignalCancel(id) => match self.cancels.get(&id) {
                    Some(trigger) => trigger.cancel(),
                    None => debug!(job_id = %id, "no worker to signal"),
                },
                CoreCommand::ReleaseWorkspaces(workspaces) => release_all(workspaces),
            }
        }
    }

    fn spawn_worker(&mut self, launch: JobLaunch) {
        let id = launch.id;
        let (trigger, signal) = cancel_pair();
        self.cancels.insert(id, trigger);

        let pipeline = Arc::clone(&self.pipeline);
        let progress = ProgressReporter::new(id, self.worker_tx.clone());
        let worker = tokio::spawn(async move { run_job(&pipeline, launch, signal, progress).await });

        // A panicking worker becomes that job's failure; nothing else is affected.
        let tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let result = match worker.await {
                Ok(result) => result,
                Err(err) => {
                    warn!(job_id = %id, error = %err, "render worker crashed");
                    Err(ClassifiedError::new(
                        ErrorKind::UnknownEngine,
                        ToolchainStage::Orchestration,
                        format!("render worker crashed: {err}"),
                    ))
                }
            };
            let _ = tx.send(RuntimeEvent::Finished { id, result });
        });

        debug!(job_id = %id, "render worker spawned");
    }
}

fn release_all(workspaces: Vec<Workspace>) {
    if workspaces.is_empty() {
        return;
    }
    tokio::task::spawn_blocking(move || {
        for workspace in workspaces {
            let job_id = workspace.job_id();
            if let Err(err) = workspace.close() {
                warn!(job_id = %job_id, error = %err, "failed to release workspace");
            }
        }
    });
}
