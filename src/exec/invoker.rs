// src/exec/invoker.rs

//! Runs a single toolchain stage as a constrained subprocess.

use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exec::cancel::CancelSignal;
use crate::exec::capture::{CapturedStream, drain_capped};
use crate::exec::{ExitInfo, InvocationRequest, Termination, ToolchainInvocation};

/// How long to wait for the stream readers once the process group is gone.
const READER_DRAIN_WINDOW: Duration = Duration::from_secs(2);

/// Run one stage and return its invocation record.
///
/// - stdin is closed; stdout and stderr are captured up to
///   `limits.max_output_bytes` each.
/// - The child leads a fresh process group so that typesetting and encoder
///   helpers it spawns can be stopped together.
/// - On timeout or cancellation the group receives SIGTERM, then SIGKILL after
///   `limits.kill_grace`.
///
/// A non-zero exit is *not* an error here; it is recorded for the classifier.
pub async fn run(request: &InvocationRequest, cancel: &mut CancelSignal) -> ToolchainInvocation {
    let started = Instant::now();

    info!(
        stage = %request.stage,
        cwd = %request.cwd.display(),
        argv = ?request.argv,
        "starting toolchain stage"
    );

    let mut child = match spawn(request) {
        Ok(child) => child,
        Err(err) => {
            warn!(
                stage = %request.stage,
                program = request.argv.first().map(String::as_str).unwrap_or(""),
                error = %err,
                "failed to spawn toolchain stage"
            );
            return ToolchainInvocation {
                stage: request.stage.clone(),
                argv: request.argv.clone(),
                termination: Termination::SpawnFailed {
                    not_found: err.kind() == io::ErrorKind::NotFound,
                    message: err.to_string(),
                },
                exit: None,
                stdout: CapturedStream::default(),
                stderr: CapturedStream::default(),
                elapsed: started.elapsed(),
            };
        }
    };

    let pgid = child.id().map(|id| Pid::from_raw(id as i32));
    let group = GroupKill { pgid };
    let limit = request.limits.max_output_bytes;
    let stdout_reader = child
        .stdout
        .take()
        .map(|out| tokio::spawn(drain_capped(out, limit)));
    let stderr_reader = child
        .stderr
        .take()
        .map(|err| tokio::spawn(drain_capped(err, limit)));

    // Either the process exits on its own, the timeout elapses, or the
    // coordinator asks us to stop.
    let (termination, status) = tokio::select! {
        status = child.wait() => (Termination::Exited, status.ok()),
        _ = tokio::time::sleep(request.limits.timeout) => {
            warn!(
                stage = %request.stage,
                timeout_ms = request.limits.timeout.as_millis() as u64,
                "stage exceeded its timeout; terminating process group"
            );
            let status = terminate_group(&mut child, pgid, request.limits.kill_grace).await;
            (Termination::TimedOut, status)
        }
        _ = cancel.cancelled() => {
            info!(stage = %request.stage, "cancellation requested; terminating process group");
            let status = terminate_group(&mut child, pgid, request.limits.kill_grace).await;
            (Termination::Cancelled, status)
        }
    };

    // The leader is gone; anything still in its group would hold our pipes
    // open (and outlive the workspace).
    drop(group);

    let stdout = collect(stdout_reader).await;
    let stderr = collect(stderr_reader).await;
    let exit = status.map(exit_info);

    info!(
        stage = %request.stage,
        termination = ?termination,
        exit_code = exit.and_then(|e| e.code),
        signal = exit.and_then(|e| e.signal),
        elapsed_ms = started.elapsed().as_millis() as u64,
        stderr_truncated = stderr.truncated,
        "toolchain stage finished"
    );

    ToolchainInvocation {
        stage: request.stage.clone(),
        argv: request.argv.clone(),
        termination,
        exit,
        stdout,
        stderr,
        elapsed: started.elapsed(),
    }
}

fn spawn(request: &InvocationRequest) -> io::Result<Child> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

    let scratch = request.cwd.join("tmp");
    std::fs::create_dir_all(&scratch)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&request.cwd)
        .env("HOME", &request.cwd)
        .env("TMPDIR", &scratch)
        .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);

    if let Some(bytes) = request.limits.max_memory_bytes {
        // SAFETY: setrlimit is async-signal-safe and touches no shared state.
        unsafe {
            cmd.pre_exec(move || {
                nix::sys::resource::setrlimit(
                    nix::sys::resource::Resource::RLIMIT_AS,
                    bytes,
                    bytes,
                )
                .map_err(io::Error::from)
            });
        }
    }

    cmd.spawn()
}

/// SIGTERM the group, give it `grace` to exit, then SIGKILL.
async fn terminate_group(
    child: &mut Child,
    pgid: Option<Pid>,
    grace: Duration,
) -> Option<std::process::ExitStatus> {
    let Some(pgid) = pgid else {
        return child.wait().await.ok();
    };

    signal_group(pgid, Signal::SIGTERM);
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status.ok();
    }

    debug!(pgid = pgid.as_raw(), "process group ignored SIGTERM; sending SIGKILL");
    signal_group(pgid, Signal::SIGKILL);
    child.wait().await.ok()
}

/// SIGKILLs the whole process group when dropped, including when the `run`
/// future itself is dropped mid-flight. `kill_on_drop` alone only reaches the
/// leader.
struct GroupKill {
    pgid: Option<Pid>,
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid {
            signal_group(pgid, Signal::SIGKILL);
        }
    }
}

fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pgid.as_raw(), ?signal, error = %e, "failed to signal process group"),
    }
}

async fn collect(reader: Option<JoinHandle<CapturedStream>>) -> CapturedStream {
    let Some(handle) = reader else {
        return CapturedStream::default();
    };
    let abort = handle.abort_handle();
    match tokio::time::timeout(READER_DRAIN_WINDOW, handle).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(error = %e, "output reader task failed");
            CapturedStream::default()
        }
        Err(_) => {
            // A process outside our group inherited the pipe.
            abort.abort();
            warn!("output reader did not reach EOF; capture abandoned");
            CapturedStream::default()
        }
    }
}

#[cfg(unix)]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    use std::os::unix::process::ExitStatusExt;
    ExitInfo {
        code: status.code(),
        signal: status.signal(),
    }
}
