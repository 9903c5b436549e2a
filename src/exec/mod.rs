// src/exec/mod.rs

//! Toolchain invocation layer.
//!
//! This module is responsible for actually running the rendering engine, using
//! `tokio::process::Command`, and handing back a [`ToolchainInvocation`]
//! record for the classifier.
//!
//! - [`invoker`] spawns one stage in its own process group, with closed stdin,
//!   capped output capture, an address-space limit, and timeout/cancel
//!   handling that takes down the whole group.
//! - [`capture`] holds the bounded stdout/stderr sink.
//! - [`cancel`] is the cooperative cancel signal a worker listens on.
//! - [`template`] expands `{placeholder}`s in stage command lines.
//! - [`backend`] provides the `ToolchainBackend` trait and the
//!   `ProcessBackend` used in production, which tests replace with a fake.

pub mod backend;
pub mod cancel;
pub mod capture;
pub mod invoker;
pub mod template;

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub use backend::{ProcessBackend, ToolchainBackend};
pub use cancel::{CancelSignal, CancelTrigger, cancel_pair};
pub use capture::CapturedStream;

/// Limits applied to one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub timeout: Duration,
    /// Address-space limit (`RLIMIT_AS`) applied to the process group leader
    /// and inherited by its children.
    pub max_memory_bytes: Option<u64>,
    /// Per stream cap for captured stdout/stderr.
    pub max_output_bytes: usize,
    /// Time between SIGTERM and SIGKILL when the group must be stopped.
    pub kill_grace: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_memory_bytes: None,
            max_output_bytes: 256 * 1024,
            kill_grace: Duration::from_secs(2),
        }
    }
}

/// A fully expanded stage execution request.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Configured step name (e.g. `"render"`), for logs and attribution.
    pub stage: String,
    pub argv: Vec<String>,
    /// Working directory; always the job's workspace.
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub limits: ResourceLimits,
}

/// How the invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Termination {
    /// The process exited (or was signalled) on its own.
    Exited,
    /// The timeout elapsed and the process group was killed.
    TimedOut,
    /// Cancellation was requested and the process group was killed.
    Cancelled,
    /// The program could not be started at all.
    SpawnFailed { not_found: bool, message: String },
}

/// Exit status as seen by the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Record of one subprocess execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolchainInvocation {
    pub stage: String,
    pub argv: Vec<String>,
    pub termination: Termination,
    pub exit: Option<ExitInfo>,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    pub elapsed: Duration,
}

impl ToolchainInvocation {
    /// True only for a natural exit with status 0.
    pub fn succeeded(&self) -> bool {
        self.termination == Termination::Exited
            && self.exit.map(|e| e.success()).unwrap_or(false)
    }

    /// stderr followed by stdout; the engine reports some errors on stdout.
    pub fn combined_output(&self) -> String {
        let mut out = self.stderr.text.clone();
        if !self.stdout.text.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stdout.text);
        }
        out
    }
}
