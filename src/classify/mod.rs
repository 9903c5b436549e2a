// src/classify/mod.rs

//! Stage classifier.
//!
//! Converts a finished [`ToolchainInvocation`] into an [`Outcome`]. The
//! rendering toolchain is a pipeline of independent programs (typesetter,
//! renderer, encoder) that all report through the same stderr and exit code,
//! so a failure is attributed by an ordered set of rules:
//!
//! 0. cancelled invocation → `CancelledError`
//! 1. timeout, kill signal or memory exhaustion → `ResourceError`
//! 2. typesetting / scene syntax signature → `InputError`
//! 3. missing program or library → `EnvironmentError`
//! 4. encoder signature → `EncodingError`
//! 5. anything else non-zero → `UnknownEngineError` with the raw output

pub mod rules;

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::exec::{Termination, ToolchainInvocation};
use crate::types::{StageKind, ToolchainStage};

use rules::RULES;

/// Lines of raw output kept in an `UnknownEngineError` detail.
const RAW_TAIL_LINES: usize = 40;

/// Error taxonomy shared by classified job failures and service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "InputError")]
    Input,
    #[serde(rename = "ResourceError")]
    Resource,
    #[serde(rename = "EnvironmentError")]
    Environment,
    #[serde(rename = "EncodingError")]
    Encoding,
    #[serde(rename = "UnknownEngineError")]
    UnknownEngine,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "NotReadyError")]
    NotReady,
    #[serde(rename = "CorruptArtifactError")]
    CorruptArtifact,
    #[serde(rename = "CancelledError")]
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Input => "InputError",
            ErrorKind::Resource => "ResourceError",
            ErrorKind::Environment => "EnvironmentError",
            ErrorKind::Encoding => "EncodingError",
            ErrorKind::UnknownEngine => "UnknownEngineError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::NotReady => "NotReadyError",
            ErrorKind::CorruptArtifact => "CorruptArtifactError",
            ErrorKind::Cancelled => "CancelledError",
        }
    }

    /// Whether resubmitting the same request can reasonably succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Resource | ErrorKind::Encoding | ErrorKind::NotReady
        )
    }

    /// Whether the fix lies with the operator rather than the submitter.
    pub fn is_operator_fault(self) -> bool {
        matches!(self, ErrorKind::Environment | ErrorKind::UnknownEngine)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind-tagged failure attached to a job. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind} during {stage}: {detail}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub detail: String,
    pub stage: ToolchainStage,
    /// Configured pipeline step that was running, if any.
    pub step: Option<String>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, stage: ToolchainStage, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            stage,
            step: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, ToolchainStage::Orchestration, detail)
    }
}

/// Result of classifying one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(ClassifiedError),
}

/// Classify a finished invocation of a step of the given kind.
pub fn classify(invocation: &ToolchainInvocation, kind: StageKind) -> Outcome {
    let step = invocation.stage.as_str();
    let fallback_stage = kind.default_stage();

    let err = match &invocation.termination {
        Termination::Cancelled => ClassifiedError::cancelled(format!(
            "job cancelled while step '{step}' was running"
        )),
        Termination::TimedOut => ClassifiedError::new(
            ErrorKind::Resource,
            fallback_stage,
            format!(
                "step '{step}' exceeded its time limit after {:.1}s and was terminated",
                invocation.elapsed.as_secs_f64()
            ),
        ),
        Termination::SpawnFailed { not_found, message } => {
            let program = invocation.argv.first().map(String::as_str).unwrap_or("");
            let detail = if *not_found {
                format!("toolchain program '{program}' was not found: {message}")
            } else {
                format!("toolchain program '{program}' could not be started: {message}")
            };
            ClassifiedError::new(ErrorKind::Environment, fallback_stage, detail)
        }
        Termination::Exited => {
            if invocation.succeeded() {
                return Outcome::Success;
            }
            classify_exit(invocation, fallback_stage)
        }
    };

    debug!(step, kind = %err.kind, stage = %err.stage, "classified stage failure");
    Outcome::Failed(err.with_step(step))
}

fn classify_exit(invocation: &ToolchainInvocation, fallback_stage: ToolchainStage) -> ClassifiedError {
    let output = invocation.combined_output();
    let lines: Vec<&str> = output.lines().collect();
    let code = invocation.exit.and_then(|e| e.code);
    let signal = invocation.exit.and_then(|e| e.signal);

    // SIGKILL without our timeout firing: the kernel OOM killer or an
    // external supervisor.
    if signal == Some(nix::sys::signal::Signal::SIGKILL as i32) {
        return ClassifiedError::new(
            ErrorKind::Resource,
            fallback_stage,
            "engine was killed (SIGKILL), most likely for exceeding its memory limit",
        );
    }

    if let Some(err) = match_rules(&lines, fallback_stage) {
        return err;
    }

    // Shell conventions for "not executable" / "not found".
    if matches!(code, Some(126) | Some(127)) {
        return ClassifiedError::new(
            ErrorKind::Environment,
            fallback_stage,
            format!(
                "toolchain command exited with {} (program missing or not executable): {}",
                code.unwrap_or_default(),
                tail(&lines, 5)
            ),
        );
    }

    let status = match (code, signal) {
        (Some(c), _) => format!("exit code {c}"),
        (None, Some(s)) => format!("signal {s}"),
        (None, None) => "unknown status".to_string(),
    };
    ClassifiedError::new(
        ErrorKind::UnknownEngine,
        fallback_stage,
        format!(
            "engine failed with {status}; raw output:\n{}",
            tail(&lines, RAW_TAIL_LINES)
        ),
    )
}

fn match_rules(lines: &[&str], fallback_stage: ToolchainStage) -> Option<ClassifiedError> {
    for rule in RULES.iter() {
        if let Some(idx) = rule.first_match(lines) {
            let start = idx.saturating_sub(rule.context_before);
            let detail = lines[start..=idx]
                .iter()
                .map(|l| l.trim_end())
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            debug!(rule = rule.name, line = idx, "classifier rule matched");
            return Some(ClassifiedError::new(
                rule.kind,
                rule.stage.unwrap_or(fallback_stage),
                detail,
            ));
        }
    }
    None
}

fn tail(lines: &[&str], n: usize) -> String {
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::exec::{CapturedStream, ExitInfo};

    fn exited(code: i32, stderr: &str) -> ToolchainInvocation {
        ToolchainInvocation {
            stage: "render".to_string(),
            argv: vec!["manim".to_string()],
            termination: Termination::Exited,
            exit: Some(ExitInfo {
                code: Some(code),
                signal: None,
            }),
            stdout: CapturedStream::default(),
            stderr: CapturedStream::from_text(stderr),
            elapsed: Duration::from_millis(10),
        }
    }

    fn failed(outcome: Outcome) -> ClassifiedError {
        match outcome {
            Outcome::Failed(e) => e,
            Outcome::Success => panic!("expected failure"),
        }
    }

    #[test]
    fn zero_exit_is_success() {
        assert_eq!(classify(&exited(0, ""), StageKind::Render), Outcome::Success);
    }

    #[test]
    fn timeout_wins_over_output_signatures() {
        let mut inv = exited(1, "SyntaxError: invalid syntax");
        inv.termination = Termination::TimedOut;
        inv.exit = None;
        let err = failed(classify(&inv, StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Resource);
        assert_eq!(err.step.as_deref(), Some("render"));
    }

    #[test]
    fn latex_error_is_input_in_typesetting() {
        let stderr = "Writing \"\\frac{1}{\" to tex file\n! Missing } inserted.\nlatex error converting to dvi. See log output above";
        let err = failed(classify(&exited(1, stderr), StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Input);
        assert_eq!(err.stage, ToolchainStage::Typesetting);
        assert!(err.detail.contains("Missing } inserted"));
    }

    #[test]
    fn python_syntax_error_quotes_context() {
        let stderr = "Traceback (most recent call last):\n  File \"scene.py\", line 4\n    class Broken(Scene)\n                       ^\nSyntaxError: expected ':'";
        let err = failed(classify(&exited(1, stderr), StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Input);
        assert!(err.detail.contains("SyntaxError: expected ':'"));
        assert!(err.detail.contains("line 4"));
    }

    #[test]
    fn typesetting_beats_encoder_signature() {
        let stderr = "! Undefined control sequence.\nConversion failed!";
        let err = failed(classify(&exited(1, stderr), StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Input);
    }

    #[test]
    fn missing_latex_is_environment() {
        let stderr = "FileNotFoundError: [Errno 2] No such file or directory: 'latex'";
        let err = failed(classify(&exited(1, stderr), StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Environment);
    }

    #[test]
    fn exit_127_is_environment() {
        let err = failed(classify(&exited(127, "sh: 1: something odd"), StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Environment);
    }

    #[test]
    fn spawn_failure_is_environment() {
        let mut inv = exited(0, "");
        inv.exit = None;
        inv.termination = Termination::SpawnFailed {
            not_found: true,
            message: "No such file or directory (os error 2)".to_string(),
        };
        let err = failed(classify(&inv, StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Environment);
        assert!(err.detail.contains("manim"));
    }

    #[test]
    fn ffmpeg_failure_is_encoding() {
        let stderr = "[concat @ 0x55] Impossible to open 'a.mp4'\nconcat.txt: No such file or directory";
        let err = failed(classify(&exited(1, stderr), StageKind::Encode));
        assert_eq!(err.kind, ErrorKind::Encoding);
        assert_eq!(err.stage, ToolchainStage::Encoding);
    }

    #[test]
    fn unmatched_failure_keeps_raw_output() {
        let err = failed(classify(&exited(2, "something went sideways"), StageKind::Render));
        assert_eq!(err.kind, ErrorKind::UnknownEngine);
        assert!(err.detail.contains("exit code 2"));
        assert!(err.detail.contains("something went sideways"));
    }

    #[test]
    fn sigkill_without_timeout_is_resource() {
        let mut inv = exited(0, "");
        inv.exit = Some(ExitInfo {
            code: None,
            signal: Some(9),
        });
        let err = failed(classify(&inv, StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Resource);
    }

    #[test]
    fn cancelled_is_cancelled() {
        let mut inv = exited(0, "");
        inv.termination = Termination::Cancelled;
        let err = failed(classify(&inv, StageKind::Render));
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn fault_attribution() {
        assert!(ErrorKind::Resource.is_retryable());
        assert!(!ErrorKind::Input.is_retryable());
        assert!(ErrorKind::Environment.is_operator_fault());
        assert!(!ErrorKind::Input.is_operator_fault());
        assert_eq!(ErrorKind::CorruptArtifact.to_string(), "CorruptArtifactError");
    }
}
