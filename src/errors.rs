// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::classify::{ClassifiedError, ErrorKind};
use crate::types::JobId;
use crate::workspace::WorkspaceError;

#[derive(Error, Debug)]
pub enum FramewrightError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in stage graph: {0}")]
    StageCycle(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {id} is not ready (state: {state})")]
    NotReady { id: JobId, state: String },

    #[error("Requested range not satisfiable (artifact is {size} bytes)")]
    RangeNotSatisfiable { size: u64 },

    #[error(transparent)]
    Job(#[from] ClassifiedError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("Scheduler is not running")]
    SchedulerClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FramewrightError {
    /// Map to the shared error taxonomy, e.g. for an HTTP status code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FramewrightError::JobNotFound(_) => ErrorKind::NotFound,
            FramewrightError::NotReady { .. } => ErrorKind::NotReady,
            FramewrightError::RangeNotSatisfiable { .. } => ErrorKind::Input,
            FramewrightError::Job(err) => err.kind,
            FramewrightError::Workspace(_) => ErrorKind::Resource,
            FramewrightError::ConfigError(_)
            | FramewrightError::IoError(_)
            | FramewrightError::TomlError(_)
            | FramewrightError::StageCycle(_)
            | FramewrightError::SchedulerClosed => ErrorKind::Environment,
            FramewrightError::Other(_) => ErrorKind::UnknownEngine,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FramewrightError>;
