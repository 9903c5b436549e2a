// src/config/mod.rs

//! Configuration loading and validation for framewright.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it into an immutable [`EngineConfig`] (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    EngineConfig, EngineSection, EngineSettings, RawConfigFile, SchedulerSection,
    SchedulerSettings, StageConfig, StageSpec, WorkspaceSection, WorkspaceSettings,
    default_stages,
};
pub use validate::validate_config;
