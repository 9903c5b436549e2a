// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::OutputFormat;

/// Command-line arguments for `framewright`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "framewright",
    version,
    about = "Render animation scenes through an external toolchain with bounded, isolated jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// A missing file means the built-in manim + ffmpeg pipeline.
    #[arg(long, value_name = "PATH", default_value = "Framewright.toml", global = true)]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FRAMEWRIGHT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the stage plan, but don't execute anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Render a scene file and write the video next to it (or to `--out`).
    Render {
        /// Scene source file.
        #[arg(value_name = "SCENE")]
        scene: PathBuf,

        /// Output container; defaults to `[engine].default_format`.
        #[arg(long, value_parser = parse_format)]
        format: Option<OutputFormat>,

        /// Where to write the rendered video.
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Verify that the required toolchain programs are installed.
    Check,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse()
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
