// src/lib.rs

pub mod artifact;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod pipeline;
pub mod service;
pub mod types;
pub mod workspace;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::EngineConfig;
use crate::config::loader::load_or_default;
use crate::engine::JobState;
use crate::service::{RenderService, SceneRequest};
use crate::types::{OutputFormat, RunCondition};

pub use crate::errors::{FramewrightError, Result as FramewrightResult};

/// How often the CLI polls a running job.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the render service (scheduler + workers)
/// - Ctrl-C handling for `render`
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    match args.command {
        Command::Check => check(cfg),
        Command::Render { scene, format, out } => render_file(cfg, &scene, format, out).await,
    }
}

fn check(cfg: EngineConfig) -> Result<()> {
    let report = service::check_programs(&cfg.toolchain_programs());
    for program in &report.programs {
        match &program.path {
            Some(path) => println!("{:<12} {:?} ({})", program.name, program.status, path.display()),
            None => println!("{:<12} {:?}", program.name, program.status),
        }
    }
    if !report.healthy {
        bail!("toolchain is not ready");
    }
    println!("toolchain ready");
    Ok(())
}

async fn render_file(
    cfg: EngineConfig,
    scene: &Path,
    format: Option<OutputFormat>,
    out: Option<PathBuf>,
) -> Result<()> {
    let source = tokio::fs::read_to_string(scene)
        .await
        .with_context(|| format!("reading scene file {}", scene.display()))?;
    let format = format.unwrap_or(cfg.engine.default_format);
    let out = out.unwrap_or_else(|| default_output_path(scene, format));

    let service = RenderService::start(cfg)?;
    let rendered = render_to(&service, source, format, &out).await;
    finish(&service, rendered).await
}

/// Submit one scene, wait for it, and copy the artifact to `out`.
async fn render_to(
    service: &RenderService,
    source: String,
    format: OutputFormat,
    out: &Path,
) -> Result<()> {
    let readiness = service.readiness();
    if !readiness.healthy {
        let missing: Vec<_> = readiness.failures().map(|p| p.name.as_str()).collect();
        warn!(?missing, "toolchain incomplete; the render will likely fail");
    }

    let id = service.submit(SceneRequest::new(source).with_format(format))?;
    info!(job_id = %id, "job submitted");

    let snapshot = loop {
        tokio::select! {
            snapshot = service.wait_for_terminal(id, POLL_INTERVAL) => break snapshot?,
            res = tokio::signal::ctrl_c() => {
                res.context("listening for Ctrl+C")?;
                info!(job_id = %id, "interrupted; cancelling job");
                service.cancel(id).await?;
            }
        }
    };

    match snapshot.state {
        JobState::Succeeded => {
            let handle = service.fetch(id, None).await?;
            let mut reader = handle.into_reader();
            let mut file = tokio::fs::File::create(out)
                .await
                .with_context(|| format!("creating {}", out.display()))?;
            let written = tokio::io::copy(&mut reader, &mut file)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            debug!(bytes = written, "artifact copied");
            println!("{}", out.display());
            Ok(())
        }
        _ => match snapshot.error {
            Some(err) => Err(anyhow::Error::new(err).context("render failed")),
            None => Err(anyhow::anyhow!("render ended in state {}", snapshot.state)),
        },
    }
}

/// Shut the service down whatever the render returned. The render error, if
/// any, wins over a shutdown error.
async fn finish(service: &RenderService, rendered: Result<()>) -> Result<()> {
    let shutdown = service.shutdown().await;
    match (rendered, shutdown) {
        (Err(err), Err(shutdown_err)) => {
            warn!(error = %shutdown_err, "shutdown after failed render also failed");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(()), shutdown) => shutdown.map_err(anyhow::Error::new),
    }
}

fn default_output_path(scene: &Path, format: OutputFormat) -> PathBuf {
    let stem = scene
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "render".to_string());
    PathBuf::from(format!("{stem}.{}", format.extension()))
}

/// Simple dry-run output: print settings and the stage plan.
fn print_dry_run(cfg: &EngineConfig) {
    println!("framewright dry-run");
    println!("  scheduler.max_concurrent = {}", cfg.scheduler.max_concurrent);
    println!("  scheduler.retention = {:?}", cfg.scheduler.retention);
    println!("  workspace.root = {}", cfg.workspace.root.display());
    println!("  engine.scene_file = {}", cfg.engine.scene_file);
    println!("  engine.default_format = {}", cfg.engine.default_format);
    println!("  engine.required_programs = {:?}", cfg.engine.required_programs);
    println!();

    println!("stages ({}):", cfg.stages.len());
    for stage in &cfg.stages {
        println!("  - {}", stage.name);
        println!("      cmd: {}", stage.cmd.join(" "));
        if !stage.after.is_empty() {
            println!("      after: {:?}", stage.after);
        }
        if stage.per_scene {
            println!("      per_scene: true");
        }
        if stage.when == RunCondition::MultiScene {
            println!("      when: multi_scene");
        }
        if let Some(ref output) = stage.output {
            println!("      output: {output}");
        }
        println!("      timeout: {:?}", stage.timeout);
        if let Some(bytes) = stage.max_memory_bytes {
            println!("      max_memory: {} MiB", bytes / (1024 * 1024));
        }
    }

    debug!("dry-run complete (no execution)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawConfigFile;

    fn sh_config(root: &Path) -> EngineConfig {
        let raw: RawConfigFile = toml::from_str(&format!(
            r#"
            [workspace]
            root = "{}"

            [engine]
            required_programs = ["sh"]

            [stage.render]
            cmd = ["sh", "-c", "printf '\\000\\000\\000\\030ftypisom\\000\\000\\002\\000isomiso2' > \"$1.mp4\"", "sh", "{{scene}}"]
            per_scene = true
            output = "{{scene}}.{{ext}}"
            "#,
            root.display()
        ))
        .unwrap();
        EngineConfig::try_from(raw).unwrap()
    }

    const SCENE: &str = "class Intro(Scene):\n    pass\n";

    #[tokio::test]
    async fn failed_copy_still_shuts_the_service_down() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("jobs");
        let service = RenderService::start(sh_config(&root)).unwrap();

        let out = dir.path().join("missing-dir").join("intro.mp4");
        let rendered = render_to(&service, SCENE.to_string(), OutputFormat::Mp4, &out).await;
        assert!(rendered.is_err());

        let err = finish(&service, rendered).await.unwrap_err();
        assert!(format!("{err:#}").contains("creating"));
        assert!(service.scheduler().is_closed());
    }

    #[tokio::test]
    async fn successful_render_is_copied_and_service_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let service = RenderService::start(sh_config(&dir.path().join("jobs"))).unwrap();

        let out = dir.path().join("intro.mp4");
        let rendered = render_to(&service, SCENE.to_string(), OutputFormat::Mp4, &out).await;
        finish(&service, rendered).await.unwrap();

        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
        assert!(service.scheduler().is_closed());
    }
}
