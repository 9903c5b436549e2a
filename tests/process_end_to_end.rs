// tests/process_end_to_end.rs
//
// Runs real subprocesses through the process backend, with `sh` scripts
// standing in for the renderer and encoder.

use std::error::Error;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;

use framewright::classify::ErrorKind;
use framewright::config::EngineConfig;
use framewright::engine::{CancelOutcome, JobState};
use framewright::service::{RenderService, SceneRequest};
use framewright::types::ToolchainStage;
use framewright_test_utils::builders::{EngineConfigBuilder, StageConfigBuilder};
use framewright_test_utils::{eventually, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const SCENE: &str = "class Intro(Scene):\n    def construct(self):\n        pass\n";
const POLL: Duration = Duration::from_millis(20);

/// Writes a file with a valid mp4 `ftyp` header to `$1.mp4`.
const WRITE_MP4: &str = r#"printf '\000\000\000\030ftypisom\000\000\002\000isomiso2' > "$1.mp4""#;

fn render_with(root: &Path, script: &str) -> EngineConfig {
    EngineConfigBuilder::new(root)
        .with_stage(
            "render",
            StageConfigBuilder::sh(script, &["{scene}"])
                .per_scene()
                .output("{scene}.{ext}")
                .timeout("20s")
                .build(),
        )
        .build()
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[tokio::test]
async fn shell_renderer_produces_streamable_artifact() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let service = RenderService::start(render_with(root.path(), WRITE_MP4))?;

    let id = service.submit(SceneRequest::new(SCENE))?;
    let snap = with_timeout(service.wait_for_terminal(id, POLL)).await?;
    assert_eq!(snap.state, JobState::Succeeded, "{:?}", snap.error);
    assert_eq!(snap.progress, 100);

    let handle = service.fetch(id, Some("bytes=4-7")).await?;
    assert_eq!(handle.status(), 206);
    assert_eq!(handle.content_length(), 4);
    let mut bytes = Vec::new();
    handle.into_reader().read_to_end(&mut bytes).await?;
    assert_eq!(bytes, b"ftyp");

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn stages_run_with_workspace_home_and_scratch_tmpdir() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let script = format!(
        "[ \"$(cd \"$HOME\" && pwd -P)\" = \"$(pwd -P)\" ] || {{ echo home >&2; exit 1; }}; \
         [ -d \"$TMPDIR\" ] || {{ echo tmpdir >&2; exit 1; }}; \
         [ \"$FW_MARK\" = on ] || {{ echo env >&2; exit 1; }}; \
         [ -f scene.py ] || {{ echo scene >&2; exit 1; }}; \
         {WRITE_MP4}"
    );
    let config = EngineConfigBuilder::new(root.path())
        .env("FW_MARK", "on")
        .with_stage(
            "render",
            StageConfigBuilder::sh(&script, &["{scene}"])
                .per_scene()
                .output("{scene}.{ext}")
                .build(),
        )
        .build();
    let service = RenderService::start(config)?;

    let id = service.submit(SceneRequest::new(SCENE))?;
    let snap = with_timeout(service.wait_for_terminal(id, POLL)).await?;
    assert_eq!(snap.state, JobState::Succeeded, "{:?}", snap.error);

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn syntax_error_is_input_error_and_workspace_is_removed() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let script = "echo 'Traceback (most recent call last):' >&2; \
                  echo '  File \"scene.py\", line 1' >&2; \
                  echo 'SyntaxError: invalid syntax' >&2; exit 1";
    let service = RenderService::start(render_with(root.path(), script))?;

    let id = service.submit(SceneRequest::new(SCENE))?;
    let snap = with_timeout(service.wait_for_terminal(id, POLL)).await?;
    let err = snap.error.unwrap();
    assert_eq!(err.kind, ErrorKind::Input);
    assert_eq!(err.stage, ToolchainStage::Rendering);
    assert!(err.detail.contains("SyntaxError"));
    assert!(dir_is_empty(root.path()));

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn missing_program_fails_readiness_and_job() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let config = EngineConfigBuilder::new(root.path())
        .required_program("sh")
        .required_program("framewright-no-such-tool")
        .with_stage(
            "render",
            StageConfigBuilder::new(&["framewright-no-such-tool", "{scene_file}"])
                .output("out.{ext}")
                .build(),
        )
        .build();
    let service = RenderService::start(config)?;

    let report = service.readiness();
    assert!(!report.healthy);
    let failing: Vec<_> = report.failures().map(|c| c.name.as_str()).collect();
    assert_eq!(failing, vec!["framewright-no-such-tool"]);

    let id = service.submit(SceneRequest::new(SCENE))?;
    let snap = with_timeout(service.wait_for_terminal(id, POLL)).await?;
    let err = snap.error.unwrap();
    assert_eq!(err.kind, ErrorKind::Environment);
    assert!(err.detail.contains("framewright-no-such-tool"));

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn readiness_checks_stage_programs_not_listed_as_required() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let config = EngineConfigBuilder::new(root.path())
        .required_program("sh")
        .with_stage(
            "render",
            StageConfigBuilder::new(&["framewright-no-such-tool", "{scene_file}"])
                .output("out.{ext}")
                .build(),
        )
        .build();
    let service = RenderService::start(config)?;

    let report = service.readiness();
    assert!(!report.healthy);
    let checked: Vec<_> = report.programs.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(checked, vec!["sh", "framewright-no-such-tool"]);
    let failing: Vec<_> = report.failures().map(|c| c.name.as_str()).collect();
    assert_eq!(failing, vec!["framewright-no-such-tool"]);

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn runaway_stage_is_killed_at_its_timeout() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let config = EngineConfigBuilder::new(root.path())
        .with_stage(
            "render",
            StageConfigBuilder::sh("sleep 30 & wait", &[])
                .output("out.{ext}")
                .timeout("300ms")
                .kill_grace("100ms")
                .build(),
        )
        .build();
    let service = RenderService::start(config)?;

    let started = Instant::now();
    let id = service.submit(SceneRequest::new(SCENE))?;
    let snap = with_timeout(service.wait_for_terminal(id, POLL)).await?;
    assert!(started.elapsed() < Duration::from_secs(5));
    let err = snap.error.unwrap();
    assert_eq!(err.kind, ErrorKind::Resource);
    assert!(err.detail.contains("time limit"));
    assert!(dir_is_empty(root.path()));

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn cancelling_real_process_stops_it() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let config = EngineConfigBuilder::new(root.path())
        .with_stage(
            "render",
            StageConfigBuilder::sh("touch started; sleep 30", &[])
                .output("out.{ext}")
                .timeout("1m")
                .kill_grace("100ms")
                .build(),
        )
        .build();
    let service = RenderService::start(config)?;

    let id = service.submit(SceneRequest::new(SCENE))?;
    let marker_exists = || {
        std::fs::read_dir(root.path())
            .into_iter()
            .flatten()
            .flatten()
            .any(|e| e.path().join("started").exists())
    };
    with_timeout(eventually(marker_exists)).await;

    let started = Instant::now();
    assert_eq!(service.cancel(id).await?, CancelOutcome::Signalled);
    let snap = with_timeout(service.wait_for_terminal(id, POLL)).await?;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(snap.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(dir_is_empty(root.path()));

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn non_video_output_is_corrupt_artifact() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let service = RenderService::start(render_with(root.path(), "echo hello > \"$1.mp4\""))?;

    let id = service.submit(SceneRequest::new(SCENE))?;
    let snap = with_timeout(service.wait_for_terminal(id, POLL)).await?;
    assert_eq!(snap.state, JobState::Failed);
    assert_eq!(snap.error.unwrap().kind, ErrorKind::CorruptArtifact);

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn encoder_failure_is_encoding_error() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let config = EngineConfigBuilder::new(root.path())
        .with_stage(
            "render",
            StageConfigBuilder::sh(WRITE_MP4, &["{scene}"])
                .per_scene()
                .output("{scene}.{ext}")
                .build(),
        )
        .with_stage(
            "encode",
            StageConfigBuilder::sh("echo 'Conversion failed!' >&2; exit 1", &[])
                .after("render")
                .encode()
                .output("{output_name}")
                .build(),
        )
        .build();
    let service = RenderService::start(config)?;

    let id = service.submit(SceneRequest::new(SCENE))?;
    let snap = with_timeout(service.wait_for_terminal(id, POLL)).await?;
    let err = snap.error.unwrap();
    assert_eq!(err.kind, ErrorKind::Encoding);
    assert_eq!(err.stage, ToolchainStage::Encoding);
    assert_eq!(err.step.as_deref(), Some("encode"));

    service.shutdown().await?;
    Ok(())
}
