// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::types::{OutputFormat, RunCondition, StageKind};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// max_concurrent = 2
/// retention = "15m"
///
/// [workspace]
/// root = "/var/tmp/framewright"
///
/// [engine]
/// required_programs = ["manim", "latex", "dvisvgm", "ffmpeg"]
///
/// [stage.render]
/// cmd = ["manim", "render", "-qm", "{scene_file}", "{scene}", "-o", "{scene}"]
/// per_scene = true
/// output = "media/videos/**/720p30/{scene}.{ext}"
/// timeout = "10m"
/// ```
///
/// All sections are optional. Without any `[stage.*]` table the built-in
/// manim + ffmpeg pipeline from [`default_stages`] is used.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub workspace: WorkspaceSection,

    #[serde(default)]
    pub engine: EngineSection,

    /// Pipeline steps from `[stage.<name>]`, keyed by step name.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Maximum number of concurrently running render jobs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long terminal jobs (and a succeeded job's workspace) are kept.
    #[serde(default = "default_retention")]
    pub retention: String,

    /// How often the coordinator looks for expired jobs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_retention() -> String {
    "15m".to_string()
}

fn default_sweep_interval() -> String {
    "30s".to_string()
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retention: default_retention(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// `[workspace]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSection {
    /// Parent directory of all job workspaces. Defaults to
    /// `$TMPDIR/framewright`.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Name prefix of each workspace directory.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Remove leftovers of a crashed previous process on startup.
    #[serde(default = "default_true")]
    pub sweep_stale_on_start: bool,
}

fn default_prefix() -> String {
    "fw-".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: None,
            prefix: default_prefix(),
            sweep_stale_on_start: true,
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Programs that must be present and executable for the readiness probe.
    #[serde(default = "default_required_programs")]
    pub required_programs: Vec<String>,

    /// File name the scene source is written to inside the workspace.
    #[serde(default = "default_scene_file")]
    pub scene_file: String,

    /// Regex whose first capture group names each scene in the source.
    #[serde(default = "default_scene_pattern")]
    pub scene_pattern: String,

    #[serde(default)]
    pub default_format: OutputFormat,

    /// Extra environment passed to every stage.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_required_programs() -> Vec<String> {
    ["manim", "latex", "dvisvgm", "ffmpeg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_scene_file() -> String {
    "scene.py".to_string()
}

fn default_scene_pattern() -> String {
    r"class\s+(\w+)\s*\(\s*\w*Scene\s*\)".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            required_programs: default_required_programs(),
            scene_file: default_scene_file(),
            scene_pattern: default_scene_pattern(),
            default_format: OutputFormat::default(),
            env: BTreeMap::new(),
        }
    }
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Command line template, one element per argument.
    pub cmd: Vec<String>,

    #[serde(default)]
    pub kind: StageKind,

    /// Steps that must have run before this one.
    #[serde(default)]
    pub after: Vec<String>,

    /// Run once per discovered scene, with `{scene}` bound.
    #[serde(default)]
    pub per_scene: bool,

    #[serde(default)]
    pub when: RunCondition,

    /// Glob (relative to the workspace) of the file this step produces.
    #[serde(default)]
    pub output: Option<String>,

    #[serde(default = "default_stage_timeout")]
    pub timeout: String,

    /// Address-space limit in MiB.
    #[serde(default)]
    pub max_memory_mb: Option<u64>,

    /// Per-stream cap on captured output.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default = "default_kill_grace")]
    pub kill_grace: String,
}

fn default_stage_timeout() -> String {
    "10m".to_string()
}

fn default_max_output_bytes() -> usize {
    256 * 1024
}

fn default_kill_grace() -> String {
    "2s".to_string()
}

impl StageConfig {
    pub fn new(cmd: &[&str]) -> Self {
        Self {
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            kind: StageKind::default(),
            after: Vec::new(),
            per_scene: false,
            when: RunCondition::default(),
            output: None,
            timeout: default_stage_timeout(),
            max_memory_mb: None,
            max_output_bytes: default_max_output_bytes(),
            kill_grace: default_kill_grace(),
        }
    }
}

/// The built-in pipeline: manim renders every scene at medium quality
/// (720p30), ffmpeg's concat demuxer joins them when there is more than one.
pub fn default_stages() -> BTreeMap<String, StageConfig> {
    let mut render = StageConfig::new(&[
        "manim",
        "render",
        "-qm",
        "--format",
        "{format}",
        "--media_dir",
        "{workspace}/media",
        "{scene_file}",
        "{scene}",
        "-o",
        "{scene}",
    ]);
    render.per_scene = true;
    render.output = Some("media/videos/**/720p30/{scene}.{ext}".to_string());

    let mut concat = StageConfig::new(&[
        "ffmpeg",
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
        "{concat_list}",
        "-c",
        "copy",
        "{output_name}",
    ]);
    concat.kind = StageKind::Encode;
    concat.after = vec!["render".to_string()];
    concat.when = RunCondition::MultiScene;
    concat.output = Some("{output_name}".to_string());
    concat.timeout = "5m".to_string();

    let mut stages = BTreeMap::new();
    stages.insert("render".to_string(), render);
    stages.insert("concat".to_string(), concat);
    stages
}

/// Validated scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
    pub retention: Duration,
    pub sweep_interval: Duration,
}

/// Validated workspace settings.
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub root: PathBuf,
    pub prefix: String,
    pub sweep_stale_on_start: bool,
}

/// Validated engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub required_programs: Vec<String>,
    pub scene_file: String,
    pub scene_pattern: Regex,
    pub default_format: OutputFormat,
    pub env: Vec<(String, String)>,
}

/// One validated pipeline step.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    pub cmd: Vec<String>,
    pub after: Vec<String>,
    pub per_scene: bool,
    pub when: RunCondition,
    pub output: Option<String>,
    pub timeout: Duration,
    pub max_memory_bytes: Option<u64>,
    pub max_output_bytes: usize,
    pub kill_grace: Duration,
}

impl StageSpec {
    pub fn limits(&self) -> crate::exec::ResourceLimits {
        crate::exec::ResourceLimits {
            timeout: self.timeout,
            max_memory_bytes: self.max_memory_bytes,
            max_output_bytes: self.max_output_bytes,
            kill_grace: self.kill_grace,
        }
    }

    pub fn uses_placeholder(&self, name: &str) -> bool {
        self.cmd
            .iter()
            .chain(self.output.iter())
            .any(|t| crate::exec::template::placeholders(t).contains(&name))
    }
}

/// Immutable, validated toolchain configuration handed to the service at
/// construction.
///
/// Build it with `EngineConfig::try_from(raw)` (see `validate.rs`); the
/// stages are stored in execution (topological) order.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scheduler: SchedulerSettings,
    pub workspace: WorkspaceSettings,
    pub engine: EngineSettings,
    pub stages: Vec<StageSpec>,
}

impl EngineConfig {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerSettings,
        workspace: WorkspaceSettings,
        engine: EngineSettings,
        stages: Vec<StageSpec>,
    ) -> Self {
        Self {
            scheduler,
            workspace,
            engine,
            stages,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Every program the pipeline depends on: `required_programs` followed by
    /// each stage's executable, without duplicates. A templated executable
    /// (`{workspace}/bin/tool`) is only known per job and is left out.
    pub fn toolchain_programs(&self) -> Vec<String> {
        let mut programs: Vec<String> = Vec::new();
        let stage_programs = self
            .stages
            .iter()
            .filter_map(|s| s.cmd.first())
            .filter(|program| crate::exec::template::placeholders(program).is_empty());
        for program in self.engine.required_programs.iter().chain(stage_programs) {
            if !programs.contains(program) {
                programs.push(program.clone());
            }
        }
        programs
    }
}
