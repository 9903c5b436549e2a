#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use framewright::config::{
    EngineConfig, EngineSection, RawConfigFile, SchedulerSection, StageConfig, WorkspaceSection,
};
use framewright::types::{RunCondition, StageKind};

/// Builder for `EngineConfig` to simplify test setup.
///
/// Starts with no required programs and no stages; `build` panics if the
/// result does not validate.
pub struct EngineConfigBuilder {
    config: RawConfigFile,
}

impl EngineConfigBuilder {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            config: RawConfigFile {
                scheduler: SchedulerSection {
                    max_concurrent: 2,
                    retention: "10m".to_string(),
                    sweep_interval: "50ms".to_string(),
                },
                workspace: WorkspaceSection {
                    root: Some(workspace_root.to_path_buf()),
                    ..WorkspaceSection::default()
                },
                engine: EngineSection {
                    required_programs: Vec::new(),
                    ..EngineSection::default()
                },
                stage: BTreeMap::new(),
            },
        }
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.scheduler.max_concurrent = n;
        self
    }

    pub fn retention(mut self, d: &str) -> Self {
        self.config.scheduler.retention = d.to_string();
        self
    }

    pub fn sweep_interval(mut self, d: &str) -> Self {
        self.config.scheduler.sweep_interval = d.to_string();
        self
    }

    pub fn required_program(mut self, name: &str) -> Self {
        self.config.engine.required_programs.push(name.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.config
            .engine
            .env
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> EngineConfig {
        EngineConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(cmd: &[&str]) -> Self {
        Self {
            stage: StageConfig::new(cmd),
        }
    }

    /// `sh -c <script>` with `$0` = `sh` and the given extra args.
    pub fn sh(script: &str, args: &[&str]) -> Self {
        let mut cmd = vec!["sh", "-c", script, "sh"];
        cmd.extend_from_slice(args);
        Self::new(&cmd)
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.stage.after.push(dep.to_string());
        self
    }

    pub fn encode(mut self) -> Self {
        self.stage.kind = StageKind::Encode;
        self
    }

    pub fn per_scene(mut self) -> Self {
        self.stage.per_scene = true;
        self
    }

    pub fn multi_scene_only(mut self) -> Self {
        self.stage.when = RunCondition::MultiScene;
        self
    }

    pub fn output(mut self, glob: &str) -> Self {
        self.stage.output = Some(glob.to_string());
        self
    }

    pub fn timeout(mut self, d: &str) -> Self {
        self.stage.timeout = d.to_string();
        self
    }

    pub fn kill_grace(mut self, d: &str) -> Self {
        self.stage.kill_grace = d.to_string();
        self
    }

    pub fn max_memory_mb(mut self, mb: u64) -> Self {
        self.stage.max_memory_mb = Some(mb);
        self
    }

    pub fn max_output_bytes(mut self, n: usize) -> Self {
        self.stage.max_output_bytes = n;
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}
