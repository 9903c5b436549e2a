// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{
    EngineConfig, EngineSettings, RawConfigFile, SchedulerSettings, StageConfig, StageSpec,
    WorkspaceSettings, default_stages,
};
use crate::errors::{FramewrightError, Result};
use crate::exec::template::{KNOWN_PLACEHOLDERS, placeholders};
use crate::types::RunCondition;

impl TryFrom<RawConfigFile> for EngineConfig {
    type Error = FramewrightError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let stages = if raw.stage.is_empty() {
            default_stages()
        } else {
            raw.stage
        };

        let scheduler = validate_scheduler(&raw.scheduler)?;
        let workspace = validate_workspace(raw.workspace)?;
        let engine = validate_engine(raw.engine)?;

        validate_stage_dependencies(&stages)?;
        let order = stage_order(&stages)?;

        let mut specs = Vec::with_capacity(order.len());
        for name in order {
            // `order` only contains keys of `stages`.
            if let Some(stage) = stages.get(&name) {
                specs.push(build_stage(&name, stage)?);
            }
        }
        validate_placeholders(&specs)?;
        validate_outputs(&specs)?;

        Ok(EngineConfig::new_unchecked(
            scheduler, workspace, engine, specs,
        ))
    }
}

/// Run the semantic checks on a raw config without keeping the result.
pub fn validate_config(raw: &RawConfigFile) -> Result<()> {
    EngineConfig::try_from(raw.clone()).map(|_| ())
}

fn config_err(msg: impl Into<String>) -> FramewrightError {
    FramewrightError::ConfigError(msg.into())
}

fn duration_field(section: &str, key: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value).map_err(|e| config_err(format!("{section}.{key}: {e}")))
}

fn validate_scheduler(
    section: &crate::config::model::SchedulerSection,
) -> Result<SchedulerSettings> {
    if section.max_concurrent == 0 {
        return Err(config_err(
            "[scheduler].max_concurrent must be >= 1 (got 0)",
        ));
    }

    let retention = duration_field("[scheduler]", "retention", &section.retention)?;
    let sweep_interval = duration_field("[scheduler]", "sweep_interval", &section.sweep_interval)?;
    if sweep_interval.is_zero() {
        return Err(config_err("[scheduler].sweep_interval must be non-zero"));
    }

    Ok(SchedulerSettings {
        max_concurrent: section.max_concurrent,
        retention,
        sweep_interval,
    })
}

fn validate_workspace(
    section: crate::config::model::WorkspaceSection,
) -> Result<WorkspaceSettings> {
    if section.prefix.is_empty() || section.prefix.contains('/') {
        return Err(config_err(format!(
            "[workspace].prefix must be a non-empty file name prefix (got '{}')",
            section.prefix
        )));
    }

    let root = section
        .root
        .unwrap_or_else(|| std::env::temp_dir().join("framewright"));

    Ok(WorkspaceSettings {
        root,
        prefix: section.prefix,
        sweep_stale_on_start: section.sweep_stale_on_start,
    })
}

fn validate_engine(section: crate::config::model::EngineSection) -> Result<EngineSettings> {
    let scene_file = section.scene_file.trim().to_string();
    if scene_file.is_empty() || scene_file.contains('/') || scene_file == ".." {
        return Err(config_err(format!(
            "[engine].scene_file must be a plain file name (got '{}')",
            section.scene_file
        )));
    }

    let scene_pattern = Regex::new(&section.scene_pattern).map_err(|e| {
        config_err(format!("[engine].scene_pattern is not a valid regex: {e}"))
    })?;
    if scene_pattern.captures_len() < 2 {
        return Err(config_err(
            "[engine].scene_pattern needs a capture group for the scene name",
        ));
    }

    Ok(EngineSettings {
        required_programs: section.required_programs,
        scene_file,
        scene_pattern,
        default_format: section.default_format,
        env: section.env.into_iter().collect(),
    })
}

fn validate_stage_dependencies(stages: &BTreeMap<String, StageConfig>) -> Result<()> {
    for (name, stage) in stages.iter() {
        if stage.cmd.is_empty() || stage.cmd[0].trim().is_empty() {
            return Err(config_err(format!(
                "stage '{name}' has an empty `cmd`"
            )));
        }
        for dep in stage.after.iter() {
            if !stages.contains_key(dep) {
                return Err(config_err(format!(
                    "stage '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(config_err(format!(
                    "stage '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Execution order of the stages.
///
/// Edge direction is dep -> stage, so a topological sort yields an order in
/// which every stage comes after everything it lists in `after`.
fn stage_order(stages: &BTreeMap<String, StageConfig>) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in stages.keys() {
        graph.add_node(name.as_str());
    }

    for (name, stage) in stages.iter() {
        for dep in stage.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(FramewrightError::StageCycle(format!(
            "cycle detected in stage graph involving stage '{}'",
            cycle.node_id()
        ))),
    }
}

fn build_stage(name: &str, stage: &StageConfig) -> Result<StageSpec> {
    let section = format!("[stage.{name}]");
    let timeout = duration_field(&section, "timeout", &stage.timeout)?;
    if timeout.is_zero() {
        return Err(config_err(format!("{section}.timeout must be non-zero")));
    }
    let kill_grace = duration_field(&section, "kill_grace", &stage.kill_grace)?;

    if stage.max_output_bytes == 0 {
        return Err(config_err(format!(
            "{section}.max_output_bytes must be >= 1"
        )));
    }

    let max_memory_bytes = match stage.max_memory_mb {
        None => None,
        Some(0) => {
            return Err(config_err(format!("{section}.max_memory_mb must be >= 1")));
        }
        Some(mb) => Some(mb.checked_mul(1024 * 1024).ok_or_else(|| {
            config_err(format!("{section}.max_memory_mb is too large ({mb})"))
        })?),
    };

    Ok(StageSpec {
        name: name.to_string(),
        kind: stage.kind,
        cmd: stage.cmd.clone(),
        after: stage.after.clone(),
        per_scene: stage.per_scene,
        when: stage.when,
        output: stage.output.clone(),
        timeout,
        max_memory_bytes,
        max_output_bytes: stage.max_output_bytes,
        kill_grace,
    })
}

/// Every placeholder must be known, `{scene}` needs a per-scene stage, and
/// `{concat_list}` needs an earlier per-scene stage whose outputs it lists.
fn validate_placeholders(specs: &[StageSpec]) -> Result<()> {
    for (idx, spec) in specs.iter().enumerate() {
        let templates = spec.cmd.iter().chain(spec.output.iter());
        for template in templates {
            for key in placeholders(template) {
                if !KNOWN_PLACEHOLDERS.contains(&key) {
                    return Err(config_err(format!(
                        "stage '{}' uses unknown placeholder '{{{}}}' (known: {})",
                        spec.name,
                        key,
                        KNOWN_PLACEHOLDERS.join(", ")
                    )));
                }
            }
        }

        if spec.uses_placeholder("scene") && !spec.per_scene {
            return Err(config_err(format!(
                "stage '{}' uses '{{scene}}' but is not `per_scene`",
                spec.name
            )));
        }

        if spec.uses_placeholder("concat_list") {
            let has_source = specs[..idx]
                .iter()
                .any(|s| s.per_scene && s.output.is_some());
            if !has_source {
                return Err(config_err(format!(
                    "stage '{}' uses '{{concat_list}}' but no earlier per_scene stage declares an `output`",
                    spec.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_outputs(specs: &[StageSpec]) -> Result<()> {
    let last = specs
        .last()
        .ok_or_else(|| config_err("config must contain at least one [stage.<name>] section"))?;

    if last.output.is_none() {
        return Err(config_err(format!(
            "final stage '{}' must declare an `output` glob",
            last.name
        )));
    }

    let always_output = specs
        .iter()
        .any(|s| s.when == RunCondition::Always && s.output.is_some());
    if !always_output {
        return Err(config_err(
            "at least one stage with `when = \"always\"` must declare an `output`",
        ));
    }

    for spec in specs {
        if let Some(output) = &spec.output {
            if output.starts_with('/') || output.split('/').any(|c| c == "..") {
                return Err(config_err(format!(
                    "stage '{}' output '{}' must stay inside the workspace",
                    spec.name, output
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(toml_src: &str) -> RawConfigFile {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_validate_and_render_comes_first() {
        let cfg = EngineConfig::try_from(RawConfigFile::default()).unwrap();
        let names: Vec<_> = cfg.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["render", "concat"]);
        assert_eq!(cfg.scheduler.max_concurrent, 2);
        assert!(cfg.stages[0].per_scene);
        assert_eq!(cfg.stages[1].when, RunCondition::MultiScene);
    }

    #[test]
    fn toolchain_programs_include_stage_executables() {
        let defaults = EngineConfig::try_from(RawConfigFile::default()).unwrap();
        assert_eq!(
            defaults.toolchain_programs(),
            vec!["manim", "latex", "dvisvgm", "ffmpeg"]
        );

        let cfg = EngineConfig::try_from(raw(
            r#"
            [engine]
            required_programs = ["sh"]

            [stage.render]
            cmd = ["blender", "{scene_file}"]

            [stage.mux]
            cmd = ["{workspace}/bin/mux", "{output_name}"]
            after = ["render"]
            output = "{output_name}"
            "#,
        ))
        .unwrap();
        assert_eq!(cfg.toolchain_programs(), vec!["sh", "blender"]);
    }

    #[test]
    fn stages_are_ordered_by_after() {
        let cfg = EngineConfig::try_from(raw(
            r#"
            [stage.a_mux]
            cmd = ["true"]
            after = ["z_render"]
            output = "out.{ext}"

            [stage.z_render]
            cmd = ["true"]
            "#,
        ))
        .unwrap();
        let names: Vec<_> = cfg.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["z_render", "a_mux"]);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = EngineConfig::try_from(raw("[scheduler]\nmax_concurrent = 0\n")).unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = EngineConfig::try_from(raw(
            r#"
            [stage.render]
            cmd = ["true"]
            after = ["ghost"]
            output = "x.mp4"
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = EngineConfig::try_from(raw(
            r#"
            [stage.a]
            cmd = ["true"]
            after = ["b"]
            output = "x.mp4"

            [stage.b]
            cmd = ["true"]
            after = ["a"]
            output = "x.mp4"
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, FramewrightError::StageCycle(_)));
    }

    #[test]
    fn scene_placeholder_requires_per_scene() {
        let err = EngineConfig::try_from(raw(
            r#"
            [stage.render]
            cmd = ["engine", "{scene}"]
            output = "x.mp4"
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("per_scene"));
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = EngineConfig::try_from(raw(
            r#"
            [stage.render]
            cmd = ["engine", "{quality}"]
            output = "x.mp4"
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("quality"));
    }

    #[test]
    fn final_stage_needs_output() {
        let err = EngineConfig::try_from(raw(
            r#"
            [stage.render]
            cmd = ["engine"]
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("output"));
    }

    #[test]
    fn bad_durations_are_reported_with_their_key() {
        let err = EngineConfig::try_from(raw(
            r#"
            [stage.render]
            cmd = ["engine"]
            output = "x.mp4"
            timeout = "soon"
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("[stage.render].timeout"));
    }

    #[test]
    fn memory_limit_is_converted_to_bytes() {
        let cfg = EngineConfig::try_from(raw(
            r#"
            [stage.render]
            cmd = ["engine"]
            output = "x.mp4"
            max_memory_mb = 512
            "#,
        ))
        .unwrap();
        assert_eq!(cfg.stages[0].max_memory_bytes, Some(512 * 1024 * 1024));
    }

    #[test]
    fn scene_pattern_needs_a_capture_group() {
        let err = EngineConfig::try_from(raw(
            "[engine]\nscene_pattern = \"class \\\\w+\"\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("capture group"));
    }
}
