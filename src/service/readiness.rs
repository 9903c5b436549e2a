// src/service/readiness.rs

//! Readiness probe: are the toolchain programs installed and executable?

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    Ok,
    Missing,
    NotExecutable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramCheck {
    pub name: String,
    pub path: Option<PathBuf>,
    pub status: ProgramStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub healthy: bool,
    pub programs: Vec<ProgramCheck>,
}

impl ReadinessReport {
    /// Programs that failed the check.
    pub fn failures(&self) -> impl Iterator<Item = &ProgramCheck> {
        self.programs.iter().filter(|p| p.status != ProgramStatus::Ok)
    }
}

/// Resolve every program on `PATH` (or as given, if it contains a `/`).
pub fn check_programs(programs: &[String]) -> ReadinessReport {
    let search_path = env::var_os("PATH").unwrap_or_default();
    let dirs: Vec<PathBuf> = env::split_paths(&search_path).collect();

    let programs: Vec<ProgramCheck> = programs
        .iter()
        .map(|name| check_one(name, &dirs))
        .collect();
    let healthy = programs.iter().all(|p| p.status == ProgramStatus::Ok);

    if healthy {
        debug!(count = programs.len(), "toolchain programs present");
    } else {
        for p in programs.iter().filter(|p| p.status != ProgramStatus::Ok) {
            warn!(program = %p.name, status = ?p.status, "toolchain program unavailable");
        }
    }

    ReadinessReport { healthy, programs }
}

fn check_one(name: &str, dirs: &[PathBuf]) -> ProgramCheck {
    let candidates: Vec<PathBuf> = if name.contains('/') {
        vec![PathBuf::from(name)]
    } else {
        dirs.iter().map(|d| d.join(name)).collect()
    };

    let mut non_exec: Option<PathBuf> = None;
    for candidate in candidates {
        if !candidate.is_file() {
            continue;
        }
        if is_executable(&candidate) {
            return ProgramCheck {
                name: name.to_string(),
                path: Some(candidate),
                status: ProgramStatus::Ok,
            };
        }
        non_exec.get_or_insert(candidate);
    }

    let status = if non_exec.is_some() {
        ProgramStatus::NotExecutable
    } else {
        ProgramStatus::Missing
    };
    ProgramCheck {
        name: name.to_string(),
        path: non_exec,
        status,
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_is_found_and_bogus_is_missing() {
        let report = check_programs(&["sh".to_string(), "framewright-no-such-tool".to_string()]);
        assert!(!report.healthy);
        assert_eq!(report.programs[0].status, ProgramStatus::Ok);
        assert_eq!(report.programs[1].status, ProgramStatus::Missing);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn explicit_path_without_exec_bit_is_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o644)).unwrap();

        let report = check_programs(&[tool.to_string_lossy().into_owned()]);
        assert_eq!(report.programs[0].status, ProgramStatus::NotExecutable);

        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(check_programs(&[tool.to_string_lossy().into_owned()]).healthy);
    }

    #[test]
    fn empty_requirement_list_is_healthy() {
        assert!(check_programs(&[]).healthy);
    }
}
