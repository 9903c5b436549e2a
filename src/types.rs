// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a submitted render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(JobId)
            .map_err(|e| format!("invalid job id '{s}': {e}"))
    }
}

/// Container format requested for the rendered video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mov,
    Webm,
    Gif,
}

impl OutputFormat {
    /// File extension the engine uses for this format (also the `{ext}`
    /// placeholder value).
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mov => "mov",
            OutputFormat::Webm => "webm",
            OutputFormat::Gif => "gif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Mov => "video/quicktime",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Gif => "image/gif",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "mov" => Ok(OutputFormat::Mov),
            "webm" => Ok(OutputFormat::Webm),
            "gif" => Ok(OutputFormat::Gif),
            other => Err(format!(
                "invalid output format: {other} (expected mp4, mov, webm or gif)"
            )),
        }
    }
}

/// What a configured pipeline step does, as far as failure attribution is
/// concerned.
///
/// - `Render`: the engine proper (scene evaluation, typesetting, rasterizing
///   and the per-scene mux it does on its own).
/// - `Encode`: a standalone encoder/muxer step (e.g. ffmpeg concat).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    #[default]
    Render,
    Encode,
}

impl StageKind {
    /// Toolchain stage blamed when nothing more specific is known.
    pub fn default_stage(self) -> ToolchainStage {
        match self {
            StageKind::Render => ToolchainStage::Rendering,
            StageKind::Encode => ToolchainStage::Encoding,
        }
    }
}

/// When a configured step runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCondition {
    #[default]
    Always,
    /// Only when the scene source defines more than one scene.
    MultiScene,
}

/// Phase of the external toolchain a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainStage {
    Typesetting,
    Rendering,
    Encoding,
    /// Failures raised by framewright itself around the toolchain (workspace
    /// allocation, scene discovery, artifact checks, cancellation).
    Orchestration,
}

impl fmt::Display for ToolchainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolchainStage::Typesetting => write!(f, "typesetting"),
            ToolchainStage::Rendering => write!(f, "rendering"),
            ToolchainStage::Encoding => write!(f, "encoding"),
            ToolchainStage::Orchestration => write!(f, "orchestration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_parses_case_insensitively() {
        assert_eq!("MP4".parse::<OutputFormat>().unwrap(), OutputFormat::Mp4);
        assert_eq!(" webm ".parse::<OutputFormat>().unwrap(), OutputFormat::Webm);
        assert!("avi".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
