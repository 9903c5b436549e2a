// src/artifact/mod.rs

//! Artifact resolver.
//!
//! A render step declares its output as a glob relative to the workspace
//! (e.g. `media/videos/**/720p30/{scene}.{ext}`). After the last step the
//! pipeline [`locate`]s and [`inspect`]s the file; a job only succeeds with
//! an artifact that exists, is non-empty and starts with the container
//! header of the requested format. [`open`] re-checks the file and streams
//! it, optionally restricted to one byte range.

pub mod header;
pub mod range;

use std::fs;
use std::io::{Read, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::GlobBuilder;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tracing::debug;

use crate::classify::{ClassifiedError, ErrorKind};
use crate::engine::{JobState, RenderJob};
use crate::errors::{FramewrightError, Result};
use crate::types::{OutputFormat, ToolchainStage};

pub use range::{ByteRange, RangeError, parse_range};

/// Verified location of a job's output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactLocation {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub size: u64,
}

fn corrupt(detail: impl Into<String>) -> ClassifiedError {
    ClassifiedError::new(
        ErrorKind::CorruptArtifact,
        ToolchainStage::Orchestration,
        detail,
    )
}

/// Artifact of a job, available only once it has succeeded.
pub fn resolve(job: &RenderJob) -> Result<ArtifactLocation> {
    match job.state() {
        JobState::Succeeded => job
            .artifact()
            .cloned()
            .ok_or_else(|| corrupt("succeeded job has no recorded artifact").into()),
        state => Err(FramewrightError::NotReady {
            id: job.id,
            state: state.to_string(),
        }),
    }
}

/// Find the file matching `pattern` (relative, `/`-separated) under `dir`.
///
/// If several files match, the most recently modified one wins.
pub fn locate(dir: &Path, pattern: &str) -> std::result::Result<PathBuf, ClassifiedError> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| corrupt(format!("invalid output pattern '{pattern}': {e}")))?
        .compile_matcher();

    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            if !matcher.is_match(relative) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if best.as_ref().is_none_or(|(t, _)| modified >= *t) {
                best = Some((modified, path));
            }
        }
    }

    best.map(|(_, path)| path)
        .ok_or_else(|| corrupt(format!("no output file matching '{pattern}' was produced")))
}

/// Check size and container header. Returns the file size.
pub fn inspect(path: &Path, format: OutputFormat) -> std::result::Result<u64, ClassifiedError> {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let size = fs::metadata(path)
        .map_err(|e| corrupt(format!("artifact {name} is missing: {e}")))?
        .len();
    if size == 0 {
        return Err(corrupt(format!("artifact {name} is empty")));
    }

    let mut head = Vec::with_capacity(header::HEADER_LEN);
    fs::File::open(path)
        .and_then(|f| f.take(header::HEADER_LEN as u64).read_to_end(&mut head))
        .map_err(|e| corrupt(format!("cannot read artifact {name}: {e}")))?;

    if !header::matches_format(&head, format) {
        return Err(corrupt(format!(
            "artifact {name} does not start with a {format} container header"
        )));
    }
    Ok(size)
}

/// Locate and verify in one go.
pub fn verify(
    dir: &Path,
    pattern: &str,
    format: OutputFormat,
) -> std::result::Result<ArtifactLocation, ClassifiedError> {
    let path = locate(dir, pattern)?;
    let size = inspect(&path, format)?;
    debug!(path = %path.display(), size, "artifact verified");
    Ok(ArtifactLocation { path, format, size })
}

/// Open an artifact for streaming.
///
/// `range` is the raw `Range` header value, if any. An unsupported header is
/// ignored (full response); an unsatisfiable one is an error.
pub async fn open(location: &ArtifactLocation, range: Option<&str>) -> Result<ArtifactHandle> {
    let size = inspect(&location.path, location.format)?;

    let range = match range.map(|r| parse_range(r, size)) {
        None | Some(Err(RangeError::Unsupported)) => None,
        Some(Err(RangeError::Unsatisfiable)) => {
            return Err(FramewrightError::RangeNotSatisfiable { size });
        }
        Some(Ok(r)) => Some(r),
    };

    let mut file = File::open(&location.path)
        .await
        .map_err(|e| corrupt(format!("cannot open artifact: {e}")))?;
    if let Some(r) = range {
        file.seek(SeekFrom::Start(r.start)).await?;
    }

    Ok(ArtifactHandle {
        file,
        format: location.format,
        total: size,
        range,
    })
}

/// An opened artifact plus what an HTTP layer needs to describe it.
#[derive(Debug)]
pub struct ArtifactHandle {
    file: File,
    format: OutputFormat,
    total: u64,
    range: Option<ByteRange>,
}

impl ArtifactHandle {
    /// 206 for a range response, 200 otherwise.
    pub fn status(&self) -> u16 {
        if self.range.is_some() { 206 } else { 200 }
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn accept_ranges(&self) -> &'static str {
        "bytes"
    }

    pub fn total_len(&self) -> u64 {
        self.total
    }

    /// Number of bytes the reader yields.
    pub fn content_length(&self) -> u64 {
        self.range.map(|r| r.len()).unwrap_or(self.total)
    }

    /// `Content-Range` header value for a range response.
    pub fn content_range(&self) -> Option<String> {
        self.range
            .map(|r| format!("bytes {}-{}/{}", r.start, r.end, self.total))
    }

    /// Stream of the selected bytes; the file is never buffered whole.
    pub fn into_reader(self) -> Take<File> {
        let len = self.content_length();
        self.file.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const MP4_HEAD: &[u8] = b"\x00\x00\x00\x18ftypisom\x00\x00\x02\x00";

    fn write(dir: &Path, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn locate_follows_manim_layout() {
        let dir = tempfile::tempdir().unwrap();
        let want = write(dir.path(), "media/videos/scene/720p30/Intro.mp4", MP4_HEAD);
        write(dir.path(), "media/videos/scene/720p30/partial/x.mp4", MP4_HEAD);

        let found = locate(dir.path(), "media/videos/**/720p30/Intro.mp4").unwrap();
        assert_eq!(found, want);
    }

    #[test]
    fn missing_empty_and_wrong_header_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let err = locate(dir.path(), "out.mp4").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptArtifact);

        let empty = write(dir.path(), "empty.mp4", b"");
        assert_eq!(inspect(&empty, OutputFormat::Mp4).unwrap_err().kind, ErrorKind::CorruptArtifact);

        let text = write(dir.path(), "text.mp4", b"not a video at all");
        let err = inspect(&text, OutputFormat::Mp4).unwrap_err();
        assert!(err.detail.contains("mp4"));

        let good = write(dir.path(), "good.mp4", MP4_HEAD);
        assert_eq!(inspect(&good, OutputFormat::Mp4).unwrap(), MP4_HEAD.len() as u64);
    }

    #[tokio::test]
    async fn open_streams_whole_file_or_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = MP4_HEAD.to_vec();
        bytes.extend((0..200u8).collect::<Vec<_>>());
        let path = write(dir.path(), "out.mp4", &bytes);
        let location = ArtifactLocation {
            path,
            format: OutputFormat::Mp4,
            size: bytes.len() as u64,
        };

        let full = open(&location, None).await.unwrap();
        assert_eq!(full.status(), 200);
        assert_eq!(full.content_type(), "video/mp4");
        assert_eq!(full.accept_ranges(), "bytes");
        assert_eq!(full.total_len(), bytes.len() as u64);
        assert!(full.content_range().is_none());
        let mut out = Vec::new();
        full.into_reader().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, bytes);

        let part = open(&location, Some("bytes=4-7")).await.unwrap();
        assert_eq!(part.status(), 206);
        assert_eq!(part.content_length(), 4);
        assert_eq!(
            part.content_range().unwrap(),
            format!("bytes 4-7/{}", bytes.len())
        );
        let mut out = Vec::new();
        part.into_reader().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"ftyp");

        let err = open(&location, Some("bytes=99999-")).await.unwrap_err();
        assert!(matches!(err, FramewrightError::RangeNotSatisfiable { .. }));
    }
}
