// src/artifact/range.rs

//! Single `Range: bytes=...` header support.

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Why a range header could not be honoured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// Not a `bytes=` range we understand; callers serve the whole file.
    Unsupported,
    /// Well-formed but outside the file (HTTP 416).
    Unsatisfiable,
}

/// Parse a range header against a file of `size` bytes.
///
/// Accepts `bytes=start-end`, `bytes=start-` and `bytes=-suffix`. Multiple
/// ranges are not supported. `end` is clamped to the last byte.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Unsupported)?
        .trim();
    if spec.contains(',') {
        return Err(RangeError::Unsupported);
    }
    let (start, end) = spec.split_once('-').ok_or(RangeError::Unsupported)?;
    let (start, end) = (start.trim(), end.trim());

    if size == 0 {
        return Err(RangeError::Unsatisfiable);
    }
    let last = size - 1;

    if start.is_empty() {
        let suffix: u64 = end.parse().map_err(|_| RangeError::Unsupported)?;
        if suffix == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        return Ok(ByteRange {
            start: size.saturating_sub(suffix),
            end: last,
        });
    }

    let start: u64 = start.parse().map_err(|_| RangeError::Unsupported)?;
    let end = if end.is_empty() {
        last
    } else {
        end.parse::<u64>().map_err(|_| RangeError::Unsupported)?.min(last)
    };

    if start > last || start > end {
        return Err(RangeError::Unsatisfiable);
    }
    Ok(ByteRange { start, end })
}
