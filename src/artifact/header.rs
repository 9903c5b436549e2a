// src/artifact/header.rs

//! Minimal container signature checks.

use crate::types::OutputFormat;

/// Bytes needed by [`matches_format`].
pub const HEADER_LEN: usize = 12;

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Whether `head` (the first bytes of a file) looks like `format`.
///
/// - mp4: an ISO-BMFF `ftyp` box at offset 4.
/// - mov: `ftyp`, or one of the top-level atoms older QuickTime files start
///   with.
/// - webm: the EBML magic number.
/// - gif: `GIF87a` / `GIF89a`.
pub fn matches_format(head: &[u8], format: OutputFormat) -> bool {
    match format {
        OutputFormat::Mp4 => box_type(head) == Some(b"ftyp"),
        OutputFormat::Mov => matches!(
            box_type(head),
            Some(b"ftyp" | b"moov" | b"mdat" | b"wide" | b"free" | b"skip")
        ),
        OutputFormat::Webm => head.starts_with(&EBML_MAGIC),
        OutputFormat::Gif => head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a"),
    }
}

fn box_type(head: &[u8]) -> Option<&[u8; 4]> {
    head.get(4..8)?.try_into().ok()
}
