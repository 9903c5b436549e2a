// src/exec/capture.rs

//! Bounded capture of a child's output stream.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Byte sink that never grows past `limit` bytes.
///
/// The first half of the budget keeps the *head* of the stream, the second
/// half a rolling *tail*. Everything in between is counted and dropped. Engine
/// tracebacks end up at the bottom of stderr, so the tail is what the
/// classifier usually needs; the head keeps the command banner.
#[derive(Debug)]
pub struct CappedBuffer {
    head: Vec<u8>,
    tail: VecDeque<u8>,
    head_limit: usize,
    tail_limit: usize,
    dropped: u64,
}

impl CappedBuffer {
    pub fn new(limit: usize) -> Self {
        let head_limit = limit / 2;
        Self {
            head: Vec::new(),
            tail: VecDeque::new(),
            head_limit,
            tail_limit: limit - head_limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, mut chunk: &[u8]) {
        if self.head.len() < self.head_limit {
            let take = (self.head_limit - self.head.len()).min(chunk.len());
            self.head.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];
        }

        if self.tail_limit == 0 {
            self.dropped += chunk.len() as u64;
            return;
        }

        // Only the last `tail_limit` bytes of this chunk can survive.
        if chunk.len() > self.tail_limit {
            let skip = chunk.len() - self.tail_limit;
            self.dropped += skip as u64;
            chunk = &chunk[skip..];
        }

        let overflow = (self.tail.len() + chunk.len()).saturating_sub(self.tail_limit);
        if overflow > 0 {
            self.tail.drain(..overflow);
            self.dropped += overflow as u64;
        }
        self.tail.extend(chunk.iter().copied());
    }

    pub fn finish(self) -> CapturedStream {
        let truncated = self.dropped > 0;
        let mut text = String::from_utf8_lossy(&self.head).into_owned();
        if truncated {
            text.push_str(&format!("\n[... {} bytes truncated ...]\n", self.dropped));
        }
        let (a, b) = self.tail.as_slices();
        let mut tail = Vec::with_capacity(a.len() + b.len());
        tail.extend_from_slice(a);
        tail.extend_from_slice(b);
        text.push_str(&String::from_utf8_lossy(&tail));

        CapturedStream {
            text,
            truncated,
            dropped_bytes: self.dropped,
        }
    }
}

/// Captured output of one stream, after capping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedStream {
    pub text: String,
    pub truncated: bool,
    pub dropped_bytes: u64,
}

impl CapturedStream {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
            dropped_bytes: 0,
        }
    }
}

/// Drain `reader` to EOF, keeping at most `limit` bytes.
///
/// The reader is always consumed completely so the child never blocks on a
/// full pipe, no matter how much it writes.
pub async fn drain_capped<R>(mut reader: R, limit: usize) -> CapturedStream
where
    R: AsyncRead + Unpin,
{
    let mut buf = CappedBuffer::new(limit);
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.push(&chunk[..n]),
            Err(_) => break,
        }
    }

    buf.finish()
}
