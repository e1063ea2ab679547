//! ---
//! zl_section: "03-wire-codec"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Incremental newline-framed stream decoder."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use zilla_telemetry::MetricsDelta;

use crate::error::DecodeError;
use crate::frame::parse_frame;

/// Default upper bound on a single frame, terminator excluded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256;

/// Outcome of one complete (or abandoned) frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// A frame decoded into a delta.
    Delta(MetricsDelta),
    /// A frame that was dropped. The stream continues.
    Discarded(DecodeError),
}

/// Cumulative decoder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStats {
    /// Frames turned into deltas.
    pub frames_decoded: u64,
    /// Frames rejected for their content, checksum failures included.
    pub frames_malformed: u64,
    /// Frames dropped for exceeding the length limit.
    pub frames_oversized: u64,
    /// Raw bytes fed into the decoder.
    pub bytes_received: u64,
}

impl DecoderStats {
    /// Field-wise sum, used to carry totals across sessions.
    pub fn merged(self, other: DecoderStats) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded + other.frames_decoded,
            frames_malformed: self.frames_malformed + other.frames_malformed,
            frames_oversized: self.frames_oversized + other.frames_oversized,
            bytes_received: self.bytes_received + other.bytes_received,
        }
    }
}

/// Splits an arbitrary byte stream into frames.
///
/// Output depends only on the concatenated input, never on how it was chunked.
/// A frame that grows past the limit is dropped and the decoder skips to the
/// next `\n` before it resumes.
#[derive(Debug)]
pub struct StreamDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
    resyncing: bool,
    stats: DecoderStats,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl StreamDecoder {
    /// Decoder that drops frames longer than `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        let max_frame_len = max_frame_len.max(1);
        Self {
            buffer: BytesMut::with_capacity(max_frame_len),
            max_frame_len,
            resyncing: false,
            stats: DecoderStats::default(),
        }
    }

    /// Consume a chunk and return the events for every frame it completes.
    pub fn feed(&mut self, input: &[u8]) -> Vec<DecodeEvent> {
        self.stats.bytes_received += input.len() as u64;
        let mut events = Vec::new();
        let mut rest = input;

        while !rest.is_empty() {
            let Some(newline) = rest.iter().position(|byte| *byte == b'\n') else {
                if !self.resyncing {
                    // one spare byte for a '\r' whose '\n' has not arrived yet
                    if self.buffer.len() + rest.len() > self.max_frame_len + 1 {
                        self.buffer.clear();
                        self.resyncing = true;
                        events.push(self.oversized());
                    } else {
                        self.buffer.extend_from_slice(rest);
                    }
                }
                break;
            };

            let head = &rest[..newline];
            rest = &rest[newline + 1..];

            if self.resyncing {
                self.resyncing = false;
                continue;
            }
            if self.frame_len(head) > self.max_frame_len {
                self.buffer.clear();
                events.push(self.oversized());
                continue;
            }

            self.buffer.extend_from_slice(head);
            let line = self.buffer.split();
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Counters since construction.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes held for an unterminated frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame. Counters are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.resyncing = false;
    }

    /// Length of the pending frame completed by `head`, without its line terminator.
    fn frame_len(&self, head: &[u8]) -> usize {
        let last = head.last().or_else(|| self.buffer.last());
        let carriage_return = usize::from(last == Some(&b'\r'));
        self.buffer.len() + head.len() - carriage_return
    }

    fn oversized(&mut self) -> DecodeEvent {
        self.stats.frames_oversized += 1;
        tracing::debug!(limit = self.max_frame_len, "dropping oversized frame");
        DecodeEvent::Discarded(DecodeError::FrameTooLong {
            limit: self.max_frame_len,
        })
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<DecodeEvent> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match parse_frame(line) {
            Ok(delta) => {
                self.stats.frames_decoded += 1;
                Some(DecodeEvent::Delta(delta))
            }
            Err(error) => {
                self.stats.frames_malformed += 1;
                tracing::debug!(%error, "discarding frame");
                Some(DecodeEvent::Discarded(error))
            }
        }
    }
}
