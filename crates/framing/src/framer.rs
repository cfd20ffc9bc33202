//! Streaming record framer
//!
//! Extracts complete top-level JSON objects from a byte stream that arrives
//! in arbitrary chunks. The stream may be a JSON array (`[{..},{..}]`), a
//! concatenation of objects, or objects broken across lines; anything outside
//! an object is ignored.
//!
//! State persists across [`RecordFramer::push`] calls, so chunk boundaries may
//! fall anywhere, including inside strings and escape sequences. Objects that
//! do not decode are dropped and counted, never retried.

use serde_json::Value;

/// Default upper bound for a single buffered object (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One complete, decoded top-level JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    value: Value,
    raw_len: usize,
}

impl Frame {
    /// Decoded object
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume the frame, returning the decoded object
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Length of the object text in the stream
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }
}

/// Counters kept by a framer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Frames emitted
    pub frames: u64,
    /// Balanced objects that failed to decode
    pub malformed: u64,
    /// Objects discarded for exceeding the size limit
    pub oversized: u64,
    /// Bytes seen outside any object
    pub noise_bytes: u64,
}

/// Restartable brace/string-aware JSON object framer
#[derive(Debug)]
pub struct RecordFramer {
    buf: Vec<u8>,
    depth: usize,
    in_string: bool,
    escape: bool,
    /// Current object exceeded the limit; scan to its end without buffering
    discarding: bool,
    max_frame_size: usize,
    stats: FramerStats,
}

impl Default for RecordFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordFramer {
    /// Create a framer with the default object size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a framer that discards objects larger than `max_frame_size`
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            depth: 0,
            in_string: false,
            escape: false,
            discarding: false,
            max_frame_size: max_frame_size.max(2),
            stats: FramerStats::default(),
        }
    }

    /// Feed one chunk, returning the frames it completed in stream order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &byte in chunk {
            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if byte == b'\\' {
                    self.escape = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                self.keep(byte);
                continue;
            }

            match byte {
                b'"' => {
                    self.in_string = true;
                    self.keep(byte);
                }
                b'{' => {
                    if self.depth == 0 {
                        self.buf.clear();
                    }
                    self.depth += 1;
                    self.keep(byte);
                }
                b'}' if self.depth > 0 => {
                    self.keep(byte);
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.complete(&mut frames);
                    }
                }
                _ => self.keep(byte),
            }
        }

        frames
    }

    /// True when no object is partially buffered
    pub fn is_idle(&self) -> bool {
        self.depth == 0
    }

    /// Bytes of the partial object currently buffered
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Counters since creation
    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Drop any partial object and return to the initial state
    pub fn reset(&mut self) {
        self.buf.clear();
        self.depth = 0;
        self.in_string = false;
        self.escape = false;
        self.discarding = false;
    }

    #[inline]
    fn keep(&mut self, byte: u8) {
        if self.depth == 0 {
            self.stats.noise_bytes += 1;
            return;
        }
        if self.discarding {
            return;
        }
        if self.buf.len() >= self.max_frame_size {
            tracing::debug!(
                limit = self.max_frame_size,
                "object exceeds frame size limit, discarding"
            );
            self.buf.clear();
            self.discarding = true;
            return;
        }
        self.buf.push(byte);
    }

    fn complete(&mut self, frames: &mut Vec<Frame>) {
        if self.discarding {
            self.discarding = false;
            self.stats.oversized += 1;
            self.buf.clear();
            return;
        }

        match serde_json::from_slice::<Value>(&self.buf) {
            Ok(value) => {
                self.stats.frames += 1;
                frames.push(Frame {
                    value,
                    raw_len: self.buf.len(),
                });
            }
            Err(e) => {
                self.stats.malformed += 1;
                tracing::trace!(bytes = self.buf.len(), error = %e, "dropping malformed frame");
            }
        }
        self.buf.clear();
    }
}

/// Lazy frame iterator over a sequence of chunks
///
/// Created by [`frames`]. The underlying framer can be recovered with
/// [`Frames::into_framer`] to continue with more input later.
pub struct Frames<I> {
    chunks: I,
    framer: RecordFramer,
    ready: std::collections::VecDeque<Frame>,
}

impl<I> Frames<I> {
    /// Recover the framer, including any partial object
    pub fn into_framer(self) -> RecordFramer {
        self.framer
    }
}

impl<I, C> Iterator for Frames<I>
where
    I: Iterator<Item = C>,
    C: AsRef<[u8]>,
{
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(frame);
            }
            let chunk = self.chunks.next()?;
            self.ready.extend(self.framer.push(chunk.as_ref()));
        }
    }
}

/// Frame a chunk sequence lazily with a fresh framer
pub fn frames<I, C>(chunks: I) -> Frames<I::IntoIter>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    Frames {
        chunks: chunks.into_iter(),
        framer: RecordFramer::new(),
        ready: std::collections::VecDeque::new(),
    }
}

#[cfg(test)]
#[path = "framer_test.rs"]
mod framer_test;
