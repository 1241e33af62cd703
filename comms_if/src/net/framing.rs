//! # Frame reassembly
//!
//! The control link carries JSON envelopes back to back with no length prefix or delimiter. A
//! single read from the socket can therefore hold several envelopes, or only part of one.
//!
//! [`Framer`] accumulates received bytes and recovers complete frames from them:
//!
//! 1. The buffer is split wherever a closing brace is immediately followed by an opening brace
//!    (`}{`), with each brace kept on its own side of the cut.
//! 2. Each candidate is checked for being a complete JSON value. Complete candidates are frames.
//! 3. A candidate which isn't valid is joined with the next candidate and checked once more, which
//!    recovers envelopes whose string values happen to contain `}{`. If that fails too the first
//!    candidate is reported as broken and dropped.
//! 4. A trailing candidate which is merely incomplete stays in the buffer until more bytes arrive.
//!
//! No byte is ever discarded other than as part of a reported broken candidate.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::de::IgnoredAny;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default upper bound on the size of an incomplete frame held in the buffer.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 64 * 1024;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Recovers complete frames from a stream of back-to-back JSON envelopes.
///
/// One framer should be used per connection, so that a partial frame from a previous peer can't
/// be glued onto data from the next one.
#[derive(Debug)]
pub struct Framer {
    /// Bytes received which don't yet form a complete frame
    pending: Vec<u8>,

    /// Maximum number of bytes which may be pending before they are discarded as broken
    max_pending_bytes: usize,
}

/// The result of pushing some bytes into a [`Framer`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameBatch {
    /// Complete frames, in the order they appeared in the stream
    pub frames: Vec<String>,

    /// Candidates which could not be recovered and were dropped
    pub broken: Vec<Vec<u8>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validity {
    Complete,
    Incomplete,
    Invalid,
    Empty,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Framer {
    /// Create a new framer with an empty buffer.
    pub fn new(max_pending_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_pending_bytes,
        }
    }

    /// Number of bytes currently held waiting for the rest of a frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard any partially received frame, returning the number of bytes dropped.
    pub fn clear(&mut self) -> usize {
        let len = self.pending.len();
        self.pending.clear();
        len
    }

    /// Add received bytes to the buffer and extract every frame which is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> FrameBatch {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(bytes);

        let candidates = split_candidates(&buffer);

        let mut batch = FrameBatch::default();
        let mut i = 0;

        while i < candidates.len() {
            let candidate = candidates[i];
            let is_last = i + 1 == candidates.len();

            match validate(candidate) {
                Validity::Complete => {
                    batch.push_frame(candidate);
                    i += 1;
                    continue;
                },
                Validity::Empty => {
                    i += 1;
                    continue;
                },
                Validity::Incomplete if is_last => {
                    self.pending.extend_from_slice(candidate);
                    i += 1;
                    continue;
                },
                Validity::Incomplete | Validity::Invalid => ()
            }

            // Retry once with the next candidate attached
            if !is_last {
                let joined = [candidate, candidates[i + 1]].concat();
                let joined_is_last = i + 2 == candidates.len();

                match validate(&joined) {
                    Validity::Complete => {
                        batch.push_frame(&joined);
                        i += 2;
                        continue;
                    },
                    Validity::Incomplete if joined_is_last => {
                        self.pending = joined;
                        i += 2;
                        continue;
                    },
                    _ => ()
                }
            }

            batch.broken.push(candidate.to_vec());
            i += 1;
        }

        // Don't let a frame which never completes grow without bound
        if self.pending.len() > self.max_pending_bytes {
            batch.broken.push(std::mem::take(&mut self.pending));
        }

        batch
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_BYTES)
    }
}

impl FrameBatch {
    fn push_frame(&mut self, bytes: &[u8]) {
        // Validation already checked the bytes are UTF-8, but don't rely on it
        match String::from_utf8(bytes.to_vec()) {
            Ok(s) => self.frames.push(s.trim().to_string()),
            Err(e) => self.broken.push(e.into_bytes()),
        }
    }

    /// True if nothing was extracted or dropped.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.broken.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Split the buffer at every `}{` boundary, keeping the braces with their own candidates.
///
/// Whitespace between the braces is tolerated and stays with the left candidate.
fn split_candidates(buffer: &[u8]) -> Vec<&[u8]> {
    let mut candidates = Vec::new();
    let mut start = 0;

    for i in 1..buffer.len() {
        if buffer[i] != b'{' {
            continue;
        }

        let prev = buffer[start..i].iter().rev().find(|b| !b.is_ascii_whitespace());
        if prev == Some(&b'}') {
            candidates.push(&buffer[start..i]);
            start = i;
        }
    }

    if start < buffer.len() {
        candidates.push(&buffer[start..]);
    }

    candidates
}

/// Check whether the candidate is a single complete JSON value.
fn validate(candidate: &[u8]) -> Validity {
    if candidate.iter().all(u8::is_ascii_whitespace) {
        return Validity::Empty;
    }

    match serde_json::from_slice::<IgnoredAny>(candidate) {
        Ok(_) => Validity::Complete,
        Err(e) if e.is_eof() => Validity::Incomplete,
        Err(_) => Validity::Invalid,
    }
}
