/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Error kinds for the aggregation pipeline.
//!
//! Every fallible operation in this crate returns [`Result<T>`], a type alias
//! for `std::result::Result<T, StatError>`. The variants of [`StatError`]
//! correspond to the error kinds of the design (not to C++ exception class
//! names): allocation/invariant failures are fatal to the current gather
//! round but leave the rest of the pipeline usable for the next one, while
//! timeouts and sample failures are recoverable at the round level.

use thiserror::Error;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, StatError>;

/// The ways a gather round, a merge, or a codec operation can fail.
#[derive(Error, Debug)]
pub enum StatError {
    /// Allocation failure or an internal invariant violation (e.g. a
    /// mismatched edge-label variant inside a single graph). Fatal to the
    /// current gather round; the caller's transport state is left intact so
    /// a subsequent round may be attempted.
    #[error("internal error: {0}")]
    FatalInternal(String),

    /// A send/receive failure at the transport layer. Fails the current
    /// operation; the caller decides whether to retry the round.
    #[error("transport I/O error: {0}")]
    TransportIo(String),

    /// Deserialization was given a byte buffer whose declared length does
    /// not match its actual length.
    #[error("malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },

    /// A daemon or interior filter reported a different (major, minor,
    /// revision) triple than the front end. Fatal to setup; the front end
    /// must detach before sampling.
    #[error(
        "version mismatch: front end is {front_end:?}, {mismatched} of {checked} responders disagreed"
    )]
    VersionMismatch {
        front_end: (u32, u32, u32),
        mismatched: u32,
        checked: u32,
    },

    /// A daemon could not walk one or more stacks after exhausting its
    /// retry budget. Non-fatal: the affected processes simply contribute no
    /// graph for that sample.
    #[error("sample failed for daemon {daemon_rank} after {retries} retries: {reason}")]
    SampleFailed {
        daemon_rank: u64,
        retries: u32,
        reason: String,
    },

    /// A target application process exited during the round.
    #[error("target process exited: rank {rank}")]
    TargetExited { rank: u64 },
}

/// The result of a gather wait: either every daemon acknowledged, or some
/// timed out. A timeout is not automatically an error — [`StatError`] is
/// reserved for conditions the caller cannot productively continue past.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResponse {
    /// Ranks (or daemon ids) that responded in time.
    pub responded: Vec<u64>,
    /// Ranks (or daemon ids) that did not.
    pub missing: Vec<u64>,
}

impl PartialResponse {
    /// True if every expected responder answered.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// True if at least one responder answered — the round can still
    /// produce a (partial) result.
    pub fn has_quorum(&self) -> bool {
        !self.responded.is_empty()
    }
}
