use std::io;

use thiserror::Error;

/// Crate-wide error type shared by the host and debuggee sides.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] io::Error),

    /// A frame's header or payload did not parse (truncated, bad length
    /// prefix, bad string prefix byte).
    #[error("bad message")]
    BadMessage,

    /// A command or event frame carried a tag outside the closed vocabulary.
    #[error("unknown tag {0:?}")]
    UnknownTag([u8; 4]),

    /// A frame claimed a payload size that did not match what was read.
    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// A connection announced a correlation id with no matching launched
    /// process. Per spec this is not fatal to the manager; callers log and
    /// drop the connection rather than propagate this upward as a hard
    /// failure, but the variant exists so they can tell the two cases apart.
    #[error("unknown correlation id")]
    UnknownCorrelationId,

    /// A breakpoint id referenced by `brkc`/`brkr` is not one the process
    /// issued.
    #[error("unknown breakpoint id {0}")]
    UnknownBreakpoint(u32),
}
