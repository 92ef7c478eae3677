//! Unix-layer error types.

use thiserror::Error;

/// Errors raised by host provisioning.
#[derive(Debug, Error)]
pub enum UnixError {
    /// A helper command exited non-zero. Never retried automatically;
    /// the caller decides whether the logical operation is fatal.
    #[error("unix op failed: {op} (exit {exitcode}): {stderr}")]
    OpFailed {
        /// The command line that failed.
        op: String,
        /// Its exit code (`-1` when killed by a signal).
        exitcode: i32,
        /// Captured stderr.
        stderr: String,
    },

    /// The configured UID range has no unused values left.
    #[error("no uid available in range {start}..={end}")]
    NoUidAvailable {
        /// Range start.
        start: u32,
        /// Range end.
        end: u32,
    },

    /// A command's output could not be parsed.
    #[error("unparseable output from {op}: {output:?}")]
    UnparseableOutput {
        /// The command.
        op: String,
        /// What it printed.
        output: String,
    },

    /// The repository layer failed.
    #[error(transparent)]
    Store(#[from] agor_store::StoreError),

    /// A core validation failed (e.g. a malformed synthesised username).
    #[error(transparent)]
    Core(#[from] agor_core::CoreError),
}

/// Result type for unix operations.
pub type UnixResult<T> = Result<T, UnixError>;
