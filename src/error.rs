//! Error types for the threading-HMM core.
//!
//! Mirrors the shape of `spec.md §7`: configuration and format errors are
//! caller mistakes, invariant violations are bugs, numeric failures are
//! recoverable, and I/O is deferred to collaborators outside the core.

use std::fmt;

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum ArgweaverError {
    /// A `Model` or rate map was built from inconsistent parameters
    /// (mismatched popsize length, non-monotone time grid, overlapping map
    /// intervals).
    #[error("configuration error: {0}")]
    Config(String),

    /// A sites file, rate map file, or SMC record could not be parsed.
    #[error("format error at {context}: {message}")]
    Format {
        /// Where the bad input was found, e.g. `"sites.txt:14"`.
        context: String,
        /// What was wrong with it.
        message: String,
    },

    /// A core data-structure invariant was violated: a broken tree, an
    /// illegal SPR, or a malformed `LocalTrees` chain. These are bugs in the
    /// core, not in caller input, and are fatal.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    /// The forward algorithm's log-space column collapsed to `-inf`
    /// everywhere: the data are incompatible with the candidate ARG under
    /// the infinite-sites penalty. Recoverable — the caller may retry the
    /// resample with a different window or seed.
    #[error("numeric failure: all forward states are -inf at position {position}")]
    NumericFailure {
        /// The chromosome coordinate at which the forward column vanished.
        position: u64,
    },

    /// Deferred to external collaborators (sites/SMC file readers, CLI
    /// drivers); carried here only so the core's own thin readers can
    /// report it through the same error type.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArgweaverError {
    pub fn config(message: impl Into<String>) -> Self {
        ArgweaverError::Config(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        ArgweaverError::InvariantViolation(message.into())
    }

    pub fn format(context: impl fmt::Display, message: impl Into<String>) -> Self {
        ArgweaverError::Format {
            context: context.to_string(),
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate, matching the teacher's
/// `TskReturnValue`-style convention of a crate-local alias over its own
/// error type.
pub type Result<T> = std::result::Result<T, ArgweaverError>;
