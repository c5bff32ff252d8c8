//! Fatal compiler errors.
//!
//! Almost every failure in Lilac degrades: the offending sub-expression
//! lowers to `Nil`, a diagnostic is recorded, and the compile continues so a
//! best-effort C file is still produced. The errors in this module are the
//! exceptions: they abort the current compilation unit, never the process.

use thiserror::Error;

/// Errors that abort the current compilation unit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// An arena or analysis table hit its node limit.
    #[error("out of memory in {arena}: limit of {limit} nodes exceeded")]
    OutOfMemory {
        /// Which allocation pool overflowed
        arena: &'static str,
        /// The configured node limit
        limit: usize,
    },
}

/// Result alias for operations that can only fail fatally.
pub type Fallible<T> = Result<T, FatalError>;
