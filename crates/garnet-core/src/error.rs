//! Compile-time errors for the JIT compiler

use thiserror::Error;
use tracing::warn;

use crate::cache::CacheKind;

/// Errors that can occur while compiling a unit
///
/// Every variant aborts the unit being compiled. Callers treat the compiler
/// as best-effort and fall back to another execution strategy on error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A request outside the compiler's contract (e.g. a flat closure on
    /// stack-based variables, or a specific-arity yield of five values)
    #[error("not compilable: {0}")]
    NotCompilable(String),

    /// A cache table grew past what the init descriptor can encode
    #[error("cache table for {kind:?} too large to encode ({count} entries)")]
    TooLarge { kind: CacheKind, count: usize },

    /// Internal compiler error (emitter invariant broken)
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Create a not-compilable error, logging the reason
    pub fn not_compilable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(target: "garnet::jit", %reason, "not compilable");
        Self::NotCompilable(reason)
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Returns true if this error tells the caller to fall back rather than
    /// indicating a compiler bug
    #[must_use]
    pub fn is_not_compilable(&self) -> bool {
        matches!(self, Self::NotCompilable(_) | Self::TooLarge { .. })
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
