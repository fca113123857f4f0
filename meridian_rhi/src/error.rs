//! Error types for the Meridian RHI
//!
//! Every fallible operation of the index-buffer layer and of the device
//! context backends reports one of these variants. Each variant carries a
//! diagnostic message that has already been logged where the error was
//! produced (see `engine_err!`).

use std::fmt;

/// Result type for Meridian RHI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Meridian RHI errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer or memory creation failed
    AllocationFailure(String),

    /// Host mapping request failed
    MapFailure(String),

    /// Flushing host writes of a mapped range failed
    FlushFailure(String),

    /// Operation not allowed in the current resource state
    UsageViolation(String),

    /// Backend-specific error (Vulkan, etc.)
    BackendError(String),

    /// Device context initialization failed
    InitializationFailed(String),
}

impl Error {
    /// Diagnostic message carried by the error
    pub fn message(&self) -> &str {
        match self {
            Error::AllocationFailure(msg)
            | Error::MapFailure(msg)
            | Error::FlushFailure(msg)
            | Error::UsageViolation(msg)
            | Error::BackendError(msg)
            | Error::InitializationFailed(msg) => msg,
        }
    }

    /// Re-express the error as `kind` unless it already is one
    ///
    /// Backends may report e.g. a mapping problem as `BackendError`; callers
    /// of the resource API always see the category of the failed step.
    pub(crate) fn reclassify(self, kind: fn(String) -> Error) -> Error {
        let same_kind = std::mem::discriminant(&self) == std::mem::discriminant(&kind(String::new()));
        if same_kind {
            self
        } else {
            kind(self.message().to_string())
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AllocationFailure(msg) => write!(f, "Allocation failure: {}", msg),
            Error::MapFailure(msg) => write!(f, "Map failure: {}", msg),
            Error::FlushFailure(msg) => write!(f, "Flush failure: {}", msg),
            Error::UsageViolation(msg) => write!(f, "Usage violation: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
