//! Error types for the display WSI layer
//!
//! This module defines the error classes reported upward to the swapchain
//! lifecycle manager. The first four variants are the outcomes the caller must
//! be able to tell apart, because each implies a different recovery.

use std::fmt;

/// Result type for display WSI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Display WSI errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Swapchain or image initialization failed (no common modifier,
    /// framebuffer creation failed, allocator unavailable, ...)
    InitializationFailed(String),

    /// Host allocation failed (list growth, buffer allocation)
    OutOfHostMemory,

    /// The requested format/modifier is not supported by the allocator or display
    FormatNotSupported(String),

    /// A kernel display call failed; the swapchain must be abandoned
    SurfaceLost(String),

    /// A presentation fence wait expired before the payload completed
    Timeout,

    /// Any other failure reported by the device dispatch
    BackendError(String),
}

impl Error {
    /// Whether this error is the sticky lost-surface condition
    pub fn is_surface_lost(&self) -> bool {
        matches!(self, Error::SurfaceLost(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::OutOfHostMemory => write!(f, "Out of host memory"),
            Error::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            Error::SurfaceLost(msg) => write!(f, "Surface lost: {}", msg),
            Error::Timeout => write!(f, "Timed out"),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfHostMemory
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
