//! Error handling for the reconciliation and analytics engine
//!
//! Defines custom error types and establishes a unified Result type
//! using anyhow for context chaining and error propagation.
//!
//! Degenerate inputs (empty series, zero denominators) are NOT errors:
//! those return neutral defaults so a dashboard can render a brand-new
//! account. Errors are reserved for caller bugs such as mismatched
//! return-series lengths.

use thiserror::Error;

/// Core error types for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("mismatched series lengths: {left} vs {right}")]
    MismatchedSeries { left: usize, right: usize },

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for engine operations
pub type Result<T> = anyhow::Result<T>;
