//! Error types for marginal-force

use thiserror::Error;

/// marginal-force error type
#[derive(Error, Debug)]
pub enum Error {
    /// Validation error (bad shapes, non-binary indicators, invalid parameters)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A named column is absent from a table
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Computation error (singular systems, non-finite intermediates)
    #[error("Computation error: {0}")]
    Computation(String),

    /// Model fitting failed (no convergence, separation)
    #[error("Fitting error: {0}")]
    Fit(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
