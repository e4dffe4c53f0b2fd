//! Error types for ToyGen

use thiserror::Error;

/// ToyGen error type
#[derive(Error, Debug)]
pub enum Error {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// One or more requested variables are derived quantities and cannot be
    /// assigned a value directly. All offending names are accumulated before
    /// the request is rejected.
    #[error("cannot generate values for derived variables: {}", .0.join(", "))]
    DerivedTargets(Vec<String>),

    /// A reduced (marginalized) density could not be constructed.
    #[error("Integration error: {0}")]
    Integration(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
