//! Error types for the load engine.
//!
//! Only [`EngineError`] and [`CatalogError`] are fatal. Everything that goes wrong during a single
//! request or flow step is recovered locally and surfaces as a failed sample.

use thiserror::Error;

/// A fault raised by the request-execution collaborator.
///
/// These are never propagated beyond the virtual user that observed them; they are classified as
/// failed samples instead.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection to the target could not be established or broke mid-request.
    #[error("connection error: {0}")]
    Connect(String),

    /// The response body could not be read or decoded.
    #[error("failed to decode response body: {0}")]
    Decode(String),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// A sample which cannot be represented.
#[derive(Debug, Error)]
pub enum SampleError {
    /// Durations must be finite and non-negative.
    #[error("invalid sample duration: {0}s")]
    InvalidDuration(f64),
}

/// Errors while building a [`TaskCatalog`](crate::TaskCatalog).
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Weights must be at least `1`.
    #[error("task `{0}` has a weight of zero")]
    ZeroWeight(String),

    /// Names must be unique within a catalog.
    #[error("task `{0}` is registered more than once")]
    DuplicateName(String),

    /// A catalog needs at least one entry.
    #[error("the task catalog is empty")]
    Empty,

    /// The sum of all weights does not fit the weight type.
    #[error("invalid weights: {0}")]
    Weights(#[from] rand_distr::weighted::Error),
}

/// Process-level errors that prevent the engine from running.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The catalog could not be built.
    #[error("invalid task catalog: {0}")]
    Catalog(#[from] CatalogError),

    /// The engine was asked to run without any virtual users.
    #[error("population must be at least one virtual user")]
    EmptyPopulation,

    /// Think-time bounds are inverted.
    #[error("invalid think time: min {min:?} exceeds max {max:?}")]
    InvalidThinkTime {
        /// Lower bound.
        min: std::time::Duration,
        /// Upper bound.
        max: std::time::Duration,
    },

    /// The spawn rate must be positive and finite.
    #[error("invalid spawn rate: {0}")]
    InvalidSpawnRate(f64),

    /// No virtual user could be started.
    #[error("failed to start any virtual user")]
    NoUsersStarted,
}

/// Result type for engine operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
