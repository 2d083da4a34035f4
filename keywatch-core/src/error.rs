use thiserror::Error;

/// Errors surfaced by the timed add operations.
///
/// Missing or already-present keys are not errors; those outcomes are
/// reported through the boolean results of the store operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AddError {
    /// The requested deadline was not strictly later than the current time.
    #[error("expiration deadline must be strictly in the future")]
    DeadlineNotInFuture,
}
