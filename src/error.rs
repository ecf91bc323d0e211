//! Error taxonomy shared by every component.
//!
//! Components return `RagError`; only the `Pipeline` inspects variants to decide
//! whether to recover, retry, or surface a failure to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid request: {0}")]
    InputError(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("dependency timed out: {0}")]
    DependencyTimeout(String),

    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::InputError(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DependencyUnavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::DependencyTimeout(msg.into())
    }

    pub fn inconsistency(msg: impl Into<String>) -> Self {
        Self::IndexInconsistency(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a caller-facing retry is plausibly worth attempting.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::DependencyUnavailable(_) | Self::DependencyTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RagError::unavailable("llm down").retryable());
        assert!(RagError::timeout("graph").retryable());
        assert!(!RagError::input("bad").retryable());
        assert!(!RagError::internal("oops").retryable());
    }

    #[test]
    fn display_messages_are_stable() {
        let e = RagError::inconsistency("chunk abc missing from graph");
        assert_eq!(e.to_string(), "index inconsistency: chunk abc missing from graph");
    }
}
