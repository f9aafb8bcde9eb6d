//! Common error taxonomy shared by all simulator crates.
//!
//! Worker threads fold recoverable errors into their stats counters and keep
//! running; only [`SimError::Fatal`] clears a component's `running` flag.

use thiserror::Error;

/// Result type for simulator operations.
pub type SimResult<T> = Result<T, SimError>;

/// Error classes used across every simulator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Null, out-of-range, or inconsistent input.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the input
        reason: String,
    },

    /// A bounded resource is full.
    #[error("capacity exceeded: {resource} (limit {limit})")]
    CapacityExceeded {
        /// Which resource hit its bound
        resource: &'static str,
        /// The configured bound
        limit: usize,
    },

    /// Operation attempted in the wrong state.
    #[error("state violation: {operation} while {state}")]
    StateViolation {
        /// The attempted operation
        operation: &'static str,
        /// The state that rejected it
        state: String,
    },

    /// Would-block condition; the caller may retry.
    #[error("transient: {reason}")]
    Transient {
        /// Why the operation could not proceed right now
        reason: String,
    },

    /// Unrecoverable failure (thread creation, allocation).
    #[error("fatal: {reason}")]
    Fatal {
        /// What failed
        reason: String,
    },
}

impl SimError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Whether a worker may swallow this error into a counter and continue.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_is_not_recoverable() {
        assert!(!SimError::fatal("thread spawn failed").is_recoverable());
        assert!(SimError::Transient {
            reason: "value changed".into()
        }
        .is_recoverable());
        assert!(SimError::CapacityExceeded {
            resource: "run queue",
            limit: 8
        }
        .is_recoverable());
    }

    #[test]
    fn display_includes_context() {
        let err = SimError::StateViolation {
            operation: "dequeue",
            state: "Offline".into(),
        };
        assert_eq!(err.to_string(), "state violation: dequeue while Offline");
    }
}
