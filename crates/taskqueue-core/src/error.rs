//! Typed error kinds (§7). The dispatch loop is non-failing: only the
//! variants that cross a transport or operator-facing boundary are ever
//! returned from a public API; everything else is logged via `tracing` and
//! swallowed inside the loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task '{0}' unregistered")]
    NotRegistered(String),

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("client limit exceeded, please try again later")]
    ClientLimitExceeded,

    #[error("transient error: {0}")]
    Transient(String),

    #[error("handler error: {0}")]
    HandlerError(String),

    #[error("panic: {0}")]
    Panic(String),
}

impl SchedulerError {
    /// Whether the error is safe to retry without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_flagged_correctly() {
        assert!(SchedulerError::Transient("db down".into()).is_transient());
        assert!(!SchedulerError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn display_messages_are_human_readable() {
        assert_eq!(
            SchedulerError::NotRegistered("email".into()).to_string(),
            "task 'email' unregistered"
        );
        assert_eq!(
            SchedulerError::ClientLimitExceeded.to_string(),
            "client limit exceeded, please try again later"
        );
    }
}
