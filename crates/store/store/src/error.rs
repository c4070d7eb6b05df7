use std::time::Duration;

/// Errors that can occur during record store operations.
///
/// A missing record is not an error: lookups return `Ok(None)` and listings
/// return an empty `Vec`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be opened or became unreachable.
    #[error("connection error: {0}")]
    Connection(String),

    /// The exclusive write lock was not acquired within the configured window.
    #[error("write lock not acquired within {0:?}")]
    LockTimeout(Duration),

    /// Every generated identifier candidate was already taken.
    #[error("could not allocate a unique id after {attempts} attempts")]
    AllocationExhausted {
        /// Number of candidates tried.
        attempts: u32,
    },

    /// The record was rejected before or during persistence.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Any other failure reported by the backend while running a statement.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` if repeating the whole operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout(_) | Self::AllocationExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(StoreError::LockTimeout(Duration::from_secs(30)).is_retryable());
        assert!(StoreError::AllocationExhausted { attempts: 30 }.is_retryable());
        assert!(!StoreError::Connection("gone".into()).is_retryable());
        assert!(!StoreError::ConstraintViolation("empty".into()).is_retryable());
        assert!(!StoreError::Backend("io".into()).is_retryable());
    }

    #[test]
    fn display_messages() {
        let err = StoreError::AllocationExhausted { attempts: 30 };
        assert_eq!(
            err.to_string(),
            "could not allocate a unique id after 30 attempts"
        );
        let err = StoreError::LockTimeout(Duration::from_secs(2));
        assert_eq!(err.to_string(), "write lock not acquired within 2s");
    }
}
