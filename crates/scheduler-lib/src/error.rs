//! Error types for the scheduler components
//!
//! Every failure in this crate is recoverable at the call site: callers may
//! retry once capacity frees up or after correcting their configuration.

use thiserror::Error;

/// Main error type for scheduler operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// Out-of-range or inconsistent argument or configuration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device maximum is below the configured minimum unit count
    #[error("Capacity unavailable: host supports {supported} units, minimum is {required}")]
    CapacityUnavailable { supported: u32, required: u32 },

    /// A bounded queue is at capacity
    #[error("Queue full: {queue} queue already holds {capacity} tasks")]
    QueueFull { queue: &'static str, capacity: usize },

    /// Unknown task, resource unit or threshold
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl SchedulerError {
    /// Create an invalid-argument error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call later can succeed without changing
    /// the arguments
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::CapacityUnavailable { .. }
        )
    }
}

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Validate that a rating or fraction lies in `[0, 1]`
pub(crate) fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SchedulerError::invalid(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SchedulerError::CapacityUnavailable {
            supported: 3,
            required: 5,
        };
        assert_eq!(
            err.to_string(),
            "Capacity unavailable: host supports 3 units, minimum is 5"
        );

        let err = SchedulerError::not_found("task", 42);
        assert_eq!(err.to_string(), "task not found: 42");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(SchedulerError::QueueFull {
            queue: "pending",
            capacity: 10
        }
        .is_recoverable());
        assert!(!SchedulerError::invalid("bad").is_recoverable());
    }

    #[test]
    fn test_unit_interval_check() {
        assert!(check_unit_interval("fraction", 0.0).is_ok());
        assert!(check_unit_interval("fraction", 1.0).is_ok());
        assert!(check_unit_interval("fraction", 1.01).is_err());
        assert!(check_unit_interval("fraction", f64::NAN).is_err());
    }
}
