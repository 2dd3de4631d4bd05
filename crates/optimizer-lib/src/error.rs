//! Error types shared across the optimizer

use std::time::Duration;
use thiserror::Error;

/// Failure talking to an external collaborator.
///
/// These never escape a read path: callers log them and fall back to cached
/// values or safe defaults.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The call did not complete within its time budget
    #[error("{service} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        service: &'static str,
        timeout: Duration,
    },

    /// Network-level failure
    #[error("{service} transport error: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    /// Remote side answered with an error status
    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Response could not be decoded
    #[error("{service} returned malformed data: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    /// Collaborator is not configured or refused the operation
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub fn transport(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            service,
            message: err.to_string(),
        }
    }

    pub fn decode(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            service,
            message: err.to_string(),
        }
    }

    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            message: message.into(),
        }
    }

    /// True when the failure was a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Invalid configuration, detected before any cycle runs
#[derive(Debug, Error)]
#[error("configuration validation failed: {}", .errors.join("; "))]
pub struct ConfigError {
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_joins_messages() {
        let err = ConfigError {
            errors: vec!["budget_limit must be positive".into(), "bad region".into()],
        };
        assert_eq!(
            err.to_string(),
            "configuration validation failed: budget_limit must be positive; bad region"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = CollaboratorError::Timeout {
            service: "metadata",
            timeout: Duration::from_secs(2),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "metadata timed out after 2000ms");
    }
}
