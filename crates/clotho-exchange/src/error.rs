//! Exchange API error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure or timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Well-formed error response from the exchange.
    #[error("Exchange error {status} {name}: {message}")]
    Exchange {
        status: u16,
        name: String,
        message: String,
    },

    /// Response body that could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid credentials or client setup. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    /// Transport failures, rate limits and overload responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Exchange { status, .. } => *status == 429 || *status >= 500,
            Self::Protocol(_) | Self::Configuration(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Protocol(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ApiError::Transport("timeout".into()).is_retryable());
        let overloaded = ApiError::Exchange {
            status: 503,
            name: "HTTPError".into(),
            message: "The system is currently overloaded".into(),
        };
        assert!(overloaded.is_retryable());
        let rejected = ApiError::Exchange {
            status: 400,
            name: "ValidationError".into(),
            message: "Invalid orderQty".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(!ApiError::Configuration("bad secret".into()).is_retryable());
    }
}
