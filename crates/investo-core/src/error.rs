//! Error types for portfolio and market data operations

use investo_llm::LLMError;
use thiserror::Error;

/// Errors surfaced by the engine
///
/// Ledger variants (`InvalidQuantity`, `NotFound`, `InvalidInput`) describe
/// caller mistakes and always propagate. Upstream variants describe a single
/// failed data point; the aggregator and the assembler absorb them wherever the
/// field is optional.
#[derive(Debug, Error)]
pub enum InvestoError {
    /// Share count or price was zero, negative, or more than is held
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Holding or symbol does not exist (or is not owned by the caller)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed caller input such as an empty search or a bad ticker
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Provider timed out, rate limited us, or answered with a server error
    #[error("{provider} unavailable: {reason}")]
    UpstreamUnavailable {
        provider: String,
        reason: String,
    },

    /// Provider answered with something we could not use
    #[error("{provider} returned an unusable response: {reason}")]
    UpstreamError {
        provider: String,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Holding store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, InvestoError>;

impl InvestoError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn upstream(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamError {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Only transient provider failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }

    /// Errors caused by the caller's input rather than by the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuantity(_) | Self::NotFound(_) | Self::InvalidInput(_)
        )
    }

    /// Errors originating at the market data or insight provider
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::UpstreamError { .. }
        )
    }

    /// Classify a reqwest failure against a named provider
    pub fn from_http(provider: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::unavailable(provider, err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 || status.is_server_error() {
                Self::unavailable(provider, format!("HTTP {status}"))
            } else {
                Self::upstream(provider, format!("HTTP {status}"))
            }
        } else {
            Self::upstream(provider, err.to_string())
        }
    }
}

impl From<serde_json::Error> for InvestoError {
    fn from(err: serde_json::Error) -> Self {
        Self::upstream("json", err.to_string())
    }
}

impl From<LLMError> for InvestoError {
    fn from(err: LLMError) -> Self {
        if err.is_transient() {
            Self::unavailable("llm", err.to_string())
        } else if let LLMError::ConfigurationError(msg) = err {
            Self::Config(msg)
        } else {
            Self::upstream("llm", err.to_string())
        }
    }
}

impl From<sqlx::Error> for InvestoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("holding".to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<investo_utils::EnvError> for InvestoError {
    fn from(err: investo_utils::EnvError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InvestoError::InvalidQuantity("shares must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid quantity: shares must be positive");

        let err = InvestoError::unavailable("fmp", "timed out");
        assert_eq!(err.to_string(), "fmp unavailable: timed out");
    }

    #[test]
    fn test_classification() {
        assert!(InvestoError::unavailable("fmp", "429").is_retryable());
        assert!(!InvestoError::upstream("fmp", "bad json").is_retryable());
        assert!(!InvestoError::NotFound("ZZZZ".to_string()).is_retryable());

        assert!(InvestoError::InvalidQuantity("0".to_string()).is_client_error());
        assert!(InvestoError::InvalidInput("".to_string()).is_client_error());
        assert!(!InvestoError::Storage("disk".to_string()).is_client_error());

        assert!(InvestoError::upstream("llm", "garbage").is_upstream());
        assert!(!InvestoError::Config("key".to_string()).is_upstream());
    }

    #[test]
    fn test_llm_error_conversion() {
        let err: InvestoError = LLMError::RateLimitExceeded("slow down".to_string()).into();
        assert!(matches!(err, InvestoError::UpstreamUnavailable { .. }));

        let err: InvestoError = LLMError::UnexpectedResponse("no choices".to_string()).into();
        assert!(matches!(err, InvestoError::UpstreamError { .. }));

        let err: InvestoError = LLMError::ConfigurationError("no key".to_string()).into();
        assert!(matches!(err, InvestoError::Config(_)));
    }

    #[test]
    fn test_json_error_is_not_retryable() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: InvestoError = json_err.into();
        assert!(err.is_upstream());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: InvestoError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, InvestoError::NotFound(_)));
    }
}
