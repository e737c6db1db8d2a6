//! Configuration for the portfolio engine
//!
//! Built once at startup and handed to the gateway, the generator and the
//! aggregators explicitly. Nothing in the engine reads the environment on its
//! own.

use crate::error::{InvestoError, Result};
use crate::retry::RetryPolicy;
use investo_utils::{env_parse, env_string};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_FMP_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// Configuration for the portfolio engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestoConfig {
    /// Financial Modeling Prep API key
    pub fmp_api_key: Option<String>,

    /// Base URL of the FMP API (overridable for proxies and tests)
    pub fmp_base_url: String,

    /// Chat model used for insights
    pub insight_model: String,

    /// Sampling temperature for insights
    pub insight_temperature: f32,

    /// Token cap for a single insight completion
    pub insight_max_tokens: usize,

    /// HTTP request timeout for the market data client
    pub request_timeout: Duration,

    /// Budget for a single market data fetch made by the aggregators
    pub fetch_timeout: Duration,

    /// Budget for a single insight generation
    pub insight_timeout: Duration,

    /// Maximum concurrent quote fetches per portfolio snapshot
    pub fanout_concurrency: usize,

    /// Upstream requests allowed per minute
    pub rate_limit_per_minute: u32,

    /// Maximum attempts for a transient upstream failure
    pub max_retries: u32,

    /// Initial backoff duration for retries
    pub retry_backoff_base: Duration,

    /// Upper bound for a single backoff
    pub retry_backoff_max: Duration,

    /// Days of history shown on the detail view
    pub history_days: u32,

    /// Headlines handed to the insight generator
    pub news_limit: usize,

    /// Default number of search results
    pub search_limit: usize,

    /// SQLite database URL for the holding store
    pub database_url: String,
}

impl Default for InvestoConfig {
    fn default() -> Self {
        Self {
            fmp_api_key: None,
            fmp_base_url: DEFAULT_FMP_BASE_URL.to_string(),
            insight_model: "gpt-4o".to_string(),
            insight_temperature: 0.3,
            insight_max_tokens: 800,
            request_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            insight_timeout: Duration::from_secs(60),
            fanout_concurrency: 4,
            rate_limit_per_minute: 300,
            max_retries: 3,
            retry_backoff_base: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(8),
            history_days: 30,
            news_limit: 10,
            search_limit: 10,
            database_url: "sqlite://investomommy.db".to_string(),
        }
    }
}

impl InvestoConfig {
    /// Create a new configuration builder
    pub fn builder() -> InvestoConfigBuilder {
        InvestoConfigBuilder::default()
    }

    /// Build from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::builder().with_env()?.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.fanout_concurrency == 0 {
            return Err(InvestoError::Config(
                "fanout_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(InvestoError::Config(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_per_minute == 0 {
            return Err(InvestoError::Config(
                "rate_limit_per_minute must be greater than 0".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() || self.insight_timeout.is_zero() {
            return Err(InvestoError::Config(
                "fetch and insight timeouts must be non-zero".to_string(),
            ));
        }

        if self.history_days == 0 {
            return Err(InvestoError::Config(
                "history_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Require the market data key, for callers about to talk to FMP
    pub fn require_fmp_api_key(&self) -> Result<&str> {
        self.fmp_api_key.as_deref().ok_or_else(|| {
            InvestoError::Config("FMP_API_KEY is required for market data".to_string())
        })
    }

    /// Retry policy shared by the gateway and the insight generator
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_backoff_base,
            self.retry_backoff_max,
            2.0,
        )
    }
}

/// Builder for InvestoConfig
#[derive(Debug, Default)]
pub struct InvestoConfigBuilder {
    fmp_api_key: Option<String>,
    fmp_base_url: Option<String>,
    insight_model: Option<String>,
    request_timeout: Option<Duration>,
    fetch_timeout: Option<Duration>,
    insight_timeout: Option<Duration>,
    fanout_concurrency: Option<usize>,
    rate_limit_per_minute: Option<u32>,
    max_retries: Option<u32>,
    retry_backoff_base: Option<Duration>,
    history_days: Option<u32>,
    database_url: Option<String>,
}

impl InvestoConfigBuilder {
    /// Set the FMP API key
    pub fn fmp_api_key(mut self, key: impl Into<String>) -> Self {
        self.fmp_api_key = Some(key.into());
        self
    }

    /// Set the FMP base URL
    pub fn fmp_base_url(mut self, url: impl Into<String>) -> Self {
        self.fmp_base_url = Some(url.into());
        self
    }

    /// Set the chat model used for insights
    pub fn insight_model(mut self, model: impl Into<String>) -> Self {
        self.insight_model = Some(model.into());
        self
    }

    /// Set HTTP request timeout
    pub fn request_timeout(mut self, duration: Duration) -> Self {
        self.request_timeout = Some(duration);
        self
    }

    /// Set the per-fetch budget
    pub fn fetch_timeout(mut self, duration: Duration) -> Self {
        self.fetch_timeout = Some(duration);
        self
    }

    /// Set the insight budget
    pub fn insight_timeout(mut self, duration: Duration) -> Self {
        self.insight_timeout = Some(duration);
        self
    }

    /// Set the fan-out cap
    pub fn fanout_concurrency(mut self, concurrency: usize) -> Self {
        self.fanout_concurrency = Some(concurrency);
        self
    }

    /// Set the upstream rate limit
    pub fn rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = Some(limit);
        self
    }

    /// Set maximum retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set retry backoff base duration
    pub fn retry_backoff_base(mut self, duration: Duration) -> Self {
        self.retry_backoff_base = Some(duration);
        self
    }

    /// Set days of history for the detail view
    pub fn history_days(mut self, days: u32) -> Self {
        self.history_days = Some(days);
        self
    }

    /// Set the holding store URL
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Fill unset fields from the environment
    pub fn with_env(mut self) -> Result<Self> {
        if self.fmp_api_key.is_none() {
            self.fmp_api_key = env_string("FMP_API_KEY");
        }
        if self.fmp_base_url.is_none() {
            self.fmp_base_url = env_string("FMP_BASE_URL");
        }
        if self.insight_model.is_none() {
            self.insight_model = env_string("INVESTO_MODEL");
        }
        if self.database_url.is_none() {
            self.database_url = env_string("INVESTO_DATABASE_URL");
        }
        if self.fetch_timeout.is_none() {
            self.fetch_timeout =
                env_parse::<u64>("INVESTO_FETCH_TIMEOUT_SECS")?.map(Duration::from_secs);
        }
        if self.insight_timeout.is_none() {
            self.insight_timeout =
                env_parse::<u64>("INVESTO_INSIGHT_TIMEOUT_SECS")?.map(Duration::from_secs);
        }
        if self.fanout_concurrency.is_none() {
            self.fanout_concurrency = env_parse("INVESTO_FANOUT_CONCURRENCY")?;
        }
        if self.rate_limit_per_minute.is_none() {
            self.rate_limit_per_minute = env_parse("INVESTO_RATE_LIMIT_PER_MINUTE")?;
        }
        if self.max_retries.is_none() {
            self.max_retries = env_parse("INVESTO_MAX_RETRIES")?;
        }
        Ok(self)
    }

    /// Build the configuration
    pub fn build(self) -> Result<InvestoConfig> {
        let defaults = InvestoConfig::default();

        let config = InvestoConfig {
            fmp_api_key: self.fmp_api_key,
            fmp_base_url: self
                .fmp_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.fmp_base_url),
            insight_model: self.insight_model.unwrap_or(defaults.insight_model),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            fetch_timeout: self.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            insight_timeout: self.insight_timeout.unwrap_or(defaults.insight_timeout),
            fanout_concurrency: self.fanout_concurrency.unwrap_or(defaults.fanout_concurrency),
            rate_limit_per_minute: self
                .rate_limit_per_minute
                .unwrap_or(defaults.rate_limit_per_minute),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff_base: self.retry_backoff_base.unwrap_or(defaults.retry_backoff_base),
            history_days: self.history_days.unwrap_or(defaults.history_days),
            database_url: self.database_url.unwrap_or(defaults.database_url),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InvestoConfig::default();
        assert_eq!(config.fanout_concurrency, 4);
        assert_eq!(config.history_days, 30);
        assert_eq!(config.insight_model, "gpt-4o");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = InvestoConfig::builder()
            .fmp_api_key("demo")
            .fmp_base_url("http://localhost:9000/api/v3/")
            .fanout_concurrency(8)
            .fetch_timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        assert_eq!(config.fmp_api_key.as_deref(), Some("demo"));
        assert_eq!(config.fmp_base_url, "http://localhost:9000/api/v3");
        assert_eq!(config.fanout_concurrency, 8);
        assert_eq!(config.fetch_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let result = InvestoConfig::builder().fanout_concurrency(0).build();
        assert!(matches!(result, Err(InvestoError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = InvestoConfig {
            fetch_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_fmp_api_key() {
        let config = InvestoConfig::default();
        assert!(config.require_fmp_api_key().is_err());

        let config = InvestoConfig::builder().fmp_api_key("k").build().unwrap();
        assert_eq!(config.require_fmp_api_key().unwrap(), "k");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = InvestoConfig::builder()
            .max_retries(5)
            .retry_backoff_base(Duration::from_millis(10))
            .build()
            .unwrap();

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_from_env_reads_overrides() {
        unsafe {
            std::env::set_var("INVESTO_FANOUT_CONCURRENCY", "2");
            std::env::set_var("INVESTO_FETCH_TIMEOUT_SECS", "3");
        }

        let config = InvestoConfig::builder().with_env().unwrap().build().unwrap();
        assert_eq!(config.fanout_concurrency, 2);
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));

        unsafe {
            std::env::remove_var("INVESTO_FANOUT_CONCURRENCY");
            std::env::remove_var("INVESTO_FETCH_TIMEOUT_SECS");
        }
    }
}
