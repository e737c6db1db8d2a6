//! Market data gateway

pub mod fmp;

pub use fmp::FmpClient;

use crate::error::Result;
use crate::models::{Fundamentals, NewsHeadline, PricePoint, Quote, SymbolMatch};
use async_trait::async_trait;

/// Typed access to quotes, history, fundamentals, search and news
///
/// Implementations own retry, backoff and rate limiting. Callers see
/// `NotFound`, `UpstreamUnavailable` or `UpstreamError` on failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<Quote>;

    /// Daily bars covering the last `days` days, oldest first
    async fn get_historical_series(&self, symbol: &str, days: u32) -> Result<Vec<PricePoint>>;

    async fn get_fundamentals(&self, symbol: &str) -> Result<Fundamentals>;

    async fn search_symbols(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>>;

    /// Most recent headlines first
    async fn get_news(&self, symbol: &str, limit: usize) -> Result<Vec<NewsHeadline>>;
}
