//! Financial Modeling Prep (FMP) API client
//!
//! API Key: https://site.financialmodelingprep.com/developer/docs
//! Rate Limit: configurable, shared by every clone of the client

use super::MarketDataGateway;
use crate::config::InvestoConfig;
use crate::error::{InvestoError, Result};
use crate::models::{Fundamentals, NewsHeadline, PricePoint, Quote, SymbolMatch};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const PROVIDER: &str = "fmp";

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// FMP v3 client
#[derive(Debug, Clone)]
pub struct FmpClient {
    client: Client,
    base_url: String,
    api_key: String,
    rate_limiter: SharedRateLimiter,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct QuoteDto {
    symbol: String,
    name: Option<String>,
    price: Option<f64>,
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct HistoryDto {
    historical: Option<Vec<BarDto>>,
}

#[derive(Debug, Deserialize)]
struct BarDto {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct KeyMetricsDto {
    #[serde(rename = "netIncomePerShareTTM")]
    net_income_per_share: Option<f64>,
    #[serde(rename = "bookValuePerShareTTM")]
    book_value_per_share: Option<f64>,
    #[serde(rename = "revenuePerShareTTM")]
    revenue_per_share: Option<f64>,
    #[serde(rename = "enterpriseValueTTM")]
    enterprise_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IncomeStatementDto {
    ebitda: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchDto {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(alias = "stockExchange")]
    exchange_full_name: Option<String>,
    exchange_short_name: Option<String>,
    #[serde(rename = "type")]
    stock_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsDto {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    published_date: String,
    site: Option<String>,
}

impl FmpClient {
    /// Create a client from the engine configuration
    ///
    /// Fails with `Config` when no API key is configured.
    pub fn new(config: &InvestoConfig) -> Result<Self> {
        let api_key = config.require_fmp_api_key()?.to_string();

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| InvestoError::Config(format!("failed to build HTTP client: {e}")))?;

        let per_minute = NonZeroU32::new(config.rate_limit_per_minute).ok_or_else(|| {
            InvestoError::Config("rate_limit_per_minute must be greater than 0".to_string())
        })?;

        Ok(Self {
            client,
            base_url: config.fmp_base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            retry: config.retry_policy(),
        })
    }

    /// Create from FMP_API_KEY and the other INVESTO_* variables
    pub fn from_env() -> Result<Self> {
        Self::new(&InvestoConfig::from_env()?)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.retry
            .execute(path, || self.request(path, query))
            .await
    }

    async fn request(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "FMP request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| InvestoError::from_http(PROVIDER, &e.without_url()))?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| InvestoError::from_http(PROVIDER, &e.without_url()))?;

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| InvestoError::upstream(PROVIDER, format!("invalid JSON: {e}")))?;

        check_api_error(value)
    }
}

#[async_trait]
impl MarketDataGateway for FmpClient {
    #[instrument(skip(self))]
    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let value = self.get_json(&format!("quote/{symbol}"), &[]).await?;
        parse_quote(symbol, value)
    }

    #[instrument(skip(self))]
    async fn get_historical_series(&self, symbol: &str, days: u32) -> Result<Vec<PricePoint>> {
        let to = Utc::now().date_naive();
        let from = to
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);

        let value = self
            .get_json(
                &format!("historical-price-full/{symbol}"),
                &[("from", from.to_string()), ("to", to.to_string())],
            )
            .await?;
        parse_history(symbol, value)
    }

    #[instrument(skip(self))]
    async fn get_fundamentals(&self, symbol: &str) -> Result<Fundamentals> {
        let metrics_path = format!("key-metrics-ttm/{symbol}");
        let income_path = format!("income-statement/{symbol}");
        let income_query = [("limit", "1".to_string())];

        let (metrics, income) = tokio::join!(
            self.get_json(&metrics_path, &[]),
            self.get_json(&income_path, &income_query),
        );

        let mut fundamentals = parse_key_metrics(symbol, metrics?)?;

        fundamentals.ebitda = match income.and_then(parse_ebitda) {
            Ok(ebitda) => ebitda,
            Err(e) => {
                warn!(symbol, error = %e, "EBITDA unavailable, EV/EBITDA will be empty");
                None
            }
        };

        Ok(fundamentals)
    }

    #[instrument(skip(self))]
    async fn search_symbols(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>> {
        let value = self
            .get_json(
                "search",
                &[("query", query.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        parse_search(value, limit)
    }

    #[instrument(skip(self))]
    async fn get_news(&self, symbol: &str, limit: usize) -> Result<Vec<NewsHeadline>> {
        let value = self
            .get_json(
                "stock_news",
                &[("tickers", symbol.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        parse_news(value, limit)
    }
}

fn classify_status(status: StatusCode) -> Option<InvestoError> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => {
            InvestoError::unavailable(PROVIDER, "rate limited (HTTP 429)")
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            InvestoError::upstream(PROVIDER, format!("authentication rejected (HTTP {status})"))
        }
        s if s.is_server_error() => InvestoError::unavailable(PROVIDER, format!("HTTP {s}")),
        s => InvestoError::upstream(PROVIDER, format!("HTTP {s}")),
    })
}

/// FMP reports some failures inside a 200 body
fn check_api_error(value: Value) -> Result<Value> {
    if let Some(message) = value.get("Error Message").and_then(Value::as_str) {
        return Err(if message.to_ascii_lowercase().contains("limit") {
            InvestoError::unavailable(PROVIDER, message)
        } else {
            InvestoError::upstream(PROVIDER, message)
        });
    }

    if let Some(note) = value.get("Note").and_then(Value::as_str) {
        return Err(InvestoError::unavailable(PROVIDER, note));
    }

    Ok(value)
}

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| InvestoError::upstream(PROVIDER, format!("unexpected {what} payload: {e}")))
}

fn to_decimal(field: &str, value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(InvestoError::upstream(
            PROVIDER,
            format!("{field} is not a finite number"),
        ));
    }
    Decimal::from_f64(value)
        .ok_or_else(|| InvestoError::upstream(PROVIDER, format!("{field} out of range: {value}")))
}

fn to_optional_decimal(field: &str, value: Option<f64>) -> Result<Option<Decimal>> {
    value.map(|v| to_decimal(field, v)).transpose()
}

fn parse_quote(symbol: &str, value: Value) -> Result<Quote> {
    let quotes: Vec<QuoteDto> = decode("quote", value)?;
    let quote = quotes
        .into_iter()
        .next()
        .ok_or_else(|| InvestoError::NotFound(format!("symbol {symbol}")))?;

    let price = quote
        .price
        .ok_or_else(|| InvestoError::upstream(PROVIDER, format!("quote for {symbol} has no price")))?;

    Ok(Quote {
        symbol: quote.symbol,
        name: quote.name.filter(|n| !n.is_empty()),
        price: to_decimal("price", price)?,
        as_of: quote
            .timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now),
    })
}

fn parse_history(symbol: &str, value: Value) -> Result<Vec<PricePoint>> {
    let history: HistoryDto = decode("historical price", value)?;
    let bars = history
        .historical
        .ok_or_else(|| InvestoError::NotFound(format!("price history for {symbol}")))?;

    let mut points = bars
        .into_iter()
        .map(|bar| -> Result<PricePoint> {
            let raw_date = bar.date.get(..10).unwrap_or(&bar.date);
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
                InvestoError::upstream(PROVIDER, format!("bad bar date '{}': {e}", bar.date))
            })?;

            Ok(PricePoint {
                date,
                open: to_decimal("open", bar.open)?,
                high: to_decimal("high", bar.high)?,
                low: to_decimal("low", bar.low)?,
                close: to_decimal("close", bar.close)?,
                volume: bar.volume.max(0.0) as u64,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    points.sort_by_key(|p| p.date);
    Ok(points)
}

fn parse_key_metrics(symbol: &str, value: Value) -> Result<Fundamentals> {
    let metrics: Vec<KeyMetricsDto> = decode("key metrics", value)?;
    let metrics = metrics
        .into_iter()
        .next()
        .ok_or_else(|| InvestoError::NotFound(format!("fundamentals for {symbol}")))?;

    Ok(Fundamentals {
        symbol: symbol.to_string(),
        earnings_per_share: to_optional_decimal("netIncomePerShareTTM", metrics.net_income_per_share)?,
        book_value_per_share: to_optional_decimal(
            "bookValuePerShareTTM",
            metrics.book_value_per_share,
        )?,
        revenue_per_share: to_optional_decimal("revenuePerShareTTM", metrics.revenue_per_share)?,
        enterprise_value: to_optional_decimal("enterpriseValueTTM", metrics.enterprise_value)?,
        ebitda: None,
    })
}

fn parse_ebitda(value: Value) -> Result<Option<Decimal>> {
    let statements: Vec<IncomeStatementDto> = decode("income statement", value)?;
    match statements.into_iter().next() {
        Some(statement) => to_optional_decimal("ebitda", statement.ebitda),
        None => Ok(None),
    }
}

fn parse_search(value: Value, limit: usize) -> Result<Vec<SymbolMatch>> {
    let hits: Vec<SearchDto> = decode("search", value)?;
    Ok(hits
        .into_iter()
        .filter(|hit| !hit.symbol.is_empty())
        .take(limit)
        .map(|hit| SymbolMatch {
            name: hit.name.unwrap_or_default(),
            symbol: hit.symbol,
            exchange: hit.exchange_full_name,
            exchange_short_name: hit.exchange_short_name,
            stock_type: hit.stock_type,
        })
        .collect())
}

fn parse_news(value: Value, limit: usize) -> Result<Vec<NewsHeadline>> {
    let items: Vec<NewsDto> = decode("news", value)?;
    Ok(items
        .into_iter()
        .filter(|item| !item.title.trim().is_empty())
        .take(limit)
        .map(|item| NewsHeadline {
            title: item.title,
            url: item.url,
            published_date: item.published_date,
            source: item.site,
        })
        .collect())
}
