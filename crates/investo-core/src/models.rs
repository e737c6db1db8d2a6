//! Value records shared by the ledger, the gateway and the aggregators

use crate::error::{InvestoError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

pub type UserId = i64;
pub type HoldingId = i64;

static SYMBOL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][A-Z0-9.\-]{0,9}$").expect("Invalid regex pattern")
});

/// Trim and uppercase a ticker, rejecting anything that cannot be one
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    if SYMBOL_PATTERN.is_match(&symbol) {
        Ok(symbol)
    } else {
        Err(InvestoError::InvalidInput(format!(
            "'{}' is not a valid ticker symbol",
            raw.trim()
        )))
    }
}

/// A user's paper position in one ticker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub id: HoldingId,
    pub user_id: UserId,
    /// Uppercase ticker, unique per user
    pub symbol: String,
    /// Display name captured from the quote at purchase time
    pub company_name: Option<String>,
    /// Always positive while the holding exists
    pub shares: u64,
    /// Share-weighted mean purchase price
    pub average_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Holding fields known before the store assigns an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHolding {
    pub user_id: UserId,
    pub symbol: String,
    pub company_name: Option<String>,
    pub shares: u64,
    pub average_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Latest traded price for a symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    /// Company name when the provider includes it
    pub name: Option<String>,
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
}

/// One daily bar of the historical series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Per-share fundamentals and enterprise-value inputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub symbol: String,
    pub earnings_per_share: Option<Decimal>,
    pub book_value_per_share: Option<Decimal>,
    pub revenue_per_share: Option<Decimal>,
    pub enterprise_value: Option<Decimal>,
    pub ebitda: Option<Decimal>,
}

/// Valuation ratios; `None` means "not meaningful", never an error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Multiples {
    pub pe: Option<Decimal>,
    pub pb: Option<Decimal>,
    pub ps: Option<Decimal>,
    pub ev_ebitda: Option<Decimal>,
}

/// Search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub symbol: String,
    pub name: String,
    pub exchange: Option<String>,
    pub exchange_short_name: Option<String>,
    pub stock_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsHeadline {
    pub title: String,
    pub url: String,
    pub published_date: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    Bullish,
    Bearish,
    Neutral,
    Unknown,
}

impl SentimentLabel {
    /// Accepts the loose spellings models tend to produce
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bullish" | "positive" => Self::Bullish,
            "bearish" | "negative" => Self::Bearish,
            "neutral" | "mixed" => Self::Neutral,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValuationCall {
    Undervalued,
    FairlyValued,
    Overvalued,
    Unknown,
}

impl ValuationCall {
    pub fn parse_lenient(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(char::is_ascii_alphabetic)
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "undervalued" => Self::Undervalued,
            "fairlyvalued" | "fair" | "fairvalue" => Self::FairlyValued,
            "overvalued" => Self::Overvalued,
            _ => Self::Unknown,
        }
    }
}

/// AI commentary for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSummary {
    pub symbol: String,
    pub sentiment_label: SentimentLabel,
    /// -1.0 (very bearish) to 1.0 (very bullish)
    pub sentiment_score: f64,
    pub sentiment_rationale: String,
    pub valuation_commentary: String,
    pub recommendation: ValuationCall,
    pub key_insights: Vec<String>,
    pub top_headlines: Vec<NewsHeadline>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainLoss {
    pub market_value: Decimal,
    pub gain_loss: Decimal,
    pub gain_loss_pct: Option<Decimal>,
}

/// A holding priced at request time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingView {
    #[serde(flatten)]
    pub holding: Holding,
    pub cost_basis: Decimal,
    /// `None` when the quote could not be fetched
    pub current_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub gain_loss: Option<Decimal>,
    pub gain_loss_pct: Option<Decimal>,
}

impl HoldingView {
    pub fn is_priced(&self) -> bool {
        self.market_value.is_some()
    }
}

/// Point-in-time view of a user's portfolio; recomputed on every read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub holdings: Vec<HoldingView>,
    /// Totals only cover holdings that could be priced
    pub total_market_value: Decimal,
    pub total_cost_basis: Decimal,
    pub total_gain_loss: Decimal,
    pub total_gain_loss_pct: Option<Decimal>,
    /// Symbols whose quote could not be fetched
    pub incomplete_symbols: BTreeSet<String>,
    pub as_of: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn is_complete(&self) -> bool {
        self.incomplete_symbols.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InsightStatus {
    Generated,
    /// Caller opted out
    Skipped,
    Failed { reason: String },
}

/// Single-symbol detail view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDetail {
    pub symbol: String,
    pub quote: Quote,
    pub multiples: Multiples,
    /// `None` when the series could not be fetched
    pub historical_series: Option<Vec<PricePoint>>,
    pub insight: Option<InsightSummary>,
    pub insight_status: InsightStatus,
}

/// Result of selling shares out of a holding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOutcome {
    /// `None` when the sale closed the position
    pub remaining: Option<Holding>,
    pub shares_sold: u64,
    pub realized_gain_loss: Decimal,
}
