//! Paper-portfolio valuation engine
//!
//! This crate holds the domain of investomommy. It includes:
//!
//! - A holdings ledger with weighted-average cost basis (in memory or SQLite)
//! - A market data gateway backed by Financial Modeling Prep
//! - Valuation multiples and gain/loss arithmetic on `Decimal`
//! - AI insight generation over recent news and fundamentals
//! - A portfolio aggregator that prices every holding concurrently
//! - A stock detail assembler that fans out quote, history and insight
//!
//! # Example
//!
//! ```rust,ignore
//! use investo_core::{InvestoConfig, InvestoService};
//! use investo_llm::providers::OpenAIProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = InvestoConfig::from_env()?;
//!     let provider = Arc::new(OpenAIProvider::from_env()?);
//!     let service = InvestoService::connect(config, provider).await?;
//!
//!     service.add_holding(1, "AAPL", 10, rust_decimal_macros::dec!(150)).await?;
//!     let snapshot = service.get_portfolio_snapshot(1).await?;
//!     println!("{}", snapshot.total_market_value);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod detail;
pub mod error;
pub mod insight;
pub mod ledger;
pub mod models;
pub mod portfolio;
pub mod retry;
pub mod service;
pub mod valuation;

pub use api::{FmpClient, MarketDataGateway};
pub use config::InvestoConfig;
pub use detail::StockDetailAssembler;
pub use error::{InvestoError, Result};
pub use insight::{InsightGenerator, InsightPrompts, LlmInsightGenerator};
pub use ledger::{HoldingLedger, HoldingStore, InMemoryHoldingStore, SqliteHoldingStore};
pub use models::*;
pub use portfolio::PortfolioAggregator;
pub use retry::RetryPolicy;
pub use service::InvestoService;
pub use valuation::{compute_gain_loss, compute_multiples, cost_basis, percent_change};
