//! Inbound operations for the presentation layer
//!
//! Normalizes caller input (symbols, search queries, limits) and routes each
//! request to the ledger, the aggregator or the assembler.

use crate::api::{FmpClient, MarketDataGateway};
use crate::config::InvestoConfig;
use crate::detail::StockDetailAssembler;
use crate::error::{InvestoError, Result};
use crate::insight::{InsightGenerator, LlmInsightGenerator};
use crate::ledger::{HoldingLedger, SqliteHoldingStore, ensure_positive};
use crate::models::{
    Holding, HoldingId, PortfolioSnapshot, SaleOutcome, StockDetail, SymbolMatch, UserId,
    normalize_symbol,
};
use crate::portfolio::PortfolioAggregator;
use crate::retry::with_timeout;
use investo_llm::LLMProvider;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Upper bound on search results per request
pub const MAX_SEARCH_LIMIT: usize = 50;

pub struct InvestoService {
    config: InvestoConfig,
    ledger: Arc<HoldingLedger>,
    gateway: Arc<dyn MarketDataGateway>,
    portfolio: PortfolioAggregator,
    detail: StockDetailAssembler,
}

impl InvestoService {
    pub fn new(
        config: InvestoConfig,
        ledger: Arc<HoldingLedger>,
        gateway: Arc<dyn MarketDataGateway>,
        generator: Arc<dyn InsightGenerator>,
    ) -> Self {
        let portfolio = PortfolioAggregator::new(ledger.clone(), gateway.clone(), &config);
        let detail = StockDetailAssembler::new(gateway.clone(), generator, &config);

        Self {
            config,
            ledger,
            gateway,
            portfolio,
            detail,
        }
    }

    /// Wire the FMP gateway, the SQLite ledger and the LLM insight generator
    pub async fn connect(config: InvestoConfig, provider: Arc<dyn LLMProvider>) -> Result<Self> {
        config.validate()?;

        let gateway = Arc::new(FmpClient::new(&config)?);
        let store = SqliteHoldingStore::connect(&config.database_url).await?;
        let ledger = Arc::new(HoldingLedger::new(Arc::new(store)));
        let generator = Arc::new(LlmInsightGenerator::new(provider, &config)?);

        info!(
            database = %config.database_url,
            model = %config.insight_model,
            "Investo service ready"
        );
        Ok(Self::new(config, ledger, gateway, generator))
    }

    pub fn config(&self) -> &InvestoConfig {
        &self.config
    }

    /// Search by ticker or company name; `limit` defaults to the configured one
    pub async fn search_stocks(&self, query: &str, limit: Option<usize>) -> Result<Vec<SymbolMatch>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(InvestoError::InvalidInput(
                "search query must not be empty".to_string(),
            ));
        }
        let limit = limit
            .unwrap_or(self.config.search_limit)
            .clamp(1, MAX_SEARCH_LIMIT);

        with_timeout(
            "market data",
            self.config.fetch_timeout,
            self.gateway.search_symbols(query, limit),
        )
        .await
    }

    pub async fn get_stock_detail(&self, symbol: &str, include_insight: bool) -> Result<StockDetail> {
        let symbol = normalize_symbol(symbol)?;
        self.detail.get_detail_with(&symbol, include_insight).await
    }

    pub async fn get_portfolio_snapshot(&self, user_id: UserId) -> Result<PortfolioSnapshot> {
        self.portfolio.get_snapshot(user_id).await
    }

    /// Buy shares; the symbol must be known to the market data provider,
    /// whose quote also supplies the company name
    pub async fn add_holding(
        &self,
        user_id: UserId,
        symbol: &str,
        shares: u64,
        price_per_share: Decimal,
    ) -> Result<Holding> {
        let symbol = normalize_symbol(symbol)?;
        ensure_positive(shares, price_per_share)?;

        let quote = with_timeout(
            "market data",
            self.config.fetch_timeout,
            self.gateway.get_quote(&symbol),
        )
        .await?;

        self.ledger
            .add_shares_with_name(
                user_id,
                &symbol,
                shares,
                price_per_share,
                quote.name.as_deref(),
            )
            .await
    }

    pub async fn sell_holding(
        &self,
        user_id: UserId,
        symbol: &str,
        shares: u64,
        price_per_share: Decimal,
    ) -> Result<SaleOutcome> {
        let symbol = normalize_symbol(symbol)?;
        self.ledger
            .sell_shares(user_id, &symbol, shares, price_per_share)
            .await
    }

    pub async fn update_holding(
        &self,
        user_id: UserId,
        holding_id: HoldingId,
        shares: u64,
    ) -> Result<Holding> {
        self.ledger.update_shares(user_id, holding_id, shares).await
    }

    pub async fn remove_holding(&self, user_id: UserId, holding_id: HoldingId) -> Result<()> {
        self.ledger.remove_holding(user_id, holding_id).await
    }

    pub async fn get_holding(&self, user_id: UserId, holding_id: HoldingId) -> Result<Holding> {
        self.ledger.get_holding(user_id, holding_id).await
    }

    pub async fn list_holdings(&self, user_id: UserId) -> Result<Vec<Holding>> {
        self.ledger.list_holdings(user_id).await
    }
}
