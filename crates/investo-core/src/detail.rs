//! Single-symbol detail view

use crate::api::MarketDataGateway;
use crate::config::InvestoConfig;
use crate::error::{InvestoError, Result};
use crate::insight::InsightGenerator;
use crate::models::{InsightStatus, InsightSummary, StockDetail};
use crate::retry::with_timeout;
use crate::valuation::compute_multiples;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const MARKET_DATA: &str = "market data";

pub struct StockDetailAssembler {
    gateway: Arc<dyn MarketDataGateway>,
    generator: Arc<dyn InsightGenerator>,
    fetch_timeout: Duration,
    insight_timeout: Duration,
    history_days: u32,
    news_limit: usize,
}

impl StockDetailAssembler {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        generator: Arc<dyn InsightGenerator>,
        config: &InvestoConfig,
    ) -> Self {
        Self {
            gateway,
            generator,
            fetch_timeout: config.fetch_timeout,
            insight_timeout: config.insight_timeout,
            history_days: config.history_days,
            news_limit: config.news_limit,
        }
    }

    pub async fn get_detail(&self, symbol: &str) -> Result<StockDetail> {
        self.get_detail_with(symbol, true).await
    }

    /// Quote, fundamentals, history and insight, fetched concurrently
    ///
    /// The insight waits for the quote and fundamentals so the prompt carries
    /// the live price and multiples. Quote and fundamentals failures are
    /// returned as errors. A missing history or insight only empties that field.
    #[instrument(skip(self))]
    pub async fn get_detail_with(&self, symbol: &str, include_insight: bool) -> Result<StockDetail> {
        let history = with_timeout(
            MARKET_DATA,
            self.fetch_timeout,
            self.gateway.get_historical_series(symbol, self.history_days),
        );

        // Quote and fundamentals feed both the multiples and the insight prompt
        let analysis = async {
            let news = async {
                if !include_insight {
                    return Vec::new();
                }
                with_timeout(
                    MARKET_DATA,
                    self.fetch_timeout,
                    self.gateway.get_news(symbol, self.news_limit),
                )
                .await
                .unwrap_or_else(|e| {
                    warn!(symbol, error = %e, "News unavailable, generating insight without it");
                    Vec::new()
                })
            };

            let (quote, fundamentals, news) = tokio::join!(
                with_timeout(MARKET_DATA, self.fetch_timeout, self.gateway.get_quote(symbol)),
                with_timeout(
                    MARKET_DATA,
                    self.fetch_timeout,
                    self.gateway.get_fundamentals(symbol)
                ),
                news,
            );
            let quote = quote?;
            let fundamentals = fundamentals?;

            let insight = if include_insight {
                Some(
                    with_timeout(
                        "insight",
                        self.insight_timeout,
                        self.generator
                            .generate_insight(symbol, &news, &quote, &fundamentals),
                    )
                    .await,
                )
            } else {
                None
            };

            Ok::<_, InvestoError>((quote, fundamentals, insight))
        };

        let (history, analysis) = tokio::join!(history, analysis);
        let (quote, fundamentals, insight) = analysis?;

        let historical_series = match history {
            Ok(series) => Some(series),
            Err(e) => {
                warn!(symbol, error = %e, "Price history unavailable");
                None
            }
        };

        let (insight, insight_status) = resolve_insight(symbol, insight);
        let multiples = compute_multiples(&quote, &fundamentals);

        debug!(
            symbol,
            has_history = historical_series.is_some(),
            ?insight_status,
            "Assembled stock detail"
        );

        Ok(StockDetail {
            symbol: quote.symbol.clone(),
            quote,
            multiples,
            historical_series,
            insight,
            insight_status,
        })
    }
}

fn resolve_insight(
    symbol: &str,
    outcome: Option<Result<InsightSummary>>,
) -> (Option<InsightSummary>, InsightStatus) {
    match outcome {
        None => (None, InsightStatus::Skipped),
        Some(Ok(summary)) => (Some(summary), InsightStatus::Generated),
        Some(Err(e)) => {
            warn!(symbol, error = %e, "Insight generation failed");
            (
                None,
                InsightStatus::Failed {
                    reason: e.to_string(),
                },
            )
        }
    }
}
