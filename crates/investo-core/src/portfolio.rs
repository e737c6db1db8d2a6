//! Portfolio snapshots
//!
//! Prices every holding of a user at request time. A symbol whose quote
//! cannot be fetched, or whose value does not fit in a `Decimal`, stays in the
//! snapshot with empty price fields and is left out of the totals.

use crate::api::MarketDataGateway;
use crate::config::InvestoConfig;
use crate::error::{InvestoError, Result};
use crate::ledger::HoldingLedger;
use crate::models::{Holding, HoldingView, PortfolioSnapshot, UserId};
use crate::retry::with_timeout;
use crate::valuation::{compute_gain_loss, cost_basis, percent_change};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub struct PortfolioAggregator {
    ledger: Arc<HoldingLedger>,
    gateway: Arc<dyn MarketDataGateway>,
    concurrency: usize,
    fetch_timeout: Duration,
}

impl PortfolioAggregator {
    pub fn new(
        ledger: Arc<HoldingLedger>,
        gateway: Arc<dyn MarketDataGateway>,
        config: &InvestoConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            concurrency: config.fanout_concurrency.max(1),
            fetch_timeout: config.fetch_timeout,
        }
    }

    /// Price every holding of `user_id`
    ///
    /// Ledger errors propagate; quote failures only mark the symbol incomplete.
    #[instrument(skip(self))]
    pub async fn get_snapshot(&self, user_id: UserId) -> Result<PortfolioSnapshot> {
        let holdings = self.ledger.list_holdings(user_id).await?;
        let prices = self.fetch_prices(&holdings).await;
        build_snapshot(holdings, &prices)
    }

    /// One quote per distinct symbol, at most `concurrency` in flight
    async fn fetch_prices(&self, holdings: &[Holding]) -> HashMap<String, Decimal> {
        let symbols: BTreeSet<&str> = holdings.iter().map(|h| h.symbol.as_str()).collect();
        let gateway = &self.gateway;
        let budget = self.fetch_timeout;

        let results: Vec<_> = stream::iter(symbols)
            .map(|symbol| async move {
                let quote = with_timeout("market data", budget, gateway.get_quote(symbol)).await;
                (symbol, quote)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(symbol, quote)| match quote {
                Ok(quote) => Some((symbol.to_string(), quote.price)),
                Err(e) => {
                    warn!(symbol, error = %e, "Quote unavailable, holding left unpriced");
                    None
                }
            })
            .collect()
    }
}

/// Running sums over priced holdings
#[derive(Default)]
struct Totals {
    market_value: Decimal,
    cost_basis: Decimal,
    gain_loss: Decimal,
}

impl Totals {
    fn plus(&self, market_value: Decimal, cost: Decimal, gain_loss: Decimal) -> Option<Self> {
        Some(Self {
            market_value: self.market_value.checked_add(market_value)?,
            cost_basis: self.cost_basis.checked_add(cost)?,
            gain_loss: self.gain_loss.checked_add(gain_loss)?,
        })
    }
}

/// Assemble views and totals; holdings missing from `prices` are incomplete
fn build_snapshot(
    holdings: Vec<Holding>,
    prices: &HashMap<String, Decimal>,
) -> Result<PortfolioSnapshot> {
    let mut totals = Totals::default();
    let mut incomplete_symbols = BTreeSet::new();
    let mut views = Vec::with_capacity(holdings.len());

    for holding in holdings {
        // The ledger never stores a position whose cost overflows
        let cost = cost_basis(&holding).ok_or_else(|| {
            InvestoError::Storage(format!("cost basis of holding {} overflows", holding.id))
        })?;

        let priced = prices.get(&holding.symbol).and_then(|&price| {
            let gain = compute_gain_loss(&holding, price)?;
            let next = totals.plus(gain.market_value, cost, gain.gain_loss)?;
            Some((price, gain, next))
        });

        let view = match priced {
            Some((price, gain, next)) => {
                totals = next;
                HoldingView {
                    holding,
                    cost_basis: cost,
                    current_price: Some(price),
                    market_value: Some(gain.market_value),
                    gain_loss: Some(gain.gain_loss),
                    gain_loss_pct: gain.gain_loss_pct,
                }
            }
            None => {
                if prices.contains_key(&holding.symbol) {
                    warn!(
                        symbol = %holding.symbol,
                        shares = holding.shares,
                        "Position value out of range, holding left unpriced"
                    );
                }
                incomplete_symbols.insert(holding.symbol.clone());
                HoldingView {
                    holding,
                    cost_basis: cost,
                    current_price: None,
                    market_value: None,
                    gain_loss: None,
                    gain_loss_pct: None,
                }
            }
        };
        views.push(view);
    }

    debug!(
        holdings = views.len(),
        incomplete = incomplete_symbols.len(),
        "Built portfolio snapshot"
    );

    Ok(PortfolioSnapshot {
        holdings: views,
        total_market_value: totals.market_value,
        total_cost_basis: totals.cost_basis,
        total_gain_loss: totals.gain_loss,
        total_gain_loss_pct: percent_change(totals.cost_basis, totals.market_value),
        incomplete_symbols,
        as_of: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockMarketDataGateway;
    use crate::error::InvestoError;
    use crate::models::{Fundamentals, NewsHeadline, PricePoint, Quote, SymbolMatch};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quote(symbol: &str, price: Decimal) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            name: None,
            price,
            as_of: Utc::now(),
        }
    }

    fn aggregator(
        ledger: Arc<HoldingLedger>,
        gateway: impl MarketDataGateway + 'static,
        config: &InvestoConfig,
    ) -> PortfolioAggregator {
        PortfolioAggregator::new(ledger, Arc::new(gateway), config)
    }

    #[tokio::test]
    async fn test_partial_failure_excluded_from_totals() {
        let ledger = Arc::new(HoldingLedger::in_memory());
        ledger.add_shares(1, "AAPL", 20, dec!(110)).await.unwrap();
        ledger.add_shares(1, "ZZZZ", 5, dec!(10)).await.unwrap();

        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_get_quote().returning(|symbol| {
            if symbol == "AAPL" {
                Ok(quote(symbol, dec!(150)))
            } else {
                Err(InvestoError::unavailable("fmp", "HTTP 503"))
            }
        });

        let snapshot = aggregator(ledger, gateway, &InvestoConfig::default())
            .get_snapshot(1)
            .await
            .unwrap();

        assert_eq!(snapshot.holdings.len(), 2);
        assert_eq!(snapshot.holdings[0].holding.symbol, "AAPL");
        assert_eq!(snapshot.holdings[0].market_value, Some(dec!(3000)));
        assert_eq!(snapshot.holdings[1].holding.symbol, "ZZZZ");
        assert_eq!(snapshot.holdings[1].market_value, None);
        assert_eq!(snapshot.holdings[1].cost_basis, dec!(50));

        assert_eq!(snapshot.total_market_value, dec!(3000));
        assert_eq!(snapshot.total_cost_basis, dec!(2200));
        assert_eq!(snapshot.total_gain_loss, dec!(800));
        assert_eq!(
            snapshot.incomplete_symbols,
            BTreeSet::from(["ZZZZ".to_string()])
        );
        assert!(!snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_empty_portfolio() {
        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_get_quote().never();

        let snapshot = aggregator(
            Arc::new(HoldingLedger::in_memory()),
            gateway,
            &InvestoConfig::default(),
        )
        .get_snapshot(42)
        .await
        .unwrap();

        assert!(snapshot.holdings.is_empty());
        assert_eq!(snapshot.total_market_value, Decimal::ZERO);
        assert_eq!(snapshot.total_gain_loss_pct, None);
        assert!(snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_totals_match_priced_views() {
        let ledger = Arc::new(HoldingLedger::in_memory());
        ledger.add_shares(3, "AAPL", 10, dec!(100)).await.unwrap();
        ledger.add_shares(3, "MSFT", 4, dec!(300)).await.unwrap();
        ledger.add_shares(3, "TSLA", 2, dec!(250)).await.unwrap();

        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_get_quote().returning(|symbol| match symbol {
            "AAPL" => Ok(quote(symbol, dec!(90))),
            "MSFT" => Ok(quote(symbol, dec!(350.25))),
            _ => Err(InvestoError::upstream("fmp", "garbled")),
        });

        let snapshot = aggregator(ledger, gateway, &InvestoConfig::default())
            .get_snapshot(3)
            .await
            .unwrap();

        let priced: Vec<_> = snapshot.holdings.iter().filter(|v| v.is_priced()).collect();
        let market_value: Decimal = priced.iter().filter_map(|v| v.market_value).sum();
        let gain_loss: Decimal = priced.iter().filter_map(|v| v.gain_loss).sum();

        assert_eq!(snapshot.total_market_value, market_value);
        assert_eq!(snapshot.total_gain_loss, gain_loss);
        assert_eq!(snapshot.total_gain_loss, dec!(101));
        assert!(snapshot.incomplete_symbols.contains("TSLA"));
    }

    /// Gateway that answers slowly and records peak concurrency
    struct SlowGateway {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MarketDataGateway for SlowGateway {
        async fn get_quote(&self, symbol: &str) -> Result<Quote> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(quote(symbol, dec!(1)))
        }

        async fn get_historical_series(&self, _: &str, _: u32) -> Result<Vec<PricePoint>> {
            Ok(Vec::new())
        }

        async fn get_fundamentals(&self, _: &str) -> Result<Fundamentals> {
            Ok(Fundamentals::default())
        }

        async fn search_symbols(&self, _: &str, _: usize) -> Result<Vec<SymbolMatch>> {
            Ok(Vec::new())
        }

        async fn get_news(&self, _: &str, _: usize) -> Result<Vec<NewsHeadline>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_fanout_respects_concurrency_cap() {
        let ledger = Arc::new(HoldingLedger::in_memory());
        for symbol in ["A", "B", "C", "D", "E", "F", "G", "H"] {
            ledger.add_shares(1, symbol, 1, dec!(1)).await.unwrap();
        }

        let peak = Arc::new(AtomicUsize::new(0));
        let gateway = SlowGateway {
            delay: Duration::from_millis(20),
            in_flight: AtomicUsize::new(0),
            peak: peak.clone(),
        };
        let config = InvestoConfig::builder().fanout_concurrency(3).build().unwrap();

        let snapshot = aggregator(ledger, gateway, &config)
            .get_snapshot(1)
            .await
            .unwrap();

        assert!(snapshot.is_complete());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_slow_quote_times_out_into_incomplete() {
        let ledger = Arc::new(HoldingLedger::in_memory());
        ledger.add_shares(1, "AAPL", 1, dec!(1)).await.unwrap();

        let gateway = SlowGateway {
            delay: Duration::from_secs(5),
            in_flight: AtomicUsize::new(0),
            peak: Arc::new(AtomicUsize::new(0)),
        };
        let config = InvestoConfig::builder()
            .fetch_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let snapshot = aggregator(ledger, gateway, &config)
            .get_snapshot(1)
            .await
            .unwrap();

        assert_eq!(snapshot.holdings.len(), 1);
        assert!(!snapshot.holdings[0].is_priced());
        assert!(snapshot.incomplete_symbols.contains("AAPL"));
    }

    #[test]
    fn test_build_snapshot_pct() {
        let now = Utc::now();
        let holding = Holding {
            id: 1,
            user_id: 1,
            symbol: "AAPL".to_string(),
            company_name: Some("Apple Inc.".to_string()),
            shares: 10,
            average_cost: dec!(100),
            created_at: now,
            updated_at: now,
        };
        let prices = HashMap::from([("AAPL".to_string(), dec!(125))]);

        let snapshot = build_snapshot(vec![holding], &prices).unwrap();
        assert_eq!(snapshot.total_gain_loss_pct, Some(dec!(25)));
        assert_eq!(
            snapshot.holdings[0].holding.company_name.as_deref(),
            Some("Apple Inc.")
        );
    }

    #[tokio::test]
    async fn test_out_of_range_value_is_unpriced() {
        let ledger = Arc::new(HoldingLedger::in_memory());
        ledger
            .add_shares(1, "AAPL", 1_000_000_000_000_000_000, dec!(0.01))
            .await
            .unwrap();
        ledger.add_shares(1, "MSFT", 2, dec!(300)).await.unwrap();

        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_get_quote().returning(|symbol| match symbol {
            "AAPL" => Ok(quote(symbol, dec!(100000000000))),
            _ => Ok(quote(symbol, dec!(400))),
        });

        let snapshot = aggregator(ledger, gateway, &InvestoConfig::default())
            .get_snapshot(1)
            .await
            .unwrap();

        assert!(!snapshot.holdings[0].is_priced());
        assert_eq!(snapshot.holdings[0].cost_basis, dec!(10000000000000000));
        assert_eq!(
            snapshot.incomplete_symbols,
            BTreeSet::from(["AAPL".to_string()])
        );
        assert_eq!(snapshot.total_market_value, dec!(800));
        assert_eq!(snapshot.total_gain_loss, dec!(200));
    }

    #[test]
    fn test_totals_overflow_leaves_holding_unpriced() {
        let now = Utc::now();
        let holding = |id, symbol: &str| Holding {
            id,
            user_id: 1,
            symbol: symbol.to_string(),
            company_name: None,
            shares: 1_000_000_000_000_000_000,
            average_cost: dec!(1),
            created_at: now,
            updated_at: now,
        };
        // Each position fits on its own; their sum does not
        let prices = HashMap::from([
            ("AAPL".to_string(), dec!(50000000000)),
            ("MSFT".to_string(), dec!(50000000000)),
        ]);

        let snapshot =
            build_snapshot(vec![holding(1, "AAPL"), holding(2, "MSFT")], &prices).unwrap();

        assert!(snapshot.holdings[0].is_priced());
        assert!(!snapshot.holdings[1].is_priced());
        assert_eq!(
            snapshot.incomplete_symbols,
            BTreeSet::from(["MSFT".to_string()])
        );
        assert_eq!(
            Some(snapshot.total_market_value),
            snapshot.holdings[0].market_value
        );
    }
}
