//! Holding ledger
//!
//! Owns every read and write of persisted holdings. Each trade is one
//! read-modify-write through [`HoldingStore::modify`], which the store runs
//! atomically, so ledgers in different processes sharing a database never
//! lose an update and a dropped request never leaves a half-applied trade
//! behind. Within a process, mutations on the same (user, symbol) pair also
//! queue behind a keyed async lock.

mod memory;
mod sqlite;
mod store;

pub use memory::InMemoryHoldingStore;
pub use sqlite::SqliteHoldingStore;
pub use store::{HoldingKey, HoldingStore, HoldingWrite, Modified, Mutation};

use crate::error::{InvestoError, Result};
use crate::models::{Holding, HoldingId, NewHolding, SaleOutcome, UserId, normalize_symbol};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use store::mutation;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

type LockKey = (UserId, String);

pub struct HoldingLedger {
    store: Arc<dyn HoldingStore>,
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl HoldingLedger {
    pub fn new(store: Arc<dyn HoldingStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ledger over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryHoldingStore::new()))
    }

    /// Serialize mutations for one (user, symbol) within this process
    async fn lock(&self, user_id: UserId, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on can go
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((user_id, symbol.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    /// Buy `shares` at `price_per_share`, creating or re-averaging the holding
    pub async fn add_shares(
        &self,
        user_id: UserId,
        symbol: &str,
        shares: u64,
        price_per_share: Decimal,
    ) -> Result<Holding> {
        self.add_shares_with_name(user_id, symbol, shares, price_per_share, None)
            .await
    }

    /// Like [`add_shares`](Self::add_shares), recording `company_name` on a
    /// holding that has none yet
    pub async fn add_shares_with_name(
        &self,
        user_id: UserId,
        symbol: &str,
        shares: u64,
        price_per_share: Decimal,
        company_name: Option<&str>,
    ) -> Result<Holding> {
        ensure_positive(shares, price_per_share)?;
        let symbol = normalize_symbol(symbol)?;
        purchase_cost(shares, price_per_share)?;

        let _guard = self.lock(user_id, &symbol).await;
        let now = Utc::now();
        let company_name = company_name.map(str::to_string);
        let new_symbol = symbol.clone();

        let modified = self
            .store
            .modify(
                user_id,
                HoldingKey::Symbol(&symbol),
                mutation(move |current| match current {
                    Some(existing) => {
                        let mut holding = existing.clone();
                        holding.shares = existing.shares.checked_add(shares).ok_or_else(|| {
                            InvestoError::InvalidQuantity("share count overflow".to_string())
                        })?;
                        holding.average_cost = weighted_average(
                            existing.shares,
                            existing.average_cost,
                            shares,
                            price_per_share,
                        )?;
                        if holding.company_name.is_none() {
                            holding.company_name = company_name;
                        }
                        holding.updated_at = now;
                        Ok(HoldingWrite::Update(holding))
                    }
                    None => Ok(HoldingWrite::Insert(NewHolding {
                        user_id,
                        symbol: new_symbol,
                        company_name,
                        shares,
                        average_cost: price_per_share,
                        created_at: now,
                    })),
                }),
            )
            .await?;
        let holding = written(modified.after)?;

        info!(
            user_id,
            symbol = %holding.symbol,
            bought = shares,
            shares = holding.shares,
            average_cost = %holding.average_cost,
            "Added shares"
        );
        Ok(holding)
    }

    /// Sell `shares` at `price_per_share`; the basis of what remains is unchanged
    pub async fn sell_shares(
        &self,
        user_id: UserId,
        symbol: &str,
        shares: u64,
        price_per_share: Decimal,
    ) -> Result<SaleOutcome> {
        ensure_positive(shares, price_per_share)?;
        let symbol = normalize_symbol(symbol)?;

        let _guard = self.lock(user_id, &symbol).await;
        let wanted = symbol.clone();

        let modified = self
            .store
            .modify(
                user_id,
                HoldingKey::Symbol(&symbol),
                mutation(move |current| {
                    let existing = current
                        .ok_or_else(|| InvestoError::NotFound(format!("no holding for {wanted}")))?;
                    if shares > existing.shares {
                        return Err(InvestoError::InvalidQuantity(format!(
                            "cannot sell {shares} shares of {}, only {} held",
                            existing.symbol, existing.shares
                        )));
                    }
                    realized_gain(shares, price_per_share, existing.average_cost)?;

                    if shares == existing.shares {
                        Ok(HoldingWrite::Delete)
                    } else {
                        let mut holding = existing.clone();
                        holding.shares -= shares;
                        holding.updated_at = Utc::now();
                        Ok(HoldingWrite::Update(holding))
                    }
                }),
            )
            .await?;

        let sold_from = written(modified.before)?;
        let realized_gain_loss = realized_gain(shares, price_per_share, sold_from.average_cost)?;
        let remaining = modified.after;

        info!(
            user_id,
            symbol = %symbol,
            sold = shares,
            realized = %realized_gain_loss,
            closed = remaining.is_none(),
            "Sold shares"
        );

        Ok(SaleOutcome {
            remaining,
            shares_sold: shares,
            realized_gain_loss,
        })
    }

    /// Correct the share count without touching the cost basis
    pub async fn update_shares(
        &self,
        user_id: UserId,
        holding_id: HoldingId,
        new_share_count: u64,
    ) -> Result<Holding> {
        if new_share_count == 0 {
            return Err(InvestoError::InvalidQuantity(
                "share count must be positive; remove the holding instead".to_string(),
            ));
        }

        let symbol = self.get_holding(user_id, holding_id).await?.symbol;
        let _guard = self.lock(user_id, &symbol).await;

        let modified = self
            .store
            .modify(
                user_id,
                HoldingKey::Id(holding_id),
                mutation(move |current| {
                    // A concurrent sale may have closed it since the lookup
                    let existing = current
                        .ok_or_else(|| InvestoError::NotFound(format!("holding {holding_id}")))?;
                    purchase_cost(new_share_count, existing.average_cost)?;

                    let mut holding = existing.clone();
                    holding.shares = new_share_count;
                    holding.updated_at = Utc::now();
                    Ok(HoldingWrite::Update(holding))
                }),
            )
            .await?;
        let holding = written(modified.after)?;

        info!(user_id, holding_id, shares = new_share_count, "Updated share count");
        Ok(holding)
    }

    pub async fn remove_holding(&self, user_id: UserId, holding_id: HoldingId) -> Result<()> {
        let symbol = self.get_holding(user_id, holding_id).await?.symbol;
        let _guard = self.lock(user_id, &symbol).await;

        self.store
            .modify(
                user_id,
                HoldingKey::Id(holding_id),
                mutation(|_| Ok(HoldingWrite::Delete)),
            )
            .await?;

        info!(user_id, holding_id, symbol = %symbol, "Removed holding");
        Ok(())
    }

    pub async fn get_holding(&self, user_id: UserId, holding_id: HoldingId) -> Result<Holding> {
        self.store
            .get(user_id, holding_id)
            .await?
            .ok_or_else(|| InvestoError::NotFound(format!("holding {holding_id}")))
    }

    /// Holdings of a user in creation order
    pub async fn list_holdings(&self, user_id: UserId) -> Result<Vec<Holding>> {
        let holdings = self.store.list(user_id).await?;
        debug!(user_id, count = holdings.len(), "Listed holdings");
        Ok(holdings)
    }
}

pub(crate) fn ensure_positive(shares: u64, price_per_share: Decimal) -> Result<()> {
    if shares == 0 {
        return Err(InvestoError::InvalidQuantity(
            "shares must be positive".to_string(),
        ));
    }
    if price_per_share <= Decimal::ZERO {
        return Err(InvestoError::InvalidQuantity(format!(
            "price per share must be positive, got {price_per_share}"
        )));
    }
    Ok(())
}

fn overflow() -> InvestoError {
    InvestoError::InvalidQuantity("cost basis overflow".to_string())
}

/// Reject positions whose cost basis `Decimal` cannot hold
fn purchase_cost(shares: u64, price: Decimal) -> Result<Decimal> {
    Decimal::from(shares).checked_mul(price).ok_or_else(overflow)
}

fn realized_gain(shares: u64, price: Decimal, average_cost: Decimal) -> Result<Decimal> {
    price
        .checked_sub(average_cost)
        .and_then(|per_share| per_share.checked_mul(Decimal::from(shares)))
        .ok_or_else(|| InvestoError::InvalidQuantity("realized gain overflow".to_string()))
}

/// `(old_shares*old_avg + shares*price) / (old_shares+shares)`
fn weighted_average(
    old_shares: u64,
    old_average: Decimal,
    shares: u64,
    price: Decimal,
) -> Result<Decimal> {
    let old_cost = purchase_cost(old_shares, old_average)?;
    let new_cost = purchase_cost(shares, price)?;
    let total_shares = Decimal::from(old_shares) + Decimal::from(shares);

    old_cost
        .checked_add(new_cost)
        .and_then(|cost| cost.checked_div(total_shares))
        .ok_or_else(overflow)
}

/// Row a committed write must have produced
fn written(holding: Option<Holding>) -> Result<Holding> {
    holding.ok_or_else(|| InvestoError::Storage("write produced no holding".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_add_then_average_then_remove() {
        let ledger = HoldingLedger::in_memory();

        ledger.add_shares(1, "AAPL", 10, dec!(100)).await.unwrap();
        let holding = ledger.add_shares(1, "aapl", 10, dec!(120)).await.unwrap();

        assert_eq!(holding.symbol, "AAPL");
        assert_eq!(holding.shares, 20);
        assert_eq!(holding.average_cost, dec!(110));

        ledger.remove_holding(1, holding.id).await.unwrap();
        assert!(ledger.list_holdings(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_non_positive_inputs() {
        let ledger = HoldingLedger::in_memory();

        assert!(matches!(
            ledger.add_shares(1, "AAPL", 0, dec!(10)).await,
            Err(InvestoError::InvalidQuantity(_))
        ));
        assert!(matches!(
            ledger.add_shares(1, "AAPL", 5, dec!(0)).await,
            Err(InvestoError::InvalidQuantity(_))
        ));
        assert!(matches!(
            ledger.add_shares(1, "AAPL", 5, dec!(-3)).await,
            Err(InvestoError::InvalidQuantity(_))
        ));
        assert!(ledger.list_holdings(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_average_cost() {
        let ledger = HoldingLedger::in_memory();
        let holding = ledger.add_shares(1, "MSFT", 4, dec!(250.5)).await.unwrap();

        let updated = ledger.update_shares(1, holding.id, 9).await.unwrap();
        assert_eq!(updated.shares, 9);
        assert_eq!(updated.average_cost, dec!(250.5));

        assert!(matches!(
            ledger.update_shares(1, holding.id, 0).await,
            Err(InvestoError::InvalidQuantity(_))
        ));
    }

    #[tokio::test]
    async fn test_foreign_holding_is_not_found() {
        let ledger = HoldingLedger::in_memory();
        let holding = ledger.add_shares(1, "AAPL", 1, dec!(1)).await.unwrap();

        assert!(matches!(
            ledger.update_shares(2, holding.id, 5).await,
            Err(InvestoError::NotFound(_))
        ));
        assert!(matches!(
            ledger.remove_holding(2, holding.id).await,
            Err(InvestoError::NotFound(_))
        ));
        assert!(matches!(
            ledger.get_holding(2, holding.id).await,
            Err(InvestoError::NotFound(_))
        ));
        assert_eq!(ledger.list_holdings(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_sell_keeps_basis() {
        let ledger = HoldingLedger::in_memory();
        ledger.add_shares(1, "AAPL", 20, dec!(110)).await.unwrap();

        let outcome = ledger.sell_shares(1, "AAPL", 5, dec!(150)).await.unwrap();
        let remaining = outcome.remaining.unwrap();

        assert_eq!(remaining.shares, 15);
        assert_eq!(remaining.average_cost, dec!(110));
        assert_eq!(outcome.shares_sold, 5);
        assert_eq!(outcome.realized_gain_loss, dec!(200));
    }

    #[tokio::test]
    async fn test_oversell_is_rejected_and_leaves_holding() {
        let ledger = HoldingLedger::in_memory();
        ledger.add_shares(1, "AAPL", 3, dec!(10)).await.unwrap();

        let result = ledger.sell_shares(1, "AAPL", 4, dec!(12)).await;
        assert!(matches!(result, Err(InvestoError::InvalidQuantity(_))));

        let holdings = ledger.list_holdings(1).await.unwrap();
        assert_eq!(holdings[0].shares, 3);
    }

    #[tokio::test]
    async fn test_selling_everything_closes_position() {
        let ledger = HoldingLedger::in_memory();
        ledger.add_shares(1, "AAPL", 3, dec!(10)).await.unwrap();

        let outcome = ledger.sell_shares(1, "AAPL", 3, dec!(8)).await.unwrap();
        assert!(outcome.remaining.is_none());
        assert_eq!(outcome.realized_gain_loss, dec!(-6));
        assert!(ledger.list_holdings(1).await.unwrap().is_empty());

        assert!(matches!(
            ledger.sell_shares(1, "AAPL", 1, dec!(8)).await,
            Err(InvestoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_in_creation_order() {
        let ledger = HoldingLedger::in_memory();
        for symbol in ["TSLA", "AAPL", "MSFT"] {
            ledger.add_shares(7, symbol, 1, dec!(1)).await.unwrap();
        }
        ledger.add_shares(7, "TSLA", 1, dec!(3)).await.unwrap();

        let symbols: Vec<_> = ledger
            .list_holdings(7)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.symbol)
            .collect();
        assert_eq!(symbols, vec!["TSLA", "AAPL", "MSFT"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buys_serialize() {
        let ledger = Arc::new(HoldingLedger::in_memory());

        let tasks: Vec<_> = (0..40)
            .map(|i| {
                let ledger = ledger.clone();
                let price = if i % 2 == 0 { dec!(100) } else { dec!(120) };
                tokio::spawn(async move { ledger.add_shares(1, "AAPL", 10, price).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let holdings = ledger.list_holdings(1).await.unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].shares, 400);
        assert!((holdings[0].average_cost - dec!(110)).abs() < dec!(0.0001));
    }

    #[tokio::test]
    async fn test_sqlite_backed_ledger() {
        let store = SqliteHoldingStore::connect("sqlite::memory:").await.unwrap();
        let ledger = HoldingLedger::new(Arc::new(store));

        ledger.add_shares(1, "AAPL", 10, dec!(100)).await.unwrap();
        let holding = ledger.add_shares(1, "AAPL", 10, dec!(120)).await.unwrap();
        assert_eq!(holding.average_cost, dec!(110));

        let outcome = ledger.sell_shares(1, "AAPL", 20, dec!(130)).await.unwrap();
        assert_eq!(outcome.realized_gain_loss, dec!(400));
        assert!(ledger.list_holdings(1).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_ledgers_on_one_database_file_lose_no_buys() {
        let path = std::env::temp_dir().join(format!("investo-ledger-{}.db", std::process::id()));
        let remove_files = || {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
            }
        };
        remove_files();
        let url = format!("sqlite://{}", path.display());

        let first = Arc::new(HoldingLedger::new(Arc::new(
            SqliteHoldingStore::connect(&url).await.unwrap(),
        )));
        let second = Arc::new(HoldingLedger::new(Arc::new(
            SqliteHoldingStore::connect(&url).await.unwrap(),
        )));
        first.add_shares(1, "AAPL", 10, dec!(100)).await.unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let (ledger, price) = if i % 2 == 0 {
                    (first.clone(), dec!(100))
                } else {
                    (second.clone(), dec!(130))
                };
                tokio::spawn(async move { ledger.add_shares(1, "AAPL", 10, price).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let holdings = second.list_holdings(1).await.unwrap();
        remove_files();

        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].shares, 210);
        // 110 shares at 100 and 100 shares at 130
        let expected = dec!(24000) / dec!(210);
        assert!((holdings[0].average_cost - expected).abs() < dec!(0.0001));
    }

    #[tokio::test]
    async fn test_unrepresentable_cost_basis_is_rejected() {
        let ledger = HoldingLedger::in_memory();

        let result = ledger
            .add_shares(1, "AAPL", 1_000_000_000_000_000_000, dec!(100000000000))
            .await;
        assert!(matches!(result, Err(InvestoError::InvalidQuantity(_))));
        assert!(ledger.list_holdings(1).await.unwrap().is_empty());

        let holding = ledger.add_shares(1, "AAPL", 1, dec!(100000000000)).await.unwrap();
        assert!(matches!(
            ledger
                .update_shares(1, holding.id, 1_000_000_000_000_000_000)
                .await,
            Err(InvestoError::InvalidQuantity(_))
        ));
        assert_eq!(ledger.get_holding(1, holding.id).await.unwrap().shares, 1);
    }

    #[tokio::test]
    async fn test_malformed_symbol_is_rejected() {
        let ledger = HoldingLedger::in_memory();

        for bad in ["A B", "1ABC", "AAPL$"] {
            assert!(
                matches!(
                    ledger.add_shares(1, bad, 1, dec!(1)).await,
                    Err(InvestoError::InvalidInput(_))
                ),
                "{bad} should be rejected"
            );
        }
        assert!(ledger.list_holdings(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_company_name_is_kept_across_buys() {
        let ledger = HoldingLedger::in_memory();

        let first = ledger.add_shares(1, "AAPL", 1, dec!(100)).await.unwrap();
        assert_eq!(first.company_name, None);

        let named = ledger
            .add_shares_with_name(1, "AAPL", 1, dec!(100), Some("Apple Inc."))
            .await
            .unwrap();
        assert_eq!(named.company_name.as_deref(), Some("Apple Inc."));

        let renamed = ledger
            .add_shares_with_name(1, "AAPL", 1, dec!(100), Some("Other"))
            .await
            .unwrap();
        assert_eq!(renamed.company_name.as_deref(), Some("Apple Inc."));
    }

    proptest! {
        #[test]
        fn buys_sum_shares_and_weight_the_average(
            buys in prop::collection::vec((1u64..1_000, 1i64..1_000_000), 1..20)
        ) {
            let holding = tokio_test::block_on(async {
                let ledger = HoldingLedger::in_memory();
                let mut last = None;
                for (shares, cents) in &buys {
                    last = Some(
                        ledger
                            .add_shares(1, "AAPL", *shares, Decimal::new(*cents, 2))
                            .await
                            .unwrap(),
                    );
                }
                last.unwrap()
            });

            let total_shares: u64 = buys.iter().map(|(s, _)| s).sum();
            let total_cost: Decimal = buys
                .iter()
                .map(|(s, c)| Decimal::from(*s) * Decimal::new(*c, 2))
                .sum();
            let expected = total_cost / Decimal::from(total_shares);

            prop_assert_eq!(holding.shares, total_shares);
            prop_assert!((holding.average_cost - expected).abs() < dec!(0.000001));
        }

        #[test]
        fn update_never_changes_average_cost(
            cents in 1i64..10_000_000,
            new_count in 1u64..100_000,
        ) {
            let (before, after) = tokio_test::block_on(async {
                let ledger = HoldingLedger::in_memory();
                let price = Decimal::new(cents, 2);
                let holding = ledger.add_shares(1, "AAPL", 10, price).await.unwrap();
                let updated = ledger.update_shares(1, holding.id, new_count).await.unwrap();
                (holding.average_cost, updated.average_cost)
            });

            prop_assert_eq!(before, after);
        }
    }
}
