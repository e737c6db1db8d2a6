//! Process-local holding store

use super::store::{
    HoldingKey, HoldingStore, HoldingWrite, Modified, Mutation, duplicate, missing,
};
use crate::error::Result;
use crate::models::{Holding, HoldingId, UserId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// Holdings kept in memory, keyed by id; lost on exit
#[derive(Debug)]
pub struct InMemoryHoldingStore {
    holdings: RwLock<BTreeMap<HoldingId, Holding>>,
    next_id: AtomicI64,
}

impl Default for InMemoryHoldingStore {
    fn default() -> Self {
        Self {
            holdings: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryHoldingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HoldingStore for InMemoryHoldingStore {
    async fn get(&self, user_id: UserId, id: HoldingId) -> Result<Option<Holding>> {
        let holdings = self.holdings.read().await;
        Ok(holdings.get(&id).filter(|h| h.user_id == user_id).cloned())
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Holding>> {
        let holdings = self.holdings.read().await;
        Ok(holdings
            .values()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn modify(
        &self,
        user_id: UserId,
        key: HoldingKey<'_>,
        mutation: Mutation,
    ) -> Result<Modified> {
        // The write guard spans the read, the mutation and the write
        let mut holdings = self.holdings.write().await;

        let before = match key {
            HoldingKey::Symbol(symbol) => holdings
                .values()
                .find(|h| h.user_id == user_id && h.symbol == symbol)
                .cloned(),
            HoldingKey::Id(id) => holdings.get(&id).filter(|h| h.user_id == user_id).cloned(),
        };

        let after = match mutation(before.as_ref())? {
            HoldingWrite::Insert(new) => {
                if holdings
                    .values()
                    .any(|h| h.user_id == new.user_id && h.symbol == new.symbol)
                {
                    return Err(duplicate(&new.symbol));
                }

                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let stored = Holding {
                    id,
                    user_id: new.user_id,
                    symbol: new.symbol,
                    company_name: new.company_name,
                    shares: new.shares,
                    average_cost: new.average_cost,
                    created_at: new.created_at,
                    updated_at: new.created_at,
                };
                holdings.insert(id, stored.clone());
                Some(stored)
            }
            HoldingWrite::Update(changed) => {
                let current = before.as_ref().ok_or_else(|| missing(user_id, key))?;
                let existing = holdings
                    .get_mut(&current.id)
                    .ok_or_else(|| missing(user_id, key))?;
                existing.company_name = changed.company_name;
                existing.shares = changed.shares;
                existing.average_cost = changed.average_cost;
                existing.updated_at = changed.updated_at;
                Some(existing.clone())
            }
            HoldingWrite::Delete => {
                let current = before.as_ref().ok_or_else(|| missing(user_id, key))?;
                holdings.remove(&current.id);
                None
            }
        };

        Ok(Modified { before, after })
    }
}
