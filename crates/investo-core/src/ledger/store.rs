use crate::error::{InvestoError, Result};
use crate::models::{Holding, HoldingId, NewHolding, UserId};
use async_trait::async_trait;

/// Row a mutation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldingKey<'a> {
    Symbol(&'a str),
    Id(HoldingId),
}

/// What a mutation decided to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldingWrite {
    Insert(NewHolding),
    /// Overwrite `company_name`, `shares`, `average_cost` and `updated_at`
    /// of the row that was read
    Update(Holding),
    Delete,
}

/// Read-modify-write step run against the current row, inside the store's
/// write transaction
pub type Mutation = Box<dyn FnOnce(Option<&Holding>) -> Result<HoldingWrite> + Send>;

pub(crate) fn mutation<F>(step: F) -> Mutation
where
    F: FnOnce(Option<&Holding>) -> Result<HoldingWrite> + Send + 'static,
{
    Box::new(step)
}

/// Row state on either side of a committed mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modified {
    pub before: Option<Holding>,
    pub after: Option<Holding>,
}

/// Persistence for holdings
///
/// Every lookup is scoped to a user: a holding owned by someone else is
/// indistinguishable from one that does not exist.
#[async_trait]
pub trait HoldingStore: Send + Sync {
    async fn get(&self, user_id: UserId, id: HoldingId) -> Result<Option<Holding>>;

    /// All holdings of a user, oldest first
    async fn list(&self, user_id: UserId) -> Result<Vec<Holding>>;

    /// Read the row at `key`, hand it to `mutation` and persist the outcome
    ///
    /// No other writer, in this process or another one sharing the same
    /// database, can change the row between the read and the write. An
    /// `Update` or `Delete` with no current row is `NotFound`; an `Insert`
    /// over an existing (user, symbol) is a `Storage` conflict. When the
    /// mutation fails nothing is written.
    async fn modify(
        &self,
        user_id: UserId,
        key: HoldingKey<'_>,
        mutation: Mutation,
    ) -> Result<Modified>;
}

pub(super) fn missing(user_id: UserId, key: HoldingKey<'_>) -> InvestoError {
    match key {
        HoldingKey::Symbol(symbol) => {
            InvestoError::NotFound(format!("no holding for {symbol} (user {user_id})"))
        }
        HoldingKey::Id(id) => InvestoError::NotFound(format!("holding {id}")),
    }
}

pub(super) fn duplicate(symbol: &str) -> InvestoError {
    InvestoError::Storage(format!("holding for {symbol} already exists"))
}
