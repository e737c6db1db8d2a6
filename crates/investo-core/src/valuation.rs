//! Valuation math
//!
//! Pure functions over quotes, fundamentals and holdings. Nothing here fails
//! or panics: a value that cannot be computed meaningfully, or does not fit
//! in a `Decimal`, comes back as `None`.

use crate::models::{Fundamentals, GainLoss, Holding, Multiples, Quote};
use rust_decimal::Decimal;

/// `numerator / denominator`, or `None` unless both sides are strictly positive
fn positive_ratio(numerator: Decimal, denominator: Option<Decimal>) -> Option<Decimal> {
    let denominator = denominator?;
    if numerator <= Decimal::ZERO || denominator <= Decimal::ZERO {
        return None;
    }
    numerator
        .checked_div(denominator)
        .map(|ratio| ratio.round_dp(4).normalize())
        .filter(|ratio| *ratio > Decimal::ZERO)
}

/// Compute P/E, P/B, P/S and EV/EBITDA; each ratio is guarded on its own
pub fn compute_multiples(quote: &Quote, fundamentals: &Fundamentals) -> Multiples {
    let price = quote.price;

    Multiples {
        pe: positive_ratio(price, fundamentals.earnings_per_share),
        pb: positive_ratio(price, fundamentals.book_value_per_share),
        ps: positive_ratio(price, fundamentals.revenue_per_share),
        ev_ebitda: fundamentals
            .enterprise_value
            .and_then(|ev| positive_ratio(ev, fundamentals.ebitda)),
    }
}

/// Total purchase cost of a holding
pub fn cost_basis(holding: &Holding) -> Option<Decimal> {
    Decimal::from(holding.shares).checked_mul(holding.average_cost)
}

/// Percentage move from `from` to `to`; `None` when `from` is zero
pub fn percent_change(from: Decimal, to: Decimal) -> Option<Decimal> {
    if from.is_zero() {
        return None;
    }
    to.checked_sub(from)
        .and_then(|delta| delta.checked_div(from))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|pct| pct.round_dp(4))
}

/// Market value and unrealized gain of a holding at `current_price`
pub fn compute_gain_loss(holding: &Holding, current_price: Decimal) -> Option<GainLoss> {
    let market_value = Decimal::from(holding.shares).checked_mul(current_price)?;
    let cost = cost_basis(holding)?;
    let gain_loss = market_value.checked_sub(cost)?;

    Some(GainLoss {
        market_value,
        gain_loss,
        gain_loss_pct: percent_change(cost, market_value),
    })
}
