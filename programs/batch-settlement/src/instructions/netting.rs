//! Netting of a batch's flow against an externally reported total.
//!
//! `reported_total_assets` already includes this batch's deposits and withdrawals, so they are
//! backed out before comparing against the last settled snapshot; what remains is organic yield.

use serde::Serialize;

use crate::{
    error::Result,
    math::{bps_of, mul_div, signed_sub, Rounding},
};

/// Redemption demand as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedAmount {
    /// Gateway vaults record demand in assets
    Assets(u64),
    /// Pooled vaults record demand in shares
    Shares { shares: u64, pool_supply: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NettingInput {
    pub ledger_deposited: u64,
    pub requested: RequestedAmount,
    pub reported_total_assets: u64,
    pub last_settled_total_assets: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NettingOutcome {
    pub requested_assets: u64,
    pub netted: i128,
    pub adjusted_total: i128,
    pub yield_amount: i128,
}

impl NettingOutcome {
    pub fn is_profit(&self) -> bool {
        self.yield_amount > 0
    }
}

/// Convert share-denominated demand to assets at the reported valuation.
///
/// An empty pool has no price, so the raw share count is used.
pub fn requested_assets_for_shares(
    shares: u64,
    reported_total_assets: u64,
    pool_supply: u64,
) -> Result<u64> {
    if pool_supply == 0 {
        return Ok(shares);
    }
    mul_div(shares, reported_total_assets, pool_supply, Rounding::Floor)
}

pub fn compute(input: &NettingInput) -> Result<NettingOutcome> {
    let requested_assets = match input.requested {
        RequestedAmount::Assets(amount) => amount,
        RequestedAmount::Shares {
            shares,
            pool_supply,
        } => requested_assets_for_shares(shares, input.reported_total_assets, pool_supply)?,
    };

    let netted = signed_sub(input.ledger_deposited, requested_assets);
    let adjusted_total = input.reported_total_assets as i128 - netted;
    let yield_amount = adjusted_total - input.last_settled_total_assets as i128;

    Ok(NettingOutcome {
        requested_assets,
        netted,
        adjusted_total,
        yield_amount,
    })
}

/// Largest yield magnitude accepted without raising the tolerance signal.
pub fn max_allowed_delta(last_settled_total_assets: u64, max_allowed_delta_bps: u64) -> u128 {
    bps_of(last_settled_total_assets, max_allowed_delta_bps)
}

pub fn exceeds_tolerance(
    yield_amount: i128,
    last_settled_total_assets: u64,
    max_allowed_delta_bps: u64,
) -> bool {
    yield_amount.unsigned_abs() > max_allowed_delta(last_settled_total_assets, max_allowed_delta_bps)
}
