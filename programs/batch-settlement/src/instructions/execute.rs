use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::{Result, SettlementError},
    events::{EventJournal, SettlementEvent},
    instructions::{batch::BatchLifecycle, ledger::VirtualBalanceLedger},
    interfaces::{Adapter, Custody, PooledVault, Registry, UnitOfAccount},
    math::{mul_div, to_amount, Rounding},
    state::{
        Address, AssetId, FeeCheckpoints, LedgerSlot, ProposalId, SettlementProposal, VaultId,
        VaultKind,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeExtraction {
    pub fee_shares: u64,
    pub fee_assets: u64,
}

/// Share-denominated fee implied by the gap between gross and net share price.
///
/// `requested_shares - requested_shares * net_share_price / share_price`, floored at zero.
pub fn fee_shares(requested_shares: u64, share_price: u64, net_share_price: u64) -> Result<u64> {
    let net_shares = mul_div(requested_shares, net_share_price, share_price, Rounding::Floor)?;
    Ok(requested_shares.saturating_sub(net_shares))
}

/// Everything `apply` needs, resolved and validated up front.
#[derive(Debug)]
pub enum SettlementPlan {
    Gateway {
        adapter: Arc<dyn Adapter>,
        payout: u64,
        forward: u64,
    },
    Pooled {
        pool: Arc<dyn PooledVault>,
        adapter: Arc<dyn Adapter>,
        unit: Arc<dyn UnitOfAccount>,
        gateway: VaultId,
        gateway_adapter: Arc<dyn Adapter>,
        yield_magnitude: u64,
        fees: Option<FeeExtraction>,
        treasury: Address,
    },
}

/// What an execution did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReceipt {
    pub id: ProposalId,
    pub vault: VaultId,
    pub batch: u64,
    pub kind: VaultKind,
    pub consumed: LedgerSlot,
    pub netted: i128,
    pub yield_amount: i128,
    /// Gateway only: (payout target, amount)
    pub payout: Option<(Address, u64)>,
    /// Pooled only: backing pushed to the gateway adapter
    pub gateway_total: Option<u64>,
    pub fees: Option<FeeExtraction>,
    pub batch_settled: bool,
}

#[derive(Debug)]
pub struct SettlementExecutor {
    ledger: Arc<VirtualBalanceLedger>,
    batches: Arc<BatchLifecycle>,
    registry: Arc<dyn Registry>,
    custody: Arc<dyn Custody>,
    journal: Arc<EventJournal>,
    /// Serializes read-modify-write of each gateway's backing total
    backing_locks: DashMap<(VaultId, AssetId), Arc<Mutex<()>>>,
}

impl SettlementExecutor {
    pub fn new(
        ledger: Arc<VirtualBalanceLedger>,
        batches: Arc<BatchLifecycle>,
        registry: Arc<dyn Registry>,
        custody: Arc<dyn Custody>,
        journal: Arc<EventJournal>,
    ) -> Self {
        Self {
            ledger,
            batches,
            registry,
            custody,
            journal,
            backing_locks: DashMap::new(),
        }
    }

    /// Reads and validation only. A rejection here leaves every component untouched.
    pub fn prepare(&self, proposal: &SettlementProposal, now: u64) -> Result<SettlementPlan> {
        let (vault, asset, batch) = (proposal.vault, proposal.asset, proposal.batch);

        if self.registry.vault_kind(&vault) != Some(proposal.kind) {
            return Err(SettlementError::WrongVaultKind { vault });
        }
        self.batches.ensure_settleable(batch, &vault, now)?;

        if self.ledger.snapshot(vault, batch) != proposal.ledger {
            return Err(SettlementError::LedgerDrift { vault, batch });
        }

        let adapter = self
            .registry
            .resolve_adapter(&vault, &asset)
            .ok_or(SettlementError::UnsupportedAsset { vault, asset })?;

        match proposal.kind {
            VaultKind::Gateway => Ok(SettlementPlan::Gateway {
                adapter,
                payout: proposal.ledger.requested,
                forward: to_amount(proposal.netted.max(0))?,
            }),
            VaultKind::Pooled => self.prepare_pooled(proposal, adapter),
        }
    }

    fn prepare_pooled(
        &self,
        proposal: &SettlementProposal,
        adapter: Arc<dyn Adapter>,
    ) -> Result<SettlementPlan> {
        let (vault, asset) = (proposal.vault, proposal.asset);

        let pool = self
            .registry
            .resolve_pooled_vault(&vault)
            .ok_or(SettlementError::WrongVaultKind { vault })?;
        let unit = self
            .registry
            .resolve_unit_of_account(&asset)
            .ok_or(SettlementError::UnsupportedAsset { vault, asset })?;
        let gateway = self
            .registry
            .resolve_vault_by_asset_and_kind(&asset, VaultKind::Gateway)
            .ok_or(SettlementError::UnsupportedAsset { vault, asset })?;
        let gateway_adapter = self
            .registry
            .resolve_adapter(&gateway, &asset)
            .ok_or(SettlementError::UnsupportedAsset {
                vault: gateway,
                asset,
            })?;

        // Early rejection only; `apply` re-reads under the backing lock.
        let prior = gateway_adapter.total_assets(&gateway, &asset)?;
        backing_after(prior, proposal.netted)?;

        let yield_magnitude = to_amount(proposal.yield_amount.saturating_abs())?;

        let requested_shares = proposal.ledger.requested_shares;
        let fees = if requested_shares == 0 {
            None
        } else {
            let fee_shares = fee_shares(
                requested_shares,
                pool.share_price()?,
                pool.net_share_price()?,
            )?;
            let fee_assets = pool.convert_to_assets(fee_shares)?;
            Some(FeeExtraction {
                fee_shares,
                fee_assets,
            })
        };

        Ok(SettlementPlan::Pooled {
            pool,
            adapter,
            unit,
            gateway,
            gateway_adapter,
            yield_magnitude,
            fees,
            treasury: self.registry.resolve_treasury(),
        })
    }

    /// Move the gateway's backing opposite to a pool's net flow.
    ///
    /// Read and write happen under the per (gateway, asset) lock with no other collaborator
    /// call between them.
    fn rebalance_gateway(
        &self,
        gateway_adapter: &dyn Adapter,
        gateway: VaultId,
        asset: AssetId,
        netted: i128,
    ) -> Result<u64> {
        let lock = Arc::clone(self.backing_locks.entry((gateway, asset)).or_default().value());
        let _guard = lock.lock();

        let prior = gateway_adapter.total_assets(&gateway, &asset)?;
        let next = backing_after(prior, netted)?;
        gateway_adapter.set_total_assets(&gateway, &asset, next)?;
        Ok(next)
    }

    /// Effects. Callers must have moved the proposal into the executed set first.
    pub fn apply(
        &self,
        proposal: &SettlementProposal,
        plan: SettlementPlan,
    ) -> Result<SettlementReceipt> {
        let (vault, asset, batch) = (proposal.vault, proposal.asset, proposal.batch);

        let consumed = self.ledger.consume(vault, batch);
        if consumed != proposal.ledger {
            warn!(%vault, batch, ?consumed, expected = ?proposal.ledger, "Consumed slot differs from proposal");
        }

        let mut receipt = SettlementReceipt {
            id: proposal.id,
            vault,
            batch,
            kind: proposal.kind,
            consumed,
            netted: proposal.netted,
            yield_amount: proposal.yield_amount,
            payout: None,
            gateway_total: None,
            fees: None,
            batch_settled: false,
        };

        match plan {
            SettlementPlan::Gateway {
                adapter,
                payout,
                forward,
            } => {
                // Pay redemptions out to the batch payout target
                if payout > 0 {
                    let target = self.batches.deploy_payout_target(batch)?;
                    self.custody.transfer(&asset, &vault, &target, payout)?;
                    receipt.payout = Some((target, payout));
                }

                // Forward net inflow into the yield destination
                if forward > 0 {
                    adapter.deposit(&asset, forward, &vault)?;
                }

                adapter.set_total_assets(&vault, &asset, proposal.reported_total_assets)?;
                receipt.batch_settled = self.batches.mark_vault_settled(batch, vault)?;
            }
            SettlementPlan::Pooled {
                pool,
                adapter,
                unit,
                gateway,
                gateway_adapter,
                yield_magnitude,
                fees,
                treasury,
            } => {
                // Realize yield in unit-of-account at the vault
                if yield_magnitude > 0 {
                    if proposal.yield_amount > 0 {
                        unit.mint(&vault, yield_magnitude)?;
                    } else {
                        unit.burn(&vault, yield_magnitude)?;
                    }
                    self.journal.emit(SettlementEvent::YieldApplied {
                        vault,
                        batch,
                        yield_amount: proposal.yield_amount,
                    });
                }

                let gateway_total = self.rebalance_gateway(
                    gateway_adapter.as_ref(),
                    gateway,
                    asset,
                    proposal.netted,
                )?;
                adapter.set_total_assets(&vault, &asset, proposal.reported_total_assets)?;
                receipt.gateway_total = Some(gateway_total);
                receipt.batch_settled = self.batches.mark_vault_settled(batch, vault)?;

                if let Some(fees) = fees.filter(|f| f.fee_shares > 0) {
                    pool.burn_fees(fees.fee_shares)?;
                    if fees.fee_assets > 0 {
                        unit.burn(&vault, fees.fee_assets)?;
                        unit.mint(&treasury, fees.fee_assets)?;
                    }
                    self.journal.emit(SettlementEvent::FeesExtracted {
                        vault,
                        batch,
                        fee_shares: fees.fee_shares,
                        fee_assets: fees.fee_assets,
                        treasury,
                    });
                    receipt.fees = Some(fees);
                }

                forward_fee_checkpoints(pool.as_ref(), &proposal.fee_checkpoints)?;
            }
        }

        info!(
            id = %proposal.id,
            %vault,
            batch,
            netted = proposal.netted,
            yield_amount = proposal.yield_amount,
            batch_settled = receipt.batch_settled,
            "Executed settlement"
        );
        self.journal.emit(SettlementEvent::SettlementExecuted {
            id: proposal.id,
            vault,
            batch,
        });
        Ok(receipt)
    }
}

fn backing_after(prior: u64, netted: i128) -> Result<u64> {
    let next = prior as i128 - netted;
    if next < 0 {
        return Err(SettlementError::NegativeBacking { prior, netted });
    }
    to_amount(next)
}

fn forward_fee_checkpoints(pool: &dyn PooledVault, checkpoints: &FeeCheckpoints) -> Result<()> {
    if let Some(checkpoint) = checkpoints.management {
        pool.notify_management_fees_charged(checkpoint)?;
    }
    if let Some(checkpoint) = checkpoints.performance {
        pool.notify_performance_fees_charged(checkpoint)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PRICE_SCALE;
    use proptest::prelude::*;

    #[test]
    fn test_fee_shares_one_percent_gap() {
        let net = PRICE_SCALE / 100 * 99;
        assert_eq!(fee_shares(1_000, PRICE_SCALE, net).unwrap(), 10);
    }

    #[test]
    fn test_fee_shares_no_gap() {
        assert_eq!(fee_shares(1_000, PRICE_SCALE, PRICE_SCALE).unwrap(), 0);
    }

    #[test]
    fn test_fee_shares_net_above_gross_is_zero() {
        assert_eq!(fee_shares(1_000, PRICE_SCALE, PRICE_SCALE * 2).unwrap(), 0);
    }

    #[test]
    fn test_fee_shares_zero_price() {
        assert!(matches!(
            fee_shares(1_000, 0, PRICE_SCALE),
            Err(SettlementError::DivisionByZero)
        ));
    }

    #[test]
    fn test_backing_moves_opposite_to_net_flow() {
        assert_eq!(backing_after(1_000, 300).unwrap(), 700);
        assert_eq!(backing_after(1_000, -900).unwrap(), 1_900);
        assert!(matches!(
            backing_after(100, 101),
            Err(SettlementError::NegativeBacking {
                prior: 100,
                netted: 101
            })
        ));
        assert!(matches!(
            backing_after(u64::MAX, -1),
            Err(SettlementError::MathOverflow)
        ));
    }

    proptest! {
        #[test]
        fn prop_fee_never_exceeds_requested(
            shares in any::<u64>(),
            price in 1u64..=PRICE_SCALE * 10,
            discount_bps in 0u64..=10_000,
        ) {
            let net = mul_div(price, 10_000 - discount_bps, 10_000, Rounding::Floor).unwrap();
            let fee = fee_shares(shares, price, net).unwrap();
            prop_assert!(fee <= shares);
        }
    }
}
