use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    error::{Result, SettlementError},
    events::{EventJournal, SettlementEvent},
    instructions::batch::BatchLifecycle,
    state::{BatchId, LedgerSlot, VaultId},
};

type SlotKey = (VaultId, BatchId);

/// Per (vault, batch) virtual balances pending settlement.
///
/// Every slot has its own lock. Mutators never wait: a slot held by another caller is
/// reported as [`SettlementError::LedgerSlotBusy`].
#[derive(Debug)]
pub struct VirtualBalanceLedger {
    slots: DashMap<SlotKey, Arc<Mutex<LedgerSlot>>>,
    batches: Arc<BatchLifecycle>,
    journal: Arc<EventJournal>,
}

impl VirtualBalanceLedger {
    pub fn new(batches: Arc<BatchLifecycle>, journal: Arc<EventJournal>) -> Self {
        Self {
            slots: DashMap::new(),
            batches,
            journal,
        }
    }

    fn slot(&self, key: SlotKey) -> Arc<Mutex<LedgerSlot>> {
        // Only hold the map shard long enough to clone the Arc.
        let entry = self.slots.entry(key).or_default();
        Arc::clone(entry.value())
    }

    fn update<F>(&self, vault: VaultId, batch: BatchId, amount: u64, now: u64, f: F) -> Result<()>
    where
        F: FnOnce(&mut LedgerSlot) -> Result<()>,
    {
        if amount == 0 {
            return Err(SettlementError::ZeroAmount);
        }

        // No slot is created for a batch that can no longer accrue.
        self.batches.ensure_accruing(batch, now)?;
        let slot = self.slot((vault, batch));
        let mut guard = slot
            .try_lock()
            .ok_or(SettlementError::LedgerSlotBusy { vault, batch })?;
        self.batches.ensure_accruing(batch, now)?;

        let mut next = *guard;
        f(&mut next)?;
        *guard = next;
        Ok(())
    }

    pub fn record_deposit(&self, vault: VaultId, batch: BatchId, amount: u64, now: u64) -> Result<()> {
        self.update(vault, batch, amount, now, |slot| {
            slot.deposited = checked_add(slot.deposited, amount)?;
            Ok(())
        })?;

        self.journal.emit(SettlementEvent::DepositRecorded {
            vault,
            batch,
            amount,
        });
        Ok(())
    }

    pub fn record_redemption_request(
        &self,
        vault: VaultId,
        batch: BatchId,
        amount: u64,
        now: u64,
    ) -> Result<()> {
        self.update(vault, batch, amount, now, |slot| {
            slot.requested = checked_add(slot.requested, amount)?;
            Ok(())
        })?;

        self.journal.emit(SettlementEvent::RedemptionRequested {
            vault,
            batch,
            amount,
        });
        Ok(())
    }

    pub fn record_share_request_push(
        &self,
        vault: VaultId,
        batch: BatchId,
        shares: u64,
        now: u64,
    ) -> Result<()> {
        self.update(vault, batch, shares, now, |slot| {
            slot.requested_shares = checked_add(slot.requested_shares, shares)?;
            Ok(())
        })?;

        self.journal.emit(SettlementEvent::SharesRequested {
            vault,
            batch,
            shares,
        });
        Ok(())
    }

    pub fn record_share_request_pull(
        &self,
        vault: VaultId,
        batch: BatchId,
        shares: u64,
        now: u64,
    ) -> Result<()> {
        self.update(vault, batch, shares, now, |slot| {
            slot.requested_shares = checked_sub(slot.requested_shares, shares)?;
            Ok(())
        })?;

        self.journal.emit(SettlementEvent::SharesReleased {
            vault,
            batch,
            shares,
        });
        Ok(())
    }

    /// Debit `source.requested` and credit `target.deposited` as one step.
    pub fn transfer(
        &self,
        source: VaultId,
        target: VaultId,
        batch: BatchId,
        amount: u64,
        now: u64,
    ) -> Result<()> {
        if source == target {
            return self.update(source, batch, amount, now, |slot| {
                slot.requested = checked_sub(slot.requested, amount)?;
                slot.deposited = checked_add(slot.deposited, amount)?;
                Ok(())
            });
        }
        if amount == 0 {
            return Err(SettlementError::ZeroAmount);
        }
        self.batches.ensure_accruing(batch, now)?;

        let source_slot = self.slot((source, batch));
        let target_slot = self.slot((target, batch));
        let busy = |vault| SettlementError::LedgerSlotBusy { vault, batch };
        // Always lock in key order.
        let (mut source_guard, mut target_guard) = if source < target {
            let s = source_slot.try_lock().ok_or_else(|| busy(source))?;
            let t = target_slot.try_lock().ok_or_else(|| busy(target))?;
            (s, t)
        } else {
            let t = target_slot.try_lock().ok_or_else(|| busy(target))?;
            let s = source_slot.try_lock().ok_or_else(|| busy(source))?;
            (s, t)
        };
        self.batches.ensure_accruing(batch, now)?;

        let requested = checked_sub(source_guard.requested, amount)?;
        let deposited = checked_add(target_guard.deposited, amount)?;
        source_guard.requested = requested;
        target_guard.deposited = deposited;
        drop(target_guard);
        drop(source_guard);

        self.journal.emit(SettlementEvent::VirtualTransfer {
            source,
            target,
            batch,
            amount,
        });
        Ok(())
    }

    /// Settlement only: returns the slot and clears it.
    ///
    /// Unlike the mutators this waits for the slot; the batch has stopped accruing so any
    /// holder is about to fail and release it.
    pub fn consume(&self, vault: VaultId, batch: BatchId) -> LedgerSlot {
        let Some(slot) = self.slots.get(&(vault, batch)).map(|e| Arc::clone(e.value())) else {
            return LedgerSlot::default();
        };

        let consumed = std::mem::take(&mut *slot.lock());
        self.slots.remove(&(vault, batch));

        debug!(%vault, batch, ?consumed, "Consumed ledger slot");
        consumed
    }

    pub fn snapshot(&self, vault: VaultId, batch: BatchId) -> LedgerSlot {
        let Some(slot) = self.slots.get(&(vault, batch)).map(|e| Arc::clone(e.value())) else {
            return LedgerSlot::default();
        };
        let current = *slot.lock();
        current
    }
}

fn checked_add(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b).ok_or(SettlementError::MathOverflow)
}

fn checked_sub(available: u64, requested: u64) -> Result<u64> {
    available
        .checked_sub(requested)
        .ok_or(SettlementError::InsufficientVirtualBalance {
            available,
            requested,
        })
}
