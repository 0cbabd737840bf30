use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::{
    constants::{FIRST_BATCH_ID, PAYOUT_TARGET_SEED},
    error::{Result, SettlementError},
    events::{EventJournal, SettlementEvent},
    state::{Address, AssetId, Batch, BatchId, BatchPolicy, BatchStatus, VaultId},
};

/// Batch-id sequencing and the Open -> Closed -> Settled state machine.
#[derive(Debug)]
pub struct BatchLifecycle {
    policy: BatchPolicy,
    current: Mutex<BatchId>,
    batches: DashMap<BatchId, Batch>,
    journal: Arc<EventJournal>,
}

impl BatchLifecycle {
    /// Opens the first batch at `now`.
    pub fn new(policy: BatchPolicy, now: u64, journal: Arc<EventJournal>) -> Self {
        let lifecycle = Self {
            policy,
            current: Mutex::new(FIRST_BATCH_ID),
            batches: DashMap::new(),
            journal,
        };
        lifecycle.open(FIRST_BATCH_ID, now);
        lifecycle
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    fn open(&self, id: BatchId, now: u64) {
        self.batches.insert(id, Batch::new(id, now, self.policy));
        self.journal.emit(SettlementEvent::BatchCreated {
            batch: id,
            created_at: now,
        });
        info!(batch = id, created_at = now, "Opened batch");
    }

    /// Current batch id; under the timed policy the pointer rolls on first use after the cutoff.
    pub fn current_batch(&self, now: u64) -> BatchId {
        let mut current = self.current.lock();

        let expired = self
            .batches
            .get(&*current)
            .is_some_and(|batch| batch.past_cutoff(now));
        if !expired {
            return *current;
        }

        if let Some(mut batch) = self.batches.get_mut(&*current) {
            if batch.status == BatchStatus::Open {
                batch.status = BatchStatus::Closed;
                self.journal
                    .emit(SettlementEvent::BatchClosed { batch: batch.id });
            }
        }

        *current += 1;
        self.open(*current, now);
        *current
    }

    pub fn create_new_batch(&self, now: u64) -> BatchId {
        let mut current = self.current.lock();
        *current += 1;
        self.open(*current, now);
        *current
    }

    pub fn close(&self, id: BatchId) -> Result<()> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or(SettlementError::UnknownBatch(id))?;

        match batch.status {
            BatchStatus::Open => {}
            BatchStatus::Closed => return Err(SettlementError::BatchClosed(id)),
            BatchStatus::Settled => return Err(SettlementError::BatchAlreadySettled(id)),
        }

        batch.status = BatchStatus::Closed;
        self.journal.emit(SettlementEvent::BatchClosed { batch: id });
        info!(batch = id, "Closed batch");
        Ok(())
    }

    pub fn push_vault(&self, id: BatchId, vault: VaultId) -> Result<()> {
        let mut batch = self.open_batch_mut(id)?;
        if batch.vaults.contains(&vault) {
            return Err(SettlementError::VaultAlreadyInBatch { vault, batch: id });
        }

        batch.vaults.push(vault);
        self.journal
            .emit(SettlementEvent::VaultJoinedBatch { batch: id, vault });
        Ok(())
    }

    /// Like [`push_vault`](Self::push_vault) but a no-op for existing members or non-open batches.
    pub fn join_vault(&self, id: BatchId, vault: VaultId) {
        if let Some(mut batch) = self.batches.get_mut(&id) {
            if batch.status == BatchStatus::Open && !batch.vaults.contains(&vault) {
                batch.vaults.push(vault);
                self.journal
                    .emit(SettlementEvent::VaultJoinedBatch { batch: id, vault });
            }
        }
    }

    pub fn push_asset(&self, id: BatchId, asset: AssetId) -> Result<()> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or(SettlementError::UnknownBatch(id))?;
        if batch.status == BatchStatus::Settled {
            return Err(SettlementError::BatchAlreadySettled(id));
        }
        if batch.assets.contains(&asset) {
            return Err(SettlementError::AssetAlreadyInBatch { asset, batch: id });
        }

        batch.assets.push(asset);
        self.journal
            .emit(SettlementEvent::AssetJoinedBatch { batch: id, asset });
        Ok(())
    }

    /// First call derives and memoizes the payout target; later calls return the same address.
    pub fn deploy_payout_target(&self, id: BatchId) -> Result<Address> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or(SettlementError::UnknownBatch(id))?;

        if let Some(target) = batch.payout_target {
            return Ok(target);
        }

        let target = Address::derive(&[PAYOUT_TARGET_SEED, &id.to_le_bytes()]);
        batch.payout_target = Some(target);
        self.journal
            .emit(SettlementEvent::PayoutTargetDeployed { batch: id, target });
        Ok(target)
    }

    /// Terminal. Works from Open or Closed.
    pub fn settle(&self, id: BatchId) -> Result<()> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or(SettlementError::UnknownBatch(id))?;
        if batch.status == BatchStatus::Settled {
            return Err(SettlementError::BatchAlreadySettled(id));
        }

        batch.status = BatchStatus::Settled;
        self.journal.emit(SettlementEvent::BatchSettled { batch: id });
        info!(batch = id, "Settled batch");
        Ok(())
    }

    /// Records that `vault` settled `id`; returns true once every member vault has.
    pub fn mark_vault_settled(&self, id: BatchId, vault: VaultId) -> Result<bool> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or(SettlementError::UnknownBatch(id))?;
        if batch.is_settled_for(&vault) {
            return Err(SettlementError::BatchAlreadySettled(id));
        }
        if !batch.is_member(&vault) {
            return Err(SettlementError::VaultNotInBatch { vault, batch: id });
        }

        batch.settled_vaults.push(vault);
        let complete = batch.vaults.iter().all(|v| batch.settled_vaults.contains(v));
        if complete {
            batch.status = BatchStatus::Settled;
            self.journal.emit(SettlementEvent::BatchSettled { batch: id });
            info!(batch = id, "All member vaults settled");
        }
        Ok(complete)
    }

    /// Ledger mutations are only accepted while this holds.
    pub fn ensure_accruing(&self, id: BatchId, now: u64) -> Result<()> {
        let batch = self
            .batches
            .get(&id)
            .ok_or(SettlementError::UnknownBatch(id))?;

        match batch.status {
            BatchStatus::Open => {}
            BatchStatus::Closed => return Err(SettlementError::BatchClosed(id)),
            BatchStatus::Settled => return Err(SettlementError::BatchAlreadySettled(id)),
        }
        if let Some(cutoff) = batch.cutoff_at.filter(|_| batch.past_cutoff(now)) {
            return Err(SettlementError::CutoffPassed { batch: id, cutoff });
        }
        Ok(())
    }

    /// The batch stopped accruing, is eligible, has `vault` as a member and is not yet settled for it.
    pub fn ensure_settleable(&self, id: BatchId, vault: &VaultId, now: u64) -> Result<()> {
        let batch = self
            .batches
            .get(&id)
            .ok_or(SettlementError::UnknownBatch(id))?;

        if batch.is_settled_for(vault) {
            return Err(SettlementError::BatchAlreadySettled(id));
        }
        if batch.status == BatchStatus::Open && !batch.past_cutoff(now) {
            return Err(SettlementError::BatchStillOpen(id));
        }
        if let Some(eligible_at) = batch.settle_eligible_at.filter(|at| now < *at) {
            return Err(SettlementError::SettleWindowNotReached {
                batch: id,
                eligible_at,
            });
        }
        if !batch.is_member(vault) {
            return Err(SettlementError::VaultNotInBatch {
                vault: *vault,
                batch: id,
            });
        }
        Ok(())
    }

    pub fn batch(&self, id: BatchId) -> Option<Batch> {
        self.batches.get(&id).map(|batch| batch.clone())
    }

    fn open_batch_mut(
        &self,
        id: BatchId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, BatchId, Batch>> {
        let batch = self
            .batches
            .get_mut(&id)
            .ok_or(SettlementError::UnknownBatch(id))?;
        match batch.status {
            BatchStatus::Open => Ok(batch),
            BatchStatus::Closed => Err(SettlementError::BatchClosed(id)),
            BatchStatus::Settled => Err(SettlementError::BatchAlreadySettled(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> BatchLifecycle {
        BatchLifecycle::new(BatchPolicy::Manual, 0, Arc::new(EventJournal::default()))
    }

    #[test]
    fn test_first_batch_is_open() {
        let batches = manual();
        assert_eq!(batches.current_batch(10), FIRST_BATCH_ID);
        assert!(batches.ensure_accruing(FIRST_BATCH_ID, 10).is_ok());
    }

    #[test]
    fn test_create_new_batch_advances_pointer() {
        let batches = manual();
        let next = batches.create_new_batch(5);
        assert_eq!(next, FIRST_BATCH_ID + 1);
        assert_eq!(batches.current_batch(5), next);
    }

    #[test]
    fn test_close_twice_fails() {
        let batches = manual();
        batches.close(1).unwrap();
        assert!(matches!(batches.close(1), Err(SettlementError::BatchClosed(1))));
        assert!(matches!(
            batches.ensure_accruing(1, 0),
            Err(SettlementError::BatchClosed(1))
        ));
    }

    #[test]
    fn test_push_vault_once() {
        let batches = manual();
        let vault = Address::new_unique();
        batches.push_vault(1, vault).unwrap();
        assert!(matches!(
            batches.push_vault(1, vault),
            Err(SettlementError::VaultAlreadyInBatch { .. })
        ));
        batches.join_vault(1, vault);
        assert_eq!(batches.batch(1).unwrap().vaults, vec![vault]);
    }

    #[test]
    fn test_push_vault_rejected_after_close() {
        let batches = manual();
        batches.close(1).unwrap();
        assert!(matches!(
            batches.push_vault(1, Address::new_unique()),
            Err(SettlementError::BatchClosed(1))
        ));
    }

    #[test]
    fn test_payout_target_memoized() {
        let batches = manual();
        let first = batches.deploy_payout_target(1).unwrap();
        let second = batches.deploy_payout_target(1).unwrap();
        assert_eq!(first, second);
        assert_eq!(batches.batch(1).unwrap().payout_target, Some(first));
    }

    #[test]
    fn test_settle_is_terminal() {
        let batches = manual();
        batches.settle(1).unwrap();
        assert!(matches!(
            batches.settle(1),
            Err(SettlementError::BatchAlreadySettled(1))
        ));
        assert!(matches!(
            batches.close(1),
            Err(SettlementError::BatchAlreadySettled(1))
        ));
    }

    #[test]
    fn test_batch_settles_when_all_members_settled() {
        let batches = manual();
        let gateway = Address::new_unique();
        let pool = Address::new_unique();
        batches.push_vault(1, gateway).unwrap();
        batches.push_vault(1, pool).unwrap();
        batches.close(1).unwrap();

        assert!(!batches.mark_vault_settled(1, gateway).unwrap());
        assert!(matches!(
            batches.mark_vault_settled(1, gateway),
            Err(SettlementError::BatchAlreadySettled(1))
        ));
        assert!(batches.mark_vault_settled(1, pool).unwrap());
        assert_eq!(batches.batch(1).unwrap().status, BatchStatus::Settled);
    }

    #[test]
    fn test_settleable_requires_closed_batch() {
        let batches = manual();
        let vault = Address::new_unique();
        batches.push_vault(1, vault).unwrap();
        assert!(matches!(
            batches.ensure_settleable(1, &vault, 0),
            Err(SettlementError::BatchStillOpen(1))
        ));
        batches.close(1).unwrap();
        assert!(batches.ensure_settleable(1, &vault, 0).is_ok());
        assert!(matches!(
            batches.ensure_settleable(1, &Address::new_unique(), 0),
            Err(SettlementError::VaultNotInBatch { .. })
        ));
    }

    #[test]
    fn test_timed_policy_rolls_after_cutoff() {
        let policy = BatchPolicy::Timed {
            cutoff_secs: 100,
            settle_after_secs: 200,
        };
        let batches = BatchLifecycle::new(policy, 1_000, Arc::new(EventJournal::default()));

        assert_eq!(batches.current_batch(1_100), 1);
        assert!(matches!(
            batches.ensure_accruing(1, 1_101),
            Err(SettlementError::CutoffPassed { batch: 1, cutoff: 1_100 })
        ));

        assert_eq!(batches.current_batch(1_101), 2);
        assert_eq!(batches.batch(1).unwrap().status, BatchStatus::Closed);
        assert_eq!(batches.batch(2).unwrap().cutoff_at, Some(1_201));
    }

    #[test]
    fn test_timed_policy_settle_window() {
        let policy = BatchPolicy::Timed {
            cutoff_secs: 100,
            settle_after_secs: 200,
        };
        let batches = BatchLifecycle::new(policy, 0, Arc::new(EventJournal::default()));
        let vault = Address::new_unique();
        batches.push_vault(1, vault).unwrap();

        assert!(matches!(
            batches.ensure_settleable(1, &vault, 150),
            Err(SettlementError::SettleWindowNotReached { eligible_at: 200, .. })
        ));
        assert!(batches.ensure_settleable(1, &vault, 200).is_ok());
    }
}
