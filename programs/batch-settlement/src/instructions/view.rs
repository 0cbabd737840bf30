use crate::{
    error::{Result, SettlementError},
    events::SettlementEvent,
    state::{
        Address, Batch, BatchId, LedgerSlot, ProposalId, SettlementParams, SettlementProposal,
        VaultId,
    },
    SettlementEngine,
};

// ============ View Functions ============

impl SettlementEngine {
    pub fn params(&self) -> SettlementParams {
        *self.params.read()
    }

    /// Pending proposals for `vault`, in id order
    pub fn pending_proposals(&self, vault: &VaultId) -> Vec<SettlementProposal> {
        self.proposals.pending_for_vault(vault)
    }

    pub fn proposal(&self, id: &ProposalId) -> Option<SettlementProposal> {
        self.proposals.proposal(id)
    }

    pub fn is_executed(&self, id: &ProposalId) -> bool {
        self.proposals.is_executed(id)
    }

    /// Pending proposals whose cooldown has elapsed at `now`, oldest first
    pub fn matured_proposals(&self, now: u64) -> Vec<ProposalId> {
        self.proposals.matured(now)
    }

    pub fn ledger_snapshot(&self, vault: VaultId, batch: BatchId) -> LedgerSlot {
        self.ledger.snapshot(vault, batch)
    }

    pub fn batch(&self, id: BatchId) -> Option<Batch> {
        self.batches.batch(id)
    }

    /// Receiver custodying a pooled vault's redeemed assets for `batch`
    pub fn batch_receiver(&self, vault: &VaultId, batch: BatchId) -> Result<Address> {
        let pool = self
            .collaborators
            .registry
            .resolve_pooled_vault(vault)
            .ok_or(SettlementError::WrongVaultKind { vault: *vault })?;
        Ok(pool.batch_receiver(batch)?)
    }

    pub fn events(&self) -> Vec<SettlementEvent> {
        self.journal.snapshot()
    }

    /// The last `limit` journal entries, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<SettlementEvent> {
        self.journal.recent(limit)
    }

    pub fn drain_events(&self) -> Vec<SettlementEvent> {
        self.journal.drain()
    }
}
