use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    constants::PROPOSAL_SEED,
    error::{Result, SettlementError},
    events::{EventJournal, SettlementEvent},
    instructions::netting::{exceeds_tolerance, max_allowed_delta, NettingOutcome},
    state::{
        Address, AssetId, BatchId, FeeCheckpoints, LedgerSlot, ProposalId, ProposalStatus,
        SettlementParams, SettlementProposal, TolerancePolicy, VaultId, VaultKind,
    },
};

/// Everything needed to record a proposal, computed before the book is locked.
#[derive(Debug, Clone)]
pub struct ProposalDraft {
    pub vault: VaultId,
    pub asset: AssetId,
    pub batch: BatchId,
    pub kind: VaultKind,
    pub reported_total_assets: u64,
    pub last_settled_total_assets: u64,
    pub netting: NettingOutcome,
    pub ledger: LedgerSlot,
    pub fee_checkpoints: FeeCheckpoints,
}

#[derive(Debug, Default)]
struct ProposalBook {
    nonce: u64,
    /// Live (vault, batch) reservations; released only by cancellation
    reserved: HashMap<(VaultId, BatchId), ProposalId>,
    proposals: HashMap<ProposalId, SettlementProposal>,
    pending: HashMap<VaultId, BTreeSet<ProposalId>>,
    executed: HashSet<ProposalId>,
}

impl ProposalBook {
    fn is_pending(&self, proposal: &SettlementProposal) -> bool {
        self.pending
            .get(&proposal.vault)
            .is_some_and(|ids| ids.contains(&proposal.id))
    }

    fn pending_proposal(&self, id: &ProposalId, now: u64) -> Result<&SettlementProposal> {
        if self.executed.contains(id) {
            return Err(SettlementError::ProposalExecuted(*id));
        }
        let proposal = self
            .proposals
            .get(id)
            .ok_or(SettlementError::ProposalNotFound(*id))?;
        if !self.is_pending(proposal) {
            return Err(SettlementError::ProposalNotPending(*id));
        }
        if now < proposal.execute_after {
            return Err(SettlementError::CooldownNotElapsed {
                execute_after: proposal.execute_after,
                now,
            });
        }
        Ok(proposal)
    }
}

/// Settlement proposals with their cooldowns, pending sets and executed set.
///
/// A single lock guards the book so the reservation check and the id counter move together.
#[derive(Debug)]
pub struct SettlementProposalStore {
    book: Mutex<ProposalBook>,
    journal: Arc<EventJournal>,
}

impl SettlementProposalStore {
    pub fn new(journal: Arc<EventJournal>) -> Self {
        Self {
            book: Mutex::new(ProposalBook::default()),
            journal,
        }
    }

    pub fn propose(
        &self,
        draft: ProposalDraft,
        now: u64,
        params: &SettlementParams,
    ) -> Result<SettlementProposal> {
        let yield_amount = draft.netting.yield_amount;
        let over_tolerance = exceeds_tolerance(
            yield_amount,
            draft.last_settled_total_assets,
            params.max_allowed_delta_bps,
        );
        let max_delta =
            max_allowed_delta(draft.last_settled_total_assets, params.max_allowed_delta_bps);
        if over_tolerance && params.tolerance_policy == TolerancePolicy::Enforce {
            return Err(SettlementError::YieldToleranceExceeded {
                yield_amount,
                max_delta,
            });
        }

        let execute_after = now
            .checked_add(params.cooldown_secs)
            .ok_or(SettlementError::MathOverflow)?;

        let mut book = self.book.lock();

        if book.reserved.contains_key(&(draft.vault, draft.batch)) {
            return Err(SettlementError::BatchAlreadyProposed {
                vault: draft.vault,
                batch: draft.batch,
            });
        }

        let nonce = book.nonce + 1;
        let id = derive_proposal_id(&draft.vault, &draft.asset, draft.batch, now, nonce);
        if book.executed.contains(&id) {
            return Err(SettlementError::ProposalExecuted(id));
        }
        if book
            .pending
            .get(&draft.vault)
            .is_some_and(|ids| ids.contains(&id))
        {
            return Err(SettlementError::ProposalExists(id));
        }

        let proposal = SettlementProposal {
            id,
            vault: draft.vault,
            asset: draft.asset,
            batch: draft.batch,
            kind: draft.kind,
            reported_total_assets: draft.reported_total_assets,
            last_settled_total_assets: draft.last_settled_total_assets,
            netted: draft.netting.netted,
            yield_amount,
            ledger: draft.ledger,
            proposed_at: now,
            execute_after,
            fee_checkpoints: draft.fee_checkpoints,
            status: ProposalStatus::Proposed,
        };

        book.nonce = nonce;
        book.reserved.insert((proposal.vault, proposal.batch), id);
        book.pending.entry(proposal.vault).or_default().insert(id);
        book.proposals.insert(id, proposal.clone());
        drop(book);

        if over_tolerance {
            warn!(
                vault = %proposal.vault,
                batch = proposal.batch,
                yield_amount,
                max_delta,
                "Reported yield exceeds tolerance"
            );
            self.journal.emit(SettlementEvent::YieldToleranceExceeded {
                vault: proposal.vault,
                batch: proposal.batch,
                yield_amount,
                max_delta,
            });
        }

        info!(
            %id,
            vault = %proposal.vault,
            batch = proposal.batch,
            netted = proposal.netted,
            yield_amount,
            execute_after,
            "Proposed settlement"
        );
        self.journal.emit(SettlementEvent::SettlementProposed {
            id,
            vault: proposal.vault,
            batch: proposal.batch,
            netted: proposal.netted,
            yield_amount,
            execute_after,
        });

        Ok(proposal)
    }

    /// Drop a pending proposal and free its (vault, batch) reservation.
    pub fn cancel(&self, id: &ProposalId, guardian: Address) -> Result<SettlementProposal> {
        let mut book = self.book.lock();

        if book.executed.contains(id) {
            return Err(SettlementError::ProposalExecuted(*id));
        }
        let proposal = book
            .proposals
            .get(id)
            .ok_or(SettlementError::ProposalNotFound(*id))?;
        if !book.is_pending(proposal) {
            return Err(SettlementError::ProposalNotPending(*id));
        }
        let (vault, batch) = (proposal.vault, proposal.batch);

        if let Some(ids) = book.pending.get_mut(&vault) {
            ids.remove(id);
        }
        book.reserved.remove(&(vault, batch));
        let proposal = book
            .proposals
            .get_mut(id)
            .ok_or(SettlementError::ProposalNotFound(*id))?;
        proposal.status = ProposalStatus::Cancelled;
        let cancelled = proposal.clone();
        drop(book);

        info!(%id, %vault, batch, %guardian, "Cancelled settlement proposal");
        self.journal
            .emit(SettlementEvent::SettlementCancelled { id: *id, guardian });
        Ok(cancelled)
    }

    /// Read-only check that `id` could be executed at `now`.
    pub fn check_executable(&self, id: &ProposalId, now: u64) -> Result<SettlementProposal> {
        let book = self.book.lock();
        book.pending_proposal(id, now).cloned()
    }

    /// Move `id` from its pending set into the executed set. Must precede every effect.
    pub fn mark_executed(&self, id: &ProposalId, now: u64) -> Result<SettlementProposal> {
        let mut book = self.book.lock();
        let vault = book.pending_proposal(id, now)?.vault;

        if let Some(ids) = book.pending.get_mut(&vault) {
            ids.remove(id);
        }
        book.executed.insert(*id);
        let proposal = book
            .proposals
            .get_mut(id)
            .ok_or(SettlementError::ProposalNotFound(*id))?;
        proposal.status = ProposalStatus::Executed;
        Ok(proposal.clone())
    }

    pub fn is_executed(&self, id: &ProposalId) -> bool {
        self.book.lock().executed.contains(id)
    }

    pub fn proposal(&self, id: &ProposalId) -> Option<SettlementProposal> {
        self.book.lock().proposals.get(id).cloned()
    }

    pub fn pending_for_vault(&self, vault: &VaultId) -> Vec<SettlementProposal> {
        let book = self.book.lock();
        book.pending
            .get(vault)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| book.proposals.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pending proposals whose cooldown has elapsed, oldest first.
    pub fn matured(&self, now: u64) -> Vec<ProposalId> {
        let book = self.book.lock();
        let mut ready: Vec<&SettlementProposal> = book
            .pending
            .values()
            .flatten()
            .filter_map(|id| book.proposals.get(id))
            .filter(|proposal| now >= proposal.execute_after)
            .collect();
        ready.sort_by_key(|proposal| (proposal.execute_after, proposal.batch));
        ready.into_iter().map(|proposal| proposal.id).collect()
    }
}

/// `blake3(seed || vault || asset || batch || now || nonce)`
pub fn derive_proposal_id(
    vault: &VaultId,
    asset: &AssetId,
    batch: BatchId,
    now: u64,
    nonce: u64,
) -> ProposalId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(PROPOSAL_SEED);
    hasher.update(vault.as_bytes());
    hasher.update(asset.as_bytes());
    hasher.update(&batch.to_le_bytes());
    hasher.update(&now.to_le_bytes());
    hasher.update(&nonce.to_le_bytes());
    ProposalId::new(*hasher.finalize().as_bytes())
}
