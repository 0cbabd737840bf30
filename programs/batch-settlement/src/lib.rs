//! Batch settlement engine.
//!
//! Deposits and redemption requests accrue per (vault, batch) in a virtual ledger. Once a batch
//! stops accruing a relayer proposes a settlement against the externally reported total, a
//! guardian may veto it during the cooldown, and anyone may execute it afterwards.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

pub mod constants;
pub mod error;
pub mod events;
pub mod instructions;
pub mod interfaces;
pub mod math;
pub mod memory;
pub mod state;

use constants::{BPS_DENOMINATOR, MAX_COOLDOWN_SECS};
use error::{Result, SettlementError};
use events::EventJournal;
use instructions::*;
use interfaces::Collaborators;
use state::*;

pub use error::ErrorKind;
pub use events::SettlementEvent;

#[derive(Debug)]
pub struct SettlementEngine {
    collaborators: Collaborators,
    params: RwLock<SettlementParams>,
    journal: Arc<EventJournal>,
    batches: Arc<BatchLifecycle>,
    ledger: Arc<VirtualBalanceLedger>,
    proposals: SettlementProposalStore,
    executor: SettlementExecutor,
}

impl SettlementEngine {
    /// Build an engine and open the first batch at the clock's current time.
    pub fn new(
        collaborators: Collaborators,
        params: SettlementParams,
        policy: BatchPolicy,
    ) -> Result<Self> {
        validate_cooldown(params.cooldown_secs)?;
        validate_bps(params.max_allowed_delta_bps)?;

        let journal = Arc::new(EventJournal::default());
        let now = collaborators.clock.now();
        let batches = Arc::new(BatchLifecycle::new(policy, now, journal.clone()));
        let ledger = Arc::new(VirtualBalanceLedger::new(batches.clone(), journal.clone()));
        let proposals = SettlementProposalStore::new(journal.clone());
        let executor = SettlementExecutor::new(
            ledger.clone(),
            batches.clone(),
            collaborators.registry.clone(),
            collaborators.custody.clone(),
            journal.clone(),
        );

        info!(?params, ?policy, "Settlement engine started");
        Ok(Self {
            collaborators,
            params: RwLock::new(params),
            journal,
            batches,
            ledger,
            proposals,
            executor,
        })
    }

    pub fn now(&self) -> u64 {
        self.collaborators.clock.now()
    }

    fn require(&self, identity: &Address, capability: Capability) -> Result<()> {
        if identity.is_zero() {
            return Err(SettlementError::ZeroIdentity);
        }
        if !self
            .collaborators
            .capabilities
            .has_capability(identity, capability)
        {
            return Err(SettlementError::MissingCapability {
                identity: *identity,
                capability,
            });
        }
        Ok(())
    }

    /// The caller must be the vault itself and the vault must be registered.
    fn require_vault(&self, caller: &Address, vault: &VaultId) -> Result<VaultKind> {
        if vault.is_zero() {
            return Err(SettlementError::ZeroIdentity);
        }
        if caller != vault {
            return Err(SettlementError::CallerMismatch {
                caller: *caller,
                vault: *vault,
            });
        }
        self.collaborators
            .registry
            .vault_kind(vault)
            .ok_or(SettlementError::UnsupportedVault(*vault))
    }

    fn require_kind(&self, vault: &VaultId, actual: VaultKind, expected: VaultKind) -> Result<()> {
        if actual != expected {
            return Err(SettlementError::WrongVaultKind { vault: *vault });
        }
        Ok(())
    }

    // ============ Virtual Balance Ledger ============

    /// Record an asset deposit into `vault`'s slot for `batch`
    pub fn record_deposit(
        &self,
        caller: Address,
        vault: VaultId,
        batch: BatchId,
        amount: u64,
    ) -> Result<()> {
        self.require_vault(&caller, &vault)?;
        self.batches.join_vault(batch, vault);
        self.ledger.record_deposit(vault, batch, amount, self.now())
    }

    /// Record an asset-denominated redemption request (gateway vaults)
    pub fn record_redemption_request(
        &self,
        caller: Address,
        vault: VaultId,
        batch: BatchId,
        amount: u64,
    ) -> Result<()> {
        let kind = self.require_vault(&caller, &vault)?;
        self.require_kind(&vault, kind, VaultKind::Gateway)?;
        self.batches.join_vault(batch, vault);
        self.ledger
            .record_redemption_request(vault, batch, amount, self.now())
    }

    /// Move pending redemption demand of `source` into deposits of `target`
    pub fn transfer(
        &self,
        caller: Address,
        source: VaultId,
        target: VaultId,
        batch: BatchId,
        amount: u64,
    ) -> Result<()> {
        let kind = self.require_vault(&caller, &source)?;
        self.require_kind(&source, kind, VaultKind::Gateway)?;
        if target.is_zero() {
            return Err(SettlementError::ZeroIdentity);
        }
        if self.collaborators.registry.vault_kind(&target).is_none() {
            return Err(SettlementError::UnsupportedVault(target));
        }

        self.batches.join_vault(batch, source);
        self.batches.join_vault(batch, target);
        self.ledger
            .transfer(source, target, batch, amount, self.now())
    }

    /// Add share-denominated redemption demand (pooled vaults)
    pub fn record_share_request_push(
        &self,
        caller: Address,
        vault: VaultId,
        batch: BatchId,
        shares: u64,
    ) -> Result<()> {
        let kind = self.require_vault(&caller, &vault)?;
        self.require_kind(&vault, kind, VaultKind::Pooled)?;
        self.batches.join_vault(batch, vault);
        self.ledger
            .record_share_request_push(vault, batch, shares, self.now())
    }

    /// Withdraw share-denominated redemption demand (pooled vaults)
    pub fn record_share_request_pull(
        &self,
        caller: Address,
        vault: VaultId,
        batch: BatchId,
        shares: u64,
    ) -> Result<()> {
        let kind = self.require_vault(&caller, &vault)?;
        self.require_kind(&vault, kind, VaultKind::Pooled)?;
        self.ledger
            .record_share_request_pull(vault, batch, shares, self.now())
    }

    // ============ Batch Lifecycle ============

    /// Current batch id, rolling it first under the timed policy
    pub fn current_batch(&self) -> BatchId {
        self.batches.current_batch(self.now())
    }

    pub fn create_new_batch(&self, caller: Address) -> Result<BatchId> {
        self.require(&caller, Capability::Relayer)?;
        Ok(self.batches.create_new_batch(self.now()))
    }

    pub fn close_batch(&self, caller: Address, batch: BatchId) -> Result<()> {
        self.require(&caller, Capability::Relayer)?;
        self.batches.close(batch)
    }

    /// Join `vault` to an open batch; the caller must be the vault
    pub fn push_vault(&self, caller: Address, batch: BatchId, vault: VaultId) -> Result<()> {
        self.require_vault(&caller, &vault)?;
        self.batches.push_vault(batch, vault)
    }

    pub fn push_asset(&self, caller: Address, batch: BatchId, asset: AssetId) -> Result<()> {
        self.require(&caller, Capability::Relayer)?;
        if asset.is_zero() {
            return Err(SettlementError::ZeroIdentity);
        }
        self.batches.push_asset(batch, asset)
    }

    /// Idempotent: later calls return the first target
    pub fn deploy_payout_target(&self, batch: BatchId) -> Result<Address> {
        self.batches.deploy_payout_target(batch)
    }

    /// Administrative override marking the whole batch settled
    pub fn settle_batch(&self, caller: Address, batch: BatchId) -> Result<()> {
        self.require(&caller, Capability::Admin)?;
        self.batches.settle(batch)
    }

    // ============ Settlement ============

    /// Propose settling `vault`'s flow for `batch` against `reported_total_assets`.
    ///
    /// The batch must have stopped accruing. Execution opens after the cooldown.
    pub fn propose(
        &self,
        caller: Address,
        vault: VaultId,
        asset: AssetId,
        batch: BatchId,
        reported_total_assets: u64,
        fee_checkpoints: FeeCheckpoints,
    ) -> Result<ProposalId> {
        self.require(&caller, Capability::Relayer)?;
        let now = self.now();

        let registry = &self.collaborators.registry;
        let kind = registry
            .vault_kind(&vault)
            .ok_or(SettlementError::UnsupportedVault(vault))?;
        self.batches.ensure_settleable(batch, &vault, now)?;

        let adapter = registry
            .resolve_adapter(&vault, &asset)
            .ok_or(SettlementError::UnsupportedAsset { vault, asset })?;
        let last_settled_total_assets = adapter.total_assets(&vault, &asset)?;

        let ledger = self.ledger.snapshot(vault, batch);
        let requested = match kind {
            VaultKind::Gateway => RequestedAmount::Assets(ledger.requested),
            VaultKind::Pooled => {
                let pool = registry
                    .resolve_pooled_vault(&vault)
                    .ok_or(SettlementError::WrongVaultKind { vault })?;
                RequestedAmount::Shares {
                    shares: ledger.requested_shares,
                    pool_supply: pool.total_supply()?,
                }
            }
        };

        let netting = netting::compute(&NettingInput {
            ledger_deposited: ledger.deposited,
            requested,
            reported_total_assets,
            last_settled_total_assets,
        })?;

        let params = *self.params.read();
        let draft = ProposalDraft {
            vault,
            asset,
            batch,
            kind,
            reported_total_assets,
            last_settled_total_assets,
            netting,
            ledger,
            fee_checkpoints,
        };
        self.proposals
            .propose(draft, now, &params)
            .map(|proposal| proposal.id)
    }

    /// Guardian veto of a pending proposal
    pub fn cancel(&self, caller: Address, id: &ProposalId) -> Result<()> {
        self.require(&caller, Capability::Guardian)?;
        self.proposals.cancel(id, caller).map(|_| ())
    }

    /// Execute a matured proposal.
    ///
    /// Validation runs before the proposal enters the executed set; a failure after that point
    /// leaves it executed and is returned as-is.
    pub fn execute(&self, id: &ProposalId) -> Result<SettlementReceipt> {
        let now = self.now();
        let proposal = self.proposals.check_executable(id, now)?;
        let plan = self.executor.prepare(&proposal, now)?;

        let proposal = self.proposals.mark_executed(id, now)?;
        self.executor.apply(&proposal, plan).inspect_err(|err| {
            error!(
                %id,
                vault = %proposal.vault,
                batch = proposal.batch,
                error = %err,
                "Settlement effect failed after commit"
            );
        })
    }
}

pub(crate) fn validate_cooldown(cooldown_secs: u64) -> Result<()> {
    if cooldown_secs > MAX_COOLDOWN_SECS {
        return Err(SettlementError::CooldownOutOfBounds {
            requested: cooldown_secs,
            max: MAX_COOLDOWN_SECS,
        });
    }
    Ok(())
}

pub(crate) fn validate_bps(bps: u64) -> Result<()> {
    if bps > BPS_DENOMINATOR {
        return Err(SettlementError::InvalidBps(bps));
    }
    Ok(())
}
