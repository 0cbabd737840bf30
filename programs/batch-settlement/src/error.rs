//! Error types for the settlement engine

use thiserror::Error;

use crate::state::{Address, BatchId, Capability, ProposalId, VaultId};

/// Broad classification of a [`SettlementError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StateConflict,
    Authorization,
    Timing,
    InvariantViolation,
    Collaborator,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Identity must not be the zero address")]
    ZeroIdentity,

    #[error("Vault {0} is not registered")]
    UnsupportedVault(VaultId),

    #[error("Vault {vault} does not support this operation")]
    WrongVaultKind { vault: VaultId },

    #[error("No adapter registered for vault {vault} and asset {asset}")]
    UnsupportedAsset { vault: VaultId, asset: Address },

    #[error("Batch {0} does not exist")]
    UnknownBatch(BatchId),

    #[error("Vault {vault} is not a member of batch {batch}")]
    VaultNotInBatch { vault: VaultId, batch: BatchId },

    #[error("Cooldown {requested}s exceeds the {max}s maximum")]
    CooldownOutOfBounds { requested: u64, max: u64 },

    #[error("Basis points must be <= 10000, got {0}")]
    InvalidBps(u64),

    #[error("Arithmetic overflow")]
    MathOverflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Batch {batch} already has a proposal for vault {vault}")]
    BatchAlreadyProposed { vault: VaultId, batch: BatchId },

    #[error("Proposal {0} is already pending")]
    ProposalExists(ProposalId),

    #[error("Proposal {0} has already been executed")]
    ProposalExecuted(ProposalId),

    #[error("Proposal {0} does not exist")]
    ProposalNotFound(ProposalId),

    #[error("Proposal {0} is not pending")]
    ProposalNotPending(ProposalId),

    #[error("Batch {0} is closed")]
    BatchClosed(BatchId),

    #[error("Batch {0} is still accruing")]
    BatchStillOpen(BatchId),

    #[error("Batch {0} is already settled")]
    BatchAlreadySettled(BatchId),

    #[error("Vault {vault} already joined batch {batch}")]
    VaultAlreadyInBatch { vault: VaultId, batch: BatchId },

    #[error("Asset {asset} already joined batch {batch}")]
    AssetAlreadyInBatch { asset: Address, batch: BatchId },

    #[error("Ledger slot ({vault}, {batch}) is busy")]
    LedgerSlotBusy { vault: VaultId, batch: BatchId },

    #[error("Unauthorized - {identity} lacks the {capability:?} capability")]
    MissingCapability {
        identity: Address,
        capability: Capability,
    },

    #[error("Unauthorized - caller {caller} cannot act for vault {vault}")]
    CallerMismatch { caller: Address, vault: VaultId },

    #[error("Cooldown not elapsed: executable after {execute_after}, now {now}")]
    CooldownNotElapsed { execute_after: u64, now: u64 },

    #[error("Batch {batch} stopped accruing at {cutoff}")]
    CutoffPassed { batch: BatchId, cutoff: u64 },

    #[error("Batch {batch} is not settle-eligible before {eligible_at}")]
    SettleWindowNotReached { batch: BatchId, eligible_at: u64 },

    #[error("Gateway backing would go negative: prior {prior}, netted {netted}")]
    NegativeBacking { prior: u64, netted: i128 },

    #[error("Insufficient virtual balance: available {available}, requested {requested}")]
    InsufficientVirtualBalance { available: u64, requested: u64 },

    #[error("Ledger slot ({vault}, {batch}) changed since the proposal was made")]
    LedgerDrift { vault: VaultId, batch: BatchId },

    #[error("Yield {yield_amount} exceeds the {max_delta} tolerance")]
    YieldToleranceExceeded { yield_amount: i128, max_delta: u128 },

    #[error("Collaborator call failed: {0}")]
    Collaborator(String),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        use SettlementError::*;

        match self {
            ZeroAmount
            | ZeroIdentity
            | UnsupportedVault(_)
            | WrongVaultKind { .. }
            | UnsupportedAsset { .. }
            | UnknownBatch(_)
            | VaultNotInBatch { .. }
            | CooldownOutOfBounds { .. }
            | InvalidBps(_)
            | MathOverflow
            | DivisionByZero => ErrorKind::Validation,

            BatchAlreadyProposed { .. }
            | ProposalExists(_)
            | ProposalExecuted(_)
            | ProposalNotFound(_)
            | ProposalNotPending(_)
            | BatchClosed(_)
            | BatchStillOpen(_)
            | BatchAlreadySettled(_)
            | VaultAlreadyInBatch { .. }
            | AssetAlreadyInBatch { .. }
            | LedgerSlotBusy { .. } => ErrorKind::StateConflict,

            MissingCapability { .. } | CallerMismatch { .. } => ErrorKind::Authorization,

            CooldownNotElapsed { .. } | CutoffPassed { .. } | SettleWindowNotReached { .. } => {
                ErrorKind::Timing
            }

            NegativeBacking { .. }
            | InsufficientVirtualBalance { .. }
            | LedgerDrift { .. }
            | YieldToleranceExceeded { .. } => ErrorKind::InvariantViolation,

            Collaborator(_) => ErrorKind::Collaborator,
        }
    }
}

impl From<anyhow::Error> for SettlementError {
    fn from(err: anyhow::Error) -> Self {
        SettlementError::Collaborator(format!("{err:#}"))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SettlementError>;
