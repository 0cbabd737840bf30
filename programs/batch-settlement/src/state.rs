use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{
    DEFAULT_BATCH_CUTOFF_SECS, DEFAULT_BATCH_SETTLE_AFTER_SECS, DEFAULT_COOLDOWN_SECS,
    DEFAULT_MAX_ALLOWED_DELTA_BPS,
};

/// 32-byte identity shared by vaults, assets, payout targets and privileged callers.
///
/// Rendered as base58, the same way account keys are displayed on-chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

pub type VaultId = Address;
pub type AssetId = Address;
pub type BatchId = u64;

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Process-unique address, handy for fixtures and local deployments.
    pub fn new_unique() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    /// Deterministic address derived from seeds, analogous to a program-derived address.
    pub fn derive(seeds: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for seed in seeds {
            hasher.update(seed);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid base58 identity: {0}")]
pub struct ParseIdentityError(String);

fn decode_32(s: &str) -> Result<[u8; 32], ParseIdentityError> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|e| ParseIdentityError(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| ParseIdentityError(format!("expected 32 bytes, got {}", v.len())))
}

impl FromStr for Address {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_32(s).map(Self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Content-derived settlement proposal identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProposalId([u8; 32]);

impl ProposalId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProposalId({self})")
    }
}

impl FromStr for ProposalId {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_32(s).map(Self)
    }
}

impl Serialize for ProposalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProposalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultKind {
    /// Institutional gateway: push/pull 1:1 flow
    Gateway,
    /// Share-based yield pool
    Pooled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Tunes cooldown/tolerance parameters and force-settles batches
    Admin,
    /// Opens/closes batches and proposes settlements
    Relayer,
    /// Cancels pending proposals
    Guardian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Open,
    Closed,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub id: BatchId,
    pub status: BatchStatus,
    pub created_at: u64,
    /// Accrual stops after this timestamp (timed policy only)
    pub cutoff_at: Option<u64>,
    /// Earliest settlement timestamp (timed policy only)
    pub settle_eligible_at: Option<u64>,
    /// Lazily derived on first request
    pub payout_target: Option<Address>,
    pub vaults: Vec<VaultId>,
    pub assets: Vec<AssetId>,
    pub settled_vaults: Vec<VaultId>,
}

impl Batch {
    pub fn new(id: BatchId, created_at: u64, policy: BatchPolicy) -> Self {
        let (cutoff_at, settle_eligible_at) = match policy {
            BatchPolicy::Manual => (None, None),
            BatchPolicy::Timed {
                cutoff_secs,
                settle_after_secs,
            } => (
                Some(created_at.saturating_add(cutoff_secs)),
                Some(created_at.saturating_add(settle_after_secs)),
            ),
        };

        Self {
            id,
            status: BatchStatus::Open,
            created_at,
            cutoff_at,
            settle_eligible_at,
            payout_target: None,
            vaults: Vec::new(),
            assets: Vec::new(),
            settled_vaults: Vec::new(),
        }
    }

    pub fn is_member(&self, vault: &VaultId) -> bool {
        self.vaults.contains(vault)
    }

    pub fn is_settled_for(&self, vault: &VaultId) -> bool {
        self.status == BatchStatus::Settled || self.settled_vaults.contains(vault)
    }

    pub fn past_cutoff(&self, now: u64) -> bool {
        self.cutoff_at.is_some_and(|cutoff| now > cutoff)
    }
}

/// How the current batch pointer advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BatchPolicy {
    /// Only `create_new_batch` advances the pointer
    Manual,
    /// The pointer rolls on first use after the cutoff
    Timed {
        cutoff_secs: u64,
        settle_after_secs: u64,
    },
}

impl BatchPolicy {
    pub fn timed_default() -> Self {
        Self::Timed {
            cutoff_secs: DEFAULT_BATCH_CUTOFF_SECS,
            settle_after_secs: DEFAULT_BATCH_SETTLE_AFTER_SECS,
        }
    }
}

/// Ledger accumulators for one (vault, batch) slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSlot {
    pub deposited: u64,
    pub requested: u64,
    /// Share-denominated redemption demand (pooled vaults)
    pub requested_shares: u64,
}

impl LedgerSlot {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Fee checkpoints the pooled vault has accrued but not yet reported as charged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeCheckpoints {
    pub management: Option<u64>,
    pub performance: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Executed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementProposal {
    pub id: ProposalId,
    pub vault: VaultId,
    pub asset: AssetId,
    pub batch: BatchId,
    pub kind: VaultKind,
    pub reported_total_assets: u64,
    pub last_settled_total_assets: u64,
    pub netted: i128,
    #[serde(rename = "yield")]
    pub yield_amount: i128,
    /// Ledger state the netting was computed from
    pub ledger: LedgerSlot,
    pub proposed_at: u64,
    pub execute_after: u64,
    pub fee_checkpoints: FeeCheckpoints,
    pub status: ProposalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TolerancePolicy {
    /// Overruns only emit a warning
    Advisory,
    /// Overruns reject the proposal
    Enforce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementParams {
    pub cooldown_secs: u64,
    pub max_allowed_delta_bps: u64,
    pub tolerance_policy: TolerancePolicy,
}

impl Default for SettlementParams {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            max_allowed_delta_bps: DEFAULT_MAX_ALLOWED_DELTA_BPS,
            tolerance_policy: TolerancePolicy::Advisory,
        }
    }
}
