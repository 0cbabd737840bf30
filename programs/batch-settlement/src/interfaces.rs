//! Collaborators the engine consumes but does not implement.
//!
//! Every call is fallible; failures surface as [`SettlementError::Collaborator`].
//!
//! [`SettlementError::Collaborator`]: crate::error::SettlementError::Collaborator

use std::sync::Arc;

use crate::state::{Address, AssetId, BatchId, Capability, VaultId, VaultKind};

/// External yield destination tracking total assets per (vault, asset).
pub trait Adapter: Send + Sync + std::fmt::Debug {
    fn total_assets(&self, vault: &VaultId, asset: &AssetId) -> anyhow::Result<u64>;

    fn set_total_assets(&self, vault: &VaultId, asset: &AssetId, amount: u64)
        -> anyhow::Result<()>;

    /// Forward `amount` of `asset` into the destination on behalf of `vault`.
    fn deposit(&self, asset: &AssetId, amount: u64, vault: &VaultId) -> anyhow::Result<()>;
}

/// Share-based pool settled by the engine.
///
/// Share prices use [`PRICE_SCALE`](crate::constants::PRICE_SCALE) fixed-point.
pub trait PooledVault: Send + Sync + std::fmt::Debug {
    fn total_supply(&self) -> anyhow::Result<u64>;

    fn share_price(&self) -> anyhow::Result<u64>;

    /// Share price after fees
    fn net_share_price(&self) -> anyhow::Result<u64>;

    fn convert_to_assets(&self, shares: u64) -> anyhow::Result<u64>;

    fn burn_fees(&self, shares: u64) -> anyhow::Result<()>;

    fn notify_management_fees_charged(&self, checkpoint: u64) -> anyhow::Result<()>;

    fn notify_performance_fees_charged(&self, checkpoint: u64) -> anyhow::Result<()>;

    /// Receiver that custodies redeemed assets for `batch`
    fn batch_receiver(&self, batch: BatchId) -> anyhow::Result<Address>;
}

/// The protocol's synthetic token.
pub trait UnitOfAccount: Send + Sync + std::fmt::Debug {
    fn mint(&self, to: &Address, amount: u64) -> anyhow::Result<()>;

    fn burn(&self, from: &Address, amount: u64) -> anyhow::Result<()>;
}

/// Moves custodied assets out of a gateway vault.
pub trait Custody: Send + Sync + std::fmt::Debug {
    fn transfer(
        &self,
        asset: &AssetId,
        from: &VaultId,
        to: &Address,
        amount: u64,
    ) -> anyhow::Result<()>;
}

/// Service discovery.
pub trait Registry: Send + Sync + std::fmt::Debug {
    /// `None` when the vault is not registered
    fn vault_kind(&self, vault: &VaultId) -> Option<VaultKind>;

    fn resolve_adapter(&self, vault: &VaultId, asset: &AssetId) -> Option<Arc<dyn Adapter>>;

    fn resolve_pooled_vault(&self, vault: &VaultId) -> Option<Arc<dyn PooledVault>>;

    fn resolve_unit_of_account(&self, asset: &AssetId) -> Option<Arc<dyn UnitOfAccount>>;

    fn resolve_vault_by_asset_and_kind(&self, asset: &AssetId, kind: VaultKind)
        -> Option<VaultId>;

    fn resolve_treasury(&self) -> Address;
}

/// Role checks, injected rather than inherited.
pub trait CapabilityCheck: Send + Sync + std::fmt::Debug {
    fn has_capability(&self, identity: &Address, capability: Capability) -> bool;
}

/// Unix time in seconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Everything the engine needs from its host.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn Registry>,
    pub capabilities: Arc<dyn CapabilityCheck>,
    pub custody: Arc<dyn Custody>,
    pub clock: Arc<dyn Clock>,
}
