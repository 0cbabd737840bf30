//! In-memory collaborators for local deployments and tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{bail, ensure, Context};
use parking_lot::{Mutex, RwLock};

use crate::{
    constants::PRICE_SCALE,
    interfaces::{Adapter, CapabilityCheck, Clock, Custody, PooledVault, Registry, UnitOfAccount},
    math::{mul_div, Rounding},
    state::{Address, AssetId, BatchId, Capability, VaultId, VaultKind},
};

const BATCH_RECEIVER_SEED: &[u8] = b"batch_receiver";

#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    totals: Mutex<HashMap<(VaultId, AssetId), u64>>,
    forwarded: Mutex<HashMap<(VaultId, AssetId), u64>>,
    failing: AtomicBool,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total(self, vault: VaultId, asset: AssetId, amount: u64) -> Self {
        self.totals.lock().insert((vault, asset), amount);
        self
    }

    pub fn total_assets_of(&self, vault: &VaultId, asset: &AssetId) -> u64 {
        self.totals
            .lock()
            .get(&(*vault, *asset))
            .copied()
            .unwrap_or_default()
    }

    /// Net inflow forwarded through `deposit`
    pub fn forwarded(&self, vault: &VaultId, asset: &AssetId) -> u64 {
        self.forwarded
            .lock()
            .get(&(*vault, *asset))
            .copied()
            .unwrap_or_default()
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        ensure!(!self.failing.load(Ordering::SeqCst), "adapter unavailable");
        Ok(())
    }
}

impl Adapter for InMemoryAdapter {
    fn total_assets(&self, vault: &VaultId, asset: &AssetId) -> anyhow::Result<u64> {
        self.check()?;
        Ok(self.total_assets_of(vault, asset))
    }

    fn set_total_assets(&self, vault: &VaultId, asset: &AssetId, amount: u64) -> anyhow::Result<()> {
        self.check()?;
        self.totals.lock().insert((*vault, *asset), amount);
        Ok(())
    }

    fn deposit(&self, asset: &AssetId, amount: u64, vault: &VaultId) -> anyhow::Result<()> {
        self.check()?;
        let mut forwarded = self.forwarded.lock();
        let entry = forwarded.entry((*vault, *asset)).or_default();
        *entry = entry.checked_add(amount).context("forwarded overflow")?;
        Ok(())
    }
}

/// Pool whose prices are set directly by the host.
#[derive(Debug)]
pub struct InMemoryPooledVault {
    vault: VaultId,
    total_supply: AtomicU64,
    share_price: AtomicU64,
    net_share_price: AtomicU64,
    burned_fees: AtomicU64,
    management_checkpoint: Mutex<Option<u64>>,
    performance_checkpoint: Mutex<Option<u64>>,
}

impl InMemoryPooledVault {
    /// Supply of `total_supply` shares priced at 1.0 gross and net.
    pub fn new(vault: VaultId, total_supply: u64) -> Self {
        Self {
            vault,
            total_supply: AtomicU64::new(total_supply),
            share_price: AtomicU64::new(PRICE_SCALE),
            net_share_price: AtomicU64::new(PRICE_SCALE),
            burned_fees: AtomicU64::new(0),
            management_checkpoint: Mutex::new(None),
            performance_checkpoint: Mutex::new(None),
        }
    }

    pub fn set_prices(&self, share_price: u64, net_share_price: u64) {
        self.share_price.store(share_price, Ordering::SeqCst);
        self.net_share_price.store(net_share_price, Ordering::SeqCst);
    }

    pub fn burned_fees(&self) -> u64 {
        self.burned_fees.load(Ordering::SeqCst)
    }

    pub fn fee_checkpoints(&self) -> (Option<u64>, Option<u64>) {
        (
            *self.management_checkpoint.lock(),
            *self.performance_checkpoint.lock(),
        )
    }
}

impl PooledVault for InMemoryPooledVault {
    fn total_supply(&self) -> anyhow::Result<u64> {
        Ok(self.total_supply.load(Ordering::SeqCst))
    }

    fn share_price(&self) -> anyhow::Result<u64> {
        Ok(self.share_price.load(Ordering::SeqCst))
    }

    fn net_share_price(&self) -> anyhow::Result<u64> {
        Ok(self.net_share_price.load(Ordering::SeqCst))
    }

    fn convert_to_assets(&self, shares: u64) -> anyhow::Result<u64> {
        Ok(mul_div(
            shares,
            self.share_price.load(Ordering::SeqCst),
            PRICE_SCALE,
            Rounding::Floor,
        )?)
    }

    fn burn_fees(&self, shares: u64) -> anyhow::Result<()> {
        self.total_supply
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |supply| {
                supply.checked_sub(shares)
            })
            .map_err(|supply| anyhow::anyhow!("cannot burn {shares} of {supply} shares"))?;
        self.burned_fees.fetch_add(shares, Ordering::SeqCst);
        Ok(())
    }

    fn notify_management_fees_charged(&self, checkpoint: u64) -> anyhow::Result<()> {
        *self.management_checkpoint.lock() = Some(checkpoint);
        Ok(())
    }

    fn notify_performance_fees_charged(&self, checkpoint: u64) -> anyhow::Result<()> {
        *self.performance_checkpoint.lock() = Some(checkpoint);
        Ok(())
    }

    fn batch_receiver(&self, batch: BatchId) -> anyhow::Result<Address> {
        Ok(Address::derive(&[
            BATCH_RECEIVER_SEED,
            self.vault.as_bytes(),
            &batch.to_le_bytes(),
        ]))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUnitOfAccount {
    balances: Mutex<HashMap<Address, u64>>,
}

impl InMemoryUnitOfAccount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, holder: &Address) -> u64 {
        self.balances.lock().get(holder).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> u64 {
        self.balances.lock().values().sum()
    }
}

impl UnitOfAccount for InMemoryUnitOfAccount {
    fn mint(&self, to: &Address, amount: u64) -> anyhow::Result<()> {
        let mut balances = self.balances.lock();
        let balance = balances.entry(*to).or_default();
        *balance = balance.checked_add(amount).context("balance overflow")?;
        Ok(())
    }

    fn burn(&self, from: &Address, amount: u64) -> anyhow::Result<()> {
        let mut balances = self.balances.lock();
        let balance = balances.entry(*from).or_default();
        let Some(remaining) = balance.checked_sub(amount) else {
            bail!("cannot burn {amount} from {from}: balance {balance}");
        };
        *balance = remaining;
        Ok(())
    }
}

/// Asset balances held per (asset, holder).
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    balances: Mutex<HashMap<(AssetId, Address), u64>>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund(&self, asset: AssetId, holder: Address, amount: u64) {
        *self.balances.lock().entry((asset, holder)).or_default() += amount;
    }

    pub fn balance(&self, asset: &AssetId, holder: &Address) -> u64 {
        self.balances
            .lock()
            .get(&(*asset, *holder))
            .copied()
            .unwrap_or_default()
    }
}

impl Custody for InMemoryCustody {
    fn transfer(
        &self,
        asset: &AssetId,
        from: &VaultId,
        to: &Address,
        amount: u64,
    ) -> anyhow::Result<()> {
        let mut balances = self.balances.lock();
        let available = balances.get(&(*asset, *from)).copied().unwrap_or_default();
        ensure!(
            available >= amount,
            "custody of {from} holds {available} of {asset}, cannot pay {amount}"
        );

        balances.insert((*asset, *from), available - amount);
        let credited = balances.entry((*asset, *to)).or_default();
        *credited = credited.checked_add(amount).context("balance overflow")?;
        Ok(())
    }
}

/// Fixed service directory assembled at startup.
#[derive(Debug, Clone)]
pub struct StaticRegistry {
    treasury: Address,
    kinds: HashMap<VaultId, VaultKind>,
    adapters: BTreeMap<(VaultId, AssetId), Arc<dyn Adapter>>,
    pools: HashMap<VaultId, Arc<dyn PooledVault>>,
    units: HashMap<AssetId, Arc<dyn UnitOfAccount>>,
}

impl StaticRegistry {
    pub fn new(treasury: Address) -> Self {
        Self {
            treasury,
            kinds: HashMap::new(),
            adapters: BTreeMap::new(),
            pools: HashMap::new(),
            units: HashMap::new(),
        }
    }

    pub fn with_gateway(mut self, vault: VaultId, asset: AssetId, adapter: Arc<dyn Adapter>) -> Self {
        self.kinds.insert(vault, VaultKind::Gateway);
        self.adapters.insert((vault, asset), adapter);
        self
    }

    pub fn with_pool(
        mut self,
        vault: VaultId,
        asset: AssetId,
        adapter: Arc<dyn Adapter>,
        pool: Arc<dyn PooledVault>,
    ) -> Self {
        self.kinds.insert(vault, VaultKind::Pooled);
        self.adapters.insert((vault, asset), adapter);
        self.pools.insert(vault, pool);
        self
    }

    pub fn with_unit_of_account(mut self, asset: AssetId, unit: Arc<dyn UnitOfAccount>) -> Self {
        self.units.insert(asset, unit);
        self
    }
}

impl Registry for StaticRegistry {
    fn vault_kind(&self, vault: &VaultId) -> Option<VaultKind> {
        self.kinds.get(vault).copied()
    }

    fn resolve_adapter(&self, vault: &VaultId, asset: &AssetId) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&(*vault, *asset)).cloned()
    }

    fn resolve_pooled_vault(&self, vault: &VaultId) -> Option<Arc<dyn PooledVault>> {
        self.pools.get(vault).cloned()
    }

    fn resolve_unit_of_account(&self, asset: &AssetId) -> Option<Arc<dyn UnitOfAccount>> {
        self.units.get(asset).cloned()
    }

    fn resolve_vault_by_asset_and_kind(&self, asset: &AssetId, kind: VaultKind) -> Option<VaultId> {
        self.adapters
            .keys()
            .filter(|(_, a)| a == asset)
            .map(|(vault, _)| *vault)
            .find(|vault| self.kinds.get(vault) == Some(&kind))
    }

    fn resolve_treasury(&self) -> Address {
        self.treasury
    }
}

#[derive(Debug, Default)]
pub struct RoleTable {
    grants: RwLock<HashSet<(Address, Capability)>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, identity: Address, capability: Capability) {
        self.grants.write().insert((identity, capability));
    }

    pub fn revoke(&self, identity: &Address, capability: Capability) {
        self.grants.write().remove(&(*identity, capability));
    }
}

impl CapabilityCheck for RoleTable {
    fn has_capability(&self, identity: &Address, capability: Capability) -> bool {
        self.grants.read().contains(&(*identity, capability))
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) -> u64 {
        self.now.fetch_add(secs, Ordering::SeqCst) + secs
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custody_rejects_overdraft() {
        let custody = InMemoryCustody::new();
        let asset = Address::new_unique();
        let vault = Address::new_unique();
        let target = Address::new_unique();
        custody.fund(asset, vault, 50);

        assert!(custody.transfer(&asset, &vault, &target, 51).is_err());
        custody.transfer(&asset, &vault, &target, 50).unwrap();
        assert_eq!(custody.balance(&asset, &target), 50);
        assert_eq!(custody.balance(&asset, &vault), 0);
    }

    #[test]
    fn test_unit_of_account_burn_underflow() {
        let unit = InMemoryUnitOfAccount::new();
        let holder = Address::new_unique();
        unit.mint(&holder, 10).unwrap();
        assert!(unit.burn(&holder, 11).is_err());
        assert_eq!(unit.balance_of(&holder), 10);
    }

    #[test]
    fn test_registry_resolves_gateway_for_asset() {
        let asset = Address::new_unique();
        let gateway = Address::new_unique();
        let pool_vault = Address::new_unique();
        let registry = StaticRegistry::new(Address::new_unique())
            .with_gateway(gateway, asset, Arc::new(InMemoryAdapter::new()))
            .with_pool(
                pool_vault,
                asset,
                Arc::new(InMemoryAdapter::new()),
                Arc::new(InMemoryPooledVault::new(pool_vault, 0)),
            );

        assert_eq!(
            registry.resolve_vault_by_asset_and_kind(&asset, VaultKind::Gateway),
            Some(gateway)
        );
        assert_eq!(
            registry.resolve_vault_by_asset_and_kind(&asset, VaultKind::Pooled),
            Some(pool_vault)
        );
        assert_eq!(
            registry.resolve_vault_by_asset_and_kind(&Address::new_unique(), VaultKind::Gateway),
            None
        );
    }

    #[test]
    fn test_pool_converts_at_share_price() {
        let pool = InMemoryPooledVault::new(Address::new_unique(), 1_000);
        pool.set_prices(PRICE_SCALE * 2, PRICE_SCALE);
        assert_eq!(pool.convert_to_assets(10).unwrap(), 20);

        pool.burn_fees(10).unwrap();
        assert_eq!(pool.total_supply().unwrap(), 990);
        assert!(pool.burn_fees(991).is_err());
    }

    #[test]
    fn test_roles_grant_and_revoke() {
        let roles = RoleTable::new();
        let relayer = Address::new_unique();
        roles.grant(relayer, Capability::Relayer);
        assert!(roles.has_capability(&relayer, Capability::Relayer));
        assert!(!roles.has_capability(&relayer, Capability::Admin));
        roles.revoke(&relayer, Capability::Relayer);
        assert!(!roles.has_capability(&relayer, Capability::Relayer));
    }
}
