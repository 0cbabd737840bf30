//! In-memory deployment shared by handler and service tests.

use std::sync::Arc;

use batch_settlement::{
    interfaces::Collaborators,
    memory::{
        InMemoryAdapter, InMemoryCustody, InMemoryPooledVault, InMemoryUnitOfAccount,
        ManualClock, RoleTable, StaticRegistry,
    },
    state::{
        Address, AssetId, BatchPolicy, Capability, FeeCheckpoints, ProposalId, SettlementParams,
        VaultId,
    },
    SettlementEngine,
};

pub struct Deployment {
    pub engine: Arc<SettlementEngine>,
    pub clock: Arc<ManualClock>,
    pub custody: Arc<InMemoryCustody>,
    pub asset: AssetId,
    pub gateway: VaultId,
    pub pooled: VaultId,
    pub relayer: Address,
}

impl Deployment {
    pub fn new(policy: BatchPolicy) -> Self {
        let asset = Address::new_unique();
        let gateway = Address::new_unique();
        let pooled = Address::new_unique();
        let relayer = Address::new_unique();

        let registry = StaticRegistry::new(Address::new_unique())
            .with_gateway(
                gateway,
                asset,
                Arc::new(InMemoryAdapter::new().with_total(gateway, asset, 1_000)),
            )
            .with_pool(
                pooled,
                asset,
                Arc::new(InMemoryAdapter::new().with_total(pooled, asset, 10_000)),
                Arc::new(InMemoryPooledVault::new(pooled, 10_000)),
            )
            .with_unit_of_account(asset, Arc::new(InMemoryUnitOfAccount::new()));

        let roles = Arc::new(RoleTable::new());
        roles.grant(relayer, Capability::Relayer);

        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let custody = Arc::new(InMemoryCustody::new());
        let collaborators = Collaborators {
            registry: Arc::new(registry),
            capabilities: roles,
            custody: custody.clone(),
            clock: clock.clone(),
        };
        let engine =
            SettlementEngine::new(collaborators, SettlementParams::default(), policy).unwrap();

        Self {
            engine: Arc::new(engine),
            clock,
            custody,
            asset,
            gateway,
            pooled,
            relayer,
        }
    }

    /// Gateway flow of +200 / -100 in batch 1, closed and proposed at a reported 1200.
    pub fn closed_gateway_proposal(&self) -> ProposalId {
        self.engine
            .record_deposit(self.gateway, self.gateway, 1, 200)
            .unwrap();
        self.engine
            .record_redemption_request(self.gateway, self.gateway, 1, 100)
            .unwrap();
        self.custody.fund(self.asset, self.gateway, 100);
        self.engine.close_batch(self.relayer, 1).unwrap();

        self.engine
            .propose(
                self.relayer,
                self.gateway,
                self.asset,
                1,
                1_200,
                FeeCheckpoints::default(),
            )
            .unwrap()
    }
}
