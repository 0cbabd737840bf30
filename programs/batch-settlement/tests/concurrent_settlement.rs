use std::{
    sync::{Arc, Barrier, Weak},
    thread,
};

use batch_settlement::{
    error::SettlementError,
    instructions::SettlementReceipt,
    interfaces::{Collaborators, UnitOfAccount},
    memory::{
        InMemoryAdapter, InMemoryCustody, InMemoryPooledVault, InMemoryUnitOfAccount,
        ManualClock, RoleTable, StaticRegistry,
    },
    state::{
        Address, AssetId, BatchPolicy, Capability, FeeCheckpoints, ProposalId, SettlementParams,
        VaultId,
    },
    ErrorKind, SettlementEngine,
};
use parking_lot::Mutex;

const START: u64 = 1_700_000_000;
const COOLDOWN: u64 = 3_600;
const THREADS: usize = 8;

/// One gateway and two pools sharing its asset, plus `extra` standalone gateways.
struct Fleet {
    engine: Arc<SettlementEngine>,
    clock: Arc<ManualClock>,
    gateway_adapter: Arc<InMemoryAdapter>,
    asset: AssetId,
    gateway: VaultId,
    pools: [VaultId; 2],
    extra_gateways: Vec<VaultId>,
    relayer: Address,
}

fn fleet(unit: Arc<dyn UnitOfAccount>, extra: usize) -> Fleet {
    let asset = Address::new_unique();
    let gateway = Address::new_unique();
    let pools = [Address::new_unique(), Address::new_unique()];
    let relayer = Address::new_unique();

    let gateway_adapter = Arc::new(InMemoryAdapter::new().with_total(gateway, asset, 1_000));
    let mut registry = StaticRegistry::new(Address::new_unique())
        .with_gateway(gateway, asset, gateway_adapter.clone())
        .with_unit_of_account(asset, unit);
    for pool in pools {
        registry = registry.with_pool(
            pool,
            asset,
            Arc::new(InMemoryAdapter::new().with_total(pool, asset, 10_000)),
            Arc::new(InMemoryPooledVault::new(pool, 10_000)),
        );
    }

    let extra_gateways: Vec<VaultId> = (0..extra).map(|_| Address::new_unique()).collect();
    for vault in &extra_gateways {
        registry = registry.with_gateway(
            *vault,
            Address::new_unique(),
            Arc::new(InMemoryAdapter::new()),
        );
    }

    let roles = Arc::new(RoleTable::new());
    roles.grant(relayer, Capability::Relayer);
    let clock = Arc::new(ManualClock::new(START));
    let collaborators = Collaborators {
        registry: Arc::new(registry),
        capabilities: roles,
        custody: Arc::new(InMemoryCustody::new()),
        clock: clock.clone(),
    };
    let engine = Arc::new(
        SettlementEngine::new(collaborators, SettlementParams::default(), BatchPolicy::Manual)
            .unwrap(),
    );

    Fleet {
        engine,
        clock,
        gateway_adapter,
        asset,
        gateway,
        pools,
        extra_gateways,
        relayer,
    }
}

impl Fleet {
    /// Pools take in 100 and 200 and each report +10 of yield; returns both proposals, matured.
    fn pooled_proposals(&self) -> [ProposalId; 2] {
        let [first, second] = self.pools;
        self.engine.record_deposit(first, first, 1, 100).unwrap();
        self.engine.record_deposit(second, second, 1, 200).unwrap();
        self.engine.close_batch(self.relayer, 1).unwrap();

        let propose = |vault, reported| {
            self.engine
                .propose(self.relayer, vault, self.asset, 1, reported, FeeCheckpoints::default())
                .unwrap()
        };
        let ids = [propose(first, 10_110), propose(second, 10_210)];
        self.clock.advance(COOLDOWN);
        ids
    }

    fn gateway_total(&self) -> u64 {
        self.gateway_adapter.total_assets_of(&self.gateway, &self.asset)
    }
}

/// Unit of account that settles another proposal from inside its first `mint`.
#[derive(Debug, Default)]
struct ReentrantUnit {
    inner: InMemoryUnitOfAccount,
    engine: Mutex<Weak<SettlementEngine>>,
    target: Mutex<Option<ProposalId>>,
    outcome: Mutex<Option<Result<SettlementReceipt, SettlementError>>>,
}

impl UnitOfAccount for ReentrantUnit {
    fn mint(&self, to: &Address, amount: u64) -> anyhow::Result<()> {
        let target = self.target.lock().take();
        let engine = self.engine.lock().upgrade();
        if let (Some(engine), Some(id)) = (engine, target) {
            let outcome = engine.execute(&id);
            *self.outcome.lock() = Some(outcome);
        }
        self.inner.mint(to, amount)
    }

    fn burn(&self, from: &Address, amount: u64) -> anyhow::Result<()> {
        self.inner.burn(from, amount)
    }
}

#[test]
fn test_nested_pooled_settlements_keep_gateway_backing() {
    let unit = Arc::new(ReentrantUnit::default());
    let f = fleet(unit.clone(), 0);
    *unit.engine.lock() = Arc::downgrade(&f.engine);

    let [first, second] = f.pooled_proposals();
    *unit.target.lock() = Some(second);

    let outer = f.engine.execute(&first).unwrap();
    let inner = unit.outcome.lock().take().unwrap().unwrap();

    // 1000 - 100 - 200: neither adjustment is lost
    assert_eq!(f.gateway_total(), 700);
    assert_eq!(inner.gateway_total, Some(800));
    assert_eq!(outer.gateway_total, Some(700));
    assert!(outer.batch_settled || inner.batch_settled);
}

#[test]
fn test_parallel_pooled_settlements_keep_gateway_backing() {
    let f = fleet(Arc::new(InMemoryUnitOfAccount::new()), 0);
    let ids = f.pooled_proposals();
    let barrier = Barrier::new(ids.len());

    let receipts: Vec<SettlementReceipt> = thread::scope(|s| {
        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let (engine, barrier) = (&f.engine, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    engine.execute(id)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect()
    });

    assert_eq!(f.gateway_total(), 700);
    let mut totals: Vec<u64> = receipts.iter().filter_map(|r| r.gateway_total).collect();
    totals.sort_unstable();
    // One of them saw the other's adjustment
    assert!(totals == vec![700, 800] || totals == vec![700, 900]);
}

#[test]
fn test_racing_proposals_reserve_once() {
    let f = fleet(Arc::new(InMemoryUnitOfAccount::new()), 0);
    f.engine.record_deposit(f.gateway, f.gateway, 1, 100).unwrap();
    f.engine.close_batch(f.relayer, 1).unwrap();
    let barrier = Barrier::new(THREADS);

    let outcomes: Vec<Result<ProposalId, SettlementError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (f, barrier) = (&f, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    f.engine.propose(
                        f.relayer,
                        f.gateway,
                        f.asset,
                        1,
                        1_100,
                        FeeCheckpoints::default(),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let accepted: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    assert_eq!(accepted.len(), 1);
    assert!(outcomes.iter().filter_map(|o| o.as_ref().err()).all(|err| matches!(
        err,
        SettlementError::BatchAlreadyProposed { batch: 1, .. }
    )));
    assert_eq!(f.engine.pending_proposals(&f.gateway).len(), 1);
    assert_eq!(f.engine.pending_proposals(&f.gateway)[0].id, *accepted[0]);
}

#[test]
fn test_deposits_on_distinct_slots_never_conflict() {
    let f = fleet(Arc::new(InMemoryUnitOfAccount::new()), THREADS);
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for vault in &f.extra_gateways {
            let (engine, barrier) = (&f.engine, &barrier);
            s.spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    engine.record_deposit(*vault, *vault, 1, 1).unwrap();
                }
            });
        }
    });

    for vault in &f.extra_gateways {
        assert_eq!(f.engine.ledger_snapshot(*vault, 1).deposited, 100);
    }
    assert_eq!(f.engine.batch(1).unwrap().vaults.len(), THREADS);
}

#[test]
fn test_deposits_on_one_slot_land_or_report_busy() {
    let f = fleet(Arc::new(InMemoryUnitOfAccount::new()), 0);
    let barrier = Barrier::new(THREADS);

    let landed: u64 = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (f, barrier) = (&f, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    let mut landed = 0u64;
                    for _ in 0..250 {
                        match f.engine.record_deposit(f.gateway, f.gateway, 1, 1) {
                            Ok(()) => landed += 1,
                            Err(err) => {
                                assert!(matches!(err, SettlementError::LedgerSlotBusy { .. }));
                                assert_eq!(err.kind(), ErrorKind::StateConflict);
                            }
                        }
                    }
                    landed
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert!(landed > 0);
    assert_eq!(f.engine.ledger_snapshot(f.gateway, 1).deposited, landed);
}
