use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::constants::DEFAULT_EVENT_CAPACITY;
use crate::state::{Address, AssetId, BatchId, ProposalId, SettlementParams, VaultId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    BatchCreated {
        batch: BatchId,
        created_at: u64,
    },
    BatchClosed {
        batch: BatchId,
    },
    BatchSettled {
        batch: BatchId,
    },
    VaultJoinedBatch {
        batch: BatchId,
        vault: VaultId,
    },
    AssetJoinedBatch {
        batch: BatchId,
        asset: AssetId,
    },
    PayoutTargetDeployed {
        batch: BatchId,
        target: Address,
    },
    DepositRecorded {
        vault: VaultId,
        batch: BatchId,
        amount: u64,
    },
    RedemptionRequested {
        vault: VaultId,
        batch: BatchId,
        amount: u64,
    },
    VirtualTransfer {
        source: VaultId,
        target: VaultId,
        batch: BatchId,
        amount: u64,
    },
    SharesRequested {
        vault: VaultId,
        batch: BatchId,
        shares: u64,
    },
    SharesReleased {
        vault: VaultId,
        batch: BatchId,
        shares: u64,
    },
    SettlementProposed {
        id: ProposalId,
        vault: VaultId,
        batch: BatchId,
        netted: i128,
        yield_amount: i128,
        execute_after: u64,
    },
    YieldToleranceExceeded {
        vault: VaultId,
        batch: BatchId,
        yield_amount: i128,
        max_delta: u128,
    },
    SettlementCancelled {
        id: ProposalId,
        guardian: Address,
    },
    SettlementExecuted {
        id: ProposalId,
        vault: VaultId,
        batch: BatchId,
    },
    YieldApplied {
        vault: VaultId,
        batch: BatchId,
        yield_amount: i128,
    },
    FeesExtracted {
        vault: VaultId,
        batch: BatchId,
        fee_shares: u64,
        fee_assets: u64,
        treasury: Address,
    },
    ParamsUpdated {
        params: SettlementParams,
    },
}

/// Record of the most recent state transitions, oldest dropped first once full.
#[derive(Debug)]
pub struct EventJournal {
    capacity: usize,
    events: Mutex<VecDeque<SettlementEvent>>,
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventJournal {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn emit(&self, event: SettlementEvent) {
        debug!(?event, "settlement event");
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn snapshot(&self) -> Vec<SettlementEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// The last `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<SettlementEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn drain(&self) -> Vec<SettlementEvent> {
        self.events.lock().drain(..).collect()
    }
}
