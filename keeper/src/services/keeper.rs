//! Periodic settlement work: batch rolling and execution of matured proposals.

use std::{sync::Arc, time::Duration};

use batch_settlement::SettlementEngine;
use tracing::{debug, info, warn};

use crate::types::{FailedExecution, TickReport};

pub struct Keeper {
    engine: Arc<SettlementEngine>,
}

impl Keeper {
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        Self { engine }
    }

    /// Roll the current batch if due, then execute every proposal whose cooldown elapsed.
    pub fn tick(&self) -> TickReport {
        let now = self.engine.now();
        let current_batch = self.engine.current_batch();

        let mut report = TickReport {
            current_batch,
            executed: Vec::new(),
            failed: Vec::new(),
        };

        for id in self.engine.matured_proposals(now) {
            match self.engine.execute(&id) {
                Ok(receipt) => {
                    info!(
                        %id,
                        vault = %receipt.vault,
                        batch = receipt.batch,
                        "Keeper executed settlement"
                    );
                    report.executed.push(receipt);
                }
                Err(err) => {
                    warn!(%id, kind = ?err.kind(), error = %err, "Keeper could not execute settlement");
                    report.failed.push(FailedExecution {
                        id,
                        error: err.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Tick forever at `interval`.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.tick();
            debug!(
                current_batch = report.current_batch,
                executed = report.executed.len(),
                failed = report.failed.len(),
                "Keeper tick"
            );
        }
    }
}
