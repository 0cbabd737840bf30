use tracing::info;

use crate::{
    error::Result,
    events::SettlementEvent,
    state::{Address, Capability, SettlementParams, TolerancePolicy},
    validate_bps, validate_cooldown, SettlementEngine,
};

impl SettlementEngine {
    fn update_params<F>(&self, caller: Address, f: F) -> Result<SettlementParams>
    where
        F: FnOnce(&mut SettlementParams),
    {
        self.require(&caller, Capability::Admin)?;

        let params = {
            let mut params = self.params.write();
            f(&mut params);
            *params
        };

        info!(%caller, ?params, "Updated settlement parameters");
        self.journal.emit(SettlementEvent::ParamsUpdated { params });
        Ok(params)
    }

    /// Set the delay between proposal and execution (at most 24h).
    /// Applies to proposals made from now on.
    pub fn set_cooldown(&self, caller: Address, cooldown_secs: u64) -> Result<SettlementParams> {
        validate_cooldown(cooldown_secs)?;
        self.update_params(caller, |params| params.cooldown_secs = cooldown_secs)
    }

    /// Set the yield tolerance in basis points of the last settled total
    pub fn set_max_allowed_delta_bps(
        &self,
        caller: Address,
        max_allowed_delta_bps: u64,
    ) -> Result<SettlementParams> {
        validate_bps(max_allowed_delta_bps)?;
        self.update_params(caller, |params| {
            params.max_allowed_delta_bps = max_allowed_delta_bps
        })
    }

    pub fn set_tolerance_policy(
        &self,
        caller: Address,
        tolerance_policy: TolerancePolicy,
    ) -> Result<SettlementParams> {
        self.update_params(caller, |params| params.tolerance_policy = tolerance_policy)
    }
}
