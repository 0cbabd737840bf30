//! Request and response types for the settlement keeper

use batch_settlement::{
    constants::{
        DEFAULT_BATCH_CUTOFF_SECS, DEFAULT_BATCH_SETTLE_AFTER_SECS, DEFAULT_COOLDOWN_SECS,
        DEFAULT_MAX_ALLOWED_DELTA_BPS,
    },
    instructions::SettlementReceipt,
    state::{Address, BatchId, BatchPolicy, ProposalId, SettlementParams, TolerancePolicy},
};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: i64,
    pub current_batch: BatchId,
    /// Proposals past cooldown, not yet executed
    pub matured_proposals: usize,
}

#[derive(Debug, Serialize)]
pub struct CurrentBatchResponse {
    pub batch: BatchId,
    pub now: u64,
}

#[derive(Debug, Serialize)]
pub struct BatchReceiverResponse {
    pub batch: BatchId,
    pub receiver: Address,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedExecution {
    pub id: ProposalId,
    pub error: String,
}

/// Outcome of one keeper tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub current_batch: BatchId,
    pub executed: Vec<SettlementReceipt>,
    pub failed: Vec<FailedExecution>,
}

/// Configuration for the keeper service
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// CORS allowed origins
    pub cors_origins: Vec<String>,

    /// API keys for authentication
    pub api_keys: Vec<String>,

    /// Engine parameters at startup
    pub params: SettlementParams,

    pub batch_policy: BatchPolicy,

    /// Seconds between keeper ticks
    pub tick_interval_secs: u64,

    /// Fee recipient for the local deployment
    pub treasury: Address,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            cors_origins: vec!["http://localhost:3000".to_string()],
            api_keys: vec![],
            params: SettlementParams::default(),
            batch_policy: BatchPolicy::timed_default(),
            tick_interval_secs: 30,
            treasury: Address::derive(&[b"treasury"]),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());
        let list = |key: &str| {
            var(key).map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
        };

        let port = var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let cors_origins = list("CORS_ORIGINS").unwrap_or(defaults.cors_origins);
        let api_keys = list("API_KEYS").unwrap_or_default();

        let tolerance_policy = match var("ENFORCE_YIELD_TOLERANCE").as_deref() {
            Some("1") | Some("true") => TolerancePolicy::Enforce,
            _ => TolerancePolicy::Advisory,
        };
        let params = SettlementParams {
            cooldown_secs: parsed("COOLDOWN_SECS").unwrap_or(DEFAULT_COOLDOWN_SECS),
            max_allowed_delta_bps: parsed("MAX_ALLOWED_DELTA_BPS")
                .unwrap_or(DEFAULT_MAX_ALLOWED_DELTA_BPS),
            tolerance_policy,
        };

        // BATCH_CUTOFF_SECS=0 selects manual batches
        let batch_policy = match parsed("BATCH_CUTOFF_SECS") {
            Some(0) => BatchPolicy::Manual,
            cutoff => BatchPolicy::Timed {
                cutoff_secs: cutoff.unwrap_or(DEFAULT_BATCH_CUTOFF_SECS),
                settle_after_secs: parsed("BATCH_SETTLE_AFTER_SECS")
                    .unwrap_or(DEFAULT_BATCH_SETTLE_AFTER_SECS),
            },
        };

        let tick_interval_secs = parsed("TICK_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults.tick_interval_secs);

        let treasury = var("TREASURY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.treasury);

        Self {
            port,
            cors_origins,
            api_keys,
            params,
            batch_policy,
            tick_interval_secs,
            treasury,
        }
    }
}
