pub const PAYOUT_TARGET_SEED: &[u8] = b"payout_target";
pub const PROPOSAL_SEED: &[u8] = b"settlement_proposal";

pub const BPS_DENOMINATOR: u64 = 10_000;

/// Share prices are fixed-point with 18 decimals (1.0 == 10^18).
pub const PRICE_SCALE: u64 = 1_000_000_000_000_000_000;

pub const DEFAULT_COOLDOWN_SECS: u64 = 3_600;
pub const MAX_COOLDOWN_SECS: u64 = 86_400;

pub const DEFAULT_MAX_ALLOWED_DELTA_BPS: u64 = 100;

/// Timed batches stop accruing 4h after creation and become settle-eligible after 8h.
pub const DEFAULT_BATCH_CUTOFF_SECS: u64 = 4 * 3_600;
pub const DEFAULT_BATCH_SETTLE_AFTER_SECS: u64 = 8 * 3_600;

pub const FIRST_BATCH_ID: u64 = 1;

/// Events retained in memory; older ones are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 4_096;
