//! Pool configuration.
//!
//! Plain structs with defaults; the node wires these from its own
//! configuration surface. Nothing here reads files or flags.

use beck_core::constants::{INCREMENTAL_RELAY_FEE_PER_KB, MIN_RELAY_FEE_PER_KB};

use crate::feerate::FeeRate;

/// Default maximum number of in-pool ancestors (count, self-inclusive).
pub const DEFAULT_ANCESTOR_COUNT_LIMIT: u64 = 50;
/// Default maximum total size of an entry plus its ancestors, in bytes.
pub const DEFAULT_ANCESTOR_SIZE_LIMIT: u64 = 101_000;
/// Default maximum number of in-pool descendants (count, self-inclusive).
pub const DEFAULT_DESCENDANT_COUNT_LIMIT: u64 = 50;
/// Default maximum total size of an entry plus its descendants, in bytes.
pub const DEFAULT_DESCENDANT_SIZE_LIMIT: u64 = 101_000;

/// Default maximum pool memory usage in bytes (300 MiB).
pub const DEFAULT_MAX_POOL_SIZE: u64 = 300 * 1024 * 1024;
/// Default transaction expiry in seconds (two weeks).
pub const DEFAULT_EXPIRY_SECS: i64 = 336 * 60 * 60;

/// Chain-topology limits applied at submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolLimits {
    /// Max transactions including the entry and its ancestors.
    pub ancestor_count: u64,
    /// Max total bytes of the entry and its ancestors.
    pub ancestor_size: u64,
    /// Max transactions including any ancestor and its descendants.
    pub descendant_count: u64,
    /// Max total bytes of any ancestor and its descendants.
    pub descendant_size: u64,
}

impl Default for MempoolLimits {
    fn default() -> Self {
        Self {
            ancestor_count: DEFAULT_ANCESTOR_COUNT_LIMIT,
            ancestor_size: DEFAULT_ANCESTOR_SIZE_LIMIT,
            descendant_count: DEFAULT_DESCENDANT_COUNT_LIMIT,
            descendant_size: DEFAULT_DESCENDANT_SIZE_LIMIT,
        }
    }
}

/// Pool-wide configuration.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Chain-topology limits.
    pub limits: MempoolLimits,
    /// Maximum dynamic memory usage before size-limit eviction kicks in.
    pub max_size_bytes: u64,
    /// Entries older than this are expired by `limit_size`.
    pub expiry_secs: i64,
    /// Configured admission floor; `estimate_fee` never reports below it.
    pub min_relay_fee: FeeRate,
    /// Decay bound for the rolling minimum after evictions.
    pub incremental_relay_fee: FeeRate,
    /// Run the full consistency check once per this many calls; 0 disables.
    pub check_ratio: u32,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            limits: MempoolLimits::default(),
            max_size_bytes: DEFAULT_MAX_POOL_SIZE,
            expiry_secs: DEFAULT_EXPIRY_SECS,
            min_relay_fee: FeeRate::from_becks_per_kb(MIN_RELAY_FEE_PER_KB),
            incremental_relay_fee: FeeRate::from_becks_per_kb(INCREMENTAL_RELAY_FEE_PER_KB),
            check_ratio: 0,
        }
    }
}
