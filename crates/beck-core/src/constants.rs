//! Protocol constants. All monetary values in becks (1 BECK = 10^8 becks).

pub const COIN: u64 = 100_000_000;

pub const MAX_TX_SIZE: u64 = 100_000;
pub const MAX_INPUTS: usize = 1000;
pub const MAX_OUTPUTS: usize = 1000;
pub const MAX_COINBASE_DATA: usize = 100;
pub const COINBASE_MATURITY: u64 = 100;
pub const LOCKTIME_THRESHOLD: u64 = 500_000_000;

/// Minimum relay fee rate in becks per 1000 bytes.
pub const MIN_RELAY_FEE_PER_KB: u64 = 1000;

/// Default incremental relay fee rate in becks per 1000 bytes.
///
/// Bounds how quickly the mempool's rolling admission floor can return to
/// zero after size-limit evictions.
pub const INCREMENTAL_RELAY_FEE_PER_KB: u64 = 1000;

/// Maximum signature checks a single transaction may require.
pub const MAX_TX_SIG_CHECKS: i64 = 3_000;

/// Virtual-size weighting: each signature check counts as this many bytes.
///
/// A transaction's virtual size is `max(serialized size, sig_checks *
/// BYTES_PER_SIG_CHECK)`, so sigcheck-dense transactions pay for the
/// verification cost they impose.
pub const BYTES_PER_SIG_CHECK: u64 = 50;
