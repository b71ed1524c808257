use std::time::Duration;

// ======= Oracle vote endpoints =======

/// Path of the keeper rewards vote on every oracle endpoint.
pub const REWARD_VOTE_URL_PATH: &str = "/";

pub const DISTRIBUTOR_VOTE_URL_PATH: &str = "/distributor-rewards";

pub const EXITS_URL_PATH: &str = "/exits/";

// ======= Rewards duty =======

/// Maximum number of `update_timestamp` buckets kept in the rewards cache.
pub const DEFAULT_CACHE_SIZE: usize = 100;

// ======= Contract log scanning =======

/// Width of a single backwards `get_logs` window, expressed in wall-clock time.
pub const EVENTS_BLOCKS_RANGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

// ======= Consensus REST =======

/// Per-request timeout against beacon nodes.
pub const CONSENSUS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ======= Startup checks =======

/// Delay between node availability probes before entering the main loop.
pub const STARTUP_CHECK_INTERVAL: Duration = Duration::from_secs(10);

// ======= Scheduler =======

/// Sleep applied when the oracle committee cannot be loaded for a tick.
pub const EMPTY_COMMITTEE_RETRY_INTERVAL: Duration = Duration::from_secs(60);

// ======= Gas =======

/// Multiplier applied to the minimum effective priority fee when building
/// high-priority transaction params.
pub const HIGH_PRIORITY_FEE_FLOOR_MULTIPLIER: u64 = 10;

// ======= Transaction receipts =======

/// Poll interval while waiting for a transaction receipt.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
