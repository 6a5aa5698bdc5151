/// Seconds before round close during which wagers are refused.
pub const GRACE_WINDOW_SECS: u64 = 10;

/// Minimum stake accepted by default.
pub const MIN_STAKE: u64 = 10;

/// Maximum stake accepted by default.
pub const MAX_STAKE: u64 = 100_000;

/// Number of round outcomes shown per history page.
pub const HISTORY_PAGE_SIZE: usize = 10;

/// Number of round outcomes retained per duration.
pub const HISTORY_CAPACITY: usize = 100;

/// Highest selectable number.
pub const MAX_NUMBER: u8 = 9;

/// Numbers at or above this value are "big".
pub const BIG_THRESHOLD: u8 = 5;

/// Payout multiplier for an exact number hit.
pub const NUMBER_MULTIPLIER: u64 = 9;

/// Payout multiplier for a red or green hit.
pub const COLOR_MULTIPLIER: u64 = 2;

/// Payout multiplier for a violet hit.
pub const VIOLET_MULTIPLIER: u64 = 4;

/// Payout multiplier for a big or small hit.
pub const SIZE_MULTIPLIER: u64 = 2;
