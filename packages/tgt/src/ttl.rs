// Ledger close time is ~5s, so a day is 17_280 ledgers.
pub const DAY_IN_LEDGERS: u32 = 17280;

// Instance entries (config, admin) are pushed back out to a week whenever they
// drop under six days of remaining lifetime.
pub const INSTANCE_TARGET_TTL: u32 = 7 * DAY_IN_LEDGERS;
pub const INSTANCE_RENEWAL_THRESHOLD: u32 = INSTANCE_TARGET_TTL - DAY_IN_LEDGERS;

// Positions, debts and accumulators are kept alive for thirty days past the
// last touch and renewed once fewer than twenty-nine remain.
pub const PERSISTENT_TARGET_TTL: u32 = 30 * DAY_IN_LEDGERS;
pub const PERSISTENT_RENEWAL_THRESHOLD: u32 = PERSISTENT_TARGET_TTL - DAY_IN_LEDGERS;
