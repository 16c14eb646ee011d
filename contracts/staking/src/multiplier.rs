pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Positions younger than this earn nothing.
pub const WARMUP_PERIOD: u64 = 7 * SECONDS_PER_DAY;
pub const SIX_MONTHS: u64 = 180 * SECONDS_PER_DAY;
pub const ONE_YEAR: u64 = 365 * SECONDS_PER_DAY;

pub const BPS_DENOMINATOR: u32 = 10_000;

const TIER_BASE_BPS: u32 = BPS_DENOMINATOR;
const TIER_HALF_YEAR_BPS: u32 = 15_000;
const TIER_ONE_YEAR_BPS: u32 = 20_000;

/// Highest multiplier a position can reach.
pub const MAX_MULTIPLIER_BPS: u32 = TIER_ONE_YEAR_BPS;

/// Staking age is counted in whole days from the first day boundary at or after the
/// deposit. All positions opened on the same day change tier together.
pub fn age_start(stake_start_time: u64) -> u64 {
    stake_start_time
        .div_ceil(SECONDS_PER_DAY)
        .saturating_mul(SECONDS_PER_DAY)
}

/// Reward multiplier for a position opened at `stake_start_time`, in basis points.
///
/// Step function of the staking age: 0 during the first week, then 1.0x, 1.5x after
/// six months and 2.0x after a year.
pub fn multiplier_bps(stake_start_time: u64, now: u64) -> u32 {
    let age = now.saturating_sub(age_start(stake_start_time));
    if age < WARMUP_PERIOD {
        0
    } else if age < SIX_MONTHS {
        TIER_BASE_BPS
    } else if age < ONE_YEAR {
        TIER_HALF_YEAR_BPS
    } else {
        TIER_ONE_YEAR_BPS
    }
}

/// Times at which a position opened at `stake_start_time` moves up a tier, paired with
/// the multiplier reached at that time.
pub fn tier_steps(stake_start_time: u64) -> [(u64, u32); 3] {
    let start = age_start(stake_start_time);
    [
        (start.saturating_add(WARMUP_PERIOD), TIER_BASE_BPS),
        (start.saturating_add(SIX_MONTHS), TIER_HALF_YEAR_BPS),
        (start.saturating_add(ONE_YEAR), TIER_ONE_YEAR_BPS),
    ]
}

/// Weighted share of a position: `principal * multiplier_bps`, `None` on overflow.
pub fn staking_weight(principal: i128, multiplier_bps: u32) -> Option<u128> {
    if principal <= 0 {
        return Some(0);
    }
    (principal as u128).checked_mul(multiplier_bps as u128)
}
