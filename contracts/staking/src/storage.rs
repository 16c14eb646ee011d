use soroban_sdk::{contracttype, log, panic_with_error, Address, Env, Map, Vec, U256};
use tgt::ttl::{
    INSTANCE_RENEWAL_THRESHOLD, INSTANCE_TARGET_TTL, PERSISTENT_RENEWAL_THRESHOLD,
    PERSISTENT_TARGET_TTL,
};

use crate::error::ContractError;

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Token users deposit; may also be registered as a reward token
    pub staked_token: Address,
    /// Fraction of every deposit withheld as fee, scaled by `fee::FEE_PRECISION`
    pub deposit_fee_percent: i128,
    /// Receives the part of the deposit fee not routed to the treasury
    pub penalty_collector: Address,
    pub treasury: Address,
    /// Share of the deposit fee sent to `treasury`, in basis points
    pub treasury_share_bps: u32,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StakePosition {
    /// Staked tokens, already net of the deposit fee
    pub principal: i128,
    /// `principal * multiplier_bps` as of the last touch of this position. Tier steps
    /// applied to the pool since then are folded in on the next touch.
    pub weight: u128,
    /// Start of the staking age window; only set when the position goes from empty to
    /// non-empty
    pub stake_start_time: u64,
}

/// Aggregate of every position that moves up a multiplier tier at the same time.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TierStep {
    /// Weight added to the pool once the step is applied
    pub weight_gain: u128,
    /// Positions that have not folded this step into their own weight yet
    pub positions: u32,
    /// `acc_reward_per_share` of every known token at the time the step was applied;
    /// empty while the step is still scheduled
    pub snapshot: Map<Address, U256>,
}

impl TierStep {
    pub fn new(env: &Env) -> Self {
        TierStep {
            weight_gain: 0,
            positions: 0,
            snapshot: Map::new(env),
        }
    }
}

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Config,
    Admin,
    PendingAdmin,
    Initialized,
    TotalPrincipal,
    TotalWeight,
    AppliedUntil,
    TierSchedule,
    TierStep(u64),
    RewardTokens,
    KnownTokens,
    Position(Address),
    RewardDebt(Address, Address),
    Accumulator(Address),
}

pub fn get_config(env: &Env) -> Config {
    let config = env
        .storage()
        .instance()
        .get(&DataKey::Config)
        .unwrap_or_else(|| {
            log!(env, "Staking: Config not set");
            panic_with_error!(env, ContractError::NotInitialized)
        });
    env.storage()
        .instance()
        .extend_ttl(INSTANCE_RENEWAL_THRESHOLD, INSTANCE_TARGET_TTL);

    config
}

pub fn save_config(env: &Env, config: &Config) {
    env.storage().instance().set(&DataKey::Config, config);
    env.storage()
        .instance()
        .extend_ttl(INSTANCE_RENEWAL_THRESHOLD, INSTANCE_TARGET_TTL);
}

pub fn get_position(env: &Env, user: &Address) -> StakePosition {
    let key = DataKey::Position(user.clone());
    match env.storage().persistent().get::<_, StakePosition>(&key) {
        Some(position) => {
            env.storage().persistent().extend_ttl(
                &key,
                PERSISTENT_RENEWAL_THRESHOLD,
                PERSISTENT_TARGET_TTL,
            );
            position
        }
        None => StakePosition::default(),
    }
}

pub fn save_position(env: &Env, user: &Address, position: &StakePosition) {
    let key = DataKey::Position(user.clone());
    env.storage().persistent().set(&key, position);
    env.storage().persistent().extend_ttl(
        &key,
        PERSISTENT_RENEWAL_THRESHOLD,
        PERSISTENT_TARGET_TTL,
    );
}

pub fn remove_position(env: &Env, user: &Address) {
    env.storage()
        .persistent()
        .remove(&DataKey::Position(user.clone()));
}

/// Reward debt of `user` towards `token`, in `weight * acc_reward_per_share` units.
pub fn get_reward_debt(env: &Env, user: &Address, token: &Address) -> U256 {
    let key = DataKey::RewardDebt(user.clone(), token.clone());
    match env.storage().persistent().get::<_, U256>(&key) {
        Some(debt) => {
            env.storage().persistent().extend_ttl(
                &key,
                PERSISTENT_RENEWAL_THRESHOLD,
                PERSISTENT_TARGET_TTL,
            );
            debt
        }
        None => U256::from_u128(env, 0),
    }
}

pub fn save_reward_debt(env: &Env, user: &Address, token: &Address, debt: &U256) {
    let key = DataKey::RewardDebt(user.clone(), token.clone());
    env.storage().persistent().set(&key, debt);
    env.storage().persistent().extend_ttl(
        &key,
        PERSISTENT_RENEWAL_THRESHOLD,
        PERSISTENT_TARGET_TTL,
    );
}

pub fn remove_reward_debt(env: &Env, user: &Address, token: &Address) {
    env.storage()
        .persistent()
        .remove(&DataKey::RewardDebt(user.clone(), token.clone()));
}

pub fn get_tier_step(env: &Env, time: u64) -> Option<TierStep> {
    let key = DataKey::TierStep(time);
    let step = env.storage().persistent().get(&key);
    if step.is_some() {
        env.storage().persistent().extend_ttl(
            &key,
            PERSISTENT_RENEWAL_THRESHOLD,
            PERSISTENT_TARGET_TTL,
        );
    }

    step
}

pub fn save_tier_step(env: &Env, time: u64, step: &TierStep) {
    let key = DataKey::TierStep(time);
    env.storage().persistent().set(&key, step);
    env.storage().persistent().extend_ttl(
        &key,
        PERSISTENT_RENEWAL_THRESHOLD,
        PERSISTENT_TARGET_TTL,
    );
}

pub fn remove_tier_step(env: &Env, time: u64) {
    env.storage().persistent().remove(&DataKey::TierStep(time));
}

pub mod utils {
    use super::*;

    use tgt::utils::AdminChange;

    pub fn is_initialized(e: &Env) -> bool {
        e.storage()
            .instance()
            .get(&DataKey::Initialized)
            .unwrap_or(false)
    }

    pub fn set_initialized(e: &Env) {
        e.storage().instance().set(&DataKey::Initialized, &true);
        e.storage()
            .instance()
            .extend_ttl(INSTANCE_RENEWAL_THRESHOLD, INSTANCE_TARGET_TTL);
    }

    pub fn save_admin(e: &Env, address: &Address) {
        e.storage().instance().set(&DataKey::Admin, address);
        e.storage()
            .instance()
            .extend_ttl(INSTANCE_RENEWAL_THRESHOLD, INSTANCE_TARGET_TTL);
    }

    pub fn get_admin(e: &Env) -> Result<Address, ContractError> {
        e.storage()
            .instance()
            .extend_ttl(INSTANCE_RENEWAL_THRESHOLD, INSTANCE_TARGET_TTL);

        e.storage()
            .instance()
            .get(&DataKey::Admin)
            .ok_or(ContractError::NotInitialized)
    }

    pub fn save_pending_admin(e: &Env, change: &AdminChange) {
        e.storage().instance().set(&DataKey::PendingAdmin, change);
    }

    pub fn get_pending_admin(e: &Env) -> Option<AdminChange> {
        e.storage().instance().get(&DataKey::PendingAdmin)
    }

    pub fn remove_pending_admin(e: &Env) {
        e.storage().instance().remove(&DataKey::PendingAdmin);
    }

    fn get_persistent_or<T>(e: &Env, key: &DataKey, default: impl FnOnce() -> T) -> T
    where
        T: soroban_sdk::TryFromVal<Env, soroban_sdk::Val>,
    {
        match e.storage().persistent().get::<_, T>(key) {
            Some(value) => {
                e.storage().persistent().extend_ttl(
                    key,
                    PERSISTENT_RENEWAL_THRESHOLD,
                    PERSISTENT_TARGET_TTL,
                );
                value
            }
            None => default(),
        }
    }

    fn save_persistent<T>(e: &Env, key: &DataKey, value: &T)
    where
        T: soroban_sdk::IntoVal<Env, soroban_sdk::Val>,
    {
        e.storage().persistent().set(key, value);
        e.storage().persistent().extend_ttl(
            key,
            PERSISTENT_RENEWAL_THRESHOLD,
            PERSISTENT_TARGET_TTL,
        );
    }

    pub fn get_total_principal(e: &Env) -> i128 {
        get_persistent_or(e, &DataKey::TotalPrincipal, || 0i128)
    }

    pub fn save_total_principal(e: &Env, total: i128) {
        save_persistent(e, &DataKey::TotalPrincipal, &total);
    }

    pub fn get_total_weight(e: &Env) -> u128 {
        get_persistent_or(e, &DataKey::TotalWeight, || 0u128)
    }

    pub fn save_total_weight(e: &Env, total: u128) {
        save_persistent(e, &DataKey::TotalWeight, &total);
    }

    /// Every tier step at or before this time is included in the total weight.
    pub fn get_applied_until(e: &Env) -> u64 {
        get_persistent_or(e, &DataKey::AppliedUntil, || 0u64)
    }

    pub fn save_applied_until(e: &Env, time: u64) {
        save_persistent(e, &DataKey::AppliedUntil, &time);
    }

    /// Times of the tier steps not applied yet, ascending. Steps lie at most a year
    /// ahead and on day boundaries, so the list stays short.
    pub fn get_tier_schedule(e: &Env) -> Vec<u64> {
        get_persistent_or(e, &DataKey::TierSchedule, || Vec::new(e))
    }

    pub fn save_tier_schedule(e: &Env, schedule: &Vec<u64>) {
        save_persistent(e, &DataKey::TierSchedule, schedule);
    }

    /// Registered reward tokens in insertion order.
    pub fn get_reward_tokens(e: &Env) -> Vec<Address> {
        get_persistent_or(e, &DataKey::RewardTokens, || Vec::new(e))
    }

    pub fn save_reward_tokens(e: &Env, tokens: &Vec<Address>) {
        save_persistent(e, &DataKey::RewardTokens, tokens);
    }

    /// Every token that ever had an accumulator, registered or not. Debts against
    /// removed tokens stay payable, so settlement iterates this list.
    pub fn get_known_tokens(e: &Env) -> Vec<Address> {
        get_persistent_or(e, &DataKey::KnownTokens, || Vec::new(e))
    }

    pub fn add_known_token(e: &Env, token: &Address) {
        let mut known = get_known_tokens(e);
        if !known.contains(token) {
            known.push_back(token.clone());
            save_persistent(e, &DataKey::KnownTokens, &known);
        }
    }

    pub fn forget_known_token(e: &Env, token: &Address) {
        let mut known = get_known_tokens(e);
        if let Some(index) = known.first_index_of(token) {
            known.remove(index);
            save_persistent(e, &DataKey::KnownTokens, &known);
        }
        e.storage()
            .persistent()
            .remove(&DataKey::Accumulator(token.clone()));
    }
}
