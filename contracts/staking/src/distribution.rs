use soroban_sdk::{contracttype, log, token, Address, Env, Map, Vec, U256};
use tgt::{
    math::{saturating_sub, to_i128, u256, zero},
    ttl::{PERSISTENT_RENEWAL_THRESHOLD, PERSISTENT_TARGET_TTL},
};

use crate::{
    error::ContractError,
    schedule::{open_steps, release_step, schedule, unschedule},
    storage::{
        get_config, get_position, get_reward_debt, get_tier_step, remove_reward_debt,
        save_reward_debt, save_tier_step,
        utils::{
            get_applied_until, get_known_tokens, get_reward_tokens, get_tier_schedule,
            get_total_principal, get_total_weight, save_applied_until, save_tier_schedule,
            save_total_principal, save_total_weight,
        },
        Config, DataKey, StakePosition,
    },
};

/// Fixed-point scale of `acc_reward_per_share`.
pub const PRECISION: u128 = 1_000_000_000_000_000_000_000_000;

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardAccumulator {
    /// Reward balance seen by the last update, minus everything paid out since
    pub last_reward_balance: i128,
    /// Reward per unit of weight, scaled by `PRECISION`. Never decreases.
    pub acc_reward_per_share: U256,
    /// Remainder of the last `points / total_weight` division
    pub leftover: U256,
}

impl RewardAccumulator {
    pub fn new(env: &Env, last_reward_balance: i128) -> Self {
        RewardAccumulator {
            last_reward_balance,
            acc_reward_per_share: zero(env),
            leftover: zero(env),
        }
    }

    /// Folds the inflow since the last update into `acc_reward_per_share` and returns
    /// the amount that got distributed.
    ///
    /// With nothing staked the inflow is swallowed into the baseline. While every
    /// depositor is still warming up there is principal but no weight; the inflow is
    /// then left untouched so it is distributed once the first position matures.
    pub fn accrue(
        &mut self,
        env: &Env,
        balance: i128,
        total_principal: i128,
        total_weight: u128,
    ) -> i128 {
        let new_reward = (balance - self.last_reward_balance).max(0);

        if total_principal == 0 {
            self.last_reward_balance = balance;
            return 0;
        }
        if total_weight == 0 {
            return 0;
        }

        let points = u256(env, new_reward as u128)
            .mul(&u256(env, PRECISION))
            .add(&self.leftover);
        let total_weight = u256(env, total_weight);

        self.acc_reward_per_share = self.acc_reward_per_share.add(&points.div(&total_weight));
        self.leftover = points.rem_euclid(&total_weight);
        self.last_reward_balance = balance;

        new_reward
    }

    /// Scaled reward a position of `weight` has earned on top of its `debt`.
    pub fn accrued(&self, env: &Env, weight: u128, debt: &U256) -> U256 {
        let gross = u256(env, weight).mul(&self.acc_reward_per_share);
        saturating_sub(env, &gross, debt)
    }

    /// Debt that leaves exactly `carry` accrued for a position of `weight`.
    pub fn debt_for(&self, env: &Env, weight: u128, carry: &U256) -> U256 {
        let gross = u256(env, weight).mul(&self.acc_reward_per_share);
        saturating_sub(env, &gross, carry)
    }
}

pub fn get_accumulator(env: &Env, token: &Address) -> Option<RewardAccumulator> {
    let key = DataKey::Accumulator(token.clone());
    let accumulator = env.storage().persistent().get(&key);
    if accumulator.is_some() {
        env.storage().persistent().extend_ttl(
            &key,
            PERSISTENT_RENEWAL_THRESHOLD,
            PERSISTENT_TARGET_TTL,
        );
    }

    accumulator
}

pub fn save_accumulator(env: &Env, token: &Address, accumulator: &RewardAccumulator) {
    let key = DataKey::Accumulator(token.clone());
    env.storage().persistent().set(&key, accumulator);
    env.storage().persistent().extend_ttl(
        &key,
        PERSISTENT_RENEWAL_THRESHOLD,
        PERSISTENT_TARGET_TTL,
    );
}

/// Tier steps applied by a single call at most; later ones wait for the next call.
pub const MAX_TIER_STEPS_PER_CALL: u32 = 16;

/// Pool-wide accounting state of a single invocation.
///
/// Loaded once at the start of a call, mutated in memory while positions are touched
/// and written back with [`Pool::save`]. `now` is the ledger timestamp read at load
/// time.
pub struct Pool {
    pub config: Config,
    pub now: u64,
    pub total_principal: i128,
    /// Sum of all position weights including every tier step up to `applied_until`
    pub total_weight: u128,
    pub applied_until: u64,
}

impl Pool {
    pub fn load(env: &Env) -> Self {
        Pool {
            config: get_config(env),
            now: env.ledger().timestamp(),
            total_principal: get_total_principal(env),
            total_weight: get_total_weight(env),
            applied_until: get_applied_until(env),
        }
    }

    pub fn save(&self, env: &Env) {
        save_total_principal(env, self.total_principal);
        save_total_weight(env, self.total_weight);
        save_applied_until(env, self.applied_until);
    }

    /// Tokens held by the pool that are available as reward. Principal of the staked
    /// token is never counted as reward.
    pub fn reward_balance(&self, env: &Env, token: &Address) -> i128 {
        let balance = token::Client::new(env, token).balance(&env.current_contract_address());
        if *token == self.config.staked_token {
            (balance - self.total_principal).max(0)
        } else {
            balance
        }
    }

    /// Number of due steps at the head of `times` one call applies, and the
    /// `applied_until` reached afterwards.
    fn due_steps(&self, times: &Vec<u64>) -> (u32, u64) {
        let mut count = 0;
        let mut last = self.applied_until;
        for time in times.iter() {
            if time > self.now {
                break;
            }
            if count == MAX_TIER_STEPS_PER_CALL {
                return (count, last);
            }
            last = time;
            count += 1;
        }
        (count, self.now.max(self.applied_until))
    }

    /// Applies due tier steps to the total weight, oldest first.
    ///
    /// Each applied step keeps the current `acc_reward_per_share` of every known token.
    /// Inflow not yet pulled into the accumulators is therefore shared at the new
    /// weights, and positions can tell what they earned before their step.
    pub fn apply_tier_steps(&mut self, env: &Env) -> Result<(), ContractError> {
        let mut times = get_tier_schedule(env);
        let (count, applied_until) = self.due_steps(&times);

        if count > 0 {
            let snapshot = accumulator_snapshot(env);
            for _ in 0..count {
                let Some(time) = times.pop_front() else {
                    break;
                };
                let Some(mut step) = get_tier_step(env, time) else {
                    continue;
                };
                self.total_weight =
                    self.total_weight
                        .checked_add(step.weight_gain)
                        .ok_or_else(|| {
                            log!(env, "Staking: Apply tier steps: total weight overflows");
                            ContractError::ContractMathError
                        })?;
                step.snapshot = snapshot.clone();
                save_tier_step(env, time, &step);
            }
            save_tier_schedule(env, &times);
        }
        self.applied_until = applied_until;

        Ok(())
    }

    /// Pulls the inflow of a single registered token into its accumulator.
    pub fn update_reward(&self, env: &Env, token: &Address) -> Result<i128, ContractError> {
        let mut accumulator = get_accumulator(env, token).ok_or_else(|| {
            log!(env, "Staking: Update reward: token {} has no accumulator", token);
            ContractError::NotRegistered
        })?;

        let balance = self.reward_balance(env, token);
        let distributed =
            accumulator.accrue(env, balance, self.total_principal, self.total_weight);
        save_accumulator(env, token, &accumulator);

        Ok(distributed)
    }

    /// Applies due tier steps and updates every registered token.
    pub fn sync(&mut self, env: &Env) -> Result<(), ContractError> {
        self.apply_tier_steps(env)?;
        for token in get_reward_tokens(env).iter() {
            self.update_reward(env, &token)?;
        }
        Ok(())
    }

    /// Folds the applied tier steps `position` has not seen yet into its weight.
    ///
    /// For every token the debt grows by what the added weight would have earned up to
    /// the step, so the accrued amount is unchanged and only later inflow is shared
    /// at the higher weight. The caller saves the position.
    pub fn catch_up(
        &self,
        env: &Env,
        user: &Address,
        position: &mut StakePosition,
    ) -> Result<(), ContractError> {
        if position.principal <= 0 {
            return Ok(());
        }

        let mut gained = 0u128;
        let mut debt_increase: Map<Address, U256> = Map::new(env);
        for (time, gain) in open_steps(env, position)?.iter() {
            if time > self.applied_until {
                break;
            }
            if let Some(step) = get_tier_step(env, time) {
                for (token, acc) in step.snapshot.iter() {
                    if acc == zero(env) {
                        continue;
                    }
                    let increase = u256(env, gain).mul(&acc);
                    let increase = match debt_increase.get(token.clone()) {
                        Some(previous) => previous.add(&increase),
                        None => increase,
                    };
                    debt_increase.set(token, increase);
                }
                release_step(env, time, step);
            }
            gained += gain;
        }

        for (token, increase) in debt_increase.iter() {
            let debt = get_reward_debt(env, user, &token).add(&increase);
            save_reward_debt(env, user, &token, &debt);
        }
        position.weight += gained;

        Ok(())
    }

    /// Swaps the caught up `before` state of a position for `after` in the total weight
    /// and in the tier schedule.
    pub fn replace_position(
        &mut self,
        env: &Env,
        before: &StakePosition,
        after: &StakePosition,
    ) -> Result<(), ContractError> {
        self.total_weight = (self.total_weight - before.weight)
            .checked_add(after.weight)
            .ok_or_else(|| {
                log!(env, "Staking: Total weight overflows");
                ContractError::ContractMathError
            })?;

        if before != after {
            unschedule(env, self.applied_until, before)?;
            schedule(env, self.applied_until, after)?;
        }

        Ok(())
    }

    /// Takes `position` out of the tier schedule without touching its debts and returns
    /// the weight it holds in the total, applied steps included.
    pub fn leave(&self, env: &Env, position: &StakePosition) -> Result<u128, ContractError> {
        let mut weight = position.weight;
        for (time, gain) in open_steps(env, position)?.iter() {
            if time > self.applied_until {
                break;
            }
            if let Some(step) = get_tier_step(env, time) {
                release_step(env, time, step);
            }
            weight += gain;
        }
        unschedule(env, self.applied_until, position)?;

        Ok(weight)
    }

    /// Pays out everything `user` accrued at `weight_before` and rewrites the debts for
    /// `weight_after`.
    ///
    /// Returns the non-zero payouts per token. Payouts are deducted from the
    /// accumulators' `last_reward_balance` straight away, so the caller must perform
    /// the transfers within the same invocation. Sub-unit remainders are carried
    /// into the new debt.
    pub fn settle(
        &self,
        env: &Env,
        user: &Address,
        weight_before: u128,
        weight_after: u128,
    ) -> Result<Vec<(Address, i128)>, ContractError> {
        let precision = u256(env, PRECISION);
        let mut payouts = Vec::new(env);

        for token in get_known_tokens(env).iter() {
            let Some(mut accumulator) = get_accumulator(env, &token) else {
                continue;
            };

            let debt = get_reward_debt(env, user, &token);
            let accrued = accumulator.accrued(env, weight_before, &debt);
            let amount = to_i128(&accrued.div(&precision)).ok_or_else(|| {
                log!(env, "Staking: Settle: reward of {} overflows", user);
                ContractError::ContractMathError
            })?;
            let carry = accrued.rem_euclid(&precision);

            if amount > 0 {
                accumulator.last_reward_balance =
                    (accumulator.last_reward_balance - amount).max(0);
                save_accumulator(env, &token, &accumulator);
                payouts.push_back((token.clone(), amount));
            }

            if weight_after == 0 {
                remove_reward_debt(env, user, &token);
            } else {
                let debt = accumulator.debt_for(env, weight_after, &carry);
                save_reward_debt(env, user, &token, &debt);
            }
        }

        Ok(payouts)
    }

    /// Reward `user` would receive for `token` if it harvested now.
    ///
    /// Read only: replays the tier steps, the catch up of the position and the
    /// accumulator update in memory, exactly as the next call would apply them.
    pub fn pending_reward(
        &self,
        env: &Env,
        user: &Address,
        token: &Address,
    ) -> Result<i128, ContractError> {
        let Some(accumulator) = get_accumulator(env, token) else {
            return Ok(0);
        };
        let position = get_position(env, user);
        if position.principal == 0 {
            return Ok(0);
        }

        let times = get_tier_schedule(env);
        let (count, applied_until) = self.due_steps(&times);
        let mut total_weight = self.total_weight;
        for time in times.iter().take(count as usize) {
            if let Some(step) = get_tier_step(env, time) {
                total_weight = total_weight.saturating_add(step.weight_gain);
            }
        }

        let mut weight = position.weight;
        let mut debt = get_reward_debt(env, user, token);
        for (time, gain) in open_steps(env, &position)?.iter() {
            if time > applied_until {
                break;
            }
            let acc = if time <= self.applied_until {
                get_tier_step(env, time)
                    .and_then(|step| step.snapshot.get(token.clone()))
                    .unwrap_or_else(|| zero(env))
            } else {
                accumulator.acc_reward_per_share.clone()
            };
            debt = debt.add(&u256(env, gain).mul(&acc));
            weight += gain;
        }

        let mut projected = accumulator;
        if get_reward_tokens(env).contains(token) {
            let balance = self.reward_balance(env, token);
            projected.accrue(env, balance, self.total_principal, total_weight);
        }

        let accrued = projected.accrued(env, weight, &debt);
        to_i128(&accrued.div(&u256(env, PRECISION))).ok_or_else(|| {
            log!(env, "Staking: Pending reward: reward of {} overflows", user);
            ContractError::ContractMathError
        })
    }
}

/// `acc_reward_per_share` of every known token.
fn accumulator_snapshot(env: &Env) -> Map<Address, U256> {
    let mut snapshot = Map::new(env);
    for token in get_known_tokens(env).iter() {
        if let Some(accumulator) = get_accumulator(env, &token) {
            snapshot.set(token, accumulator.acc_reward_per_share);
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        multiplier::{multiplier_bps, staking_weight, ONE_YEAR, SECONDS_PER_DAY, WARMUP_PERIOD},
        storage::{
            save_config, save_position,
            utils::{add_known_token, save_reward_tokens},
        },
        Staking,
    };
    use pretty_assertions::assert_eq;
    use soroban_sdk::{
        testutils::{Address as _, Ledger},
        vec, Address,
    };

    const START: u64 = 1_700_006_400;

    fn scaled(env: &Env, value: u128) -> U256 {
        u256(env, value).mul(&u256(env, PRECISION))
    }

    #[test]
    fn accrue_splits_inflow_over_total_weight() {
        let env = Env::default();
        let mut acc = RewardAccumulator::new(&env, 0);

        let distributed = acc.accrue(&env, 100, 300, 4);

        assert_eq!(distributed, 100);
        assert_eq!(acc.last_reward_balance, 100);
        assert_eq!(acc.acc_reward_per_share, u256(&env, 25 * PRECISION));
        assert_eq!(acc.leftover, zero(&env));
    }

    #[test]
    fn accrue_without_stake_moves_baseline_only() {
        let env = Env::default();
        let mut acc = RewardAccumulator::new(&env, 10);

        assert_eq!(acc.accrue(&env, 110, 0, 0), 0);
        assert_eq!(acc.last_reward_balance, 110);
        assert_eq!(acc.acc_reward_per_share, zero(&env));
    }

    #[test]
    fn accrue_during_warmup_keeps_inflow_for_later() {
        let env = Env::default();
        let mut acc = RewardAccumulator::new(&env, 0);

        assert_eq!(acc.accrue(&env, 50, 100, 0), 0);
        assert_eq!(acc, RewardAccumulator::new(&env, 0));

        // first position matures, the whole inflow is distributed at once
        assert_eq!(acc.accrue(&env, 50, 100, 1_000_000), 50);
        assert_eq!(acc.last_reward_balance, 50);
    }

    #[test]
    fn accrue_ignores_balance_drops() {
        let env = Env::default();
        let mut acc = RewardAccumulator::new(&env, 100);

        assert_eq!(acc.accrue(&env, 40, 10, 10), 0);
        assert_eq!(acc.acc_reward_per_share, zero(&env));
        assert_eq!(acc.last_reward_balance, 40);
    }

    #[test]
    fn truncation_remainder_is_carried_to_next_update() {
        let env = Env::default();
        let mut acc = RewardAccumulator::new(&env, 0);
        let weight = 3 * PRECISION;

        // 1 * PRECISION / (3 * PRECISION) floors to 0
        acc.accrue(&env, 1, 1, weight);
        assert_eq!(acc.acc_reward_per_share, zero(&env));
        assert_eq!(acc.leftover, u256(&env, PRECISION));

        acc.accrue(&env, 3, 1, weight);
        assert_eq!(acc.acc_reward_per_share, u256(&env, 1));
        assert_eq!(acc.leftover, zero(&env));
    }

    #[test]
    fn accrued_and_debt_are_inverse() {
        let env = Env::default();
        let mut acc = RewardAccumulator::new(&env, 0);
        acc.accrue(&env, 90, 9, 90_000);

        let carry = u256(&env, 7);
        let debt = acc.debt_for(&env, 30_000, &carry);
        assert_eq!(acc.accrued(&env, 30_000, &debt), carry);
        assert_eq!(acc.accrued(&env, 30_000, &zero(&env)), scaled(&env, 30));
    }

    fn setup_pool(env: &Env, staked_token: &Address) -> Address {
        let contract = env.register(Staking, ());
        env.as_contract(&contract, || {
            save_config(
                env,
                &Config {
                    staked_token: staked_token.clone(),
                    deposit_fee_percent: 0,
                    penalty_collector: Address::generate(env),
                    treasury: Address::generate(env),
                    treasury_share_bps: 0,
                },
            );
        });
        contract
    }

    fn open_position(env: &Env, user: &Address, principal: i128, start: u64, pool: &mut Pool) {
        let weight = staking_weight(principal, multiplier_bps(start, pool.now)).unwrap();
        save_position(
            env,
            user,
            &StakePosition {
                principal,
                weight,
                stake_start_time: start,
            },
        );
        pool.total_principal += principal;
        pool.total_weight += weight;
    }

    #[test]
    fn tier_steps_keep_accrued_reward() {
        let env = Env::default();
        env.ledger().with_mut(|li| li.timestamp = START + WARMUP_PERIOD);
        let staked = Address::generate(&env);
        let reward = Address::generate(&env);
        let contract = setup_pool(&env, &staked);
        let user = Address::generate(&env);

        env.as_contract(&contract, || {
            let mut pool = Pool::load(&env);
            let position = StakePosition {
                principal: 100,
                weight: 0,
                stake_start_time: START,
            };
            save_position(&env, &user, &position);
            schedule(&env, pool.applied_until, &position).unwrap();
            pool.total_principal = 100;
            add_known_token(&env, &reward);
            save_reward_tokens(&env, &vec![&env, reward.clone()]);
            save_accumulator(&env, &reward, &RewardAccumulator::new(&env, 0));

            pool.apply_tier_steps(&env).unwrap();
            assert_eq!(pool.total_weight, 1_000_000);

            let mut acc = get_accumulator(&env, &reward).unwrap();
            acc.accrue(&env, 100, pool.total_principal, pool.total_weight);
            save_accumulator(&env, &reward, &acc);

            // a year later the pool doubles the weight without touching the position
            pool.now = START + ONE_YEAR;
            pool.apply_tier_steps(&env).unwrap();
            assert_eq!(pool.total_weight, 2_000_000);
            assert_eq!(get_position(&env, &user).weight, 0);

            let mut position = get_position(&env, &user);
            pool.catch_up(&env, &user, &mut position).unwrap();
            assert_eq!(position.weight, 2_000_000);

            let debt = get_reward_debt(&env, &user, &reward);
            assert_eq!(acc.accrued(&env, position.weight, &debt), scaled(&env, 100));

            // every step was folded in by its only position
            assert!(get_tier_step(&env, START + WARMUP_PERIOD).is_none());
            assert!(get_tier_step(&env, START + ONE_YEAR).is_none());
        });
    }

    #[test]
    fn tier_steps_per_call_are_capped() {
        let env = Env::default();
        env.ledger().with_mut(|li| li.timestamp = START);
        let staked = Address::generate(&env);
        let contract = setup_pool(&env, &staked);

        env.as_contract(&contract, || {
            let mut pool = Pool::load(&env);
            for day in 0..20 {
                let position = StakePosition {
                    principal: 1,
                    weight: 0,
                    stake_start_time: START + day * SECONDS_PER_DAY,
                };
                schedule(&env, pool.applied_until, &position).unwrap();
            }

            pool.now = START + 30 * SECONDS_PER_DAY;
            pool.apply_tier_steps(&env).unwrap();
            assert_eq!(pool.total_weight, 160_000);
            assert_eq!(
                pool.applied_until,
                START + (MAX_TIER_STEPS_PER_CALL as u64 - 1) * SECONDS_PER_DAY + WARMUP_PERIOD
            );

            pool.apply_tier_steps(&env).unwrap();
            assert_eq!(pool.total_weight, 200_000);
            assert_eq!(pool.applied_until, pool.now);
            // only the later tiers are left
            assert_eq!(get_tier_schedule(&env).len(), 40);
        });
    }

    #[test]
    fn settle_pays_whole_units_and_carries_the_rest() {
        let env = Env::default();
        env.ledger().with_mut(|li| li.timestamp = START + WARMUP_PERIOD);
        let staked = Address::generate(&env);
        let reward = Address::generate(&env);
        let contract = setup_pool(&env, &staked);
        let (alice, bob, carol) = (
            Address::generate(&env),
            Address::generate(&env),
            Address::generate(&env),
        );

        env.as_contract(&contract, || {
            let mut pool = Pool::load(&env);
            for user in [&alice, &bob, &carol] {
                open_position(&env, user, 1, START, &mut pool);
            }
            add_known_token(&env, &reward);

            let mut acc = RewardAccumulator::new(&env, 0);
            acc.accrue(&env, 100, pool.total_principal, pool.total_weight);
            save_accumulator(&env, &reward, &acc);

            let weight = 10_000;
            let payouts = pool.settle(&env, &alice, weight, weight).unwrap();
            assert_eq!(payouts, vec![&env, (reward.clone(), 33)]);

            // 1/3 of a unit stays with alice
            let debt = get_reward_debt(&env, &alice, &reward);
            let acc = get_accumulator(&env, &reward).unwrap();
            assert_eq!(acc.last_reward_balance, 67);
            assert!(acc.accrued(&env, weight, &debt) > zero(&env));
            assert!(acc.accrued(&env, weight, &debt) < u256(&env, PRECISION));

            // nothing new, nothing paid
            let payouts = pool.settle(&env, &alice, weight, weight).unwrap();
            assert_eq!(payouts.len(), 0);
        });
    }

    #[test]
    fn settle_to_zero_weight_clears_debts() {
        let env = Env::default();
        env.ledger().with_mut(|li| li.timestamp = START + WARMUP_PERIOD);
        let staked = Address::generate(&env);
        let reward = Address::generate(&env);
        let contract = setup_pool(&env, &staked);
        let user = Address::generate(&env);

        env.as_contract(&contract, || {
            let mut pool = Pool::load(&env);
            open_position(&env, &user, 10, START, &mut pool);
            add_known_token(&env, &reward);

            let mut acc = RewardAccumulator::new(&env, 0);
            acc.accrue(&env, 10, pool.total_principal, pool.total_weight);
            save_accumulator(&env, &reward, &acc);

            let payouts = pool.settle(&env, &user, 100_000, 0).unwrap();
            assert_eq!(payouts, vec![&env, (reward.clone(), 10)]);
            assert!(!env
                .storage()
                .persistent()
                .has(&DataKey::RewardDebt(user.clone(), reward.clone())));
        });
    }
}
