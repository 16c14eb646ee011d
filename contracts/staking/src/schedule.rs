//! Pending multiplier tier changes.
//!
//! Instead of revisiting every position when tiers move, each position registers
//! its future tier steps here once. Positions that step up at the same time share a
//! single [`TierStep`] holding their combined weight gain. The pool applies due steps
//! to its total weight in time order and the positions fold them into their own
//! weight the next time they are touched.

use soroban_sdk::{log, Env, Vec};

use crate::{
    error::ContractError,
    multiplier::{staking_weight, tier_steps},
    storage::{
        get_tier_step, remove_tier_step, save_tier_step,
        utils::{get_tier_schedule, save_tier_schedule},
        StakePosition, TierStep,
    },
};

/// Multiplier already folded into `position.weight`.
pub fn applied_bps(position: &StakePosition) -> u32 {
    if position.principal <= 0 {
        return 0;
    }
    (position.weight / position.principal as u128) as u32
}

/// Tier steps `position` has not folded into its weight yet, as `(time, weight_gain)`
/// in ascending time.
pub fn open_steps(
    env: &Env,
    position: &StakePosition,
) -> Result<Vec<(u64, u128)>, ContractError> {
    let applied = applied_bps(position);
    let mut steps = Vec::new(env);
    let mut previous = 0;
    for (time, bps) in tier_steps(position.stake_start_time) {
        if bps > applied {
            let gain = staking_weight(position.principal, bps - previous).ok_or_else(|| {
                log!(env, "Staking: Tier steps: weight of {} overflows", position.principal);
                ContractError::ContractMathError
            })?;
            steps.push_back((time, gain));
        }
        previous = bps;
    }

    Ok(steps)
}

/// Adds the steps of `position` that lie after `applied_until` to the schedule.
pub fn schedule(
    env: &Env,
    applied_until: u64,
    position: &StakePosition,
) -> Result<(), ContractError> {
    if position.principal <= 0 {
        return Ok(());
    }

    let mut times = get_tier_schedule(env);
    let mut schedule_changed = false;
    for (time, gain) in open_steps(env, position)?.iter() {
        if time <= applied_until {
            continue;
        }
        let mut step = match get_tier_step(env, time) {
            Some(step) => step,
            None => {
                insert_time(&mut times, time);
                schedule_changed = true;
                TierStep::new(env)
            }
        };
        step.weight_gain = step.weight_gain.checked_add(gain).ok_or_else(|| {
            log!(env, "Staking: Schedule: weight gain at {} overflows", time);
            ContractError::ContractMathError
        })?;
        step.positions += 1;
        save_tier_step(env, time, &step);
    }
    if schedule_changed {
        save_tier_schedule(env, &times);
    }

    Ok(())
}

/// Takes the contribution of `position` back out of its steps after `applied_until`.
pub fn unschedule(
    env: &Env,
    applied_until: u64,
    position: &StakePosition,
) -> Result<(), ContractError> {
    if position.principal <= 0 {
        return Ok(());
    }

    let mut times = get_tier_schedule(env);
    let mut schedule_changed = false;
    for (time, gain) in open_steps(env, position)?.iter() {
        if time <= applied_until {
            continue;
        }
        let Some(mut step) = get_tier_step(env, time) else {
            continue;
        };
        step.weight_gain = step.weight_gain.saturating_sub(gain);
        step.positions = step.positions.saturating_sub(1);
        if step.positions == 0 {
            remove_tier_step(env, time);
            if let Some(index) = times.first_index_of(time) {
                times.remove(index);
                schedule_changed = true;
            }
        } else {
            save_tier_step(env, time, &step);
        }
    }
    if schedule_changed {
        save_tier_schedule(env, &times);
    }

    Ok(())
}

/// Records that one more position folded in the applied step at `time`. The step is
/// dropped once no position needs its snapshot anymore.
pub fn release_step(env: &Env, time: u64, mut step: TierStep) {
    step.positions = step.positions.saturating_sub(1);
    if step.positions == 0 {
        remove_tier_step(env, time);
    } else {
        save_tier_step(env, time, &step);
    }
}

fn insert_time(times: &mut Vec<u64>, time: u64) {
    let index = times
        .iter()
        .position(|scheduled| scheduled > time)
        .map_or(times.len(), |index| index as u32);
    times.insert(index, time);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        multiplier::{ONE_YEAR, SIX_MONTHS, WARMUP_PERIOD},
        Staking,
    };
    use pretty_assertions::assert_eq;
    use soroban_sdk::vec;

    const START: u64 = 1_700_006_400;

    fn position(principal: i128, weight: u128, stake_start_time: u64) -> StakePosition {
        StakePosition {
            principal,
            weight,
            stake_start_time,
        }
    }

    #[test]
    fn open_steps_skip_applied_tiers() {
        let env = Env::default();

        assert_eq!(
            open_steps(&env, &position(10, 0, START)).unwrap(),
            vec![
                &env,
                (START + WARMUP_PERIOD, 100_000),
                (START + SIX_MONTHS, 50_000),
                (START + ONE_YEAR, 50_000)
            ]
        );
        assert_eq!(
            open_steps(&env, &position(10, 150_000, START)).unwrap(),
            vec![&env, (START + ONE_YEAR, 50_000)]
        );
        assert_eq!(open_steps(&env, &position(10, 200_000, START)).unwrap().len(), 0);
    }

    #[test]
    fn positions_of_the_same_day_share_steps() {
        let env = Env::default();
        let contract = env.register(Staking, ());

        env.as_contract(&contract, || {
            let alice = position(10, 0, START + 60);
            let bob = position(30, 0, START + 3_600);
            schedule(&env, START, &alice).unwrap();
            schedule(&env, START, &bob).unwrap();

            let day = START + 86_400;
            let warmup_over = day + WARMUP_PERIOD;
            assert_eq!(
                get_tier_schedule(&env),
                vec![&env, warmup_over, day + SIX_MONTHS, day + ONE_YEAR]
            );
            let step = get_tier_step(&env, warmup_over).unwrap();
            assert_eq!(step.weight_gain, 400_000);
            assert_eq!(step.positions, 2);

            unschedule(&env, START, &alice).unwrap();
            let step = get_tier_step(&env, warmup_over).unwrap();
            assert_eq!(step.weight_gain, 300_000);
            assert_eq!(step.positions, 1);

            unschedule(&env, START, &bob).unwrap();
            assert_eq!(get_tier_schedule(&env).len(), 0);
            assert!(get_tier_step(&env, warmup_over).is_none());
        });
    }

    #[test]
    fn steps_are_kept_in_time_order() {
        let env = Env::default();
        let contract = env.register(Staking, ());

        env.as_contract(&contract, || {
            schedule(&env, START, &position(1, 0, START + 200 * 86_400)).unwrap();
            schedule(&env, START, &position(1, 0, START)).unwrap();

            let times = get_tier_schedule(&env);
            assert_eq!(times.len(), 6);
            for i in 1..times.len() {
                assert!(times.get_unchecked(i - 1) < times.get_unchecked(i));
            }
        });
    }

    #[test]
    fn applied_steps_are_not_scheduled_again() {
        let env = Env::default();
        let contract = env.register(Staking, ());

        env.as_contract(&contract, || {
            // already at 1.0x, only the later steps remain
            schedule(&env, START + WARMUP_PERIOD, &position(10, 100_000, START)).unwrap();
            assert_eq!(
                get_tier_schedule(&env),
                vec![&env, START + SIX_MONTHS, START + ONE_YEAR]
            );
        });
    }
}
