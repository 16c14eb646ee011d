use soroban_sdk::{
    contract, contractimpl, contractmeta, log, token, Address, Env, Vec, U256,
};
use tgt::utils::AdminChange;

use crate::{
    distribution::{get_accumulator, save_accumulator, Pool, RewardAccumulator, PRECISION},
    error::ContractError,
    fee::{split_deposit, validate_deposit_fee, validate_treasury_share},
    msg::{ConfigResponse, UserInfo},
    multiplier::{multiplier_bps, staking_weight, MAX_MULTIPLIER_BPS},
    schedule::applied_bps,
    storage::{
        get_config, get_position, get_reward_debt, remove_position, remove_reward_debt,
        save_config, save_position,
        utils::{
            self, add_known_token, forget_known_token, get_admin, get_known_tokens,
            get_reward_tokens, get_total_principal, get_total_weight, is_initialized,
            save_reward_tokens,
        },
        Config, StakePosition,
    },
};

// Metadata that is added on to the WASM custom section
contractmeta!(
    key = "Description",
    val = "TGT multi reward token staking with duration multiplier"
);

/// Upper bound on simultaneously registered reward tokens. Every deposit and withdrawal
/// walks all of them.
pub const MAX_REWARD_TOKENS: u32 = 25;

/// Upper bound on tokens with an accumulator, registered or removed. Settlement walks
/// all of them.
pub const MAX_KNOWN_TOKENS: u32 = 30;

#[contract]
pub struct Staking;

pub trait StakingTrait {
    fn initialize(
        env: Env,
        admin: Address,
        staked_token: Address,
        reward_token: Address,
        fee_collector: Address,
        deposit_fee_percent: i128,
    ) -> Result<(), ContractError>;

    /// Stakes `amount` of the staked token from `sender` into the position of
    /// `recipient`. Rewards accrued by that position are paid out to `recipient`.
    fn deposit(
        env: Env,
        sender: Address,
        amount: i128,
        recipient: Address,
    ) -> Result<(), ContractError>;

    /// Unstakes `amount` from the position of `sender`. Principal and accrued rewards
    /// are sent to `recipient`.
    fn withdraw(
        env: Env,
        sender: Address,
        amount: i128,
        recipient: Address,
    ) -> Result<(), ContractError>;

    fn harvest(env: Env, sender: Address, recipient: Address) -> Result<(), ContractError>;

    /// Returns the whole principal without touching any reward token. Pending rewards
    /// are forfeited.
    fn emergency_withdraw(env: Env, sender: Address) -> Result<(), ContractError>;

    // ADMIN

    fn add_reward_token(env: Env, sender: Address, token: Address) -> Result<(), ContractError>;

    fn remove_reward_token(
        env: Env,
        sender: Address,
        token: Address,
    ) -> Result<(), ContractError>;

    fn set_deposit_fee_percent(
        env: Env,
        sender: Address,
        deposit_fee_percent: i128,
    ) -> Result<(), ContractError>;

    fn set_fee_collectors(
        env: Env,
        sender: Address,
        penalty_collector: Address,
        treasury: Address,
        treasury_share_bps: u32,
    ) -> Result<(), ContractError>;

    fn propose_admin(
        env: Env,
        new_admin: Address,
        time_limit: Option<u64>,
    ) -> Result<Address, ContractError>;

    fn revoke_admin_change(env: Env) -> Result<(), ContractError>;

    fn accept_admin(env: Env) -> Result<Address, ContractError>;

    // ACCOUNTING

    fn update_reward(env: Env, token: Address) -> Result<i128, ContractError>;

    // QUERIES

    fn pending_reward(env: Env, user: Address, token: Address) -> Result<i128, ContractError>;

    fn get_user_info(env: Env, user: Address, token: Address)
        -> Result<UserInfo, ContractError>;

    fn get_staking_multiplier(env: Env, user: Address) -> u32;

    fn is_reward_token(env: Env, token: Address) -> bool;

    fn reward_tokens_length(env: Env) -> u32;

    fn query_reward_tokens(env: Env) -> Vec<Address>;

    fn deposit_fee_percent(env: Env) -> i128;

    fn last_reward_balance(env: Env, token: Address) -> Result<i128, ContractError>;

    fn acc_reward_per_share(env: Env, token: Address) -> Result<U256, ContractError>;

    fn query_config(env: Env) -> Result<ConfigResponse, ContractError>;

    fn query_admin(env: Env) -> Result<Address, ContractError>;

    fn query_total_staked(env: Env) -> i128;

    fn query_total_weight(env: Env) -> u128;

    /// Stored position. `weight` is as of the last deposit, withdrawal or harvest of
    /// the position.
    fn query_position(env: Env, user: Address) -> StakePosition;
}

#[contractimpl]
impl StakingTrait for Staking {
    fn initialize(
        env: Env,
        admin: Address,
        staked_token: Address,
        reward_token: Address,
        fee_collector: Address,
        deposit_fee_percent: i128,
    ) -> Result<(), ContractError> {
        if is_initialized(&env) {
            log!(&env, "Staking: Initialize: initializing contract twice is not allowed");
            return Err(ContractError::AlreadyInitialized);
        }
        validate_deposit_fee(&env, deposit_fee_percent)?;

        utils::set_initialized(&env);
        utils::save_admin(&env, &admin);
        save_config(
            &env,
            &Config {
                staked_token: staked_token.clone(),
                deposit_fee_percent,
                penalty_collector: fee_collector.clone(),
                treasury: fee_collector,
                treasury_share_bps: 0,
            },
        );

        let pool = Pool::load(&env);
        register_reward_token(&env, &pool, &reward_token);

        env.events()
            .publish(("initialize", "TGT staking contract"), &staked_token);
        env.events()
            .publish(("reward_token_added", "token"), &reward_token);

        Ok(())
    }

    fn deposit(
        env: Env,
        sender: Address,
        amount: i128,
        recipient: Address,
    ) -> Result<(), ContractError> {
        sender.require_auth();

        if amount <= 0 {
            log!(&env, "Staking: Deposit: amount must be positive, got {}", amount);
            return Err(ContractError::InvalidAmount);
        }
        check_recipient(&env, &recipient)?;

        let mut pool = Pool::load(&env);
        let staked_token = token::Client::new(&env, &pool.config.staked_token);
        let balance = staked_token.balance(&sender);
        if balance < amount {
            log!(
                &env,
                "Staking: Deposit: trying to deposit {} with a balance of {}",
                amount,
                balance
            );
            return Err(ContractError::InsufficientBalance);
        }
        let split = split_deposit(&env, &pool.config, amount)?;

        pool.sync(&env)?;

        let mut position = get_position(&env, &recipient);
        pool.catch_up(&env, &recipient, &mut position)?;
        let before = position.clone();
        if position.principal == 0 {
            position.stake_start_time = pool.now;
        }
        position.principal += split.net_amount;
        position.weight = position_weight(&env, position.principal, applied_bps(&before))?;

        let payouts = pool.settle(&env, &recipient, before.weight, position.weight)?;

        pool.total_principal += split.net_amount;
        pool.replace_position(&env, &before, &position)?;
        save_position(&env, &recipient, &position);
        pool.save(&env);

        let contract = env.current_contract_address();
        staked_token.transfer(&sender, &contract, &split.net_amount);
        if split.penalty_fee > 0 {
            staked_token.transfer(&sender, &pool.config.penalty_collector, &split.penalty_fee);
        }
        if split.treasury_fee > 0 {
            staked_token.transfer(&sender, &pool.config.treasury, &split.treasury_fee);
        }
        pay_rewards(&env, &recipient, &payouts);

        env.events().publish(("deposit", "user"), &sender);
        env.events().publish(("deposit", "recipient"), &recipient);
        env.events().publish(("deposit", "amount"), split.net_amount);
        env.events().publish(("deposit", "fee"), split.fee());

        Ok(())
    }

    fn withdraw(
        env: Env,
        sender: Address,
        amount: i128,
        recipient: Address,
    ) -> Result<(), ContractError> {
        sender.require_auth();

        let payouts = withdraw_and_harvest(&env, &sender, amount, &recipient)?;

        env.events().publish(("withdraw", "user"), &sender);
        env.events().publish(("withdraw", "recipient"), &recipient);
        env.events().publish(("withdraw", "amount"), amount);
        env.events().publish(("withdraw", "rewards"), payouts.len());

        Ok(())
    }

    fn harvest(env: Env, sender: Address, recipient: Address) -> Result<(), ContractError> {
        sender.require_auth();

        let payouts = withdraw_and_harvest(&env, &sender, 0, &recipient)?;

        env.events().publish(("harvest", "user"), &sender);
        env.events().publish(("harvest", "recipient"), &recipient);
        env.events().publish(("harvest", "rewards"), payouts.len());

        Ok(())
    }

    fn emergency_withdraw(env: Env, sender: Address) -> Result<(), ContractError> {
        sender.require_auth();

        let mut pool = Pool::load(&env);
        let position = get_position(&env, &sender);
        if position.principal == 0 {
            log!(&env, "Staking: Emergency withdraw: {} has nothing staked", sender);
            return Err(ContractError::InsufficientStake);
        }

        let weight = pool.leave(&env, &position)?;
        for token in get_known_tokens(&env).iter() {
            remove_reward_debt(&env, &sender, &token);
        }
        remove_position(&env, &sender);
        pool.total_principal -= position.principal;
        pool.total_weight -= weight;
        pool.save(&env);

        token::Client::new(&env, &pool.config.staked_token).transfer(
            &env.current_contract_address(),
            &sender,
            &position.principal,
        );

        env.events()
            .publish(("emergency_withdraw", "user"), &sender);
        env.events()
            .publish(("emergency_withdraw", "amount"), position.principal);

        Ok(())
    }

    fn add_reward_token(env: Env, sender: Address, token: Address) -> Result<(), ContractError> {
        require_admin(&env, &sender)?;

        let tokens = get_reward_tokens(&env);
        if tokens.contains(&token) {
            log!(&env, "Staking: Add reward token: {} is already registered", token);
            return Err(ContractError::AlreadyRegistered);
        }
        if tokens.len() >= MAX_REWARD_TOKENS {
            log!(
                &env,
                "Staking: Add reward token: limit of {} tokens reached",
                MAX_REWARD_TOKENS
            );
            return Err(ContractError::TooManyRewardTokens);
        }
        let known = get_known_tokens(&env);
        if !known.contains(&token) && known.len() >= MAX_KNOWN_TOKENS {
            log!(
                &env,
                "Staking: Add reward token: limit of {} distinct tokens reached",
                MAX_KNOWN_TOKENS
            );
            return Err(ContractError::TooManyRewardTokens);
        }

        let pool = Pool::load(&env);
        register_reward_token(&env, &pool, &token);

        env.events().publish(("reward_token_added", "token"), &token);

        Ok(())
    }

    fn remove_reward_token(
        env: Env,
        sender: Address,
        token: Address,
    ) -> Result<(), ContractError> {
        require_admin(&env, &sender)?;

        let mut tokens = get_reward_tokens(&env);
        let Some(index) = tokens.first_index_of(&token) else {
            log!(&env, "Staking: Remove reward token: {} is not registered", token);
            return Err(ContractError::NotRegistered);
        };
        let mut pool = Pool::load(&env);
        if tokens.len() == 1 && token == pool.config.staked_token {
            log!(
                &env,
                "Staking: Remove reward token: staked token is the only reward token"
            );
            return Err(ContractError::LastRewardToken);
        }

        // last inflow is distributed before the accumulator freezes
        pool.apply_tier_steps(&env)?;
        pool.update_reward(&env, &token)?;
        pool.save(&env);

        tokens.remove(index);
        save_reward_tokens(&env, &tokens);

        // nothing was ever distributed, so nobody holds a claim on it
        let zero = U256::from_u32(&env, 0);
        if get_accumulator(&env, &token)
            .is_some_and(|accumulator| accumulator.acc_reward_per_share == zero)
        {
            forget_known_token(&env, &token);
        }

        env.events().publish(("reward_token_removed", "token"), &token);

        Ok(())
    }

    fn set_deposit_fee_percent(
        env: Env,
        sender: Address,
        deposit_fee_percent: i128,
    ) -> Result<(), ContractError> {
        require_admin(&env, &sender)?;
        validate_deposit_fee(&env, deposit_fee_percent)?;

        let mut config = get_config(&env);
        let old_fee = config.deposit_fee_percent;
        config.deposit_fee_percent = deposit_fee_percent;
        save_config(&env, &config);

        env.events()
            .publish(("deposit_fee_updated", "old"), old_fee);
        env.events()
            .publish(("deposit_fee_updated", "new"), deposit_fee_percent);

        Ok(())
    }

    fn set_fee_collectors(
        env: Env,
        sender: Address,
        penalty_collector: Address,
        treasury: Address,
        treasury_share_bps: u32,
    ) -> Result<(), ContractError> {
        require_admin(&env, &sender)?;
        validate_treasury_share(&env, treasury_share_bps)?;

        let mut config = get_config(&env);
        config.penalty_collector = penalty_collector;
        config.treasury = treasury;
        config.treasury_share_bps = treasury_share_bps;
        save_config(&env, &config);

        env.events()
            .publish(("fee_collectors_updated", "penalty_collector"), &config.penalty_collector);
        env.events()
            .publish(("fee_collectors_updated", "treasury"), &config.treasury);
        env.events()
            .publish(("fee_collectors_updated", "treasury_share_bps"), treasury_share_bps);

        Ok(())
    }

    fn propose_admin(
        env: Env,
        new_admin: Address,
        time_limit: Option<u64>,
    ) -> Result<Address, ContractError> {
        let current_admin = get_admin(&env)?;
        current_admin.require_auth();

        if current_admin == new_admin {
            log!(&env, "Staking: Propose admin: cannot propose the current admin");
            return Err(ContractError::SameAdmin);
        }

        utils::save_pending_admin(
            &env,
            &AdminChange {
                new_admin: new_admin.clone(),
                time_limit,
            },
        );

        env.events().publish(
            ("Staking: ", "Admin replacement requested by old admin: "),
            &current_admin,
        );
        env.events()
            .publish(("Staking: ", "Replace with new admin: "), &new_admin);

        Ok(new_admin)
    }

    fn revoke_admin_change(env: Env) -> Result<(), ContractError> {
        let current_admin = get_admin(&env)?;
        current_admin.require_auth();

        if utils::get_pending_admin(&env).is_none() {
            log!(&env, "Staking: Revoke admin change: no admin change in place");
            return Err(ContractError::NoAdminChangeInPlace);
        }
        utils::remove_pending_admin(&env);

        env.events()
            .publish(("Staking: ", "Undo admin change: "), ());

        Ok(())
    }

    fn accept_admin(env: Env) -> Result<Address, ContractError> {
        let Some(change) = utils::get_pending_admin(&env) else {
            log!(&env, "Staking: Accept admin: no admin change in place");
            return Err(ContractError::NoAdminChangeInPlace);
        };
        change.new_admin.require_auth();

        if change.is_expired(env.ledger().timestamp()) {
            log!(&env, "Staking: Accept admin: admin change expired");
            return Err(ContractError::AdminChangeExpired);
        }
        let new_admin = change.new_admin;

        utils::remove_pending_admin(&env);
        utils::save_admin(&env, &new_admin);

        env.events()
            .publish(("Staking: ", "Accepted new admin: "), &new_admin);

        Ok(new_admin)
    }

    fn update_reward(env: Env, token: Address) -> Result<i128, ContractError> {
        if !get_reward_tokens(&env).contains(&token) {
            log!(&env, "Staking: Update reward: {} is not a reward token", token);
            return Err(ContractError::NotRegistered);
        }

        let mut pool = Pool::load(&env);
        pool.apply_tier_steps(&env)?;
        let distributed = pool.update_reward(&env, &token)?;
        pool.save(&env);

        env.events().publish(("update_reward", "token"), &token);
        env.events().publish(("update_reward", "amount"), distributed);

        Ok(distributed)
    }

    fn pending_reward(env: Env, user: Address, token: Address) -> Result<i128, ContractError> {
        Pool::load(&env).pending_reward(&env, &user, &token)
    }

    fn get_user_info(
        env: Env,
        user: Address,
        token: Address,
    ) -> Result<UserInfo, ContractError> {
        let position = get_position(&env, &user);
        let reward_debt = get_reward_debt(&env, &user, &token)
            .div(&U256::from_u128(&env, PRECISION))
            .to_u128()
            .ok_or_else(|| {
                log!(&env, "Staking: User info: reward debt of {} overflows", user);
                ContractError::ContractMathError
            })?;

        Ok(UserInfo {
            principal: position.principal,
            reward_debt,
        })
    }

    fn get_staking_multiplier(env: Env, user: Address) -> u32 {
        let position = get_position(&env, &user);
        if position.principal == 0 {
            return 0;
        }
        multiplier_bps(position.stake_start_time, env.ledger().timestamp())
    }

    fn is_reward_token(env: Env, token: Address) -> bool {
        get_reward_tokens(&env).contains(&token)
    }

    fn reward_tokens_length(env: Env) -> u32 {
        get_reward_tokens(&env).len()
    }

    fn query_reward_tokens(env: Env) -> Vec<Address> {
        get_reward_tokens(&env)
    }

    fn deposit_fee_percent(env: Env) -> i128 {
        get_config(&env).deposit_fee_percent
    }

    fn last_reward_balance(env: Env, token: Address) -> Result<i128, ContractError> {
        Ok(known_accumulator(&env, &token)?.last_reward_balance)
    }

    fn acc_reward_per_share(env: Env, token: Address) -> Result<U256, ContractError> {
        Ok(known_accumulator(&env, &token)?.acc_reward_per_share)
    }

    fn query_config(env: Env) -> Result<ConfigResponse, ContractError> {
        Ok(ConfigResponse {
            config: get_config(&env),
        })
    }

    fn query_admin(env: Env) -> Result<Address, ContractError> {
        get_admin(&env)
    }

    fn query_total_staked(env: Env) -> i128 {
        get_total_principal(&env)
    }

    fn query_total_weight(env: Env) -> u128 {
        get_total_weight(&env)
    }

    fn query_position(env: Env, user: Address) -> StakePosition {
        get_position(&env, &user)
    }
}

fn require_admin(env: &Env, sender: &Address) -> Result<(), ContractError> {
    sender.require_auth();
    if *sender != get_admin(env)? {
        log!(env, "Staking: {} is not authorized", sender);
        return Err(ContractError::Unauthorized);
    }
    Ok(())
}

// Tokens sent to the pool itself would be absorbed into reward accounting.
fn check_recipient(env: &Env, recipient: &Address) -> Result<(), ContractError> {
    if *recipient == env.current_contract_address() {
        log!(env, "Staking: Recipient can't be the staking contract");
        return Err(ContractError::ZeroRecipient);
    }
    Ok(())
}

// Weight of `principal` at `bps`. Fails unless the position could also reach the top
// tier.
fn position_weight(env: &Env, principal: i128, bps: u32) -> Result<u128, ContractError> {
    staking_weight(principal, MAX_MULTIPLIER_BPS)
        .and_then(|_| staking_weight(principal, bps))
        .ok_or_else(|| {
            log!(env, "Staking: Weight of principal {} overflows", principal);
            ContractError::ContractMathError
        })
}

fn known_accumulator(env: &Env, token: &Address) -> Result<RewardAccumulator, ContractError> {
    get_accumulator(env, token).ok_or_else(|| {
        log!(env, "Staking: {} was never a reward token", token);
        ContractError::NotRegistered
    })
}

/// Starts tracking `token`. A previously removed token resumes from its frozen
/// accumulator with the baseline moved to the current balance.
fn register_reward_token(env: &Env, pool: &Pool, token: &Address) {
    let balance = pool.reward_balance(env, token);
    let accumulator = match get_accumulator(env, token) {
        Some(mut accumulator) => {
            accumulator.last_reward_balance = balance;
            accumulator
        }
        None => RewardAccumulator::new(env, balance),
    };
    save_accumulator(env, token, &accumulator);

    let mut tokens = get_reward_tokens(env);
    tokens.push_back(token.clone());
    save_reward_tokens(env, &tokens);
    add_known_token(env, token);
}

fn withdraw_and_harvest(
    env: &Env,
    sender: &Address,
    amount: i128,
    recipient: &Address,
) -> Result<Vec<(Address, i128)>, ContractError> {
    if amount < 0 {
        log!(env, "Staking: Withdraw: amount can't be negative, got {}", amount);
        return Err(ContractError::InvalidAmount);
    }
    check_recipient(env, recipient)?;

    let mut pool = Pool::load(env);
    let staked = get_position(env, sender).principal;
    if amount > staked {
        log!(
            env,
            "Staking: Withdraw: trying to withdraw {} with {} staked",
            amount,
            staked
        );
        return Err(ContractError::InsufficientStake);
    }

    pool.sync(env)?;

    let mut position = get_position(env, sender);
    pool.catch_up(env, sender, &mut position)?;
    let before = position.clone();
    position.principal -= amount;
    position.weight = position_weight(env, position.principal, applied_bps(&before))?;

    let payouts = pool.settle(env, sender, before.weight, position.weight)?;

    pool.total_principal -= amount;
    pool.replace_position(env, &before, &position)?;
    if position.principal == 0 {
        remove_position(env, sender);
    } else {
        save_position(env, sender, &position);
    }
    pool.save(env);

    if amount > 0 {
        token::Client::new(env, &pool.config.staked_token).transfer(
            &env.current_contract_address(),
            recipient,
            &amount,
        );
    }
    pay_rewards(env, recipient, &payouts);

    Ok(payouts)
}

fn pay_rewards(env: &Env, recipient: &Address, payouts: &Vec<(Address, i128)>) {
    let contract = env.current_contract_address();
    for (token, amount) in payouts.iter() {
        token::Client::new(env, &token).transfer(&contract, recipient, &amount);

        env.events().publish(("reward_paid", "user"), recipient);
        env.events().publish(("reward_paid", "token"), &token);
        env.events().publish(("reward_paid", "amount"), amount);
    }
}
