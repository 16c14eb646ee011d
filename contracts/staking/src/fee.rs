use soroban_sdk::{log, Env};
use tgt::math::mul_div_floor;

use crate::{error::ContractError, multiplier::BPS_DENOMINATOR, storage::Config};

/// `deposit_fee_percent` is a fraction with 18 decimals: `3 * 10^16` is 3%.
pub const FEE_PRECISION: i128 = 1_000_000_000_000_000_000;
/// Hard ceiling of 50%.
pub const MAX_DEPOSIT_FEE_PERCENT: i128 = FEE_PRECISION / 2;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DepositSplit {
    /// Credited to the position as principal
    pub net_amount: i128,
    pub penalty_fee: i128,
    pub treasury_fee: i128,
}

impl DepositSplit {
    pub fn fee(&self) -> i128 {
        self.penalty_fee + self.treasury_fee
    }
}

pub fn validate_deposit_fee(env: &Env, deposit_fee_percent: i128) -> Result<(), ContractError> {
    if deposit_fee_percent < 0 {
        log!(env, "Staking: Deposit fee can't be negative");
        return Err(ContractError::InvalidFee);
    }
    if deposit_fee_percent > MAX_DEPOSIT_FEE_PERCENT {
        log!(env, "Staking: Deposit fee can't be greater than 50%");
        return Err(ContractError::FeeTooHigh);
    }
    Ok(())
}

pub fn validate_treasury_share(env: &Env, treasury_share_bps: u32) -> Result<(), ContractError> {
    if treasury_share_bps > BPS_DENOMINATOR {
        log!(
            env,
            "Staking: Treasury share of {} bps exceeds 100%",
            treasury_share_bps
        );
        return Err(ContractError::InvalidBps);
    }
    Ok(())
}

/// Splits a deposit into principal and fee parts.
///
/// Both divisions floor, so rounding always favours the depositor: the fee is never
/// larger than `amount * deposit_fee_percent` and whatever the treasury share loses
/// to truncation ends up with the penalty collector.
pub fn split_deposit(env: &Env, config: &Config, amount: i128) -> Result<DepositSplit, ContractError> {
    if amount <= 0 {
        return Err(ContractError::InvalidAmount);
    }

    let fee = mul_div_floor(
        env,
        amount as u128,
        config.deposit_fee_percent as u128,
        FEE_PRECISION as u128,
    )
    .ok_or(ContractError::ContractMathError)? as i128;

    let treasury_fee = mul_div_floor(
        env,
        fee as u128,
        config.treasury_share_bps as u128,
        BPS_DENOMINATOR as u128,
    )
    .ok_or(ContractError::ContractMathError)? as i128;

    Ok(DepositSplit {
        net_amount: amount - fee,
        penalty_fee: fee - treasury_fee,
        treasury_fee,
    })
}
