#![no_std]
mod contract;
mod distribution;
mod error;
mod fee;
mod msg;
mod multiplier;
mod schedule;
mod storage;

pub use contract::{Staking, StakingClient};
pub use error::ContractError;
