use soroban_sdk::contracttype;

use crate::storage::Config;

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigResponse {
    pub config: Config,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UserInfo {
    /// Staked amount, net of the deposit fee
    pub principal: i128,
    /// Reward debt towards the queried token in reward token units
    pub reward_debt: u128,
}
