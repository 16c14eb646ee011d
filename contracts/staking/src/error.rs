use soroban_sdk::contracterror;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    AlreadyInitialized = 500,
    NotInitialized = 501,
    Unauthorized = 502,
    InvalidAmount = 503,
    InsufficientBalance = 504,
    InsufficientStake = 505,
    ZeroRecipient = 506,
    AlreadyRegistered = 507,
    NotRegistered = 508,
    LastRewardToken = 509,
    TooManyRewardTokens = 510,
    FeeTooHigh = 511,
    InvalidFee = 512,
    InvalidBps = 513,
    ContractMathError = 514,
    SameAdmin = 515,
    NoAdminChangeInPlace = 516,
    AdminChangeExpired = 517,
}
