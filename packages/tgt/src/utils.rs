use soroban_sdk::{contracttype, Address};

/// Pending two-step admin handover.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdminChange {
    pub new_admin: Address,
    /// Ledger timestamp after which the proposal can no longer be accepted.
    pub time_limit: Option<u64>,
}

impl AdminChange {
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.time_limit, Some(limit) if now > limit)
    }
}
