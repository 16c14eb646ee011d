//! Fixed-point helpers on top of the host's 256-bit integers.
//!
//! Reward accounting multiplies 128-bit token amounts by a `10^24` precision
//! factor, which does not fit into `u128`. Every product here is therefore
//! computed as a [`U256`] and only narrowed back once divided.

use soroban_sdk::{Env, U256};

pub fn u256(env: &Env, value: u128) -> U256 {
    U256::from_u128(env, value)
}

pub fn zero(env: &Env) -> U256 {
    U256::from_u128(env, 0)
}

/// `floor(a * b / denominator)`, or `None` on a zero denominator or when the
/// result does not fit into `u128`.
pub fn mul_div_floor(env: &Env, a: u128, b: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    u256(env, a)
        .mul(&u256(env, b))
        .div(&u256(env, denominator))
        .to_u128()
}

/// Saturating `a - b` for unsigned 256-bit values.
pub fn saturating_sub(env: &Env, a: &U256, b: &U256) -> U256 {
    if a > b {
        a.sub(b)
    } else {
        zero(env)
    }
}

/// Narrows a non-negative 256-bit amount into a token amount.
pub fn to_i128(value: &U256) -> Option<i128> {
    value.to_u128().and_then(|v| i128::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(10, 3, 4, Some(7) ; "floors the quotient")]
    #[test_case(0, 3, 4, Some(0) ; "zero numerator")]
    #[test_case(1, 1, 0, None ; "zero denominator")]
    #[test_case(u128::MAX, 2, 2, Some(u128::MAX) ; "intermediate wider than u128")]
    #[test_case(u128::MAX, 3, 2, None ; "result wider than u128")]
    fn mul_div_floor_cases(a: u128, b: u128, denominator: u128, expected: Option<u128>) {
        let env = Env::default();
        assert_eq!(mul_div_floor(&env, a, b, denominator), expected);
    }

    #[test]
    fn saturating_sub_never_wraps() {
        let env = Env::default();
        let small = u256(&env, 5);
        let big = u256(&env, 8);

        assert_eq!(saturating_sub(&env, &big, &small), u256(&env, 3));
        assert_eq!(saturating_sub(&env, &small, &big), zero(&env));
        assert_eq!(saturating_sub(&env, &small, &small), zero(&env));
    }

    #[test]
    fn to_i128_rejects_out_of_range() {
        let env = Env::default();
        assert_eq!(to_i128(&u256(&env, 42)), Some(42));
        assert_eq!(to_i128(&u256(&env, u128::MAX)), None);
        let huge = u256(&env, u128::MAX).mul(&u256(&env, 2));
        assert_eq!(to_i128(&huge), None);
    }
}
