use crate::{
    constants::BPS_DENOMINATOR,
    error::{Result, SettlementError},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Rounding {
    Floor,
    Ceiling,
}

/// Safe multiplication then division with configurable rounding.
///
/// Computes: (value × numerator) / denominator
/// Uses u128 intermediate to prevent overflow.
pub fn mul_div(value: u64, numerator: u64, denominator: u64, rounding: Rounding) -> Result<u64> {
    if denominator == 0 {
        return Err(SettlementError::DivisionByZero);
    }

    let product = (value as u128)
        .checked_mul(numerator as u128)
        .ok_or(SettlementError::MathOverflow)?;

    let denom = denominator as u128;
    let result = match rounding {
        Rounding::Floor => product / denom,
        Rounding::Ceiling => product.div_ceil(denom),
    };

    u64::try_from(result).map_err(|_| SettlementError::MathOverflow)
}

/// `a - b` without wrapping: two u64 magnitudes always fit in i128.
pub fn signed_sub(a: u64, b: u64) -> i128 {
    a as i128 - b as i128
}

/// Narrow a non-negative signed amount back to u64.
pub fn to_amount(value: i128) -> Result<u64> {
    u64::try_from(value).map_err(|_| SettlementError::MathOverflow)
}

/// `value × bps / 10000` in u128, never overflowing for u64 inputs.
pub fn bps_of(value: u64, bps: u64) -> u128 {
    (value as u128) * (bps as u128) / (BPS_DENOMINATOR as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_floor() {
        // 100 * 3 / 2 = 150 (floor)
        assert_eq!(mul_div(100, 3, 2, Rounding::Floor).unwrap(), 150);
        // 100 * 1 / 3 = 33 (floor)
        assert_eq!(mul_div(100, 1, 3, Rounding::Floor).unwrap(), 33);
    }

    #[test]
    fn test_mul_div_ceiling() {
        assert_eq!(mul_div(100, 3, 2, Rounding::Ceiling).unwrap(), 150);
        assert_eq!(mul_div(100, 1, 3, Rounding::Ceiling).unwrap(), 34);
    }

    #[test]
    fn test_division_by_zero() {
        let result = mul_div(100, 100, 0, Rounding::Floor);
        assert!(matches!(result, Err(SettlementError::DivisionByZero)));
    }

    #[test]
    fn test_mul_div_overflowing_result() {
        let result = mul_div(u64::MAX, 2, 1, Rounding::Floor);
        assert!(matches!(result, Err(SettlementError::MathOverflow)));
    }

    #[test]
    fn test_mul_div_large_intermediate() {
        // intermediate exceeds u64 but the quotient fits
        assert_eq!(
            mul_div(u64::MAX, u64::MAX, u64::MAX, Rounding::Floor).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn test_signed_sub_extremes() {
        assert_eq!(signed_sub(0, u64::MAX), -(u64::MAX as i128));
        assert_eq!(signed_sub(u64::MAX, 0), u64::MAX as i128);
    }

    #[test]
    fn test_to_amount_rejects_negative() {
        assert!(to_amount(-1).is_err());
        assert_eq!(to_amount(42).unwrap(), 42);
    }

    #[test]
    fn test_bps_of() {
        assert_eq!(bps_of(1_000, 100), 10);
        assert_eq!(bps_of(u64::MAX, 10_000), u64::MAX as u128);
    }
}
