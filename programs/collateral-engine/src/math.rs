//! Wide-integer helpers for 18-decimal fixed-point valuation math.
//!
//! Collateral values multiply an 18-decimal amount by a scaled feed price,
//! which overflows u128, so products go through a 256-bit intermediate.

use crate::error::EngineError;

/// 128x128 -> 256 bit widening multiply, returned as (high, low) limbs.
pub fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = (1u128 << 64) - 1;

    let a_hi = a >> 64;
    let a_lo = a & MASK;
    let b_hi = b >> 64;
    let b_lo = b & MASK;

    let lo_lo = a_lo * b_lo;
    let lo_hi = a_lo * b_hi;
    let hi_lo = a_hi * b_lo;
    let hi_hi = a_hi * b_hi;

    // Cross terms cannot carry out of u128: each partial fits in 128 bits
    // and the mid sum stays below 2^66 in its high half.
    let mid = (lo_lo >> 64) + (lo_hi & MASK) + (hi_lo & MASK);
    let low = (mid << 64) | (lo_lo & MASK);
    let high = hi_hi + (lo_hi >> 64) + (hi_lo >> 64) + (mid >> 64);

    (high, low)
}

/// Computes `a * b / denom` exactly, truncating, with a 256-bit
/// intermediate. Fails if the quotient does not fit in u128.
pub fn mul_div(a: u128, b: u128, denom: u128) -> Result<u128, EngineError> {
    if denom == 0 {
        return Err(EngineError::DivisionByZero);
    }

    let (hi, lo) = widening_mul(a, b);
    if hi == 0 {
        return Ok(lo / denom);
    }
    if hi >= denom {
        return Err(EngineError::ArithmeticOverflow);
    }

    // 256-by-128 bit restoring division. The quotient fits in 128 bits
    // because hi < denom.
    let mut quotient: u128 = 0;
    let mut rem: u128 = hi;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        if carry == 1 || rem >= denom {
            rem = rem.wrapping_sub(denom);
            quotient |= 1 << i;
        }
    }

    Ok(quotient)
}
