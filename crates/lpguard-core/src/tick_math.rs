//! Exact tick <-> square-root price conversions on the Q64.96 grid.
//!
//! Mirrors the pool contract's own TickMath: `sqrt(1.0001^tick) * 2^96`,
//! computed from precomputed 128.128 fixed-point factors so that every tick in
//! `[MIN_TICK, MAX_TICK]` maps to exactly the ratio the pool reports in `slot0`.

use alloy::primitives::U256;

use crate::error::{MathError, MathResult};

/// Lowest tick representable by the pool.
pub const MIN_TICK: i32 = -887_272;
/// Highest tick representable by the pool.
pub const MAX_TICK: i32 = 887_272;

/// `sqrt_ratio_at_tick(MIN_TICK)`.
pub const MIN_SQRT_RATIO: U256 = U256::from_limbs([4_295_128_739, 0, 0, 0]);
/// `sqrt_ratio_at_tick(MAX_TICK)`.
pub const MAX_SQRT_RATIO: U256 =
    U256::from_limbs([0x5d95_1d52_6398_8d26, 0xefd1_fc6a_5064_8849, 0xfffd_8963, 0]);

/// `sqrt(1.0001^-(2^i))` in 128.128 fixed point for i = 1..=19.
const FACTORS: [(u32, u128); 19] = [
    (0x2, 0xfff97272373d413259a46990580e213a),
    (0x4, 0xfff2e50f5f656932ef12357cf3c7fdcc),
    (0x8, 0xffe5caca7e10e4e61c3624eaa0941cd0),
    (0x10, 0xffcb9843d60f6159c9db58835c926644),
    (0x20, 0xff973b41fa98c081472e6896dfb254c0),
    (0x40, 0xff2ea16466c96a3843ec78b326b52861),
    (0x80, 0xfe5dee046a99a2a811c461f1969c3053),
    (0x100, 0xfcbe86c7900a88aedcffc83b479aa3a4),
    (0x200, 0xf987a7253ac413176f2b074cf7815e54),
    (0x400, 0xf3392b0822b70005940c7a398e4b70f3),
    (0x800, 0xe7159475a2c29b7443b29c7fa6e889d9),
    (0x1000, 0xd097f3bdfd2022b8845ad8f792aa5825),
    (0x2000, 0xa9f746462d870fdf8a65dc1f90e061e5),
    (0x4000, 0x70d869a156d2a1b890bb3df62baf32f7),
    (0x8000, 0x31be135f97d08fd981231505542fcfa6),
    (0x10000, 0x9aa508b5b7a84e1c677de54f3e99bc9),
    (0x20000, 0x5d6af8dedb81196699c329225ee604),
    (0x40000, 0x2216e584f5fa1ea926041bedfe98),
    (0x80000, 0x48a170391f7dc42444e8fa2),
];

const SQRT_1_0001_INV: u128 = 0xfffcb933bd6fad37aa2d162d1a594001;

/// Calculate `sqrt(1.0001^tick) * 2^96`, rounded up.
pub fn sqrt_ratio_at_tick(tick: i32) -> MathResult<U256> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(MathError::TickOutOfBounds(tick));
    }

    let abs_tick = tick.unsigned_abs();
    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(SQRT_1_0001_INV)
    } else {
        U256::from(1u8) << 128usize
    };

    for (bit, factor) in FACTORS {
        if abs_tick & bit != 0 {
            ratio = (ratio * U256::from(factor)) >> 128usize;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // 128.128 -> 64.96, rounding up so the result never understates the price
    let remainder = ratio % (U256::from(1u8) << 32usize);
    let rounding = if remainder.is_zero() { 0u8 } else { 1u8 };
    Ok((ratio >> 32usize) + U256::from(rounding))
}

/// Greatest tick whose sqrt ratio is `<= sqrt_price_x96`.
///
/// Inverse of [`sqrt_ratio_at_tick`] over the whole tick range.
pub fn tick_at_sqrt_ratio(sqrt_price_x96: U256) -> MathResult<i32> {
    if sqrt_price_x96 < MIN_SQRT_RATIO || sqrt_price_x96 > MAX_SQRT_RATIO {
        return Err(MathError::SqrtPriceOutOfBounds);
    }

    let mut lo = MIN_TICK;
    let mut hi = MAX_TICK;
    while lo < hi {
        // upper mid so the loop always makes progress
        let mid = lo + (hi - lo + 1) / 2;
        if sqrt_ratio_at_tick(mid)? <= sqrt_price_x96 {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Ok(lo)
}
