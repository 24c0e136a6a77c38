//! Bit-level flush-to-zero emulation for `f32`.
//!
//! The decision is taken from the biased exponent field alone, the way an FTZ
//! unit in the arithmetic pipeline would see it. Sign and mantissa only matter
//! for recognising values that are already exact zero.

/// Mask of the 8-bit biased exponent field.
pub const EXPONENT_MASK: u32 = 0x7F80_0000;
/// Mask of the 23-bit mantissa field.
pub const MANTISSA_MASK: u32 = 0x007F_FFFF;
const EXPONENT_SHIFT: u32 = 23;

/// Returns the biased exponent field of `x` (0 for zero and denormals, 255
/// for infinities and NaN).
#[inline]
pub fn exponent_field(x: f32) -> u32 {
    (x.to_bits() & EXPONENT_MASK) >> EXPONENT_SHIFT
}

/// Returns the raw mantissa bits of `x`.
#[inline]
pub fn mantissa_field(x: f32) -> u32 {
    x.to_bits() & MANTISSA_MASK
}

/// True for `+0.0` and `-0.0`.
#[inline]
pub fn is_exact_zero(x: f32) -> bool {
    x.to_bits() & !(1 << 31) == 0
}

/// Flushes `x` to `+0.0` when its exponent field is below `threshold`.
///
/// A `threshold` of 0 disables flushing. Every value that actually gets
/// replaced bumps `flushed` by one; values that are already exact zero are
/// returned as-is and never counted, so applying this twice is a no-op the
/// second time.
#[inline(always)]
pub fn flush_to_zero(x: f32, threshold: u32, flushed: &mut u64) -> f32 {
    if threshold == 0 {
        return x;
    }
    let bits = x.to_bits();
    let exponent = (bits & EXPONENT_MASK) >> EXPONENT_SHIFT;
    if exponent < threshold && (exponent != 0 || bits & MANTISSA_MASK != 0) {
        *flushed += 1;
        0.0
    } else {
        x
    }
}

/// Flushes every element of `values` in place, returning how many were
/// replaced.
pub fn flush_slice(values: &mut [f32], threshold: u32) -> u64 {
    let mut flushed = 0u64;
    if threshold == 0 {
        return flushed;
    }
    for v in values.iter_mut() {
        *v = flush_to_zero(*v, threshold, &mut flushed);
    }
    flushed
}
