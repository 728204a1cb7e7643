//! Deterministic numeric kernels for PoIES.
//!
//! `-ln u` is evaluated with basic IEEE-754 operations only (no libm call),
//! so every platform computes bit-identical values. Comparisons against Θ
//! happen in micro units (value × 10⁶, rounded half away from zero).

pub const MICRO_SCALE: f64 = 1_000_000.0;

/// ln 2 to full f64 precision.
const LN_2: f64 = 0.693_147_180_559_945_3;

/// Map a digest to a uniform draw u ∈ (0,1): the big-endian integer of the
/// 64-bit prefix, with N = max(N, 1) and clamping away from both endpoints.
pub fn uniform_from_digest(digest: &[u8]) -> f64 {
    let mut prefix = [0u8; 8];
    let take = digest.len().min(8);
    prefix[..take].copy_from_slice(&digest[..take]);
    let n = u64::from_be_bytes(prefix).max(1);

    let denom = 2f64.powi(64);
    let u = n as f64 / denom;
    u.max(2.0 / denom).min(1.0 - 1.0 / denom)
}

/// `H(u) = -ln u` for u ∈ (0,1). Monotone decreasing, non-negative.
pub fn h_from_u(u: f64) -> f64 {
    debug_assert!(u > 0.0 && u < 1.0, "u must lie in (0,1)");
    -ln_deterministic(u)
}

/// Natural log over positive finite inputs, built from exponent extraction
/// and the atanh series 2·Σ z^(2k+1)/(2k+1) with z = (m−1)/(m+1). After the
/// range reduction |z| < 0.172, so 13 terms exceed f64 precision.
pub fn ln_deterministic(x: f64) -> f64 {
    assert!(x > 0.0 && x.is_finite(), "ln is defined for positive finite inputs");

    // Lift subnormals into the normal range first.
    let (x, bias) = if x < f64::MIN_POSITIVE { (x * 2f64.powi(64), -64i64) } else { (x, 0) };

    let bits = x.to_bits();
    let mut exponent = ((bits >> 52) & 0x7ff) as i64 - 1023 + bias;
    let mut mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1023u64 << 52));

    // Center the mantissa around 1 so the series converges fast.
    if mantissa > std::f64::consts::SQRT_2 {
        mantissa /= 2.0;
        exponent += 1;
    }

    let z = (mantissa - 1.0) / (mantissa + 1.0);
    let z2 = z * z;
    let mut term = z;
    let mut sum = 0.0;
    let mut k = 0u32;
    while k < 13 {
        sum += term / (2 * k + 1) as f64;
        term *= z2;
        k += 1;
    }
    exponent as f64 * LN_2 + 2.0 * sum
}

/// Scale to micro units, rounding half away from zero.
pub fn to_micro(value: f64) -> u64 {
    debug_assert!(value >= 0.0);
    (value * MICRO_SCALE + 0.5) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ln_matches_libm_within_tight_tolerance() {
        for x in [1e-12, 1e-6, 1e-3, 0.1, 0.25, 0.5, 0.75, 0.9, 1.0, 2.0, 10.0, 1e6, 1.0 - 2f64.powi(-40)] {
            let ours = ln_deterministic(x);
            let libm = x.ln();
            assert!(
                (ours - libm).abs() <= 1e-12 * libm.abs().max(1.0),
                "ln({x}) = {ours}, libm {libm}"
            );
        }
    }

    #[test]
    fn ln_is_bit_stable_across_calls() {
        let a = ln_deterministic(0.123_456_789);
        let b = ln_deterministic(0.123_456_789);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn h_is_monotone_decreasing_and_non_negative() {
        let us = [1e-9, 1e-3, 0.1, 0.5, 0.9, 0.999_999];
        let hs: Vec<f64> = us.iter().map(|&u| h_from_u(u)).collect();
        for pair in hs.windows(2) {
            assert!(pair[0] > pair[1]);
        }
        assert!(hs.iter().all(|&h| h >= 0.0));
    }

    #[test]
    fn draw_stays_in_open_interval() {
        for digest in [[0x00u8; 32], [0xffu8; 32], {
            let mut d = [0u8; 32];
            d[..8].copy_from_slice(&0x0123_4567_89ab_cdefu64.to_be_bytes());
            d
        }] {
            let u = uniform_from_digest(&digest);
            assert!(u > 0.0 && u < 1.0, "u = {u}");
        }
    }

    #[test]
    fn zero_digest_is_lifted_to_the_minimum_draw() {
        let u = uniform_from_digest(&[0u8; 32]);
        assert_eq!(u, 2.0 / 2f64.powi(64));
        // And the same bytes always map to the same draw.
        assert_eq!(u, uniform_from_digest(&[0u8; 32]));
    }

    #[test]
    fn distinct_digests_give_distinct_draws() {
        let a = uniform_from_digest(&[0x10u8; 32]);
        let b = uniform_from_digest(&[0xefu8; 32]);
        assert_ne!(a, b);
    }

    #[test]
    fn micro_rounding_rounds_to_the_nearest_unit() {
        assert_eq!(to_micro(0.0), 0);
        assert_eq!(to_micro(1.234_567_8), 1_234_568);
        assert_eq!(to_micro(1.234_567_2), 1_234_567);
        assert_eq!(to_micro(0.2), 200_000);
    }
}
