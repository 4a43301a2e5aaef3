//! Splitting a share `x` into `x = 3x' + x''`.
//!
//! Both halves live in the middle third `[ceil(q/3), ceil(2q/3))` of the scalar
//! field, which bounds the integer `3x' + x''` to `[q, 3q)` regardless of `x`.
use libpaillier::unknown_order::BigNumber;
use rand_core::CryptoRngCore;
use tracing::error;

use crate::{
    compat::CSCurve,
    math::{bn_to_scalar, order, scalar_to_bn},
    protocol::ProtocolError,
};

/// How many candidates [split_random] tries before giving up.
///
/// Each try succeeds with probability about 1/3, so failing this many times
/// in a row happens with probability below `2^-256`.
pub const MAX_SPLIT_ATTEMPTS: usize = 974;

/// The interval `[ceil(q/3), ceil(2q/3))`, as its two ends.
fn interval<C: CSCurve>() -> (BigNumber, BigNumber) {
    let q = order::<C>();
    let two = BigNumber::from(2u64);
    let three = BigNumber::from(3u64);
    let lo = (&q + &two) / &three;
    let hi = (&q * &two + &two) / &three;
    (lo, hi)
}

/// Check that a scalar lies in the middle third of the field.
pub fn in_middle_third<C: CSCurve>(x: &C::Scalar) -> bool {
    let (lo, hi) = interval::<C>();
    let x = scalar_to_bn::<C>(x);
    lo <= x && x < hi
}

/// Split `x` by rejection sampling.
///
/// We sample `x'` from the middle third, and keep it if `x - 3x'` lands there too.
pub fn split_random<C: CSCurve>(
    rng: &mut impl CryptoRngCore,
    x: &C::Scalar,
) -> Result<(C::Scalar, C::Scalar), ProtocolError> {
    let (lo, hi) = interval::<C>();
    let width = &hi - &lo;
    let three = C::Scalar::from(3u64);
    for _ in 0..MAX_SPLIT_ATTEMPTS {
        let x_prime = bn_to_scalar::<C>(&(&lo + BigNumber::from_rng(&width, &mut *rng)));
        let x_double_prime = *x - three * x_prime;
        if in_middle_third::<C>(&x_double_prime) {
            return Ok((x_prime, x_double_prime));
        }
    }
    error!("share splitting exhausted its attempts");
    Err(ProtocolError::AssertionFailed(
        "failed to split share".to_string(),
    ))
}

/// The valid `x''` for one wrap count `j`, i.e. with `3x' + x'' = x + j * q`.
///
/// These form an arithmetic progression with step 3, returned as its first
/// element and its length.
fn candidates(
    x: &BigNumber,
    j: u64,
    q: &BigNumber,
    lo: &BigNumber,
    hi: &BigNumber,
) -> (BigNumber, BigNumber) {
    let one = BigNumber::one();
    let three = BigNumber::from(3u64);
    let target = x + q * BigNumber::from(j);

    // x' = (target - x'') / 3 lies in [lo, hi) exactly when
    // x'' lies in [target - 3 * hi + 1, target - 3 * lo].
    let start = {
        let from_x_prime = &target - &three * hi + &one;
        if &from_x_prime > lo {
            from_x_prime
        } else {
            lo.clone()
        }
    };
    let end = {
        let from_x_prime = &target - &three * lo;
        let last = hi - &one;
        if from_x_prime < last {
            from_x_prime
        } else {
            last
        }
    };

    // x'' also needs to match target modulo 3, for x' to be an integer.
    let residue = target.nmod(&three);
    let mut first = start;
    for _ in 0..3 {
        if first.nmod(&three) == residue {
            break;
        }
        first = first + &one;
    }
    if first > end {
        return (first, BigNumber::zero());
    }
    let count = (&end - &first) / &three + &one;
    (first, count)
}

/// Split `x` without rejection sampling.
///
/// The integer `3x' + x''` equals `x + q` or `x + 2q`. For each of these, the
/// valid choices of `x''` form a progression we can describe in closed form.
/// We pick uniformly among all of them, so the output follows the same
/// distribution as [split_random], with exactly one draw of randomness.
pub fn split_deterministic<C: CSCurve>(
    rng: &mut impl CryptoRngCore,
    x: &C::Scalar,
) -> Result<(C::Scalar, C::Scalar), ProtocolError> {
    let q = order::<C>();
    let (lo, hi) = interval::<C>();
    let x_bn = scalar_to_bn::<C>(x);
    let three = BigNumber::from(3u64);

    let (first1, count1) = candidates(&x_bn, 1, &q, &lo, &hi);
    let (first2, count2) = candidates(&x_bn, 2, &q, &lo, &hi);
    let total = &count1 + &count2;
    if total == BigNumber::zero() {
        error!("no way to split share");
        return Err(ProtocolError::AssertionFailed(
            "failed to split share".to_string(),
        ));
    }

    let index = BigNumber::from_rng(&total, &mut *rng);
    let (j, x_double_prime) = if index < count1 {
        (1u64, first1 + &three * &index)
    } else {
        (2u64, first2 + &three * (&index - &count1))
    };
    let x_prime = (&x_bn + &q * BigNumber::from(j) - &x_double_prime) / &three;

    Ok((
        bn_to_scalar::<C>(&x_prime),
        bn_to_scalar::<C>(&x_double_prime),
    ))
}
