use num::{Float, NumCast};

/// Log of the sum of exponentiated values, computed without overflow
///
/// Returns negative infinity for empty input or input where every value is negative infinity.
///
pub fn ln_sum_exp<F: Float>(x: &[F]) -> F {
    let max = x.iter().copied().fold(F::neg_infinity(), F::max);
    if max == F::neg_infinity() {
        return max;
    }
    let sum = x
        .iter()
        .fold(F::zero(), |sum, &v| sum + (v - max).exp());
    max + sum.ln()
}

/// Log of the sum of two exponentiated values
///
pub fn ln_add_exp<F: Float>(a: F, b: F) -> F {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    if lo == F::neg_infinity() {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Standardize ln-transformed unnormalized prob distro input
///
/// Returns the index of the most probable component
///
pub fn normalize_ln_distro<F: Float>(x: &mut [F]) -> Option<usize> {
    let (max_index, max_p) = x
        .iter()
        .copied()
        .enumerate()
        .reduce(|a, b| if b.1 > a.1 { b } else { a })?;

    let mut sum: F = NumCast::from(0).unwrap();
    for p in x.iter_mut() {
        *p = (*p - max_p).exp();
        sum = sum + *p;
    }

    for p in x.iter_mut() {
        *p = *p / sum;
    }

    Some(max_index)
}
