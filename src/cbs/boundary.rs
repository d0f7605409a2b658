//! Sequential stopping boundary for the permutation test
//!
//! The boundary allows the permutation loop to stop early once enough permutations have been run
//! to show that the change point will be accepted.
//!

use statrs::function::factorial::ln_binomial;

const BOUNDARY_TOL: f64 = 1e-2;

/// ln of the binomial coefficient, -inf when undefined
fn ln_choose(n: i64, k: i64) -> f64 {
    if n < 0 || k < 0 || k > n {
        f64::NEG_INFINITY
    } else {
        ln_binomial(n as u64, k as u64)
    }
}

/// Hypergeometric lower tail P(X <= k) for `draws` draws from a population of size `population`
/// containing `successes` successes
///
/// The pmf is accumulated in log space through the term ratio recurrence.
///
fn hypergeometric_cdf(k: u32, population: u32, successes: u32, draws: u32) -> f64 {
    let (population, successes, draws, k) =
        (population as i64, successes as i64, draws as i64, k as i64);
    let failures = population - successes;
    let x_min = std::cmp::max(0, draws - failures);
    let x_max = std::cmp::min(successes, draws);
    if k < x_min {
        return 0.0;
    }
    if k >= x_max {
        return 1.0;
    }

    let mut ln_pmf = ln_choose(successes, x_min) + ln_choose(failures, draws - x_min)
        - ln_choose(population, draws);
    let mut cdf = ln_pmf.exp();
    for x in x_min..k {
        ln_pmf += (((successes - x) * (draws - x)) as f64).ln()
            - (((x + 1) * (failures - draws + x + 1)) as f64).ln();
        cdf += ln_pmf.exp();
    }
    cdf.min(1.0)
}

/// Fill in the boundary for `n1s` rejections at significance level `eta0`
///
/// `level` is the slice of the boundary table reserved for this number of rejections.
///
fn eta_boundary(n_perm: u32, eta0: f64, n1s: u32, level: &mut [u32]) {
    let mut k = 0;
    for i in 1..=n_perm {
        if k >= level.len() {
            break;
        }
        if hypergeometric_cdf(k as u32, n_perm, n1s, i) <= eta0 {
            level[k] = i;
            k += 1;
        }
    }
}

/// Probability of crossing the boundary `sbdry` with `n1s` rejections out of `n_perm`
/// permutations
///
fn p_exceed(n_perm: u32, n1s: u32, sbdry: &[u32]) -> f64 {
    let n_perm = n_perm as i64;
    let n1s = n1s as i64;
    let s = |i: usize| sbdry[i] as i64;
    let ln = |x: i64| (x as f64).ln();
    let ln2 = 2.0f64.ln();

    let dlcnk = ln_choose(n_perm, n1s);
    let mut p = (ln_choose(n_perm - s(0), n1s) - dlcnk).exp();
    if n1s >= 2 {
        p += (ln(s(0)) + ln_choose(n_perm - s(1), n1s - 1) - dlcnk).exp();
    }
    if n1s >= 3 {
        let lnc = ln_choose(n_perm - s(2), n1s - 2);
        p += (ln(s(0)) + ln(s(0) - 1) - ln2 + lnc - dlcnk).exp();
        p += (ln(s(0)) + ln(s(1) - s(0)) + lnc - dlcnk).exp();
    }
    for i in 4..=n1s {
        let iu = i as usize;
        let n1 = s(iu - 4);
        let n2 = s(iu - 3);
        let n3 = s(iu - 2);
        let lnc = ln_choose(n_perm - s(iu - 1), n1s - i + 1);
        p += (ln_choose(n1, i - 1) + lnc - dlcnk).exp();
        p += (ln_choose(n1, i - 2) + ln(n3 - n1) + lnc - dlcnk).exp();
        p += (ln_choose(n1, i - 3) + ln(n2 - n1) + ln(n3 - n2) + lnc - dlcnk).exp();
        p += (ln_choose(n1, i - 3) + ln(n2 - n1) - ln2 + ln(n2 - n1 - 1) + lnc - dlcnk).exp();
    }
    p
}

/// Compute the sequential stopping boundary for the permutation test
///
/// The boundary is stored as a triangular table: for `j` rejections (1-based) the `j` entries
/// starting at index `j*(j-1)/2` give the number of permutations after which the test can stop
/// with `0..j` rejections observed.
///
/// # Arguments
/// * `n_perm` - Number of permutations
/// * `alpha` - Significance level of the change point test
/// * `eta` - Type I error rate of the early stopping rule
///
pub fn compute_boundary(n_perm: u32, alpha: f64, eta: f64) -> Vec<u32> {
    let max_ones = (n_perm as f64 * alpha).floor() as usize + 1;
    let mut sbdry = vec![0u32; max_ones * (max_ones + 1) / 2];
    sbdry[0] = n_perm - (n_perm as f64 * eta) as u32;

    let mut eta0 = eta;
    let mut offset = 0;
    for j in 2..=max_ones {
        let level_start = offset + 1;
        let level = &mut sbdry[level_start..level_start + j];
        let n1s = j as u32;

        let mut eta_hi = eta0 * 1.1;
        eta_boundary(n_perm, eta_hi, n1s, level);
        let mut p_hi = p_exceed(n_perm, n1s, level);

        let mut eta_lo = eta0 * 0.25;
        eta_boundary(n_perm, eta_lo, n1s, level);
        let mut p_lo = p_exceed(n_perm, n1s, level);

        while (eta_hi - eta_lo) / eta_lo > BOUNDARY_TOL {
            eta0 = eta_lo + (eta_hi - eta_lo) * (eta - p_lo) / (p_hi - p_lo);
            eta_boundary(n_perm, eta0, n1s, level);
            let p_excd = p_exceed(n_perm, n1s, level);
            if p_excd > eta {
                eta_hi = eta0;
                p_hi = p_excd;
            } else {
                eta_lo = eta0;
                p_lo = p_excd;
            }
        }
        offset += j;
    }
    sbdry
}
