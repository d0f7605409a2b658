//! Emission models for the copy number HMM
//!

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, Poisson};
use statrs::function::factorial::ln_factorial;
use statrs::function::gamma::ln_gamma;

use crate::stats_utils::variance;

/// Floor applied to ln emission probabilities
const MIN_EMISSION_LNPROB: f64 = -1e5;

/// Extra values tabulated beyond the largest observation in the negative binomial pmf table
const NB_TABLE_MARGIN: usize = 10;

const MIN_GAUSSIAN_VARIANCE: f64 = 1e-3;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize, ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum EmissionFamily {
    #[default]
    NegativeBinomial,
    Poisson,
    Gaussian,
}

/// Initial expected coverage of copy number `state` relative to the haploid coverage
///
/// State zero is given a small non-zero expectation.
///
fn get_state_scale(family: EmissionFamily, state: usize) -> f64 {
    let state = state as f64;
    match family {
        EmissionFamily::NegativeBinomial => state.max(0.1),
        EmissionFamily::Poisson => state.max(0.1) * 0.8,
        EmissionFamily::Gaussian => state.max(0.05),
    }
}

/// Tabulate the ln pmf of a negative binomial with the given moments over `0..=max_value`
///
/// Variance is raised to at least 1.2 times the mean, so that the distribution stays
/// overdispersed relative to a Poisson.
///
fn get_nb_ln_pmf_table(mean: f64, variance: f64, max_value: usize) -> Vec<f64> {
    let r = mean.max(0.1).powi(2) / (variance.max(mean * 1.2) - mean);
    let ln_p0 = -r * (1.0 + mean / r).ln();
    let ln_q = (mean / (mean + r)).ln();
    let ln_gamma_r = ln_gamma(r);
    (0..=max_value)
        .map(|x| {
            let lnp = ln_p0 + x as f64 * ln_q + ln_gamma(r + x as f64)
                - ln_factorial(x as u64)
                - ln_gamma_r;
            if lnp.is_finite() {
                lnp.max(MIN_EMISSION_LNPROB)
            } else {
                MIN_EMISSION_LNPROB
            }
        })
        .collect()
}

/// Observation rounded to a count
fn to_count(x: f64) -> u64 {
    x.round().max(0.0) as u64
}

/// Multi-sample emission distributions for every copy number state
///
/// Samples are treated as independent given the state, so the joint ln likelihood is the sum over
/// samples. All `means` are indexed as `[state][sample]`.
///
pub enum Emission {
    NegativeBinomial {
        means: Vec<Vec<f64>>,
        variances: Vec<f64>,
        max_value: usize,

        /// Indexed as `[state][sample][count]`
        ln_pmf: Vec<Vec<Vec<f64>>>,
    },
    Poisson {
        means: Vec<Vec<f64>>,
        dists: Vec<Vec<Poisson>>,
    },
    Gaussian {
        means: Vec<Vec<f64>>,
        variances: Vec<f64>,
    },
}

impl Emission {
    /// Initialize emission distributions from the haploid coverage of each sample
    ///
    /// # Arguments
    /// * `observations` - Coverage indexed as `[bin][sample]`, used to estimate per-sample
    ///   variance
    /// * `haploid_means` - Expected coverage of a single copy in each sample
    ///
    pub fn new(
        family: EmissionFamily,
        observations: &[Vec<f64>],
        haploid_means: &[f64],
        state_count: usize,
    ) -> Self {
        let means = (0..state_count)
            .map(|state| {
                let scale = get_state_scale(family, state);
                haploid_means.iter().map(|h| scale * h).collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let variances = (0..haploid_means.len())
            .map(|sample_index| {
                let x = observations.iter().map(|x| x[sample_index]).collect::<Vec<_>>();
                variance(&x)
            })
            .collect::<Vec<_>>();

        match family {
            EmissionFamily::NegativeBinomial => {
                let max_value = observations
                    .iter()
                    .flatten()
                    .map(|&x| to_count(x) as usize)
                    .max()
                    .unwrap_or(0)
                    + NB_TABLE_MARGIN;
                let mut emission = Emission::NegativeBinomial {
                    means: Vec::new(),
                    variances,
                    max_value,
                    ln_pmf: Vec::new(),
                };
                emission.set_means(means);
                emission
            }
            EmissionFamily::Poisson => {
                let mut emission = Emission::Poisson {
                    means: Vec::new(),
                    dists: Vec::new(),
                };
                emission.set_means(means);
                emission
            }
            EmissionFamily::Gaussian => Emission::Gaussian {
                means,
                variances: variances
                    .into_iter()
                    .map(|x| x.max(MIN_GAUSSIAN_VARIANCE))
                    .collect(),
            },
        }
    }

    pub fn means(&self) -> &[Vec<f64>] {
        match self {
            Emission::NegativeBinomial { means, .. } => means,
            Emission::Poisson { means, .. } => means,
            Emission::Gaussian { means, .. } => means,
        }
    }

    pub fn state_count(&self) -> usize {
        self.means().len()
    }

    /// Replace the state means, updating any derived distribution tables
    ///
    pub fn set_means(&mut self, new_means: Vec<Vec<f64>>) {
        match self {
            Emission::NegativeBinomial {
                means,
                variances,
                max_value,
                ln_pmf,
            } => {
                *ln_pmf = new_means
                    .iter()
                    .map(|state_means| {
                        state_means
                            .iter()
                            .zip(variances.iter())
                            .map(|(&mean, &var)| get_nb_ln_pmf_table(mean, var, *max_value))
                            .collect()
                    })
                    .collect();
                *means = new_means;
            }
            Emission::Poisson { means, dists } => {
                *dists = new_means
                    .iter()
                    .map(|state_means| {
                        state_means
                            .iter()
                            .map(|&mean| Poisson::new(mean).unwrap())
                            .collect()
                    })
                    .collect();
                *means = new_means;
            }
            Emission::Gaussian { means, .. } => {
                *means = new_means;
            }
        }
    }

    /// ln likelihood of a single sample's observation
    ///
    fn sample_ln_likelihood(&self, state: usize, sample_index: usize, x: f64) -> f64 {
        let lnp = match self {
            Emission::NegativeBinomial { ln_pmf, .. } => {
                let table = &ln_pmf[state][sample_index];
                table[std::cmp::min(to_count(x) as usize, table.len() - 1)]
            }
            Emission::Poisson { dists, .. } => dists[state][sample_index]
                .ln_pmf(to_count(x))
                .max(MIN_EMISSION_LNPROB),
            Emission::Gaussian { means, variances } => {
                let mean = means[state][sample_index];
                let var = variances[sample_index];
                -0.5 * (2.0 * std::f64::consts::PI * var).ln() - (x - mean).powi(2) / (2.0 * var)
            }
        };
        if lnp.is_nan() { MIN_EMISSION_LNPROB } else { lnp }
    }

    /// Joint ln likelihood of one bin's observations over all samples
    ///
    pub fn ln_likelihood(&self, state: usize, obs: &[f64]) -> f64 {
        obs.iter()
            .enumerate()
            .map(|(sample_index, &x)| self.sample_ln_likelihood(state, sample_index, x))
            .sum()
    }

    /// Best joint ln likelihood over every assignment of each sample to either `state` or
    /// `base_state`, where at least one sample is assigned to `state`
    ///
    /// Because samples are independent given their states, the best assignment puts each sample
    /// in whichever of the two states fits it better. If every sample prefers `base_state`, the
    /// sample losing the least is moved to `state`.
    ///
    /// Returns the ln likelihood and the number of samples assigned to `state`
    ///
    pub fn best_mixed_ln_likelihood(&self, state: usize, base_state: usize, obs: &[f64]) -> (f64, usize) {
        if state == base_state {
            return (self.ln_likelihood(state, obs), obs.len());
        }

        let mut lnp = 0.0;
        let mut state_sample_count = 0;
        let mut min_switch_cost = f64::INFINITY;
        for (sample_index, &x) in obs.iter().enumerate() {
            let state_lnp = self.sample_ln_likelihood(state, sample_index, x);
            let base_lnp = self.sample_ln_likelihood(base_state, sample_index, x);
            if state_lnp >= base_lnp {
                lnp += state_lnp;
                state_sample_count += 1;
            } else {
                lnp += base_lnp;
                min_switch_cost = min_switch_cost.min(base_lnp - state_lnp);
            }
        }
        if state_sample_count == 0 && !obs.is_empty() {
            lnp -= min_switch_cost;
            state_sample_count = 1;
        }
        (lnp, state_sample_count)
    }
}
