use log::debug;

use super::emission::Emission;
use crate::prob_utils::{ln_add_exp, ln_sum_exp, normalize_ln_distro};

/// Prior probability of staying in the same copy number state between adjacent bins
const SELF_TRANSITION_PROB: f64 = 0.99;

/// Copy number state of samples without a copy number change
const DIPLOID_STATE: usize = 2;

/// Floor on refined state means, keeping the emission distributions well defined
const MIN_STATE_MEAN: f64 = 0.1;

/// Get ln transition probs between all states as `[from_state][to_state]`
///
fn get_transition_lnprobs(state_count: usize) -> Vec<Vec<f64>> {
    let change_prob = if state_count > 1 {
        (1.0 - SELF_TRANSITION_PROB) / (state_count - 1) as f64
    } else {
        0.0
    };
    (0..state_count)
        .map(|from_state| {
            (0..state_count)
                .map(|to_state| {
                    if from_state == to_state {
                        if state_count > 1 {
                            SELF_TRANSITION_PROB.ln()
                        } else {
                            0.0
                        }
                    } else {
                        change_prob.ln()
                    }
                })
                .collect()
        })
        .collect()
}

fn max_index<T: std::cmp::PartialOrd>(x: &[T]) -> usize {
    assert!(!x.is_empty());
    let mut mi = 0;
    for i in 1..x.len() {
        if x[i] > x[mi] {
            mi = i;
        }
    }
    mi
}

/// Backtrace to get viterbi parse
fn get_backtrace(last_row: &[f64], back_pointer: &[Vec<u8>]) -> Vec<u8> {
    let mut max_state = max_index(last_row);

    let obs_count = back_pointer.len();
    let mut max_path: Vec<u8> = vec![0; obs_count];
    for obs_index in (0..obs_count).rev() {
        max_path[obs_index] = max_state as u8;
        max_state = back_pointer[obs_index][max_state] as usize;
    }
    max_path
}

/// Copy number HMM over the bins of one chromosome
///
/// All probabilities are tracked in log space. Observations are indexed as `[bin][sample]`.
///
pub struct HiddenMarkovModel {
    ln_init: Vec<f64>,
    ln_transition: Vec<Vec<f64>>,
    emission: Emission,
}

impl HiddenMarkovModel {
    /// Create a model with a uniform initial state distribution
    pub fn new(emission: Emission) -> Self {
        let state_count = emission.state_count();
        assert!(state_count > 0 && state_count <= u8::MAX as usize);
        Self {
            ln_init: vec![-(state_count as f64).ln(); state_count],
            ln_transition: get_transition_lnprobs(state_count),
            emission,
        }
    }

    pub fn state_count(&self) -> usize {
        self.ln_init.len()
    }

    /// Emission ln probability for every bin and state, as `[bin][state]`
    ///
    fn get_emission_lnprobs(&self, observations: &[Vec<f64>]) -> Vec<Vec<f64>> {
        observations
            .iter()
            .map(|obs| {
                (0..self.state_count())
                    .map(|state| self.emission.ln_likelihood(state, obs))
                    .collect()
            })
            .collect()
    }

    /// Posterior state probabilities for each bin, as `[bin][state]`
    ///
    /// Also returns the ln likelihood of all observations under the current model.
    ///
    #[allow(clippy::needless_range_loop)]
    fn forward_backward(&self, observations: &[Vec<f64>]) -> (Vec<Vec<f64>>, f64) {
        let obs_count = observations.len();
        let state_count = self.state_count();
        let emit = self.get_emission_lnprobs(observations);

        let mut forward = vec![vec![0.0; state_count]; obs_count];
        for state_index in 0..state_count {
            forward[0][state_index] = self.ln_init[state_index] + emit[0][state_index];
        }
        for obs_index in 1..obs_count {
            for to_state_index in 0..state_count {
                let lnprob = (0..state_count)
                    .map(|from_state_index| {
                        forward[obs_index - 1][from_state_index]
                            + self.ln_transition[from_state_index][to_state_index]
                    })
                    .fold(f64::NEG_INFINITY, ln_add_exp);
                forward[obs_index][to_state_index] = lnprob + emit[obs_index][to_state_index];
            }
        }

        let mut backward = vec![vec![0.0; state_count]; obs_count];
        for obs_index in (0..obs_count.saturating_sub(1)).rev() {
            for from_state_index in 0..state_count {
                backward[obs_index][from_state_index] = (0..state_count)
                    .map(|to_state_index| {
                        self.ln_transition[from_state_index][to_state_index]
                            + emit[obs_index + 1][to_state_index]
                            + backward[obs_index + 1][to_state_index]
                    })
                    .fold(f64::NEG_INFINITY, ln_add_exp);
            }
        }

        let ln_likelihood = ln_sum_exp(&forward[obs_count - 1]);

        let gamma = forward
            .into_iter()
            .zip(backward)
            .map(|(f, b)| {
                let mut gamma = f.iter().zip(b.iter()).map(|(x, y)| x + y).collect::<Vec<_>>();
                normalize_ln_distro(&mut gamma);
                gamma
            })
            .collect();
        (gamma, ln_likelihood)
    }

    /// Refine the emission state means by expectation maximization
    ///
    /// Only the means are updated. States with a total posterior weight below one bin keep their
    /// current means. Iteration stops when the relative improvement in ln likelihood falls below
    /// `tolerance`.
    ///
    /// Returns the number of iterations run
    ///
    pub fn refine_means(
        &mut self,
        observations: &[Vec<f64>],
        max_iterations: usize,
        tolerance: f64,
    ) -> usize {
        if observations.is_empty() {
            return 0;
        }
        let sample_count = observations[0].len();

        let mut last_ln_likelihood = None;
        for iteration in 0..max_iterations {
            let (gamma, ln_likelihood) = self.forward_backward(observations);

            if let Some(last) = last_ln_likelihood
                && (ln_likelihood - last) <= tolerance * f64::abs(last)
            {
                debug!("Mean refinement converged after {iteration} iterations");
                return iteration;
            }
            last_ln_likelihood = Some(ln_likelihood);

            let mut new_means = self.emission.means().to_vec();
            for (state_index, state_means) in new_means.iter_mut().enumerate() {
                let weight = gamma.iter().map(|x| x[state_index]).sum::<f64>();
                if weight < 1.0 {
                    continue;
                }
                for sample_index in 0..sample_count {
                    let weighted_sum = gamma
                        .iter()
                        .zip(observations.iter())
                        .map(|(g, obs)| g[state_index] * obs[sample_index])
                        .sum::<f64>();
                    state_means[sample_index] = (weighted_sum / weight).max(MIN_STATE_MEAN);
                }
            }
            self.emission.set_means(new_means);
        }
        max_iterations
    }

    /// ln probability of moving from `from_state` into `to_state` when only `state_sample_count` of
    /// `sample_count` samples take `to_state` and the rest stay diploid
    ///
    /// The transition probability is averaged over samples.
    ///
    fn get_mixed_transition_lnprob(
        &self,
        from_state: usize,
        to_state: usize,
        state_sample_count: usize,
        sample_count: usize,
    ) -> f64 {
        if state_sample_count == sample_count {
            return self.ln_transition[from_state][to_state];
        }
        let state_fraction = state_sample_count as f64 / sample_count as f64;
        (state_fraction * self.ln_transition[from_state][to_state].exp()
            + (1.0 - state_fraction) * self.ln_transition[from_state][DIPLOID_STATE].exp())
        .ln()
    }

    /// Most likely state path over all bins
    ///
    /// With multiple samples, each state is scored against its best assignment of every sample to
    /// either that state or the diploid state, so that a copy number change carried by only some
    /// samples is still segmented. The label of each bin is the non-diploid state of its best
    /// assignment.
    ///
    #[allow(clippy::needless_range_loop)]
    pub fn viterbi(&self, observations: &[Vec<f64>]) -> Vec<u8> {
        let obs_count = observations.len();
        if obs_count == 0 {
            return Vec::new();
        }
        let state_count = self.state_count();
        let sample_count = observations[0].len();
        let is_mixed = sample_count > 1 && state_count > DIPLOID_STATE;

        // Emission ln probability and number of samples assigned to the state
        let get_emission = |state_index: usize, obs: &[f64]| {
            if is_mixed {
                self.emission
                    .best_mixed_ln_likelihood(state_index, DIPLOID_STATE, obs)
            } else {
                (self.emission.ln_likelihood(state_index, obs), sample_count)
            }
        };

        // Instead of having a full SxO DP matrix, just ping-pong on two rows
        let mut max_pr_row1 = vec![0.0; state_count];
        let mut max_pr_row2 = vec![0.0; state_count];

        let mut back_pointer = vec![vec![0u8; state_count]; obs_count];

        for state_index in 0..state_count {
            max_pr_row1[state_index] =
                self.ln_init[state_index] + get_emission(state_index, &observations[0]).0;
        }

        let this_row = &mut max_pr_row1;
        let last_row = &mut max_pr_row2;
        for obs_index in 1..obs_count {
            std::mem::swap(this_row, last_row);
            for (to_state_index, row_value) in this_row.iter_mut().enumerate() {
                let (emit_lnprob, state_sample_count) =
                    get_emission(to_state_index, &observations[obs_index]);

                let mut max_index = 0;
                let mut max_lnprob = 0.0;
                for from_state_index in 0..state_count {
                    let lnprob = last_row[from_state_index]
                        + self.get_mixed_transition_lnprob(
                            from_state_index,
                            to_state_index,
                            state_sample_count,
                            sample_count,
                        )
                        + emit_lnprob;

                    if (from_state_index == 0) || (lnprob > max_lnprob) {
                        max_index = from_state_index;
                        max_lnprob = lnprob;
                    }
                }

                *row_value = max_lnprob;
                back_pointer[obs_index][to_state_index] = max_index as u8;
            }
        }

        get_backtrace(this_row, &back_pointer)
    }
}
