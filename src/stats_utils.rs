//! Summary statistics shared by the segmentation engines
//!

use statrs::statistics::{Data, Median};

/// Scale factor making the median absolute deviation a consistent estimator of the standard
/// deviation for normally distributed data
const MAD_NORMAL_SCALE: f64 = 1.4826;

/// Returns NaN for empty input
pub fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

/// Unbiased sample variance, 0 for fewer than two values
pub fn variance(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return 0.0;
    }
    let m = mean(x);
    x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (x.len() - 1) as f64
}

pub fn median(x: &[f64]) -> f64 {
    Data::new(x.to_vec()).median()
}

/// Median absolute deviation scaled to estimate a normal standard deviation
///
pub fn median_abs_deviation(x: &[f64]) -> f64 {
    let center = median(x);
    let deviations = x.iter().map(|v| (v - center).abs()).collect::<Vec<_>>();
    MAD_NORMAL_SCALE * median(&deviations)
}

pub fn first_differences(x: &[f64]) -> Vec<f64> {
    x.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Indices of all finite values in `x`, in order
///
pub fn get_finite_indices(x: &[f64]) -> Vec<usize> {
    x.iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, _)| i)
        .collect()
}

pub fn select_values(x: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| x[i]).collect()
}
