//! Unbalanced Haar wavelet decomposition
//!
//! Implements the top-down decomposition of Fryzlewicz (2007), where each wavelet is chosen to
//! maximize its inner product with the data over its support.
//!

/// One unbalanced Haar wavelet in the decomposition tree
///
/// Positions are 1-based and inclusive: the wavelet is supported on `[start, end]`, and is
/// positive on `[start, bp]` and negative on `[bp+1, end]`.
///
#[derive(Clone, Debug)]
struct HaarNode {
    coef: f64,
    start: usize,
    bp: usize,
    end: usize,
}

impl HaarNode {
    fn len(&self) -> usize {
        self.end + 1 - self.start
    }
}

/// Inner products of `x` with all `n-1` unbalanced Haar vectors of length `n`
///
/// Entry `m` corresponds to the vector with a breakpoint after the first `m+1` elements.
///
fn get_inner_products(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let rn = n as f64;
    let mut i_plus = vec![0.0; n - 1];
    let mut i_minus = vec![0.0; n - 1];

    i_plus[0] = (1.0 - 1.0 / rn).sqrt() * x[0];
    i_minus[0] = x[1..].iter().sum::<f64>() / (rn * (rn - 1.0)).sqrt();

    for m in 1..(n - 1) {
        let rm = m as f64;
        let factor = ((rn - rm - 1.0) * rm / (rm + 1.0) / (rn - rm)).sqrt();
        i_plus[m] = i_plus[m - 1] * factor + x[m] * (1.0 / (rm + 1.0) - 1.0 / rn).sqrt();
        i_minus[m] = i_minus[m - 1] / factor - x[m] / (rn * rn / (rm + 1.0) - rn).sqrt();
    }

    i_plus
        .iter()
        .zip(i_minus.iter())
        .map(|(p, m)| p - m)
        .collect()
}

/// 1-based breakpoint of the unbalanced Haar vector with the largest absolute inner product
///
/// Ties are resolved to the median tied position.
///
fn get_max_inner_product_bp(inner_products: &[f64]) -> usize {
    let max_abs = inner_products
        .iter()
        .map(|x| x.abs())
        .fold(0.0, f64::max);
    let tied_bps = inner_products
        .iter()
        .enumerate()
        .filter(|(_, x)| x.abs() == max_abs)
        .map(|(i, _)| i + 1)
        .collect::<Vec<_>>();
    tied_bps[(tied_bps.len() - 1) / 2]
}

/// Find the best wavelet over the 1-based inclusive range `[start, end]` of `x`
fn get_node(x: &[f64], start: usize, end: usize) -> HaarNode {
    let inner_products = get_inner_products(&x[(start - 1)..end]);
    let local_bp = get_max_inner_product_bp(&inner_products);
    HaarNode {
        coef: inner_products[local_bp - 1],
        start,
        bp: start + local_bp - 1,
        end,
    }
}

/// Build the full decomposition tree of `x`, one node list per scale
///
/// `x` must contain at least 2 values.
///
fn get_decomposition(x: &[f64]) -> Vec<Vec<HaarNode>> {
    let mut tree = vec![vec![get_node(x, 1, x.len())]];

    // Continue while any wavelet at the current scale spans more than 2 values
    while let Some(level) = tree.last().filter(|level| level.iter().any(|node| node.len() > 2)) {
        let mut next_level = Vec::new();
        for node in level.iter() {
            if node.bp > node.start {
                next_level.push(get_node(x, node.start, node.bp));
            }
            if node.end >= node.bp + 2 {
                next_level.push(get_node(x, node.bp + 1, node.end));
            }
        }
        tree.push(next_level);
    }
    tree
}

/// Zero all coefficients at or below the universal threshold `sigma * sqrt(2 ln n)`
///
fn hard_threshold(tree: &mut [Vec<HaarNode>], sigma: f64, n: usize) {
    let threshold = sigma * (2.0 * (n as f64).ln()).sqrt();
    for node in tree.iter_mut().flatten() {
        if node.coef.abs() <= threshold {
            node.coef = 0.0;
        }
    }
}

fn reconstruct(tree: &[Vec<HaarNode>], smooth: f64, n: usize) -> Vec<f64> {
    let mut rec = vec![smooth / (n as f64).sqrt(); n];
    for node in tree.iter().flatten() {
        let node_len = node.len() as f64;
        let m = (node.bp + 1 - node.start) as f64;
        let val1 = (1.0 / m - 1.0 / node_len).sqrt();
        let val2 = -1.0 / (node_len * node_len / m - node_len).sqrt();
        for i in (node.start - 1)..node.bp {
            rec[i] += val1 * node.coef;
        }
        for i in node.bp..node.end {
            rec[i] += val2 * node.coef;
        }
    }
    rec
}

/// Find breakpoints in `x` from its thresholded unbalanced Haar decomposition
///
/// Returns breakpoints as indices into `x`, starting with 0.
///
/// # Arguments
/// * `sigma` - Noise level used to set the coefficient threshold
///
pub fn get_haar_breakpoints(x: &[f64], sigma: f64) -> Vec<usize> {
    let n = x.len();
    if n < 2 || x.iter().all(|&v| v == x[0]) {
        return vec![0];
    }

    let mut tree = get_decomposition(x);
    hard_threshold(&mut tree, sigma, n);

    let smooth = x.iter().sum::<f64>() / (n as f64).sqrt();
    let rec = reconstruct(&tree, smooth, n);

    std::iter::once(0)
        .chain((1..n).filter(|&i| rec[i] != rec[i - 1]))
        .collect()
}
