//! Maximal t-statistic searches over observed and permuted data
//!
//! Positions in this module follow the partial sum convention: position `i` (1-based) refers to the
//! partial sum `x[0] + ... + x[i-1]`, stored at `sx[i-1]`.
//!

use rand::Rng;
use rand::seq::SliceRandom;

/// The best arc found over the observed data
///
/// The arc spans partial sum positions `(start, end]`, splitting the data into `[0, start)`,
/// `[start, end)` and `[end, n)` in 0-based terms.
///
#[derive(Debug)]
pub struct MaxArc {
    pub stat: f64,
    pub start: usize,
    pub end: usize,
}

fn continuity_square(x: f64, is_binary: bool) -> f64 {
    if is_binary {
        (x - 0.5).powi(2)
    } else {
        x * x
    }
}

/// Between-segment sum of squares for an arc of length `rj` with partial sum difference `psdiff`
fn arc_bss(rn: f64, rj: f64, psdiff: f64, is_binary: bool) -> f64 {
    rn / (rj * (rn - rj)) * continuity_square(psdiff, is_binary)
}

/// Convert a between-segment sum of squares into a t-statistic like value
fn normalize_bss(bss: f64, tss: f64, rn: f64, is_binary: bool) -> f64 {
    if is_binary {
        let tss = if tss <= 0.0001 { 1.0 } else { tss };
        bss / (tss / rn)
    } else {
        let tss = if tss <= bss + 0.0001 { bss + 1.0 } else { tss };
        bss / ((tss - bss) / (rn - 2.0))
    }
}

/// 1-based end position of each block
fn get_block_boundaries(n: usize, block_count: usize) -> Vec<usize> {
    let rn = n as f64;
    (0..block_count)
        .map(|i| (rn * ((i + 1) as f64 / block_count as f64)).round_ties_even() as usize)
        .collect()
}

struct BlockPartialSums {
    boundaries: Vec<usize>,
    min: Vec<f64>,
    max: Vec<f64>,
    min_pos: Vec<usize>,
    max_pos: Vec<usize>,
}

impl BlockPartialSums {
    /// 1-based start position of block `b`
    fn block_start(&self, b: usize) -> usize {
        if b == 0 { 1 } else { self.boundaries[b - 1] + 1 }
    }
}

/// Fill `sx` with the partial sums of `x`, recording the extreme partial sums within each block
///
fn get_block_partial_sums(x: &[f64], sx: &mut [f64], boundaries: Vec<usize>) -> BlockPartialSums {
    let block_count = boundaries.len();
    let mut blocks = BlockPartialSums {
        boundaries,
        min: Vec::with_capacity(block_count),
        max: Vec::with_capacity(block_count),
        min_pos: Vec::with_capacity(block_count),
        max_pos: Vec::with_capacity(block_count),
    };

    let mut psum = 0.0;
    let mut ilo = 1;
    for &ihi in blocks.boundaries.iter() {
        sx[ilo - 1] = psum + x[ilo - 1];
        let mut psmin = sx[ilo - 1];
        let mut psmax = psmin;
        let mut ipsmin = ilo;
        let mut ipsmax = ilo;
        for i in (ilo + 1)..=ihi {
            sx[i - 1] = sx[i - 2] + x[i - 1];
            if sx[i - 1] < psmin {
                psmin = sx[i - 1];
                ipsmin = i;
            }
            if sx[i - 1] > psmax {
                psmax = sx[i - 1];
                ipsmax = i;
            }
        }
        blocks.min.push(psmin);
        blocks.max.push(psmax);
        blocks.min_pos.push(ipsmin);
        blocks.max_pos.push(ipsmax);
        psum = sx[ihi - 1];
        ilo = ihi + 1;
    }
    blocks
}

/// Largest absolute partial sum difference over arcs of length `i2j` which start in block
/// `[ilo, ihi]` and end in block `[jlo, jhi]`
///
/// Returns the sum and the arc start position.
///
fn get_max_arc_sum(sx: &[f64], ilo: i64, ihi: i64, jlo: i64, jhi: i64, i2j: i64) -> (f64, i64) {
    let ixlo = std::cmp::max(0, jlo - ilo - i2j);
    let ixhi = std::cmp::max(0, ihi + i2j - jhi);
    let mut sxmx = 0.0;
    let mut sxmxi = ilo + ixlo - 1;
    for i in (ilo + ixlo)..=(ihi - ixhi) {
        let j = i + i2j;
        let absx = (sx[(j - 1) as usize] - sx[(i - 1) as usize]).abs();
        if sxmx < absx {
            sxmx = absx;
            sxmxi = i;
        }
    }
    (sxmx, sxmxi)
}

struct BlockPairCandidate {
    bound: f64,
    block_bss: f64,
    bi: usize,
    bj: usize,
    alen: i64,
}

/// Exact maximal arc search, pruning block pairs which cannot improve on the current best
///
/// Returns the unnormalized between-segment sum of squares of the best arc and its positions.
///
#[allow(clippy::needless_range_loop)]
fn search_max_arc(x: &[f64], sx: &mut [f64], al0: usize, is_binary: bool) -> (f64, usize, usize) {
    let n = x.len();
    let rn = n as f64;
    let block_count = if n >= 50 {
        rn.sqrt().round_ties_even() as usize
    } else {
        1
    };
    let blocks = get_block_partial_sums(x, sx, get_block_boundaries(n, block_count));

    let mut psmin0 = 0.0;
    let mut psmax0 = 0.0;
    let mut ipsmin0 = n;
    let mut ipsmax0 = n;
    for b in 0..block_count {
        if blocks.min[b] < psmin0 {
            psmin0 = blocks.min[b];
            ipsmin0 = blocks.min_pos[b];
        }
        if blocks.max[b] > psmax0 {
            psmax0 = blocks.max[b];
            ipsmax0 = blocks.max_pos[b];
        }
    }

    let psdiff = psmax0 - psmin0;
    let mut tmaxi = std::cmp::min(ipsmax0, ipsmin0);
    let mut tmaxj = std::cmp::max(ipsmax0, ipsmin0);

    // All-constant input
    if psdiff <= 0.0 || ipsmax0 == ipsmin0 {
        return (0.0, tmaxi, tmaxj);
    }

    let mut bssmax = arc_bss(rn, ipsmax0.abs_diff(ipsmin0) as f64, psdiff, is_binary);

    let n = n as i64;
    let nal0 = n - al0 as i64;
    let rnov2 = rn / 2.0;
    let block_range = |b: usize| (blocks.block_start(b) as i64, blocks.boundaries[b] as i64);

    // For each block pair, bound the statistic achievable by arcs starting in block i and
    // ending in block j, and keep the pairs which could beat the global extreme arc
    let mut candidates = Vec::new();
    for bi in 0..block_count {
        for bj in bi..block_count {
            let (ilo, ihi) = block_range(bi);
            let (jlo, jhi) = block_range(bj);
            let alenhi = std::cmp::min(jhi - ilo, nal0);
            let alenlo = std::cmp::max(if bi == bj { 1 } else { jlo - ihi }, al0 as i64);
            let rjhi = alenhi as f64;
            let rjlo = alenlo as f64;

            let sij1 = (blocks.max[bj] - blocks.min[bi]).abs();
            let sij2 = (blocks.max[bi] - blocks.min[bj]).abs();
            let bound = rn / (rjlo * (rn - rjlo)).min(rjhi * (rn - rjhi))
                * continuity_square(sij1.max(sij2), is_binary);

            if bssmax <= bound {
                let (sij, alen) = if sij1 > sij2 {
                    (sij1, blocks.max_pos[bj].abs_diff(blocks.min_pos[bi]))
                } else {
                    (sij2, blocks.min_pos[bj].abs_diff(blocks.max_pos[bi]))
                };
                candidates.push(BlockPairCandidate {
                    bound,
                    block_bss: arc_bss(rn, alen as f64, sij, is_binary),
                    bi,
                    bj,
                    alen: alen as i64,
                });
            }
        }
    }

    candidates.sort_by(|a, b| a.block_bss.total_cmp(&b.block_bss));

    let mut update_best = |sxmx: f64, sxmxi: i64, i2j: i64, bssmax: &mut f64| {
        let bijbss = arc_bss(rn, i2j as f64, sxmx, is_binary);
        if bijbss > *bssmax {
            *bssmax = bijbss;
            tmaxi = sxmxi as usize;
            tmaxj = (sxmxi + i2j) as usize;
        }
    };

    for candidate in candidates.iter().rev() {
        if bssmax > candidate.bound {
            continue;
        }
        let (ilo, ihi) = block_range(candidate.bi);
        let (jlo, jhi) = block_range(candidate.bj);
        let alenhi = std::cmp::min(jhi - ilo, nal0);
        let alenlo = std::cmp::max(
            if candidate.bi == candidate.bj { 1 } else { jlo - ihi },
            al0 as i64,
        );
        let rjhi = alenhi as f64;
        let rjlo = alenlo as f64;

        let mut alenmax = candidate.alen;
        if alenmax > n - alenmax {
            alenmax = n - alenmax;
        }

        // Short arcs scan up from the shortest length, long arcs scan down from the longest
        if rjlo <= rnov2 && alenlo <= alenmax {
            for i2j in alenlo..=alenmax {
                let (sxmx, sxmxi) = get_max_arc_sum(sx, ilo, ihi, jlo, jhi, i2j);
                update_best(sxmx, sxmxi, i2j, &mut bssmax);
            }
        }
        alenmax = n - alenmax;
        if rjhi >= rnov2 && alenhi >= alenmax {
            for i2j in (alenmax..=alenhi).rev() {
                let (sxmx, sxmxi) = get_max_arc_sum(sx, ilo, ihi, jlo, jhi, i2j);
                update_best(sxmx, sxmxi, i2j, &mut bssmax);
            }
        }
    }

    (bssmax, tmaxi, tmaxj)
}

/// Find the arc maximizing the t-statistic over the observed data
///
/// # Arguments
/// * `x` - Centered data
/// * `tss` - Total sum of squares of `x`
/// * `sx` - Scratch space for partial sums, at least as long as `x`
/// * `al0` - Minimum arc length
///
pub fn max_arc_observed(x: &[f64], tss: f64, sx: &mut [f64], al0: usize, is_binary: bool) -> MaxArc {
    let (bss, start, end) = search_max_arc(x, sx, al0, is_binary);
    MaxArc {
        stat: normalize_bss(bss, tss, x.len() as f64, is_binary),
        start,
        end,
    }
}

/// Maximal t-statistic over all arcs of permuted data
///
pub fn max_arc_stat_permuted(px: &[f64], tss: f64, sx: &mut [f64], al0: usize, is_binary: bool) -> f64 {
    let (bss, _, _) = search_max_arc(px, sx, al0, is_binary);
    normalize_bss(bss, tss, px.len() as f64, is_binary)
}

/// Maximal t-statistic over arcs no longer than `k` in permuted data
///
/// Arcs are searched within blocks of size `k`, across adjacent block boundaries, and across the
/// end of the circularized data.
///
pub fn max_short_arc_stat_permuted(
    k: usize,
    tss: f64,
    px: &[f64],
    sx: &mut [f64],
    al0: usize,
    is_binary: bool,
) -> f64 {
    let n = px.len();
    let rn = n as f64;
    let k = std::cmp::min(k, n - 1);
    let block_count = std::cmp::max(n / k, 1);
    let blocks = get_block_partial_sums(px, sx, get_block_boundaries(n, block_count));
    let sx = &*sx;

    let mut max_bss = 0.0f64;
    for b in 0..block_count {
        let i = blocks.min_pos[b].abs_diff(blocks.max_pos[b]);
        if i <= k && i >= al0 {
            let bss = arc_bss(rn, i as f64, blocks.max[b] - blocks.min[b], is_binary);
            max_bss = max_bss.max(bss);
        }
    }

    // Scan arc lengths from al0 up to k, until the bound from `psdiff` can no longer improve the
    // current maximum
    let scan_arcs = |psdiff: f64, max_bss: &mut f64, arc_sum: &dyn Fn(usize) -> f64| {
        let psdiffsq = continuity_square(psdiff, is_binary);
        for j in al0..=k {
            let rj = j as f64;
            let rnjov1 = rn / (rj * (rn - rj));
            if rnjov1 * psdiffsq < *max_bss {
                break;
            }
            let bss = rnjov1 * continuity_square(arc_sum(j), is_binary);
            *max_bss = max_bss.max(bss);
        }
    };

    // Max arc sum of length j with 1-based start positions in [lo, hi]
    let range_arc_sum = |lo: i64, hi: i64, j: usize| -> f64 {
        let j = j as i64;
        (lo..=hi)
            .map(|i| (sx[(i + j - 1) as usize] - sx[(i - 1) as usize]).abs())
            .fold(0.0, f64::max)
    };

    // First block
    let ihi = blocks.boundaries[0] as i64;
    scan_arcs(blocks.max[0] - blocks.min[0], &mut max_bss, &|j| {
        range_arc_sum(1, ihi - j as i64, j)
    });

    // Arcs spanning the end
    let last = block_count - 1;
    let psdiff = (blocks.max[0] - blocks.min[last])
        .abs()
        .max((blocks.max[last] - blocks.min[0]).abs());
    scan_arcs(psdiff, &mut max_bss, &|j| {
        let nmj = n - j;
        (0..j)
            .map(|i| (sx[i + nmj] - sx[i]).abs())
            .fold(0.0, f64::max)
    });

    // Remaining blocks, and arcs spanning each block's left boundary
    for l in 1..block_count {
        let ilo = blocks.block_start(l) as i64;
        let ihi = blocks.boundaries[l] as i64;
        scan_arcs(blocks.max[l] - blocks.min[l], &mut max_bss, &|j| {
            range_arc_sum(ilo, ihi - j as i64, j)
        });

        let psdiff = (blocks.max[l] - blocks.min[l - 1])
            .abs()
            .max((blocks.max[l - 1] - blocks.min[l]).abs());
        scan_arcs(psdiff, &mut max_bss, &|j| {
            range_arc_sum(ilo - j as i64, ilo - 1, j)
        });
    }

    normalize_bss(max_bss, tss, rn, is_binary)
}

/// Permutation p-value for the mean difference between the first `n1` values of `x` and the rest
///
/// Used to check whether a change point is an artifact of an edge segment.
///
/// # Arguments
/// * `x` - Data for both groups, of length `n1 + n2`
/// * `px` - Scratch space for permuted data, at least as long as `x`
///
pub fn edge_permutation_p_value<R: Rng>(
    n1: usize,
    x: &[f64],
    px: &mut [f64],
    n_perm: u32,
    rng: &mut R,
) -> f64 {
    let n = x.len();
    let n2 = n - n1;
    if n1 == 1 || n2 == 1 {
        return 1.0;
    }

    let rn1 = n1 as f64;
    let rn2 = n2 as f64;
    let rn = n as f64;

    let px = &mut px[..n];
    px.copy_from_slice(x);

    let xsum1 = x[..n1].iter().sum::<f64>();
    let xsum2 = x[n1..].iter().sum::<f64>();
    let xbar = (xsum1 + xsum2) / rn;
    let tss = x.iter().map(|v| v * v).sum::<f64>() - rn * xbar * xbar;

    let (m1, rm1, ostat, tstat) = if n1 <= n2 {
        let ostat = 0.99999 * (xsum1 / rn1 - xbar).abs();
        (n1, rn1, ostat, ostat * ostat * rn1 * rn / rn2)
    } else {
        let ostat = 0.99999 * (xsum2 / rn2 - xbar).abs();
        (n2, rn2, ostat, ostat * ostat * rn2 * rn / rn1)
    };
    let tstat = tstat / ((tss - tstat) / (rn - 2.0));

    // A large observed statistic over enough observations is significant without permutation
    if tstat > 25.0 && m1 >= 10 {
        return 0.0;
    }

    let mut nrej = 0u32;
    for _ in 0..n_perm {
        let (selected, _) = px.partial_shuffle(rng, m1);
        let xsum = selected.iter().sum::<f64>();
        if ostat <= (xsum / rm1 - xbar).abs() {
            nrej += 1;
        }
    }
    nrej as f64 / n_perm as f64
}
