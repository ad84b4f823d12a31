//! Per-slice cluster-based permutation test with TFCE.
//!
//! A slice moves INIT -> MASK_APPLIED -> (SKIPPED | TESTED) -> DONE: features
//! are extracted over in-mask pixels and standardized, degenerate slices
//! short-circuit to an all-zero outcome, and tested slices compare the
//! observed TFCE-enhanced statistic against a label-permutation null.
//! Degeneracy never raises; it only yields zeros.

use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::stats::adjacency::SliceAdjacency;
use crate::stats::standardize_columns;
use crate::stats::tfce::{self, TfceParams};

/// Feature magnitudes below this are treated as constant/zero data.
pub const NUMERIC_EPS: f32 = 1e-3;

/// Floor for the pooled within-group variance: perfectly separated groups
/// otherwise produce an infinite t that the NaN policy would zero out.
const VARIANCE_FLOOR: f64 = 1e-8;

/// Cap on |t| keeping the TFCE threshold sweep bounded.
const T_CAP: f64 = 100.0;

/// Mixing constant for deriving a per-slice RNG stream from the run seed.
const SLICE_SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone)]
pub struct TestParams {
    pub n_permutations: usize,
    pub t_min: usize,
    pub step_down_p: f32,
    pub tfce: TfceParams,
    pub seed: u64,
}

/// One slice's work unit: adjacency plus per-subject feature rows
/// (control subjects first, then treated), columns = in-mask pixels.
#[derive(Debug)]
pub struct SliceJob {
    pub z: usize,
    pub adjacency: SliceAdjacency,
    pub features: Array2<f32>,
    pub n_control: usize,
    pub slice_len: usize,
}

/// Full-slice-shaped flat result arrays for one z index.
#[derive(Debug)]
pub struct SliceOutcome {
    pub f_obs: Vec<f32>,
    pub cluster_p: Vec<f32>,
    pub skipped: bool,
}

impl SliceOutcome {
    fn zeros(slice_len: usize) -> Self {
        Self {
            f_obs: vec![0.0; slice_len],
            cluster_p: vec![0.0; slice_len],
            skipped: true,
        }
    }
}

/// Run the permutation test for one slice.
///
/// Returned p-values lie in (0, 1] for tested in-mask pixels (the observed
/// labeling counts as one of `n_permutations`) and are exactly 0 elsewhere.
pub fn test_slice(job: &SliceJob, params: &TestParams) -> SliceOutcome {
    let n_pix = job.adjacency.pixel_count();
    if n_pix < params.t_min {
        return SliceOutcome::zeros(job.slice_len);
    }

    let mut features = job.features.clone();
    standardize_columns(&mut features);
    let max_abs = features.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if max_abs < NUMERIC_EPS {
        return SliceOutcome::zeros(job.slice_len);
    }

    let n_subjects = features.nrows();
    let identity: Vec<usize> = (0..n_subjects).collect();
    let t_obs = t_map(&features, &identity, job.n_control);
    let enhanced_obs = tfce::enhance(&t_obs, &job.adjacency, &params.tfce);
    let obs_abs: Vec<f32> = enhanced_obs.iter().map(|v| v.abs()).collect();

    // exceedance counts start at 1: the observed labeling is permutation 0
    let mut exceed = vec![1u32; n_pix];
    let mut family_exceed = vec![1u32; n_pix];
    let step_down = params.step_down_p > 0.0;

    let mut rng = StdRng::seed_from_u64(
        params.seed ^ (job.z as u64).wrapping_mul(SLICE_SEED_MIX),
    );
    let mut labels = identity;
    for _ in 1..params.n_permutations {
        labels.shuffle(&mut rng);
        let t_perm = t_map(&features, &labels, job.n_control);
        let enhanced = tfce::enhance(&t_perm, &job.adjacency, &params.tfce);
        let mut perm_max = 0.0f32;
        for i in 0..n_pix {
            let a = enhanced[i].abs();
            if a >= obs_abs[i] {
                exceed[i] += 1;
            }
            if a > perm_max {
                perm_max = a;
            }
        }
        if step_down {
            for i in 0..n_pix {
                if perm_max >= obs_abs[i] {
                    family_exceed[i] += 1;
                }
            }
        }
    }

    let total = params.n_permutations as f32;
    let mut f_obs = vec![0.0f32; job.slice_len];
    let mut cluster_p = vec![0.0f32; job.slice_len];
    for (local, &flat) in job.adjacency.pixels().iter().enumerate() {
        f_obs[flat as usize] = t_obs[local];
        let mut p = exceed[local] as f32 / total;
        if step_down {
            // the family-wise pass may only tighten, never loosen
            p = p.max(family_exceed[local] as f32 / total);
        }
        cluster_p[flat as usize] = p.min(1.0);
    }

    SliceOutcome {
        f_obs,
        cluster_p,
        skipped: false,
    }
}

/// Voxel-wise unpaired two-sample pooled-variance t statistic.
///
/// `labels[pos]` names the subject row assigned to position `pos`; the first
/// `n_control` positions form the control group. Non-finite values (e.g.
/// zero-variance pixels) are coerced to 0.
fn t_map(features: &Array2<f32>, labels: &[usize], n_control: usize) -> Vec<f32> {
    let n = labels.len();
    let n_c = n_control;
    let n_t = n - n_control;
    let n_cols = features.ncols();
    let mut out = vec![0.0f32; n_cols];
    if n_c == 0 || n_t == 0 {
        return out;
    }
    for j in 0..n_cols {
        let mut sum_c = 0.0f64;
        let mut sq_c = 0.0f64;
        let mut sum_t = 0.0f64;
        let mut sq_t = 0.0f64;
        for (pos, &row) in labels.iter().enumerate() {
            let v = features[[row, j]] as f64;
            if pos < n_c {
                sum_c += v;
                sq_c += v * v;
            } else {
                sum_t += v;
                sq_t += v * v;
            }
        }
        let m_c = sum_c / n_c as f64;
        let m_t = sum_t / n_t as f64;
        let ss_c = sq_c - sum_c * m_c;
        let ss_t = sq_t - sum_t * m_t;
        let dof = (n_c + n_t - 2) as f64;
        let pooled = ((ss_c + ss_t) / dof).max(VARIANCE_FLOOR);
        let denom = (pooled * (1.0 / n_c as f64 + 1.0 / n_t as f64)).sqrt();
        let t = ((m_t - m_c) / denom).clamp(-T_CAP, T_CAP);
        out[j] = if t.is_finite() { t as f32 } else { 0.0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, arr2};

    fn block_adjacency(rows: usize, cols: usize) -> SliceAdjacency {
        let mask = Array2::<u8>::ones((rows, cols));
        SliceAdjacency::from_mask(mask.view())
    }

    fn params(n_perm: usize, t_min: usize) -> TestParams {
        TestParams {
            n_permutations: n_perm,
            t_min,
            step_down_p: 0.0,
            tfce: TfceParams::default(),
            seed: 7,
        }
    }

    #[test]
    fn t_map_detects_group_shift() {
        let features = arr2(&[[0.0f32, 0.0], [0.1, 0.0], [5.0, 0.0], [5.1, 0.0]]);
        let labels: Vec<usize> = (0..4).collect();
        let t = t_map(&features, &labels, 2);
        assert!(t[0] > 10.0, "strong shift expected, got {}", t[0]);
        assert_eq!(t[1], 0.0, "zero-variance pixel must coerce to 0");
    }

    #[test]
    fn small_slice_is_skipped() {
        let adj = block_adjacency(2, 2);
        let job = SliceJob {
            z: 0,
            adjacency: adj,
            features: Array2::zeros((4, 4)),
            n_control: 2,
            slice_len: 4,
        };
        let outcome = test_slice(&job, &params(100, 50));
        assert!(outcome.skipped);
        assert!(outcome.f_obs.iter().all(|&v| v == 0.0));
        assert!(outcome.cluster_p.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn constant_features_are_skipped() {
        let adj = block_adjacency(2, 3);
        let job = SliceJob {
            z: 1,
            adjacency: adj,
            features: Array2::from_elem((4, 6), 3.0),
            n_control: 2,
            slice_len: 6,
        };
        let outcome = test_slice(&job, &params(100, 1));
        assert!(outcome.skipped);
        assert!(outcome.cluster_p.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn tested_slice_has_positive_p_in_mask() {
        let adj = block_adjacency(2, 3);
        let mut features = Array2::zeros((6, 6));
        for j in 0..6 {
            for s in 0..6 {
                features[[s, j]] = if s >= 3 { 1.0 } else { 0.0 };
            }
        }
        let outcome = test_slice(
            &SliceJob {
                z: 2,
                adjacency: adj,
                features,
                n_control: 3,
                slice_len: 6,
            },
            &params(200, 1),
        );
        assert!(!outcome.skipped);
        for &p in &outcome.cluster_p {
            assert!(p > 0.0 && p <= 1.0, "p out of range: {}", p);
        }
    }

    #[test]
    fn identical_groups_are_not_significant() {
        let adj = block_adjacency(3, 3);
        // both groups carry the same three subjects
        let subject = |s: usize, j: usize| ((s * 31 + j * 7) % 11) as f32;
        let mut features = Array2::zeros((6, 9));
        for j in 0..9 {
            for s in 0..3 {
                features[[s, j]] = subject(s, j);
                features[[s + 3, j]] = subject(s, j);
            }
        }
        let outcome = test_slice(
            &SliceJob {
                z: 3,
                adjacency: adj,
                features,
                n_control: 3,
                slice_len: 9,
            },
            &params(500, 1),
        );
        assert!(!outcome.skipped);
        for &p in &outcome.cluster_p {
            assert!(p >= 0.05, "identical cohorts should not be significant, p={}", p);
        }
    }

    #[test]
    fn step_down_never_loosens() {
        let adj = block_adjacency(2, 4);
        let mut features = Array2::zeros((8, 8));
        for j in 0..8 {
            for s in 0..8 {
                features[[s, j]] = if s >= 4 { (j + 1) as f32 } else { 0.1 * s as f32 };
            }
        }
        let job = |f: &Array2<f32>| SliceJob {
            z: 4,
            adjacency: adj.clone(),
            features: f.clone(),
            n_control: 4,
            slice_len: 8,
        };
        let basic = test_slice(&job(&features), &params(300, 1));
        let mut sd = params(300, 1);
        sd.step_down_p = 0.05;
        let corrected = test_slice(&job(&features), &sd);
        for (a, b) in basic.cluster_p.iter().zip(corrected.cluster_p.iter()) {
            assert!(b >= a, "step-down produced a smaller p: {} < {}", b, a);
        }
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let adj = block_adjacency(2, 3);
        let mut features = Array2::zeros((4, 6));
        for j in 0..6 {
            features[[2, j]] = j as f32;
            features[[3, j]] = (j as f32) * 0.5 + 1.0;
        }
        let make_job = || SliceJob {
            z: 5,
            adjacency: adj.clone(),
            features: features.clone(),
            n_control: 2,
            slice_len: 6,
        };
        let a = test_slice(&make_job(), &params(250, 1));
        let b = test_slice(&make_job(), &params(250, 1));
        assert_eq!(a.cluster_p, b.cluster_p);
        assert_eq!(a.f_obs, b.f_obs);
    }
}
