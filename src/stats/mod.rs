//! Statistical primitives shared by the aggregation and permutation stages.

use ndarray::Array2;

pub mod adjacency;
pub mod permutation;
pub mod tfce;

/// Variance floor below which a feature column is treated as constant.
pub const EPS_VARIANCE: f32 = 1e-12;

pub fn sort_f32(values: &mut [f32]) {
    values.sort_unstable_by(f32::total_cmp);
}

/// Percentile with linear interpolation over an ascending-sorted slice.
/// `q` is a fraction in [0, 1].
pub fn percentile_sorted(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q as f64 * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return values[lo];
    }
    let frac = (pos - lo as f64) as f32;
    values[lo] + (values[hi] - values[lo]) * frac
}

/// Z-standardize every column of `features` across rows (subjects).
///
/// Columns with near-zero variance are set to zero rather than divided.
pub fn standardize_columns(features: &mut Array2<f32>) {
    let n = features.nrows();
    if n == 0 {
        return;
    }
    for mut col in features.columns_mut() {
        let mut sum = 0.0f64;
        for &v in col.iter() {
            sum += v as f64;
        }
        let mean = (sum / n as f64) as f32;
        let mut ss = 0.0f64;
        for &v in col.iter() {
            let d = v - mean;
            ss += (d * d) as f64;
        }
        let var = (ss / n as f64) as f32;
        if var <= EPS_VARIANCE {
            col.fill(0.0);
        } else {
            let inv = 1.0 / var.sqrt();
            for v in col.iter_mut() {
                *v = (*v - mean) * inv;
            }
        }
    }
}
