//! Candidate effect mask from percentile thresholds on the
//! difference-of-means volume.

use anyhow::Result;
use ndarray::Array3;
use tracing::{info, warn};

use crate::ctx::Ctx;
use crate::pipeline::Stage;
use crate::stats::{percentile_sorted, sort_f32};

/// Differences at or below this magnitude everywhere mean "no effect
/// anywhere"; the mask is then empty and downstream slices skip.
const DIFF_EPS: f32 = 1e-3;

pub struct Stage4Mask;

impl Stage4Mask {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage4Mask {
    fn name(&self) -> &'static str {
        "stage4_mask"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        let diff = ctx
            .diff_mean
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("difference volume missing before stage 4"))?;
        let mask = build_effect_mask(diff, ctx.config.mask_percentile);
        let voxels = mask.iter().filter(|&&v| v != 0).count();
        if voxels == 0 {
            warn!("effect mask is empty; all slices will be skipped");
            ctx.warnings
                .push("effect mask is empty; no voxels were tested".to_string());
        }
        info!(voxels, percentile = ctx.config.mask_percentile, "effect_mask_built");
        ctx.effect_mask = Some(mask);
        Ok(())
    }
}

/// Threshold the difference volume at the `percentile`-th percentile of its
/// strictly positive values and the `(100 - percentile)`-th percentile of its
/// strictly negative values. Comparisons are inclusive so a plateau of equal
/// extreme differences still yields a mask.
pub fn build_effect_mask(diff: &Array3<f32>, percentile: f32) -> Array3<u8> {
    let mut positives: Vec<f32> = diff.iter().copied().filter(|&v| v > DIFF_EPS).collect();
    let mut negatives: Vec<f32> = diff.iter().copied().filter(|&v| v < -DIFF_EPS).collect();

    let pos_thr = if positives.is_empty() {
        None
    } else {
        sort_f32(&mut positives);
        Some(percentile_sorted(&positives, percentile / 100.0))
    };
    let neg_thr = if negatives.is_empty() {
        None
    } else {
        sort_f32(&mut negatives);
        Some(percentile_sorted(&negatives, 1.0 - percentile / 100.0))
    };

    diff.mapv(|v| {
        let pos_hit = pos_thr.map(|t| v >= t).unwrap_or(false);
        let neg_hit = neg_thr.map(|t| v <= t).unwrap_or(false);
        u8::from(pos_hit || neg_hit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn near_zero_differences_give_empty_mask() {
        let diff = Array3::from_elem((4, 4, 2), 0.0005f32);
        let mask = build_effect_mask(&diff, 95.0);
        assert!(mask.iter().all(|&v| v == 0));
    }

    #[test]
    fn extreme_positive_and_negative_tails_are_masked() {
        let mut diff = Array3::<f32>::zeros((10, 10, 1));
        diff[[0, 0, 0]] = 5.0;
        diff[[9, 9, 0]] = -5.0;
        for x in 1..9 {
            diff[[x, 0, 0]] = 0.01;
            diff[[x, 1, 0]] = -0.01;
        }
        let mask = build_effect_mask(&diff, 95.0);
        assert_eq!(mask[[0, 0, 0]], 1);
        assert_eq!(mask[[9, 9, 0]], 1);
        assert_eq!(mask[[5, 5, 0]], 0);
    }

    #[test]
    fn plateau_of_equal_extremes_is_kept() {
        // all strictly positive differences identical: inclusive comparison
        // must keep them in the mask
        let mut diff = Array3::<f32>::zeros((8, 8, 1));
        for (x, y) in [(2, 2), (2, 3), (3, 2), (3, 3)] {
            diff[[x, y, 0]] = 10.0;
        }
        let mask = build_effect_mask(&diff, 95.0);
        let count = mask.iter().filter(|&&v| v != 0).count();
        assert_eq!(count, 4);
        assert_eq!(mask[[2, 2, 0]], 1);
    }

    #[test]
    fn one_sided_effects_do_not_mask_the_other_tail() {
        let mut diff = Array3::<f32>::zeros((6, 6, 1));
        diff[[1, 1, 0]] = 2.0;
        diff[[2, 2, 0]] = 3.0;
        let mask = build_effect_mask(&diff, 50.0);
        // no strictly negative values anywhere: zeros must stay unmasked
        assert_eq!(mask[[0, 0, 0]], 0);
        assert_eq!(mask[[2, 2, 0]], 1);
    }
}
