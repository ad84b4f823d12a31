//! Cohort aggregation: per-voxel mean and standard deviation across the
//! subjects of each cohort, and the across-cohort difference of means.

use anyhow::{Result, bail};
use ndarray::Array3;
use tracing::info;

use crate::ctx::Ctx;
use crate::pipeline::Stage;

pub struct Stage3Aggregate;

impl Stage3Aggregate {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage3Aggregate {
    fn name(&self) -> &'static str {
        "stage3_aggregate"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        if ctx.control_norm.is_empty() || ctx.treated_norm.is_empty() {
            bail!("normalized cohorts missing before stage 3");
        }

        let (control_mean, control_std) = cohort_mean_std(&ctx.control_norm);
        let (treated_mean, treated_std) = cohort_mean_std(&ctx.treated_norm);
        let diff_mean = &treated_mean - &control_mean;

        info!(
            max_abs_diff = diff_mean.iter().fold(0.0f32, |m, v| m.max(v.abs())),
            "cohorts_aggregated"
        );

        ctx.control_mean = Some(control_mean);
        ctx.control_std = Some(control_std);
        ctx.treated_mean = Some(treated_mean);
        ctx.treated_std = Some(treated_std);
        ctx.diff_mean = Some(diff_mean);
        Ok(())
    }
}

/// Per-voxel mean and sample standard deviation (ddof = 1) across a stack of
/// identically shaped volumes. Inputs are not mutated.
pub fn cohort_mean_std(volumes: &[Array3<f32>]) -> (Array3<f32>, Array3<f32>) {
    let n = volumes.len();
    let shape = volumes[0].raw_dim();
    let mut mean = Array3::<f64>::zeros(shape);
    for vol in volumes {
        mean.zip_mut_with(vol, |m, &v| *m += v as f64);
    }
    mean.mapv_inplace(|m| m / n as f64);

    let mut var = Array3::<f64>::zeros(shape);
    for vol in volumes {
        ndarray::Zip::from(&mut var)
            .and(&mean)
            .and(vol)
            .for_each(|s, &m, &v| {
                let d = v as f64 - m;
                *s += d * d;
            });
    }
    let denom = (n.max(2) - 1) as f64;
    let std = var.mapv(|s| (s / denom).sqrt() as f32);
    (mean.mapv(|m| m as f32), std)
}
