//! Result assembly and persistence.
//!
//! Merges the per-slice arenas into full volumes, applies the -log10
//! transform to cluster p-values, writes the NIfTI outputs, the binary
//! bundle, the JSON summary and the runtime log, and releases the arenas.

use anyhow::{Result, bail};
use ndarray::Array3;
use tracing::{info, warn};

use crate::ctx::Ctx;
use crate::io::bundle::{self, BundleHeader};
use crate::io::summary;
use crate::pipeline::Stage;
use crate::volume::nifti_io;

/// Clamp for the -log10 transform so a p of numerically zero cannot occur.
const P_FLOOR: f32 = 1e-10;

pub struct Stage6Output;

impl Stage6Output {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage6Output {
    fn name(&self) -> &'static str {
        "stage6_output"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        let shape = ctx
            .shape
            .ok_or_else(|| anyhow::anyhow!("volume shape missing before stage 6"))?;
        let f_obs_arena = match ctx.f_obs_arena.take() {
            Some(a) => a,
            None => bail!("f_obs buffer missing before stage 6"),
        };
        let p_arena = match ctx.p_arena.take() {
            Some(a) => a,
            None => bail!("cluster_p buffer missing before stage 6"),
        };

        let f_obs = volume_from_flat(f_obs_arena.as_f32(), shape);
        let cluster_p = volume_from_flat(p_arena.as_f32(), shape);
        let p_values = cluster_p.mapv(neg_log10_p);

        let effect_mask = ctx
            .effect_mask
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("effect mask missing before stage 6"))?
            .mapv(|v| v as f32);
        let diff_mean = ctx
            .diff_mean
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("difference volume missing before stage 6"))?;
        let control_mean = ctx
            .control_mean
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("control mean missing before stage 6"))?;
        let control_std = ctx
            .control_std
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("control std missing before stage 6"))?;
        let treated_mean = ctx
            .treated_mean
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("treated mean missing before stage 6"))?;
        let treated_std = ctx
            .treated_std
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("treated std missing before stage 6"))?;

        let header = ctx.reference_header.as_ref();
        let out = &ctx.output.out_dir;
        nifti_io::write_volume(&out.join("f_obs.nii.gz"), &f_obs, header)?;
        nifti_io::write_volume(&out.join("p_values.nii.gz"), &p_values, header)?;
        nifti_io::write_volume(&out.join("diff_mean.nii.gz"), diff_mean, header)?;
        nifti_io::write_volume(&out.join("mask_diff_mean.nii.gz"), &effect_mask, header)?;
        nifti_io::write_volume(&out.join("control_mean.nii.gz"), control_mean, header)?;
        nifti_io::write_volume(&out.join("control_std.nii.gz"), control_std, header)?;
        nifti_io::write_volume(&out.join("treated_mean.nii.gz"), treated_mean, header)?;
        nifti_io::write_volume(&out.join("treated_std.nii.gz"), treated_std, header)?;

        if ctx.config.write_bundle {
            let bundle_header = BundleHeader {
                version: bundle::VERSION,
                nx: shape.0 as u32,
                ny: shape.1 as u32,
                nz: shape.2 as u32,
                n_control: ctx.control.len() as u32,
                n_treated: ctx.treated.len() as u32,
                n_permutations: ctx.config.n_permutations as u64,
            };
            bundle::write_bundle(
                &ctx.output.bundle_path,
                &bundle_header,
                &[
                    &f_obs,
                    &p_values,
                    diff_mean,
                    &effect_mask,
                    control_mean,
                    control_std,
                    treated_mean,
                    treated_std,
                ],
            )?;
        }

        let elapsed = ctx.started.elapsed().as_secs_f64();
        ctx.elapsed_seconds = Some(elapsed);
        summary::write_runtime_log(&ctx.output.runtime_path, elapsed)?;
        summary::write_summary(&ctx.output.summary_path, ctx)?;

        // temp buffers are gone after this; failures are non-fatal
        if let Err(err) = f_obs_arena.release() {
            warn!(error = %err, "failed to clean up f_obs buffer");
        }
        if let Err(err) = p_arena.release() {
            warn!(error = %err, "failed to clean up cluster_p buffer");
        }

        info!(
            out_dir = %ctx.output.out_dir.display(),
            elapsed_seconds = elapsed,
            "results_written"
        );
        Ok(())
    }
}

/// Reassemble a volume from the arena's slice-major flat layout.
fn volume_from_flat(flat: &[f32], (nx, ny, nz): (usize, usize, usize)) -> Array3<f32> {
    Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| flat[z * nx * ny + x * ny + y])
}

/// `-log10(p)` with a floor guard; zero stays zero so untested voxels carry
/// no significance.
fn neg_log10_p(p: f32) -> f32 {
    if p <= 0.0 {
        0.0
    } else {
        -p.max(P_FLOOR).log10()
    }
}
