//! Parallel per-slice dispatch of the permutation cluster test.
//!
//! Every z index becomes one job: build the slice adjacency graph, run the
//! tester, and write the outcome into the disk-backed arenas at that slice's
//! chunk. Chunks are disjoint, so workers need no synchronization; the
//! completion order of slices is irrelevant.

use anyhow::{Result, bail};
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::arena::SliceArena;
use crate::ctx::Ctx;
use crate::pipeline::Stage;
use crate::stats::adjacency::SliceAdjacency;
use crate::stats::permutation::{self, SliceJob, TestParams};

pub struct Stage5Cluster;

impl Stage5Cluster {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage5Cluster {
    fn name(&self) -> &'static str {
        "stage5_cluster"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        if ctx.config.n_permutations == 0 {
            bail!("number of permutations must be at least 1");
        }
        let (nx, ny, nz) = ctx
            .shape
            .ok_or_else(|| anyhow::anyhow!("volume shape missing before stage 5"))?;
        let effect_mask = ctx
            .effect_mask
            .take()
            .ok_or_else(|| anyhow::anyhow!("effect mask missing before stage 5"))?;
        let slice_len = nx * ny;

        let mut f_obs_arena = SliceArena::create(&ctx.output.f_obs_buf_path, nz, slice_len)?;
        let mut p_arena = SliceArena::create(&ctx.output.cluster_p_buf_path, nz, slice_len)?;

        let workers = worker_count(ctx.config.cpu_load);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build thread pool: {}", e))?;

        let params = TestParams {
            n_permutations: ctx.config.n_permutations,
            t_min: ctx.config.t_min,
            step_down_p: ctx.config.step_down_p,
            tfce: ctx.config.tfce,
            seed: ctx.config.seed,
        };

        let control = &ctx.control_norm;
        let treated = &ctx.treated_norm;
        let f_flat = f_obs_arena.as_f32_mut();
        let p_flat = p_arena.as_f32_mut();

        let (tested, skipped) = pool.install(|| {
            f_flat
                .par_chunks_mut(slice_len)
                .zip(p_flat.par_chunks_mut(slice_len))
                .enumerate()
                .map(|(z, (f_chunk, p_chunk))| {
                    let adjacency =
                        SliceAdjacency::from_mask(effect_mask.index_axis(Axis(2), z));
                    if adjacency.pixel_count() < params.t_min {
                        debug!(z, pixels = adjacency.pixel_count(), "slice below voxel minimum");
                        f_chunk.fill(0.0);
                        p_chunk.fill(0.0);
                        return (0usize, 1usize);
                    }
                    let job = build_slice_job(z, adjacency, control, treated, ny, slice_len);
                    let outcome = permutation::test_slice(&job, &params);
                    f_chunk.copy_from_slice(&outcome.f_obs);
                    p_chunk.copy_from_slice(&outcome.cluster_p);
                    if outcome.skipped {
                        debug!(z, "slice skipped as degenerate");
                        (0, 1)
                    } else {
                        (1, 0)
                    }
                })
                .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
        });

        info!(workers, tested, skipped, "slices_processed");

        ctx.effect_mask = Some(effect_mask);
        ctx.f_obs_arena = Some(f_obs_arena);
        ctx.p_arena = Some(p_arena);
        ctx.tested_slices = tested;
        ctx.skipped_slices = skipped;
        Ok(())
    }
}

/// Pool size from the configured fraction of available cores, at least 1.
pub fn worker_count(cpu_load: f32) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((cpu_load * cores as f32).floor() as usize).clamp(1, cores)
}

/// Extract one slice's per-subject feature rows over the in-mask pixels.
fn build_slice_job(
    z: usize,
    adjacency: SliceAdjacency,
    control: &[Array3<f32>],
    treated: &[Array3<f32>],
    ny: usize,
    slice_len: usize,
) -> SliceJob {
    let n_control = control.len();
    let n_subjects = n_control + treated.len();
    let n_pix = adjacency.pixel_count();
    let mut features = Array2::<f32>::zeros((n_subjects, n_pix));
    for (s, vol) in control.iter().chain(treated.iter()).enumerate() {
        let slice = vol.index_axis(Axis(2), z);
        for (j, &flat) in adjacency.pixels().iter().enumerate() {
            let (x, y) = (flat as usize / ny, flat as usize % ny);
            features[[s, j]] = slice[[x, y]];
        }
    }
    SliceJob {
        z,
        adjacency,
        features,
        n_control,
        slice_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_at_least_one() {
        assert!(worker_count(0.0) >= 1);
        assert!(worker_count(-1.0) >= 1);
    }

    #[test]
    fn worker_count_never_exceeds_cores() {
        let cores = std::thread::available_parallelism().unwrap().get();
        assert!(worker_count(10.0) <= cores);
    }
}
