//! JSON run summary and the plain-text runtime log.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::ctx::Ctx;

#[derive(Debug, Clone, Serialize)]
struct ToolMeta {
    name: String,
    version: String,
}

#[derive(Debug, Clone, Serialize)]
struct ConfigEcho {
    n_permutations: usize,
    smoothing_fwhm: f32,
    mask_percentile: f32,
    tfce: crate::stats::tfce::TfceParams,
    step_down_p: f32,
    min_slice_voxels: usize,
    cpu_load: f32,
    seed: u64,
}

#[derive(Debug, Clone, Serialize)]
struct InputMeta {
    n_control: usize,
    n_treated: usize,
    shape: [usize; 3],
    effect_mask_voxels: usize,
}

#[derive(Debug, Clone, Serialize)]
struct SliceCounts {
    tested: usize,
    skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
struct StageEcho {
    stage: &'static str,
    elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
struct RunSummary {
    tool: ToolMeta,
    config: ConfigEcho,
    input: InputMeta,
    slices: SliceCounts,
    stages: Vec<StageEcho>,
    elapsed_seconds: f64,
    warnings: Vec<String>,
}

pub fn write_summary(path: &Path, ctx: &Ctx) -> Result<()> {
    let shape = ctx.shape.context("volume shape missing for summary")?;
    let mask_voxels = ctx
        .effect_mask
        .as_ref()
        .map(|m| m.iter().filter(|&&v| v != 0).count())
        .unwrap_or(0);
    let summary = RunSummary {
        tool: ToolMeta {
            name: "voxelperm".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        config: ConfigEcho {
            n_permutations: ctx.config.n_permutations,
            smoothing_fwhm: ctx.config.fwhm,
            mask_percentile: ctx.config.mask_percentile,
            tfce: ctx.config.tfce,
            step_down_p: ctx.config.step_down_p,
            min_slice_voxels: ctx.config.t_min,
            cpu_load: ctx.config.cpu_load,
            seed: ctx.config.seed,
        },
        input: InputMeta {
            n_control: ctx.control.len(),
            n_treated: ctx.treated.len(),
            shape: [shape.0, shape.1, shape.2],
            effect_mask_voxels: mask_voxels,
        },
        slices: SliceCounts {
            tested: ctx.tested_slices,
            skipped: ctx.skipped_slices,
        },
        stages: ctx
            .stage_timings
            .iter()
            .map(|t| StageEcho {
                stage: t.stage,
                elapsed_ms: t.elapsed_ms,
            })
            .collect(),
        elapsed_seconds: ctx.elapsed_seconds.unwrap_or(0.0),
        warnings: ctx.warnings.clone(),
    };

    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &summary)?;
    Ok(())
}

/// Record total wall-clock time for the comparison.
pub fn write_runtime_log(path: &Path, elapsed_seconds: f64) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "total elapsed wall-clock: {:.3} s", elapsed_seconds)?;
    writer.flush()?;
    Ok(())
}
