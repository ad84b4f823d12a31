//! Input discovery and validation.
//!
//! Discovers one volume file per subject in each cohort directory, loads the
//! reference brain mask, and validates that every volume of the comparison
//! sits on the same voxel grid. All mismatches are fatal here, before any
//! statistics run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::ctx::Ctx;
use crate::pipeline::Stage;
use crate::volume::Volume;
use crate::volume::nifti_io;

pub struct Stage1Input;

impl Stage1Input {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage1Input {
    fn name(&self) -> &'static str {
        "stage1_input"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        let (control_paths, control_ignored) = discover_subject_files(&ctx.config.control_dir)?;
        let (treated_paths, treated_ignored) = discover_subject_files(&ctx.config.treated_dir)?;
        for (ignored, dir) in [
            (control_ignored, &ctx.config.control_dir),
            (treated_ignored, &ctx.config.treated_dir),
        ] {
            if ignored > 0 {
                ctx.warnings.push(format!(
                    "{} non-volume files ignored in {}",
                    ignored,
                    dir.display()
                ));
            }
        }
        if control_paths.len() < 2 {
            bail!(
                "control cohort needs at least 2 subjects, found {} in {}",
                control_paths.len(),
                ctx.config.control_dir.display()
            );
        }
        if treated_paths.len() < 2 {
            bail!(
                "treated cohort needs at least 2 subjects, found {} in {}",
                treated_paths.len(),
                ctx.config.treated_dir.display()
            );
        }

        if !ctx.config.mask_path.exists() {
            bail!(
                "brain mask file missing: {}",
                ctx.config.mask_path.display()
            );
        }
        let (mask, mask_header) = nifti_io::read_volume(&ctx.config.mask_path)?;
        let expected = mask.dim();

        let mut reference_header = None;
        let mut load_cohort = |paths: &[PathBuf]| -> Result<Vec<Volume>> {
            let mut volumes = Vec::with_capacity(paths.len());
            for path in paths {
                let (data, header) = nifti_io::read_volume(path)?;
                if data.dim() != expected {
                    bail!(
                        "subject volume {} has shape {:?}, expected {:?} from the brain mask",
                        path.display(),
                        data.dim(),
                        expected
                    );
                }
                if reference_header.is_none() {
                    reference_header = Some(header.clone());
                }
                let spacing = nifti_io::spacing_from_header(&header);
                volumes.push(Volume::new(data, spacing));
            }
            Ok(volumes)
        };

        let control = load_cohort(&control_paths)?;
        let treated = load_cohort(&treated_paths)?;

        info!(
            n_control = control.len(),
            n_treated = treated.len(),
            shape = ?expected,
            mask = %ctx.config.mask_path.display(),
            "cohorts_loaded"
        );

        ctx.shape = Some(expected);
        ctx.brain_mask = Some(mask);
        ctx.reference_header = reference_header.or(Some(mask_header));
        ctx.control = control;
        ctx.treated = treated;
        Ok(())
    }
}

/// Volume files of one cohort directory, sorted by file name for a stable
/// subject order. Also reports how many regular files were ignored as
/// non-volume entries.
pub fn discover_subject_files(dir: &Path) -> Result<(Vec<PathBuf>, usize)> {
    if !dir.is_dir() {
        bail!("cohort directory missing: {}", dir.display());
    }
    let mut paths = Vec::new();
    let mut ignored = 0usize;
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if is_volume_file(&path) {
            paths.push(path);
        } else {
            ignored += 1;
        }
    }
    paths.sort();
    Ok((paths, ignored))
}

fn is_volume_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|s| s.to_str()) {
        Some(name) => name,
        None => return false,
    };
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}
