//! Per-subject preprocessing: Gaussian smoothing and intensity
//! normalization by the mean inside the brain mask.

use anyhow::{Result, bail};
use ndarray::Array3;
use tracing::{info, warn};

use crate::ctx::Ctx;
use crate::pipeline::Stage;
use crate::volume::smooth::{fwhm_to_sigma_voxels, gaussian_smooth};
use crate::volume::{Volume, masked_mean};

/// Mask means below this are treated as a degenerate normalization constant.
const MEAN_EPS: f64 = 1e-6;

pub struct Stage2Normalize;

impl Stage2Normalize {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage2Normalize {
    fn name(&self) -> &'static str {
        "stage2_normalize"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        let mask = ctx
            .brain_mask
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("brain mask not loaded before stage 2"))?;
        if mask.iter().all(|&m| m == 0.0) {
            bail!("brain mask is empty; cannot normalize intensities");
        }

        let spacing = ctx.spacing();
        let fwhm = ctx.config.fwhm;
        let mut warnings = Vec::new();

        let normalize_cohort = |volumes: &[Volume], warnings: &mut Vec<String>| -> Result<Vec<Array3<f32>>> {
            volumes
                .iter()
                .map(|v| normalize_volume(&v.data, mask, fwhm, spacing, warnings))
                .collect()
        };

        let control_norm = normalize_cohort(&ctx.control, &mut warnings)?;
        let treated_norm = normalize_cohort(&ctx.treated, &mut warnings)?;

        for w in &warnings {
            warn!("{}", w);
        }
        ctx.warnings.extend(warnings);

        info!(
            fwhm,
            n_control = control_norm.len(),
            n_treated = treated_norm.len(),
            "volumes_normalized"
        );

        // aggregation and testing operate on mask-multiplied volumes
        ctx.control_norm = control_norm.into_iter().map(|v| &v * mask).collect();
        ctx.treated_norm = treated_norm.into_iter().map(|v| &v * mask).collect();
        Ok(())
    }
}

/// Smooth one raw volume and divide it by its mean intensity inside the
/// brain mask. An all-zero volume (mask mean ~ 0) is left unscaled rather
/// than divided; an empty mask is rejected by the caller before this runs.
pub fn normalize_volume(
    raw: &Array3<f32>,
    mask: &Array3<f32>,
    fwhm: f32,
    spacing: [f32; 3],
    warnings: &mut Vec<String>,
) -> Result<Array3<f32>> {
    let sigma = [
        fwhm_to_sigma_voxels(fwhm, spacing[0]),
        fwhm_to_sigma_voxels(fwhm, spacing[1]),
        fwhm_to_sigma_voxels(fwhm, spacing[2]),
    ];
    let smoothed = gaussian_smooth(raw, sigma);
    let mean = match masked_mean(&smoothed, mask) {
        Some(mean) => mean,
        None => bail!("brain mask selects no voxels"),
    };
    if mean.abs() <= MEAN_EPS {
        warnings.push(format!(
            "mask mean intensity {:.2e} is near zero; volume left unscaled",
            mean
        ));
        return Ok(smoothed);
    }
    let inv = (1.0 / mean) as f32;
    Ok(smoothed.mapv(|v| v * inv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn normalization_gives_unit_mask_mean() {
        let raw = Array3::from_shape_fn((4, 4, 4), |(x, y, z)| 1.0 + (x + y + z) as f32);
        let mask = Array3::<f32>::ones((4, 4, 4));
        let mut warnings = Vec::new();
        let norm = normalize_volume(&raw, &mask, 0.0, [1.0; 3], &mut warnings).unwrap();
        assert!(warnings.is_empty());
        let mean = crate::volume::masked_mean(&norm, &mask).unwrap();
        assert!((mean - 1.0).abs() < 1e-6, "normalized mean was {}", mean);
    }

    #[test]
    fn zero_volume_is_left_unscaled_with_warning() {
        let raw = Array3::<f32>::zeros((3, 3, 3));
        let mask = Array3::<f32>::ones((3, 3, 3));
        let mut warnings = Vec::new();
        let norm = normalize_volume(&raw, &mask, 0.0, [1.0; 3], &mut warnings).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(norm.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn preprocessing_is_idempotent_bitwise() {
        let raw = Array3::from_shape_fn((5, 5, 3), |(x, y, z)| ((x * 7 + y * 3 + z) % 5) as f32 + 0.5);
        let mask = Array3::<f32>::ones((5, 5, 3));
        let mut w1 = Vec::new();
        let mut w2 = Vec::new();
        let a = normalize_volume(&raw, &mask, 1.5, [1.0; 3], &mut w1).unwrap();
        let b = normalize_volume(&raw, &mask, 1.5, [1.0; 3], &mut w2).unwrap();
        assert_eq!(a, b);
    }
}
