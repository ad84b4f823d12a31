//! Separable Gaussian smoothing for 3D volumes.

use ndarray::{Array1, Array3, ArrayView1, ArrayViewMut1, Axis, Zip};

const FWHM_TO_SIGMA: f32 = 2.354_820_2; // 2*sqrt(2*ln 2)

/// Convert a full-width-half-max in physical units to a sigma in voxels
/// along one axis.
pub fn fwhm_to_sigma_voxels(fwhm: f32, spacing: f32) -> f32 {
    if fwhm <= 0.0 || spacing <= 0.0 {
        return 0.0;
    }
    fwhm / (FWHM_TO_SIGMA * spacing)
}

/// Smooth a volume with an axis-separable Gaussian kernel.
///
/// `sigma` is given per axis in voxels; an axis with sigma <= 0 is left
/// untouched. Kernel windows are truncated at the volume boundary and the
/// remaining weights renormalized, so constant regions stay constant.
pub fn gaussian_smooth(volume: &Array3<f32>, sigma: [f32; 3]) -> Array3<f32> {
    let mut out = volume.clone();
    for (axis, &s) in sigma.iter().enumerate() {
        if s > 0.0 {
            out = smooth_axis(&out, axis, s);
        }
    }
    out
}

fn smooth_axis(volume: &Array3<f32>, axis: usize, sigma: f32) -> Array3<f32> {
    let kernel = gaussian_kernel(sigma);
    let mut out = Array3::<f32>::zeros(volume.raw_dim());
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(volume.lanes(Axis(axis)))
        .for_each(|dst, src| convolve_lane(src, dst, &kernel));
    out
}

fn gaussian_kernel(sigma: f32) -> Array1<f32> {
    let radius = (3.0 * sigma).ceil() as usize;
    let mut kernel = Array1::<f32>::zeros(2 * radius + 1);
    let denom = 2.0 * sigma * sigma;
    for (i, w) in kernel.iter_mut().enumerate() {
        let d = i as f32 - radius as f32;
        *w = (-d * d / denom).exp();
    }
    let total: f32 = kernel.sum();
    kernel.mapv_inplace(|w| w / total);
    kernel
}

fn convolve_lane(src: ArrayView1<f32>, mut dst: ArrayViewMut1<f32>, kernel: &Array1<f32>) {
    let n = src.len();
    let radius = kernel.len() / 2;
    for i in 0..n {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(n - 1);
        let mut acc = 0.0f32;
        let mut weight = 0.0f32;
        for j in lo..=hi {
            let w = kernel[j + radius - i];
            acc += w * src[j];
            weight += w;
        }
        dst[i] = acc / weight;
    }
}
