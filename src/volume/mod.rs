use ndarray::Array3;

pub mod nifti_io;
pub mod smooth;

/// One subject's density volume plus its voxel spacing in physical units.
///
/// Read-only after load; every derived volume is a fresh allocation.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    pub spacing: [f32; 3],
}

impl Volume {
    pub fn new(data: Array3<f32>, spacing: [f32; 3]) -> Self {
        Self { data, spacing }
    }
}

/// Mean of `data` over voxels where `mask` is nonzero.
///
/// Returns `None` when the mask selects no voxels.
pub fn masked_mean(data: &Array3<f32>, mask: &Array3<f32>) -> Option<f64> {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (v, m) in data.iter().zip(mask.iter()) {
        if *m != 0.0 {
            sum += *v as f64;
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn masked_mean_restricts_to_mask() {
        let mut data = Array3::<f32>::zeros((2, 2, 1));
        data[[0, 0, 0]] = 4.0;
        data[[1, 1, 0]] = 100.0;
        let mut mask = Array3::<f32>::zeros((2, 2, 1));
        mask[[0, 0, 0]] = 1.0;
        mask[[0, 1, 0]] = 1.0;
        let mean = masked_mean(&data, &mask).unwrap();
        assert!((mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn masked_mean_empty_mask_is_none() {
        let data = Array3::<f32>::ones((2, 2, 2));
        let mask = Array3::<f32>::zeros((2, 2, 2));
        assert!(masked_mean(&data, &mask).is_none());
    }
}
