use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::{Array3, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

/// Read a 3D NIfTI volume (.nii or .nii.gz) into an `Array3<f32>`.
///
/// Returns the array together with the file's header so outputs can be
/// written back on the same grid.
pub fn read_volume(path: &Path) -> Result<(Array3<f32>, NiftiHeader)> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("failed to read NIfTI file {}", path.display()))?;
    let header = obj.header().clone();
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .with_context(|| format!("failed to decode volume data in {}", path.display()))?;
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| anyhow!("expected a 3D volume in {}", path.display()))?;
    Ok((data, header))
}

/// Voxel spacing from a NIfTI header (pixdim 1..3).
pub fn spacing_from_header(header: &NiftiHeader) -> [f32; 3] {
    [header.pixdim[1], header.pixdim[2], header.pixdim[3]]
}

/// Write a 3D volume as NIfTI, reusing `reference` for the affine/header
/// when available (gzip is selected by the `.nii.gz` extension).
pub fn write_volume(path: &Path, data: &Array3<f32>, reference: Option<&NiftiHeader>) -> Result<()> {
    let options = WriterOptions::new(path);
    let options = match reference {
        Some(header) => options.reference_header(header),
        None => options,
    };
    options
        .write_nifti(data)
        .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    #[test]
    fn roundtrip_preserves_shape_and_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vol.nii");
        let data = Array3::from_shape_fn((4, 3, 2), |(x, y, z)| (x + 10 * y + 100 * z) as f32);
        write_volume(&path, &data, None).unwrap();
        let (loaded, _) = read_volume(&path).unwrap();
        assert_eq!(loaded.dim(), data.dim());
        for (a, b) in loaded.iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-5, "value mismatch: {} vs {}", a, b);
        }
    }

    #[test]
    fn roundtrip_gzipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vol.nii.gz");
        let data = Array3::from_elem((3, 3, 3), 2.5f32);
        write_volume(&path, &data, None).unwrap();
        let (loaded, _) = read_volume(&path).unwrap();
        assert_eq!(loaded.dim(), (3, 3, 3));
        assert!((loaded[[1, 1, 1]] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn read_missing_file_errors() {
        let err = read_volume(Path::new("/nonexistent/volume.nii")).unwrap_err();
        assert!(err.to_string().contains("failed to read NIfTI file"));
    }
}
