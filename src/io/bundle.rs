//! Versioned binary bundle of the assembled result arrays.
//!
//! Layout: a fixed-size little-endian header followed by eight f32 arrays of
//! `nx * ny * nz` values each, in the order given by `ARRAY_NAMES`. The file
//! is written once at the end of a run and read back via mmap by downstream
//! correlation analysis.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use memmap2::Mmap;
use ndarray::Array3;

pub const MAGIC: [u8; 8] = *b"VXPBUND1";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 48;

pub const ARRAY_NAMES: [&str; 8] = [
    "f_obs",
    "p_values",
    "diff_mean",
    "effect_mask",
    "control_mean",
    "control_std",
    "treated_mean",
    "treated_std",
];

const IO_BUF_CAPACITY: usize = 1 << 20; // 1 MiB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleHeader {
    pub version: u32,
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    pub n_control: u32,
    pub n_treated: u32,
    pub n_permutations: u64,
}

impl BundleHeader {
    pub fn voxels(&self) -> usize {
        self.nx as usize * self.ny as usize * self.nz as usize
    }

    pub fn expected_len(&self) -> usize {
        HEADER_SIZE + ARRAY_NAMES.len() * self.voxels() * 4
    }

    fn array_offset(&self, index: usize) -> usize {
        HEADER_SIZE + index * self.voxels() * 4
    }
}

/// Write the bundle. `arrays` must follow the `ARRAY_NAMES` order and share
/// one shape.
pub fn write_bundle(path: &Path, header: &BundleHeader, arrays: &[&Array3<f32>]) -> Result<()> {
    if arrays.len() != ARRAY_NAMES.len() {
        bail!(
            "bundle expects {} arrays, got {}",
            ARRAY_NAMES.len(),
            arrays.len()
        );
    }
    for arr in arrays {
        if arr.len() != header.voxels() {
            bail!(
                "bundle array length {} does not match header voxels {}",
                arr.len(),
                header.voxels()
            );
        }
    }

    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::with_capacity(IO_BUF_CAPACITY, file);

    let mut head = [0u8; HEADER_SIZE];
    head[0..8].copy_from_slice(&MAGIC);
    head[8..12].copy_from_slice(&VERSION.to_le_bytes());
    head[12..16].copy_from_slice(&header.nx.to_le_bytes());
    head[16..20].copy_from_slice(&header.ny.to_le_bytes());
    head[20..24].copy_from_slice(&header.nz.to_le_bytes());
    head[24..28].copy_from_slice(&header.n_control.to_le_bytes());
    head[28..32].copy_from_slice(&header.n_treated.to_le_bytes());
    head[32..40].copy_from_slice(&header.n_permutations.to_le_bytes());
    writer.write_all(&head)?;

    for arr in arrays {
        for &v in arr.iter() {
            writer.write_all(&v.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Open a bundle file and validate its header and size.
pub fn open_mmap(path: &Path) -> Result<(BundleHeader, Mmap)> {
    let file = File::open(path)
        .with_context(|| format!("failed to open bundle {}", path.display()))?;
    let mmap = unsafe {
        Mmap::map(&file).with_context(|| format!("failed to mmap bundle {}", path.display()))?
    };
    if mmap.len() < HEADER_SIZE {
        bail!("bundle {} too small", path.display());
    }
    if mmap[0..8] != MAGIC {
        bail!("bundle {} has wrong magic", path.display());
    }
    let read_u32 = |at: usize| u32::from_le_bytes(mmap[at..at + 4].try_into().unwrap());
    let header = BundleHeader {
        version: read_u32(8),
        nx: read_u32(12),
        ny: read_u32(16),
        nz: read_u32(20),
        n_control: read_u32(24),
        n_treated: read_u32(28),
        n_permutations: u64::from_le_bytes(mmap[32..40].try_into().unwrap()),
    };
    if header.version != VERSION {
        bail!("bundle version {} unsupported", header.version);
    }
    if mmap.len() != header.expected_len() {
        bail!(
            "bundle size mismatch: expected {}, got {}",
            header.expected_len(),
            mmap.len()
        );
    }
    Ok((header, mmap))
}

/// View one bundle array as f32 values in x-major, then y, then z order.
pub fn array_slice<'a>(mmap: &'a Mmap, header: &BundleHeader, index: usize) -> &'a [f32] {
    assert!(index < ARRAY_NAMES.len(), "bundle array index out of range");
    let start = header.array_offset(index);
    let end = header.array_offset(index + 1);
    let bytes = &mmap[start..end];
    unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f32, bytes.len() / 4) }
}
