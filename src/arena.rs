//! Disk-backed output buffers shared by the slice workers.
//!
//! One pre-sized temporary file per output volume, mapped mutably once and
//! split into per-slice chunks. Workers write to disjoint chunks only, so no
//! synchronization is needed beyond the split itself.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use memmap2::MmapMut;

pub struct SliceArena {
    path: PathBuf,
    mmap: MmapMut,
    slice_len: usize,
}

impl SliceArena {
    /// Create a zero-filled arena of `n_slices * slice_len` f32 values
    /// backed by a file at `path`.
    pub fn create(path: &Path, n_slices: usize, slice_len: usize) -> Result<Self> {
        if n_slices == 0 || slice_len == 0 {
            bail!("arena dimensions must be nonzero ({} x {})", n_slices, slice_len);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create arena file {}", path.display()))?;
        let bytes = (n_slices * slice_len * std::mem::size_of::<f32>()) as u64;
        file.set_len(bytes)
            .with_context(|| format!("failed to size arena file {}", path.display()))?;
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .with_context(|| format!("failed to mmap arena file {}", path.display()))?
        };
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            slice_len,
        })
    }

    pub fn slice_len(&self) -> usize {
        self.slice_len
    }

    pub fn as_f32(&self) -> &[f32] {
        let bytes: &[u8] = &self.mmap;
        unsafe {
            std::slice::from_raw_parts(bytes.as_ptr() as *const f32, bytes.len() / 4)
        }
    }

    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        let bytes: &mut [u8] = &mut self.mmap;
        unsafe {
            std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut f32, bytes.len() / 4)
        }
    }

    /// Drop the mapping and remove the backing file.
    pub fn release(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.mmap);
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove arena file {}", path.display()))
    }
}
