//! 4-connected adjacency graphs over the in-mask pixels of one slice.

use ndarray::ArrayView2;

/// Adjacency structure for the in-mask pixels of a single 2D slice.
///
/// Pixels are stored by their flat row-major index into the slice; the
/// neighbor table uses local indices (positions in `pixels`) in CSR form.
#[derive(Debug, Clone)]
pub struct SliceAdjacency {
    pixels: Vec<u32>,
    nbr_ptr: Vec<u32>,
    nbr_idx: Vec<u32>,
    edge_count: usize,
}

impl SliceAdjacency {
    /// Build the graph from one boolean mask slice. Two pixels are adjacent
    /// iff they are 4-connected grid neighbors and both in-mask.
    pub fn from_mask(mask: ArrayView2<u8>) -> Self {
        let (rows, cols) = mask.dim();
        let mut local = vec![u32::MAX; rows * cols];
        let mut pixels = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                if mask[[r, c]] != 0 {
                    let flat = r * cols + c;
                    local[flat] = pixels.len() as u32;
                    pixels.push(flat as u32);
                }
            }
        }

        let n = pixels.len();
        let mut degree = vec![0u32; n];
        let mut edges: Vec<(u32, u32)> = Vec::new();
        for (i, &flat) in pixels.iter().enumerate() {
            let flat = flat as usize;
            let (r, c) = (flat / cols, flat % cols);
            // right and down neighbors; each undirected edge recorded once
            if c + 1 < cols {
                let j = local[flat + 1];
                if j != u32::MAX {
                    edges.push((i as u32, j));
                }
            }
            if r + 1 < rows {
                let j = local[flat + cols];
                if j != u32::MAX {
                    edges.push((i as u32, j));
                }
            }
        }
        for &(a, b) in &edges {
            degree[a as usize] += 1;
            degree[b as usize] += 1;
        }

        let mut nbr_ptr = vec![0u32; n + 1];
        for i in 0..n {
            nbr_ptr[i + 1] = nbr_ptr[i] + degree[i];
        }
        let mut nbr_idx = vec![0u32; nbr_ptr[n] as usize];
        let mut cursor: Vec<u32> = nbr_ptr[..n].to_vec();
        for &(a, b) in &edges {
            nbr_idx[cursor[a as usize] as usize] = b;
            cursor[a as usize] += 1;
            nbr_idx[cursor[b as usize] as usize] = a;
            cursor[b as usize] += 1;
        }

        Self {
            pixels,
            nbr_ptr,
            nbr_idx,
            edge_count: edges.len(),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Flat row-major slice indices of the in-mask pixels, ascending.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Local indices of the neighbors of local pixel `i`.
    pub fn neighbors(&self, i: usize) -> &[u32] {
        let start = self.nbr_ptr[i] as usize;
        let end = self.nbr_ptr[i + 1] as usize;
        &self.nbr_idx[start..end]
    }
}
