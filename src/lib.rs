//! voxelperm: cluster-corrected permutation testing for volume cohorts
//!
//! Compares two cohorts of co-registered 3D density volumes and finds the
//! spatial regions that differ between them, using a nonparametric
//! permutation test with threshold-free cluster enhancement (TFCE).
//!
//! # Modules
//! - `volume`: NIfTI I/O, Gaussian smoothing, volume containers
//! - `stats`: adjacency graphs, TFCE, the per-slice permutation tester
//! - `arena`: disk-backed shared output buffers for parallel slice workers
//! - `pipeline`: the staged batch pipeline from input discovery to outputs
//! - `io`: binary result bundle and JSON run summary

pub mod arena;
pub mod cli;
pub mod ctx;
pub mod io;
pub mod pipeline;
pub mod stats;
pub mod volume;
