use std::path::PathBuf;
use std::time::Instant;

use ndarray::Array3;
use nifti::NiftiHeader;

use crate::arena::SliceArena;
use crate::stats::tfce::TfceParams;
use crate::volume::Volume;

/// Configuration for one cohort comparison.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub control_dir: PathBuf,
    pub treated_dir: PathBuf,
    pub mask_path: PathBuf,
    pub n_permutations: usize,
    pub fwhm: f32,
    pub voxel_size: Option<[f32; 3]>,
    pub tfce: TfceParams,
    pub step_down_p: f32,
    pub mask_percentile: f32,
    pub cpu_load: f32,
    pub t_min: usize,
    pub seed: u64,
    pub write_bundle: bool,
}

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub out_dir: PathBuf,
    pub summary_path: PathBuf,
    pub bundle_path: PathBuf,
    pub runtime_path: PathBuf,
    pub f_obs_buf_path: PathBuf,
    pub cluster_p_buf_path: PathBuf,
}

/// Wall-clock cost of one finished pipeline stage.
#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed_ms: u64,
}

/// Mutable state threaded through the pipeline stages.
pub struct Ctx {
    pub config: RunConfig,
    pub output: OutputPaths,

    // stage1: loaded inputs
    pub brain_mask: Option<Array3<f32>>,
    pub reference_header: Option<NiftiHeader>,
    pub shape: Option<(usize, usize, usize)>,
    pub control: Vec<Volume>,
    pub treated: Vec<Volume>,

    // stage2: normalized, mask-multiplied subject volumes
    pub control_norm: Vec<Array3<f32>>,
    pub treated_norm: Vec<Array3<f32>>,

    // stage3: cohort aggregates
    pub control_mean: Option<Array3<f32>>,
    pub control_std: Option<Array3<f32>>,
    pub treated_mean: Option<Array3<f32>>,
    pub treated_std: Option<Array3<f32>>,
    pub diff_mean: Option<Array3<f32>>,

    // stage4
    pub effect_mask: Option<Array3<u8>>,

    // stage5: disk-backed per-slice output buffers
    pub f_obs_arena: Option<SliceArena>,
    pub p_arena: Option<SliceArena>,
    pub tested_slices: usize,
    pub skipped_slices: usize,

    pub warnings: Vec<String>,
    pub stage_timings: Vec<StageTiming>,
    pub started: Instant,
    pub elapsed_seconds: Option<f64>,
}

impl Ctx {
    pub fn new(config: RunConfig, out_dir: PathBuf) -> Self {
        let summary_path = out_dir.join("summary.json");
        let bundle_path = out_dir.join("bundle.bin");
        let runtime_path = out_dir.join("runtime.log");
        let f_obs_buf_path = out_dir.join("f_obs.buf");
        let cluster_p_buf_path = out_dir.join("cluster_p.buf");
        Self {
            config,
            output: OutputPaths {
                out_dir,
                summary_path,
                bundle_path,
                runtime_path,
                f_obs_buf_path,
                cluster_p_buf_path,
            },
            brain_mask: None,
            reference_header: None,
            shape: None,
            control: Vec::new(),
            treated: Vec::new(),
            control_norm: Vec::new(),
            treated_norm: Vec::new(),
            control_mean: None,
            control_std: None,
            treated_mean: None,
            treated_std: None,
            diff_mean: None,
            effect_mask: None,
            f_obs_arena: None,
            p_arena: None,
            tested_slices: 0,
            skipped_slices: 0,
            warnings: Vec::new(),
            stage_timings: Vec::new(),
            started: Instant::now(),
            elapsed_seconds: None,
        }
    }

    /// Voxel spacing used for smoothing: the explicit config override when
    /// given, otherwise the spacing of the first control subject.
    pub fn spacing(&self) -> [f32; 3] {
        if let Some(vs) = self.config.voxel_size {
            return vs;
        }
        self.control
            .first()
            .map(|v| v.spacing)
            .unwrap_or([1.0, 1.0, 1.0])
    }
}
