use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "voxelperm", version, about = "Cluster-corrected permutation testing for volume cohorts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Run(RunArgs),
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long, help = "Directory of control-cohort volumes (.nii/.nii.gz, one per subject)")]
    pub control: PathBuf,

    #[arg(long, help = "Directory of treated-cohort volumes (.nii/.nii.gz, one per subject)")]
    pub treated: PathBuf,

    #[arg(long, help = "Reference brain mask volume on the cohorts' grid")]
    pub mask: PathBuf,

    #[arg(long)]
    pub out: PathBuf,

    #[arg(long, default_value_t = 1000, help = "Number of permutations (includes the observed labeling)")]
    pub n_perm: usize,

    #[arg(long, default_value_t = 0.0, help = "Gaussian smoothing FWHM in physical units (0 = none)")]
    pub fwhm: f32,

    #[arg(
        long,
        value_delimiter = ',',
        num_args = 3,
        help = "Voxel size x,y,z override (defaults to the NIfTI header spacing)"
    )]
    pub voxel_size: Option<Vec<f32>>,

    #[arg(long, default_value_t = 0.1, help = "TFCE threshold sweep start (> 0)")]
    pub tfce_start: f32,

    #[arg(long, default_value_t = 0.1, help = "TFCE threshold sweep step (> 0)")]
    pub tfce_step: f32,

    #[arg(long, default_value_t = 2.0, help = "TFCE height exponent")]
    pub tfce_h: f32,

    #[arg(long, default_value_t = 0.5, help = "TFCE extent exponent")]
    pub tfce_e: f32,

    #[arg(long, default_value_t = 0.0, help = "Step-down p threshold (0 = disabled)")]
    pub step_down_p: f32,

    #[arg(long, default_value_t = 95.0, help = "Percentile for the candidate effect mask")]
    pub mask_percentile: f32,

    #[arg(long, default_value_t = 0.9, help = "Fraction of CPU cores for slice workers")]
    pub cpu_load: f32,

    #[arg(long, default_value_t = 50, help = "Minimum in-mask voxels for a slice to be tested")]
    pub min_slice_voxels: usize,

    #[arg(long, default_value_t = 42, help = "RNG seed for permutation sampling")]
    pub seed: u64,

    #[arg(long, help = "Skip the binary result bundle (NIfTI outputs are always written)")]
    pub no_bundle: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(long, help = "Directory of control-cohort volumes")]
    pub control: PathBuf,

    #[arg(long, help = "Directory of treated-cohort volumes")]
    pub treated: PathBuf,

    #[arg(long, help = "Reference brain mask volume")]
    pub mask: PathBuf,
}
