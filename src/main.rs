use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use voxelperm::cli::{Cli, Commands, RunArgs, ValidateArgs};
use voxelperm::ctx::{Ctx, RunConfig};
use voxelperm::pipeline::Pipeline;
use voxelperm::pipeline::stage0_scaffold::Stage0Scaffold;
use voxelperm::pipeline::stage1_input::Stage1Input;
use voxelperm::pipeline::stage2_normalize::Stage2Normalize;
use voxelperm::pipeline::stage3_aggregate::Stage3Aggregate;
use voxelperm::pipeline::stage4_mask::Stage4Mask;
use voxelperm::pipeline::stage5_cluster::Stage5Cluster;
use voxelperm::pipeline::stage6_output::Stage6Output;
use voxelperm::stats::tfce::TfceParams;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Validate(args) => validate(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let config = build_config(&args)?;
    let mut ctx = Ctx::new(config, args.out);

    let pipeline = Pipeline::new(vec![
        Box::new(Stage0Scaffold::new()),
        Box::new(Stage1Input::new()),
        Box::new(Stage2Normalize::new()),
        Box::new(Stage3Aggregate::new()),
        Box::new(Stage4Mask::new()),
        Box::new(Stage5Cluster::new()),
        Box::new(Stage6Output::new()),
    ]);
    pipeline.run(&mut ctx)?;

    print_summary(&ctx);
    Ok(())
}

fn validate(args: ValidateArgs) -> Result<()> {
    let config = RunConfig {
        control_dir: args.control,
        treated_dir: args.treated,
        mask_path: args.mask,
        n_permutations: 1,
        fwhm: 0.0,
        voxel_size: None,
        tfce: TfceParams::default(),
        step_down_p: 0.0,
        mask_percentile: 95.0,
        cpu_load: 1.0,
        t_min: 50,
        seed: 0,
        write_bundle: true,
    };
    let mut ctx = Ctx::new(config, std::path::PathBuf::from("."));
    let pipeline = Pipeline::new(vec![Box::new(Stage1Input::new())]);
    pipeline.run(&mut ctx)?;

    let shape = ctx.shape.unwrap_or((0, 0, 0));
    println!("voxelperm validate ok");
    println!("control subjects: {}", ctx.control.len());
    println!("treated subjects: {}", ctx.treated.len());
    println!("volume shape: {}x{}x{}", shape.0, shape.1, shape.2);
    Ok(())
}

fn build_config(args: &RunArgs) -> Result<RunConfig> {
    if args.n_perm == 0 {
        anyhow::bail!("--n-perm must be at least 1");
    }
    if args.tfce_start <= 0.0 || args.tfce_step <= 0.0 {
        anyhow::bail!("TFCE start and step must both be positive");
    }
    if !(0.0..=100.0).contains(&args.mask_percentile) {
        anyhow::bail!("--mask-percentile must lie in [0, 100]");
    }
    if args.cpu_load <= 0.0 || args.cpu_load > 1.0 {
        anyhow::bail!("--cpu-load must lie in (0, 1]");
    }
    let voxel_size = match &args.voxel_size {
        Some(vs) => Some([vs[0], vs[1], vs[2]]),
        None => None,
    };
    Ok(RunConfig {
        control_dir: args.control.clone(),
        treated_dir: args.treated.clone(),
        mask_path: args.mask.clone(),
        n_permutations: args.n_perm,
        fwhm: args.fwhm,
        voxel_size,
        tfce: TfceParams {
            start: args.tfce_start,
            step: args.tfce_step,
            h_power: args.tfce_h,
            e_power: args.tfce_e,
        },
        step_down_p: args.step_down_p,
        mask_percentile: args.mask_percentile,
        cpu_load: args.cpu_load,
        t_min: args.min_slice_voxels,
        seed: args.seed,
        write_bundle: !args.no_bundle,
    })
}

fn print_summary(ctx: &Ctx) {
    println!(
        "voxelperm run complete: {} slices tested, {} skipped",
        ctx.tested_slices, ctx.skipped_slices
    );
    println!("outputs: {}", ctx.output.out_dir.display());
    if let Some(elapsed) = ctx.elapsed_seconds {
        println!("elapsed: {:.3} s", elapsed);
    }
    if !ctx.warnings.is_empty() {
        println!("warnings:");
        for warning in &ctx.warnings {
            println!("- {}", warning);
        }
    }
}
