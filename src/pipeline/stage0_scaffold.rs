//! Output scaffolding: create the run directory and discard partial
//! buffers left behind by an aborted previous run (runs are never resumed).

use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::ctx::Ctx;
use crate::pipeline::Stage;

pub struct Stage0Scaffold;

impl Stage0Scaffold {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stage0Scaffold {
    fn name(&self) -> &'static str {
        "stage0_scaffold"
    }

    fn run(&self, ctx: &mut Ctx) -> Result<()> {
        fs::create_dir_all(&ctx.output.out_dir)?;
        info!(
            out_dir = %ctx.output.out_dir.display(),
            "output_dir_ready"
        );

        remove_stale_buffer(&ctx.output.f_obs_buf_path);
        remove_stale_buffer(&ctx.output.cluster_p_buf_path);
        Ok(())
    }
}

fn remove_stale_buffer(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => info!(buf = %path.display(), "stale_buffer_removed"),
        Err(err) => warn!(buf = %path.display(), error = %err, "failed to remove stale buffer"),
    }
}
