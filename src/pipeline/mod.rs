use anyhow::Result;
use std::time::Instant;
use tracing::{info, warn};

use crate::ctx::{Ctx, StageTiming};

pub mod stage0_scaffold;
pub mod stage1_input;
pub mod stage2_normalize;
pub mod stage3_aggregate;
pub mod stage4_mask;
pub mod stage5_cluster;
pub mod stage6_output;

pub trait Stage {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: &mut Ctx) -> Result<()>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn run(&self, ctx: &mut Ctx) -> Result<()> {
        for stage in &self.stages {
            let start = Instant::now();
            info!(stage = stage.name(), "stage started");
            if let Err(err) = stage.run(ctx) {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                warn!(stage = stage.name(), elapsed_ms, "stage failed");
                return Err(err);
            }
            let elapsed_ms = start.elapsed().as_millis() as u64;
            info!(stage = stage.name(), elapsed_ms, "stage finished");
            ctx.stage_timings.push(StageTiming {
                stage: stage.name(),
                elapsed_ms,
            });
        }
        Ok(())
    }
}
