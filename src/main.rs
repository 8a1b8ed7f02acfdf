use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use rusty_ramp::config::{RunConfig, RunPlan};
use rusty_ramp::output::OutputManager;
use rusty_ramp::pipeline::steps::{IPC, PHOTOM, RESAMPLE};
use rusty_ramp::pipeline::{Stage1Pipeline, Stage2Pipeline};

/// Run detector ramp calibration with column noise correction.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML run configuration.
    config_file: PathBuf,

    /// Resolve the configuration and print the plan without running anything.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let plan = RunConfig::load(&cli.config_file)?.resolve()?;

    if cli.dry_run {
        println!("{plan:#?}");
        return Ok(());
    }

    for dir in [&plan.stage1_dir, &plan.stage2_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    for input_file in &plan.input_files {
        if plan.run_stage1 {
            run_stage1(&plan, input_file)?;
        }
        if plan.run_stage2 {
            run_stage2(&plan, input_file)?;
        }
    }
    info!("Processed {} input file(s)", plan.input_files.len());
    Ok(())
}

fn run_stage1(plan: &RunPlan, input_file: &Path) -> Result<()> {
    let mut pipe = Stage1Pipeline::new(OutputManager::new(&plan.stage1_dir));
    pipe.save_results = true;
    if let Some(ipc) = pipe.step_mut(IPC) {
        ipc.settings_mut().skip = true;
    }
    pipe.run(
        input_file,
        plan.steps_stage1.clone(),
        plan.stage1_config.as_ref(),
    )
    .with_context(|| format!("Stage 1 failed on {}", input_file.display()))?;
    Ok(())
}

fn run_stage2(plan: &RunPlan, input_file: &Path) -> Result<()> {
    let mut pipe = Stage2Pipeline::new(OutputManager::new(&plan.stage2_dir));
    pipe.save_results = true;
    for name in [PHOTOM, RESAMPLE] {
        if let Some(step) = pipe.step_mut(name) {
            step.settings_mut().skip = true;
        }
    }
    let inputs = plan.stage2_inputs(input_file);
    pipe.run(inputs, plan.steps_stage2.clone(), plan.stage2_config.as_ref())
        .with_context(|| format!("Stage 2 failed on products of {}", input_file.display()))?;
    Ok(())
}
