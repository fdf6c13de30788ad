mod cli;
mod progress;

use std::error::Error;
use std::path::Path;

use clap::Parser;
use log::info;
use tracing_subscriber::EnvFilter;

use tomorec::utils::timing::Progress as Timer;
use tomorec::{read_config_file, EngineFactory, FrameReader, ModuleRegistry, ReconConfig, ReconEngine, RunStatus};

use cli::Cli;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut timer = Timer::new();
    timer.start("Reading configuration");
    let config = load(&args.config, &args)?;
    timer.done();

    rayon::ThreadPoolBuilder::new().num_threads(args.threads).build_global()?;
    let registry = ModuleRegistry::with_builtin_modules();
    let mut engine = build(&config, &registry)?;

    let status = engine.run()?;
    finish(&mut engine, &config, status, &args, &mut timer)?;

    for path in &args.rerun {
        let config = load(path, &args)?;
        info!("Rerunning with {}", path.display());
        if engine.check_modules(&config).is_err() {
            info!("Module chain changed: building a new engine");
            engine = build(&config, &registry)?;
        }
        engine.set_config(config.clone());
        let status = engine.run_3d(true)?;
        finish(&mut engine, &config, status, &args, &mut timer)?;
    }
    Ok(())
}

fn build(config: &ReconConfig, registry: &ModuleRegistry) -> Result<ReconEngine, Box<dyn Error>> {
    let interactor = progress::Progress::new(&config.projections.file_mask.display().to_string());
    Ok(EngineFactory::build_engine(config, registry, Box::new(FrameReader), Box::new(interactor))?)
}

fn load(path: &Path, args: &Cli) -> Result<ReconConfig, Box<dyn Error>> {
    let mut config = read_config_file(path)?;
    if let Some(n) = args.slice_block { config.backprojector.slice_block = n }
    if args.no_serialize { config.matrix.automatic_serialize = false }
    Ok(config)
}

fn finish(engine: &mut ReconEngine, config: &ReconConfig, status: RunStatus, args: &Cli, timer: &mut Timer)
          -> Result<(), Box<dyn Error>> {
    timer.done_with_message("Reconstruction");
    if status == RunStatus::Cancelled {
        println!("Reconstruction cancelled");
        return Ok(());
    }
    // Automatic serialization has already written the slices
    if !args.no_serialize && !config.matrix.automatic_serialize {
        timer.start(&format!("Writing slices to {}", config.matrix.destination.display()));
        engine.serialize(&config.matrix)?;
        timer.done();
    }
    for note in engine.diagnostics() { println!("  {note}") }
    Ok(())
}
