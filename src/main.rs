//! Headless flock runner.
//!
//! ```text
//! boidgrid [agents] [steps] [naive|scattered|coherent] [cpu|gpu]
//! ```
//!
//! Defaults to 5000 agents, 100 coherent steps on the CPU. Set `RUST_LOG=debug`
//! for per-step timings.

use std::process::ExitCode;

use boidgrid::prelude::*;

struct Args {
    agents: u32,
    steps: u64,
    search: NeighborSearch,
    gpu: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let agents = match args.next() {
        Some(a) => a.parse().map_err(|e| format!("agents '{}': {}", a, e))?,
        None => 5_000,
    };
    let steps = match args.next() {
        Some(s) => s.parse().map_err(|e| format!("steps '{}': {}", s, e))?,
        None => 100,
    };
    let search = match args.next() {
        Some(s) => s.parse().map_err(|e: FlockError| e.to_string())?,
        None => NeighborSearch::Coherent,
    };
    let gpu = match args.next().as_deref() {
        None | Some("cpu") => false,
        Some("gpu") => true,
        Some(other) => return Err(format!("unknown backend '{}', use cpu or gpu", other)),
    };
    Ok(Args {
        agents,
        steps,
        search,
        gpu,
    })
}

fn run(args: Args) -> Result<(), FlockError> {
    let config = FlockConfig::default().with_agent_count(args.agents);

    let mut flock: Box<dyn FlockBackend> = if args.gpu {
        let ctx = GpuContext::new_blocking()?;
        Box::new(GpuFlock::initialize(&ctx, config)?)
    } else {
        Box::new(Flock::initialize(config)?)
    };

    let mut summary = TimingSummary::new();
    for step in 0..args.steps {
        let start = std::time::Instant::now();
        flock.step(args.search, 1.0)?;
        summary.record(&StepTiming {
            step,
            search: args.search,
            total: start.elapsed(),
            stages: Vec::new(),
        });
    }

    let snapshot = flock.snapshot()?;
    let total_speed: f32 = snapshot.velocities.iter().map(|v| v.length()).sum();
    let mean_speed = total_speed / snapshot.len() as f32;
    log::info!(
        "{} agents, {} search on {}: {}",
        args.agents,
        args.search,
        if args.gpu { "gpu" } else { "cpu" },
        summary
    );
    let steps = flock.steps_taken();
    log::info!("mean speed after {} steps: {:.4}", steps, mean_speed);

    flock.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("usage: boidgrid [agents] [steps] [naive|scattered|coherent] [cpu|gpu]");
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
