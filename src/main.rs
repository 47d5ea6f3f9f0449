//! Gray-Scott CLI - Run headless simulations from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::time::Instant;

use gray_scott::{
    compute::{ComputeBackend, CpuBackend, SimulationError, SimulationState, gpu::GpuBackend},
    schema::{BackendKind, RunConfig},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    if args.len() < 2 {
        eprintln!("Usage: {} <run.json> [frames]", args[0]);
        eprintln!();
        eprintln!("Run a headless Gray-Scott simulation from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  run.json  Path to run configuration file");
        eprintln!("  frames    Number of frames to step (overrides the config)");
        eprintln!();
        eprintln!("Example configuration is printed with the --example flag.");
        std::process::exit(1);
    }

    let mut config = RunConfig::load(&args[1]).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });
    if let Some(arg) = args.get(2) {
        config.frames = parse_frames(arg).unwrap_or_else(|e| {
            eprintln!("{}", e);
            std::process::exit(1);
        });
    }

    println!("Gray-Scott Simulation");
    println!("=====================");
    println!("Grid: {}x{}", config.width, config.height);
    println!("Backend: {:?}", config.backend);
    let reaction = &config.simulation.reaction;
    println!(
        "F = {}, k = {}, dt = {}",
        reaction.feed, reaction.kill, reaction.dt
    );
    println!("Frames: {}", config.frames);
    println!();

    let result = match config.backend {
        BackendKind::Cpu => drive(CpuBackend::new(), &config),
        BackendKind::Gpu => match GpuBackend::new_blocking() {
            Ok(backend) => drive(backend, &config),
            Err(e) => {
                eprintln!("Error creating GPU backend: {}", e);
                std::process::exit(1);
            }
        },
    };

    // Never continue after a fault; report and terminate
    if let Err(e) = result {
        eprintln!("Simulation failed: {}", e);
        std::process::exit(1);
    }
}

/// Step the simulation once per frame, consuming the U buffer each time.
fn drive<B: ComputeBackend>(backend: B, config: &RunConfig) -> Result<(), SimulationError> {
    let width = config.width;
    let height = config.height;
    let frames = config.frames;

    let mut state =
        SimulationState::with_backend(config.simulation.clone(), config.seed.clone(), backend);
    let mut frame = vec![0.0f32; width * height];

    let report_every = if config.report_every > 0 {
        config.report_every
    } else {
        (frames / 10).max(1)
    };

    println!("Running simulation...");
    let start = Instant::now();

    for i in 0..frames {
        state.step(width, height, &mut frame)?;

        if (i + 1) % report_every == 0 {
            let elapsed = start.elapsed().as_secs_f32();
            let frames_per_sec = (i + 1) as f32 / elapsed;
            let mean_u = frame.iter().map(|&u| u as f64).sum::<f64>() / frame.len() as f64;
            println!(
                "  Frame {}/{}: mean U={:.6}, {:.1} frames/s",
                i + 1,
                frames,
                mean_u,
                frames_per_sec
            );
        }
    }

    let elapsed = start.elapsed();

    if state.steps() == 0 {
        println!("No frames run.");
        return Ok(());
    }

    let stats = state.stats()?;

    println!();
    println!("Final state (t = {:.1}):", state.time());
    println!(
        "  U range: [{:.6}, {:.6}], mean {:.6}",
        stats.min_u, stats.max_u, stats.mean_u
    );
    println!(
        "  V range: [{:.6}, {:.6}], mean {:.6}",
        stats.min_v, stats.max_v, stats.mean_v
    );
    if !stats.all_finite {
        println!("  WARNING: fields contain non-finite values");
    }
    match serde_json::to_string(&stats) {
        Ok(json) => println!("  Stats: {}", json),
        Err(e) => eprintln!("Error serializing stats: {}", e),
    }
    println!();
    println!(
        "Time: {:.2}s ({:.1} frames/s)",
        elapsed.as_secs_f32(),
        frames as f32 / elapsed.as_secs_f32()
    );

    Ok(())
}

/// Parse the frame count override argument.
fn parse_frames(arg: &str) -> Result<u64, String> {
    arg.parse::<u64>()
        .map_err(|e| format!("Invalid frame count '{}': {}", arg, e))
}

fn print_example_config() {
    let config = RunConfig::default();

    println!("Example configuration (run.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing example: {}", e),
    }
}
