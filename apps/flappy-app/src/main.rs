//! Flappy MPC command-line front end.
//!
//! Provides three modes of operation:
//! - `plan`: Run one control step for a given state and print it as JSON
//! - `bench`: Repeat the same control step and report solve timings
//! - `info`: Print the effective controller configuration as TOML

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use flappy_core::prelude::*;
use flappy_mpc::{MipBackend, MpcController};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Receding-horizon flap controller.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Controller configuration file (TOML). Defaults are used when absent.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one control step and print the output as JSON.
    Plan(Scenario),

    /// Repeat one control step and report solve timings.
    Bench {
        #[command(flatten)]
        scenario: Scenario,

        /// Number of solves.
        #[arg(short = 'n', long, default_value_t = 20)]
        iterations: u32,
    },

    /// Print the effective configuration.
    Info,
}

/// Bird state and obstacle snapshot for one frame.
#[derive(Args)]
struct Scenario {
    /// Vertical position.
    #[arg(long, default_value_t = 200.0)]
    y: f64,

    /// Vertical velocity (positive is falling).
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    vy: f64,

    /// Pipe pair as `x,y` (top edge of the lower pipe). Repeatable.
    #[arg(short, long = "obstacle")]
    obstacles: Vec<Obstacle>,
}

impl Scenario {
    const fn state(&self) -> BirdState {
        BirdState::new(self.y, self.vy)
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<ControllerConfig, FlappyError> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            Ok(ControllerConfig::from_file(path)?)
        }
        None => Ok(ControllerConfig::default()),
    }
}

fn run_plan(config: ControllerConfig, scenario: &Scenario) -> CliResult {
    let mut controller = MpcController::with_default_backend(config)?;
    let output = controller.step(scenario.state(), &scenario.obstacles);
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_bench(config: ControllerConfig, scenario: &Scenario, iterations: u32) -> CliResult {
    let mut controller = MpcController::with_default_backend(config)?;
    info!(
        iterations,
        horizon = controller.config().horizon,
        obstacles = scenario.obstacles.len(),
        "benchmarking"
    );

    let mut timings = Vec::with_capacity(iterations as usize);
    let mut degraded = 0_u32;
    for _ in 0..iterations {
        // Drop the retained plan so every iteration starts cold.
        controller.reset();
        let start = Instant::now();
        let output = controller.step(scenario.state(), &scenario.obstacles);
        timings.push(start.elapsed());
        if output.is_degraded() {
            degraded += 1;
            info!(source = ?output.source, "solve did not succeed");
        }
    }

    let (Some(min), Some(max)) = (timings.iter().min(), timings.iter().max()) else {
        println!("no iterations run");
        return Ok(());
    };
    let mean = timings.iter().sum::<Duration>() / iterations;

    println!("backend:    {}", controller.backend().name());
    println!("iterations: {iterations}");
    println!("degraded:   {degraded}");
    println!("min:        {min:?}");
    println!("mean:       {mean:?}");
    println!("max:        {max:?}");
    Ok(())
}

fn run_info(config: &ControllerConfig) -> CliResult {
    println!("flappy v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  flappy-core {}", env!("CARGO_PKG_VERSION"));
    println!("  flappy-mpc  {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("bird diagonal: {:.3}", config.geometry.bird_diagonal());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result: CliResult = load_config(cli.config.as_deref())
        .map_err(Into::into)
        .and_then(|config| match cli.command {
            Some(Commands::Plan(scenario)) => run_plan(config, &scenario),
            Some(Commands::Bench {
                scenario,
                iterations,
            }) => run_bench(config, &scenario, iterations),
            Some(Commands::Info) | None => run_info(&config),
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
