use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use nucovid::{Parameters, SimError, runner};
use nucovid_run::{EnvError, Environment};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Event-driven stochastic epidemic simulator.
///
/// Parameters come from an inline JSON map, a JSON or TOML file, or a JSON
/// envelope on stdin. Anything not given keeps its calibrated default.
#[derive(Parser, Debug)]
#[command(name = "nucovid")]
#[command(version, about, long_about = None)]
struct Args {
    /// Inline JSON parameter map, e.g. '{"duration": 120}'
    params: Option<String>,

    /// Read parameters from a .json or .toml file
    #[arg(long, conflicts_with_all = ["params", "stdin"])]
    params_file: Option<PathBuf>,

    /// Read a JSON envelope ({"input": {...}, "seed": n}) from stdin
    #[arg(long, conflicts_with = "params")]
    stdin: bool,

    /// Seed for day 0 when `random_seeds` is not given. Drawn at random when
    /// omitted.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,nucovid=info")),
        )
        .init();

    let args = Args::parse();

    let env = match load_environment(&args) {
        Ok(env) => env,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    let supplied: BTreeSet<String> = env.input_json().keys().cloned().collect();
    let seed = args.seed.or(env.seed);
    let Some(params) = env.input else {
        error!("parameters were not decoded");
        return ExitCode::from(2);
    };

    let default_seed = match (params.random_seeds.is_some(), seed) {
        (false, None) => {
            let drawn: u64 = rand::random();
            info!(seed = drawn, "no seed supplied, drew one");
            Some(drawn)
        }
        (_, seed) => seed,
    };

    match runner::run(&params, &supplied, default_seed) {
        Ok(outcome) => {
            info!(
                path = %outcome.output_path.display(),
                rows = outcome.summary.len(),
                now = outcome.simulation.now(),
                "run complete"
            );
            ExitCode::SUCCESS
        }
        Err(e @ (SimError::InvalidParameter { .. } | SimError::MissingInitialSeed)) => {
            error!("{e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_environment(args: &Args) -> Result<Environment<Parameters>, EnvError> {
    let env = if let Some(path) = &args.params_file {
        Environment::from_path(path)?
    } else if args.stdin {
        Environment::from_stdin()?
    } else {
        Environment::from_json_str(args.params.as_deref().unwrap_or_default())?
    };
    env.with_input_type::<Parameters>()
}
