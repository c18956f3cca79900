//! One parameterised run: build or restore a simulation, advance it, write
//! the daily summary and optionally checkpoint the result.

use std::collections::BTreeSet;
use std::path::PathBuf;

use nucovid_run::WriteOutcome;
use tracing::{info, warn};

use crate::error::{SimError, SimResult};
use crate::output::{DailySummary, write_summary};
use crate::parameters::{OVERRIDE_KEYS, Parameters};
use crate::simulation::Simulation;

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: Vec<DailySummary>,
    pub output_path: PathBuf,
    pub output: WriteOutcome,
    pub simulation: Simulation,
}

/// `supplied` names the parameter keys the caller set explicitly; it decides
/// which values replace restored ones. `default_seed` seeds day 0 of a fresh
/// run when `random_seeds` is not given.
pub fn run(
    params: &Parameters,
    supplied: &BTreeSet<String>,
    default_seed: Option<u64>,
) -> SimResult<RunOutcome> {
    if params.print_params {
        params.log();
    }

    let (mut sim, duration, seeds) = match &params.restore_from {
        Some(path) => {
            let mut sim = Simulation::restore(path)?;
            let overridden: Vec<&str> = OVERRIDE_KEYS
                .into_iter()
                .filter(|k| supplied.contains(*k))
                .collect();
            if !overridden.is_empty() {
                info!(?overridden, "overriding restored node parameters");
                for node in sim.nodes_mut() {
                    params.apply_overrides(node, supplied);
                    node.disease().validate()?;
                }
            }
            let seeds = params.explicit_seeds();
            if let Some(&seed) = seeds.get(&0) {
                info!(seed, "reseeding restored generator");
                sim.reseed(seed);
            }
            (sim, params.duration, seeds)
        }
        None => {
            let seeds = params.seed_schedule(default_seed);
            let seed = *seeds.get(&0).ok_or(SimError::MissingInitialSeed)?;
            let nodes = params.build_nodes()?;
            let mut sim = Simulation::new(nodes, params.contact_matrix()?, seed)?;
            sim.set_now(params.start_day);
            for (node, &k) in params.initial_infections.iter().enumerate() {
                sim.seed_infections(node, k)?;
            }
            info!(seed, start = params.start_day, "starting fresh run");
            (sim, params.duration - params.start_day, seeds)
        }
    };

    if !(duration >= 0.0) {
        warn!(duration, "nothing to simulate");
    }
    let summary = sim.run(duration.max(0.0), &seeds)?;

    let output_path = params.output_path();
    let output = write_summary(&output_path, &summary, params.overwrite_output)?;

    if let Some(path) = &params.save_to {
        sim.save(path)?;
    }

    Ok(RunOutcome {
        summary,
        output_path,
        output,
        simulation: sim,
    })
}
