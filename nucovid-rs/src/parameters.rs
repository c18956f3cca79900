use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::contacts::ContactMatrix;
use crate::error::{SimError, SimResult};
use crate::node::{DiseaseParameters, HazardRates, Node};
use crate::simulation::SeedSchedule;
use crate::time_series::{AnchorPoint, Interpolation, TimeSeries, stack};

const fn ap(day: u32, value: f64) -> AnchorPoint {
    AnchorPoint::new(day, value)
}

/// Relative transmission rate over the first year in Chicago.
const KI_ANCHORS: [AnchorPoint; 15] = [
    ap(0, 1.0),
    ap(28, 0.6263),
    ap(33, 0.3526),
    ap(37, 0.09),
    ap(68, 0.07),
    ap(98, 0.07),
    ap(129, 0.11),
    ap(163, 0.11),
    ap(217, 0.13),
    ap(237, 0.198),
    ap(272, 0.115),
    ap(311, 0.117),
    ap(342, 0.1156),
    ap(368, 0.1223),
    ap(400, 0.1223),
];

const HOSPITAL_RECOVERY_ANCHORS: [AnchorPoint; 3] = [
    ap(0, 1.0 / 5.78538),
    ap(270, 1.0 / 4.7),
    ap(400, 1.0 / 4.7),
];

/// Probability a hospitalised case becomes critical and recovers.
const CRITICAL_SURVIVED_ANCHORS: [AnchorPoint; 12] = [
    ap(0, 0.4947),
    ap(48, 0.407469),
    ap(62, 0.353127),
    ap(78, 0.269715),
    ap(109, 0.147316),
    ap(139, 0.218698),
    ap(170, 0.187974),
    ap(201, 0.11607),
    ap(231, 0.165855),
    ap(262, 0.095312),
    ap(311, 0.071865),
    ap(400, 0.071865),
];

/// Probability a hospitalised case becomes critical and dies.
const CRITICAL_DIED_ANCHORS: [AnchorPoint; 11] = [
    ap(0, 0.2033),
    ap(78, 0.28328),
    ap(109, 0.181298),
    ap(139, 0.098412),
    ap(170, 0.068856),
    ap(201, 0.126608),
    ap(231, 0.163615),
    ap(262, 0.193386),
    ap(292, 0.155985),
    ap(323, 0.029525),
    ap(400, 0.029525),
];

const DETECT_MILD_ANCHORS: [AnchorPoint; 10] = [
    ap(0, 0.000630373),
    ap(48, 0.03520381),
    ap(78, 0.08413338),
    ap(109, 0.1474772),
    ap(139, 0.1528583),
    ap(170, 0.1064565),
    ap(201, 0.1514133),
    ap(231, 0.1608695),
    ap(262, 0.4160216),
    ap(400, 0.4160216),
];

const DETECT_SEVERE_ANCHORS: [AnchorPoint; 10] = [
    ap(0, 0.009849325),
    ap(31, 0.1456243),
    ap(48, 0.5841068),
    ap(78, 0.6877389),
    ap(109, 0.9820229),
    ap(139, 0.5239712),
    ap(170, 0.5520378),
    ap(201, 0.7033732),
    ap(231, 0.881767),
    ap(400, 0.881767),
];

const RECOVERY_TABLE_DAYS: usize = 400;
const ASYMPTOMATIC_DIVISOR: f64 = 3.677037;
const SYMPTOM_DIVISOR: f64 = 3.409656;

/// Keys that, when given explicitly, replace the matching values of nodes
/// restored from a checkpoint.
pub const OVERRIDE_KEYS: [&str; 7] = [
    "nmrtr_Kasymp",
    "nmrtr_Kmild",
    "frac_infectiousness_As",
    "frac_infectiousness_det",
    "ini_Ki",
    "Ki_ap",
    "Ki_interpolation",
];

/// Run parameters. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    pub output_directory: PathBuf,
    pub output_filename: String,
    pub overwrite_output: bool,
    pub populations: Vec<u64>,
    /// Row = source node, column = destination node.
    pub contact_matrix: Vec<Vec<f64>>,
    pub initial_infections: Vec<u64>,
    /// Simulated time at which a fresh run begins.
    pub start_day: f64,
    #[serde(rename = "nmrtr_Kasymp")]
    pub asymptomatic_numerator: f64,
    #[serde(rename = "nmrtr_Kmild")]
    pub mild_numerator: f64,
    #[serde(rename = "ini_Ki")]
    pub initial_ki: f64,
    #[serde(rename = "Ki_ap")]
    pub ki_anchors: Vec<AnchorPoint>,
    #[serde(rename = "Ki_interpolation")]
    pub ki_interpolation: Interpolation,
    #[serde(rename = "frac_infectiousness_As")]
    pub infectiousness_asymptomatic: f64,
    #[serde(rename = "frac_infectiousness_det")]
    pub infectiousness_detected: f64,
    /// Fresh run: the day the run ends. Restored run: days to add.
    pub duration: f64,
    pub print_params: bool,
    /// `[day, seed]` pairs. When absent, day 0 gets the run environment seed.
    pub random_seeds: Option<Vec<(u32, u64)>>,
    pub save_to: Option<PathBuf>,
    pub restore_from: Option<PathBuf>,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            output_directory: PathBuf::from("./"),
            output_filename: "daily_output.txt".to_string(),
            overwrite_output: false,
            populations: vec![2_500_000],
            contact_matrix: vec![vec![1.0]],
            initial_infections: vec![10],
            start_day: 9.0,
            asymptomatic_numerator: 0.4066,
            mild_numerator: 0.921,
            initial_ki: 1.0522,
            ki_anchors: KI_ANCHORS.to_vec(),
            ki_interpolation: Interpolation::Stepwise,
            infectiousness_asymptomatic: 0.8,
            infectiousness_detected: 0.00733,
            duration: 371.0,
            print_params: false,
            random_seeds: None,
            save_to: None,
            restore_from: None,
        }
    }
}

impl Parameters {
    pub fn output_path(&self) -> PathBuf {
        self.output_directory.join(&self.output_filename)
    }

    pub fn transmission(&self) -> TimeSeries {
        TimeSeries::build(&self.ki_anchors, self.ki_interpolation).scaled(self.initial_ki)
    }

    /// The calibrated disease course, with the tunable rates and multipliers
    /// taken from these parameters.
    pub fn build_disease(&self) -> DiseaseParameters {
        let rates = HazardRates {
            asymptomatic: self.asymptomatic_numerator / ASYMPTOMATIC_DIVISOR,
            presymptomatic: 0.5934 / ASYMPTOMATIC_DIVISOR,
            mild: self.mild_numerator / SYMPTOM_DIVISOR,
            severe: 0.079 / SYMPTOM_DIVISOR,
            hospitalization: 1.0 / 4.076704,
            critical: 1.0 / 5.592791,
            death: 1.0 / 5.459323,
        };

        let days = RECOVERY_TABLE_DAYS;
        let recovery = stack([
            &TimeSeries::constant(1.0 / 9.0, days),
            &TimeSeries::constant(1.0 / 9.0, days),
            &TimeSeries::stepwise(&HOSPITAL_RECOVERY_ANCHORS),
            &TimeSeries::constant(1.0 / 9.671261, days),
            &TimeSeries::constant(1.0 / 2.194643, days),
        ]);

        // Calibrated as two absolute outcomes of a hospital stay; the engine
        // wants P(critical) and P(death | critical).
        let survived = TimeSeries::stepwise(&CRITICAL_SURVIVED_ANCHORS);
        let died = TimeSeries::stepwise(&CRITICAL_DIED_ANCHORS);
        let p_critical = survived.zip_with(&died, |s, d| s + d);
        let p_death = survived.zip_with(&died, |s, d| d / (s + d));

        let mild = TimeSeries::stepwise(&DETECT_MILD_ANCHORS);
        let severe = TimeSeries::stepwise(&DETECT_SEVERE_ANCHORS);
        let unsymptomatic = mild.scaled(1.0 / 6.0);
        let detection = stack([&unsymptomatic, &unsymptomatic, &mild, &severe]);

        DiseaseParameters {
            transmission: self.transmission(),
            rates,
            recovery,
            p_critical,
            p_death,
            detection,
            infectiousness_asymptomatic: self.infectiousness_asymptomatic,
            infectiousness_detected: self.infectiousness_detected,
            detection_delay: [1.904861, 7.0, 2.0],
        }
    }

    pub fn build_nodes(&self) -> SimResult<Vec<Node>> {
        if self.populations.is_empty() {
            return Err(SimError::InvalidParameter {
                name: "populations",
                reason: "at least one node is required".to_string(),
            });
        }
        if self.initial_infections.len() != self.populations.len() {
            return Err(SimError::InvalidParameter {
                name: "initial_infections",
                reason: format!(
                    "{} entries for {} nodes",
                    self.initial_infections.len(),
                    self.populations.len()
                ),
            });
        }
        let disease = self.build_disease();
        Ok(self
            .populations
            .iter()
            .enumerate()
            .map(|(id, &population)| Node::new(id, population, disease.clone()))
            .collect())
    }

    pub fn contact_matrix(&self) -> SimResult<ContactMatrix> {
        ContactMatrix::from_rows(&self.contact_matrix)
    }

    /// Reseed schedule for a fresh run. Without an explicit list, day 0 is
    /// seeded from `default_seed`.
    pub fn seed_schedule(&self, default_seed: Option<u64>) -> SeedSchedule {
        match &self.random_seeds {
            Some(_) => self.explicit_seeds(),
            None => default_seed.map(|s| (0, s)).into_iter().collect(),
        }
    }

    /// Only the reseeds the caller listed.
    pub fn explicit_seeds(&self) -> SeedSchedule {
        self.random_seeds
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    /// Replaces the values of a restored node that the caller set explicitly.
    /// Anything not supplied keeps its checkpointed value.
    pub fn apply_overrides(&self, node: &mut Node, supplied: &BTreeSet<String>) {
        let given = |key: &str| supplied.contains(key);
        let disease = node.disease_mut();
        if given("nmrtr_Kasymp") {
            disease.rates.asymptomatic = self.asymptomatic_numerator / ASYMPTOMATIC_DIVISOR;
        }
        if given("nmrtr_Kmild") {
            disease.rates.mild = self.mild_numerator / SYMPTOM_DIVISOR;
        }
        if given("frac_infectiousness_As") {
            disease.infectiousness_asymptomatic = self.infectiousness_asymptomatic;
        }
        if given("frac_infectiousness_det") {
            disease.infectiousness_detected = self.infectiousness_detected;
        }
        if given("ini_Ki") || given("Ki_ap") || given("Ki_interpolation") {
            disease.transmission = self.transmission();
        }
    }

    /// Logs every effective parameter, one event per key.
    pub fn log(&self) {
        let Ok(serde_json::Value::Object(map)) = serde_json::to_value(self) else {
            return;
        };
        for (key, value) in map {
            info!(%key, %value, "parameter");
        }
    }
}
