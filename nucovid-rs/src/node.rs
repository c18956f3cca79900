use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::time_series::{TimeSeries, clamped};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compartment {
    Susceptible,
    Exposed,
    Asymptomatic,
    Presymptomatic,
    Mild,
    Severe,
    Hospitalized,
    /// Back on a ward after a critical episode, waiting to recover.
    HospitalizedPostCritical,
    Critical,
    Death,
    Resistant,
}

impl Compartment {
    pub const COUNT: usize = 11;

    pub const ALL: [Compartment; Compartment::COUNT] = [
        Compartment::Susceptible,
        Compartment::Exposed,
        Compartment::Asymptomatic,
        Compartment::Presymptomatic,
        Compartment::Mild,
        Compartment::Severe,
        Compartment::Hospitalized,
        Compartment::HospitalizedPostCritical,
        Compartment::Critical,
        Compartment::Death,
        Compartment::Resistant,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Columns of the recovery hazard table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPath {
    Asymptomatic = 0,
    Mild = 1,
    Hospital = 2,
    Critical = 3,
    PostCritical = 4,
}

/// Columns of the detection probability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPath {
    Asymptomatic = 0,
    Presymptomatic = 1,
    Mild = 2,
    Severe = 3,
}

/// Paths that carry a mean delay between onset and detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPath {
    Asymptomatic = 0,
    Mild = 1,
    Severe = 2,
}

/// Constant hazard rates (per day).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HazardRates {
    /// E -> A
    pub asymptomatic: f64,
    /// E -> P
    pub presymptomatic: f64,
    /// P -> mild
    pub mild: f64,
    /// P -> severe
    pub severe: f64,
    /// severe -> hospital
    pub hospitalization: f64,
    /// hospital -> critical
    pub critical: f64,
    /// critical -> death
    pub death: f64,
}

/// Everything about the disease course in one population group. Per-day
/// tables are indexed by simulated day and clamp past their last day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseParameters {
    /// Ki, the contact hazard of one infectious individual.
    pub transmission: TimeSeries,
    pub rates: HazardRates,
    /// `[day][RecoveryPath]`
    pub recovery: Vec<[f64; 5]>,
    pub p_critical: TimeSeries,
    pub p_death: TimeSeries,
    /// `[day][DetectionPath]`
    pub detection: Vec<[f64; 4]>,
    pub infectiousness_asymptomatic: f64,
    pub infectiousness_detected: f64,
    /// Mean onset-to-detection delay in days, by `DelayPath`.
    pub detection_delay: [f64; 3],
}

impl DiseaseParameters {
    /// Rejects parameter sets under which a course could never end: every
    /// hazard that closes a path must be finite and positive, and a mean
    /// delay must be shorter than the mean sojourn it is carved out of.
    pub fn validate(&self) -> SimResult<()> {
        for (path, delay) in self.detection_delay.iter().enumerate() {
            if !(delay.is_finite() && *delay > 0.0) {
                return Err(SimError::InvalidParameter {
                    name: "detection_delay",
                    reason: format!("delay for path {path} must be finite and positive, got {delay}"),
                });
            }
        }

        let r = &self.rates;
        let closing = [
            ("hospitalization", r.hospitalization),
            ("critical", r.critical),
            ("death", r.death),
        ];
        for (name, rate) in closing {
            if !is_hazard(rate) {
                return Err(SimError::InvalidParameter {
                    name,
                    reason: format!("rate must be finite and positive, got {rate}"),
                });
            }
        }
        let duels = [
            ("presymptomatic", r.presymptomatic, r.asymptomatic),
            ("mild", r.mild, r.severe),
        ];
        for (name, a, b) in duels {
            if !(is_hazard(a) || is_hazard(b)) || !(a.is_finite() && b.is_finite()) {
                return Err(SimError::InvalidParameter {
                    name,
                    reason: format!("competing rates {a} and {b} leave no way out"),
                });
            }
        }

        if self.recovery.is_empty() {
            return Err(SimError::InvalidParameter {
                name: "recovery",
                reason: "table is empty".to_string(),
            });
        }
        let delayed = [
            (RecoveryPath::Asymptomatic, DelayPath::Asymptomatic),
            (RecoveryPath::Mild, DelayPath::Mild),
        ];
        for (day, row) in self.recovery.iter().enumerate() {
            if let Some(rate) = row.iter().find(|&&rate| !is_hazard(rate)) {
                return Err(SimError::InvalidParameter {
                    name: "recovery",
                    reason: format!("day {day}: rate must be finite and positive, got {rate}"),
                });
            }
            for (rec, delay) in delayed {
                let mean = 1.0 / row[rec as usize];
                if mean <= self.detection_delay[delay as usize] {
                    return Err(SimError::InvalidParameter {
                        name: "recovery",
                        reason: format!(
                            "day {day}: mean recovery {mean} for {rec:?} does not exceed detection delay {}",
                            self.detection_delay[delay as usize]
                        ),
                    });
                }
            }
        }
        let mean_hosp = 1.0 / self.rates.hospitalization;
        if mean_hosp <= self.detection_delay[DelayPath::Severe as usize] {
            return Err(SimError::InvalidParameter {
                name: "hospitalization",
                reason: format!(
                    "mean time to hospital {mean_hosp} does not exceed detection delay {}",
                    self.detection_delay[DelayPath::Severe as usize]
                ),
            });
        }
        Ok(())
    }
}

fn is_hazard(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

/// One population group. Compartment counters always sum to `population`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    pub population: u64,
    disease: DiseaseParameters,
    counts: [u64; Compartment::COUNT],
    cumulative_symptomatic: u64,
    cumulative_admissions: u64,
    introduced: u64,
}

impl Node {
    pub fn new(id: usize, population: u64, disease: DiseaseParameters) -> Node {
        let mut node = Node {
            id,
            population,
            disease,
            counts: [0; Compartment::COUNT],
            cumulative_symptomatic: 0,
            cumulative_admissions: 0,
            introduced: 0,
        };
        node.reset();
        node
    }

    /// Everyone susceptible, all cumulative counters zero.
    pub fn reset(&mut self) {
        self.counts = [0; Compartment::COUNT];
        self.counts[Compartment::Susceptible.index()] = self.population;
        self.cumulative_symptomatic = 0;
        self.cumulative_admissions = 0;
        self.introduced = 0;
    }

    pub fn disease(&self) -> &DiseaseParameters {
        &self.disease
    }

    pub(crate) fn disease_mut(&mut self) -> &mut DiseaseParameters {
        &mut self.disease
    }

    pub fn ki(&self, day: usize) -> f64 {
        self.disease.transmission.at(day)
    }

    pub fn rates(&self) -> &HazardRates {
        &self.disease.rates
    }

    pub fn recovery_rate(&self, day: usize, path: RecoveryPath) -> f64 {
        clamped(&self.disease.recovery, day).map_or(0.0, |row| row[path as usize])
    }

    pub fn p_critical(&self, day: usize) -> f64 {
        self.disease.p_critical.at(day)
    }

    pub fn p_death(&self, day: usize) -> f64 {
        self.disease.p_death.at(day)
    }

    pub fn p_detect(&self, day: usize, path: DetectionPath) -> f64 {
        clamped(&self.disease.detection, day).map_or(0.0, |row| row[path as usize])
    }

    pub fn detection_delay(&self, path: DelayPath) -> f64 {
        self.disease.detection_delay[path as usize]
    }

    pub fn infectiousness_asymptomatic(&self) -> f64 {
        self.disease.infectiousness_asymptomatic
    }

    pub fn infectiousness_detected(&self) -> f64 {
        self.disease.infectiousness_detected
    }

    pub fn count(&self, compartment: Compartment) -> u64 {
        self.counts[compartment.index()]
    }

    pub fn counts(&self) -> &[u64; Compartment::COUNT] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn cumulative_symptomatic(&self) -> u64 {
        self.cumulative_symptomatic
    }

    pub fn cumulative_admissions(&self) -> u64 {
        self.cumulative_admissions
    }

    pub fn introduced(&self) -> u64 {
        self.introduced
    }

    pub(crate) fn take(&mut self, compartment: Compartment, time: f64) -> SimResult<()> {
        let slot = &mut self.counts[compartment.index()];
        *slot = slot
            .checked_sub(1)
            .ok_or_else(|| SimError::CounterUnderflow {
                node: self.id,
                compartment,
                time,
            })?;
        Ok(())
    }

    pub(crate) fn put(&mut self, compartment: Compartment) {
        self.counts[compartment.index()] += 1;
    }

    pub(crate) fn record_symptomatic(&mut self) {
        self.cumulative_symptomatic += 1;
    }

    pub(crate) fn record_admission(&mut self) {
        self.cumulative_admissions += 1;
    }

    pub(crate) fn record_introduction(&mut self) {
        self.introduced += 1;
    }
}
