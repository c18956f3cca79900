use std::path::Path;

use nucovid_run::WriteOutcome;
use serde::{Serialize, Serializer};

use crate::error::SimResult;
use crate::node::{Compartment, Node};

pub const HEADER: [&str; 14] = [
    "node",
    "time",
    "Ki",
    "S",
    "E",
    "AP",
    "SYM",
    "HOS",
    "CRIT",
    "DEA",
    "R",
    "cumu_sym",
    "cumu_adm",
    "introduced",
];

/// One node's counters at the start of one simulated day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub node: usize,
    #[serde(rename = "time")]
    pub day: u32,
    /// Written with five significant digits.
    #[serde(rename = "Ki", serialize_with = "five_significant")]
    pub ki: f64,
    #[serde(rename = "S")]
    pub susceptible: u64,
    #[serde(rename = "E")]
    pub exposed: u64,
    /// Asymptomatic plus presymptomatic.
    #[serde(rename = "AP")]
    pub infectious_unsymptomatic: u64,
    /// Mild plus severe.
    #[serde(rename = "SYM")]
    pub symptomatic: u64,
    /// Hospitalized, before or after a critical episode.
    #[serde(rename = "HOS")]
    pub hospitalized: u64,
    #[serde(rename = "CRIT")]
    pub critical: u64,
    #[serde(rename = "DEA")]
    pub dead: u64,
    #[serde(rename = "R")]
    pub resistant: u64,
    #[serde(rename = "cumu_sym")]
    pub cumulative_symptomatic: u64,
    #[serde(rename = "cumu_adm")]
    pub cumulative_admissions: u64,
    pub introduced: u64,
}

impl DailySummary {
    pub fn from_node(node: &Node, day: u32) -> DailySummary {
        use Compartment as C;
        DailySummary {
            node: node.id,
            day,
            ki: node.ki(day as usize),
            susceptible: node.count(C::Susceptible),
            exposed: node.count(C::Exposed),
            infectious_unsymptomatic: node.count(C::Asymptomatic)
                + node.count(C::Presymptomatic),
            symptomatic: node.count(C::Mild) + node.count(C::Severe),
            hospitalized: node.count(C::Hospitalized)
                + node.count(C::HospitalizedPostCritical),
            critical: node.count(C::Critical),
            dead: node.count(C::Death),
            resistant: node.count(C::Resistant),
            cumulative_symptomatic: node.cumulative_symptomatic(),
            cumulative_admissions: node.cumulative_admissions(),
            introduced: node.introduced(),
        }
    }

    /// Sum of the compartment columns; equals the node population.
    pub fn total(&self) -> u64 {
        self.susceptible
            + self.exposed
            + self.infectious_unsymptomatic
            + self.symptomatic
            + self.hospitalized
            + self.critical
            + self.dead
            + self.resistant
    }
}

fn five_significant<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&significant(*value, 5))
}

/// `value` rounded to `digits` significant digits, printed the way C's `%g`
/// prints it: fixed notation for moderate exponents, scientific otherwise,
/// trailing zeros dropped.
pub fn significant(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let digits = digits.max(1);
    let sci = format!("{:.*e}", digits - 1, value);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= digits as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs());
    }
    let decimals = (digits as i32 - 1 - exp).max(0) as usize;
    trim_fraction(&format!("{value:.decimals$}")).to_string()
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Writes the daily summary table, refusing to replace an existing file
/// unless `overwrite` is set.
pub fn write_summary(
    path: impl AsRef<Path>,
    rows: &[DailySummary],
    overwrite: bool,
) -> SimResult<WriteOutcome> {
    Ok(nucovid_run::write_table(path, &HEADER, rows, overwrite)?)
}
