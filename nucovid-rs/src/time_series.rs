//! Dense per-day parameter tables built from sparse anchor points.
//!
//! Every lookup past the end of a table returns its last value, so a table
//! built up to day 400 keeps answering for day 401 and beyond.

use serde::{Deserialize, Serialize};

/// A `(day, value)` breakpoint. Deserializes from a `[day, value]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(u32, f64)", into = "(u32, f64)")]
pub struct AnchorPoint {
    pub day: u32,
    pub value: f64,
}

impl AnchorPoint {
    pub const fn new(day: u32, value: f64) -> Self {
        AnchorPoint { day, value }
    }
}

impl From<(u32, f64)> for AnchorPoint {
    fn from((day, value): (u32, f64)) -> Self {
        AnchorPoint { day, value }
    }
}

impl From<AnchorPoint> for (u32, f64) {
    fn from(p: AnchorPoint) -> Self {
        (p.day, p.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Stepwise,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn build(anchors: &[AnchorPoint], interpolation: Interpolation) -> TimeSeries {
        match interpolation {
            Interpolation::Stepwise => Self::stepwise(anchors),
            Interpolation::Linear => Self::linear(anchors),
        }
    }

    /// Holds each anchor's value until the next anchor. Anchors must be in
    /// ascending day order.
    pub fn stepwise(anchors: &[AnchorPoint]) -> TimeSeries {
        let Some(last) = anchors.last() else {
            return TimeSeries::default();
        };
        let mut values = Vec::with_capacity(last.day as usize + 1);
        let mut next = 0;
        let mut current = anchors[0].value;
        for day in 0..=last.day {
            while next < anchors.len() && anchors[next].day <= day {
                current = anchors[next].value;
                next += 1;
            }
            values.push(current);
        }
        TimeSeries { values }
    }

    /// Linear between neighbouring anchors, flat before the first one.
    pub fn linear(anchors: &[AnchorPoint]) -> TimeSeries {
        let Some(last) = anchors.last() else {
            return TimeSeries::default();
        };
        let first = anchors[0];
        let mut values = Vec::with_capacity(last.day as usize + 1);
        let mut seg = 0;
        for day in 0..=last.day {
            if day <= first.day {
                values.push(first.value);
                continue;
            }
            while seg + 1 < anchors.len() && anchors[seg + 1].day < day {
                seg += 1;
            }
            let (a, b) = (anchors[seg], anchors[(seg + 1).min(anchors.len() - 1)]);
            let value = if b.day == a.day {
                b.value
            } else {
                let frac = f64::from(day - a.day) / f64::from(b.day - a.day);
                a.value + frac * (b.value - a.value)
            };
            values.push(value);
        }
        TimeSeries { values }
    }

    pub fn constant(value: f64, len: usize) -> TimeSeries {
        TimeSeries {
            values: vec![value; len.max(1)],
        }
    }

    pub fn from_values(values: Vec<f64>) -> TimeSeries {
        TimeSeries { values }
    }

    /// Value on `day`, clamped to the last built day. Empty tables read as 0.
    pub fn at(&self, day: usize) -> f64 {
        clamped(&self.values, day).unwrap_or_default()
    }

    pub fn scaled(&self, factor: f64) -> TimeSeries {
        TimeSeries {
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }

    /// Combines two tables day by day over the longer of the two ranges.
    pub fn zip_with(&self, other: &TimeSeries, f: impl Fn(f64, f64) -> f64) -> TimeSeries {
        let len = self.len().max(other.len());
        TimeSeries {
            values: (0..len).map(|d| f(self.at(d), other.at(d))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Row `day` of a per-day table, or its last row past the end.
pub(crate) fn clamped<T: Copy>(rows: &[T], day: usize) -> Option<T> {
    rows.get(day).or_else(|| rows.last()).copied()
}

/// Lays per-path series side by side as `[day][path]` rows, padding shorter
/// series with their own clamped value.
pub(crate) fn stack<const K: usize>(series: [&TimeSeries; K]) -> Vec<[f64; K]> {
    let len = series.iter().map(|s| s.len()).max().unwrap_or(0);
    (0..len)
        .map(|day| std::array::from_fn(|path| series[path].at(day)))
        .collect()
}
