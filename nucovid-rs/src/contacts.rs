use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Where contacts land. Entry `(i, j)` is the relative weight with which a
/// contact made by someone in node `i` reaches node `j`. Rows need not sum
/// to one; each row is normalised by its own total when a target is drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactMatrix {
    weights: DMatrix<f64>,
}

impl ContactMatrix {
    pub fn from_rows(rows: &[Vec<f64>]) -> SimResult<ContactMatrix> {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|r| r.len() != ncols) {
            return Err(SimError::RaggedContactMatrix {
                row: bad,
                len: rows[bad].len(),
                expected: ncols,
            });
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Ok(ContactMatrix {
            weights: DMatrix::from_row_slice(nrows, ncols, &flat),
        })
    }

    /// Every contact stays in its own node.
    pub fn isolated(nodes: usize) -> ContactMatrix {
        ContactMatrix {
            weights: DMatrix::identity(nodes, nodes),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.weights.shape()
    }

    pub fn weight(&self, source: usize, target: usize) -> f64 {
        self.weights[(source, target)]
    }

    /// Picks the node a contact from `source` lands in, by a cumulative
    /// scan over the source row. `None` when the row carries no weight.
    pub fn choose_target<R: Rng + ?Sized>(&self, source: usize, rng: &mut R) -> Option<usize> {
        let row = self.weights.row(source);
        let total = row.sum();
        if !(total > 0.0) {
            return None;
        }
        let mut r = rng.random::<f64>() * total;
        for (target, &w) in row.iter().enumerate() {
            if r < w {
                return Some(target);
            }
            r -= w;
        }
        // Rounding left `r` just past the last bin.
        row.iter()
            .enumerate()
            .filter(|&(_, &w)| w > 0.0)
            .map(|(target, _)| target)
            .last()
    }
}
