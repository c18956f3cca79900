use std::io;
use std::path::PathBuf;

use crate::node::Compartment;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("contact matrix is {rows}x{cols} but there are {nodes} nodes")]
    ContactMatrixShape {
        rows: usize,
        cols: usize,
        nodes: usize,
    },

    #[error("contact matrix row {row} has {len} entries, expected {expected}")]
    RaggedContactMatrix {
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("node {node}: {compartment:?} count would go negative at t={time}")]
    CounterUnderflow {
        node: usize,
        compartment: Compartment,
        time: f64,
    },

    #[error("node {node} has no susceptible individuals left to infect")]
    NoSusceptible { node: usize },

    #[error("node {node} does not exist")]
    UnknownNode { node: usize },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("no random seed for day 0; a fresh run needs one")]
    MissingInitialSeed,

    #[error("checkpoint {path}: {source}")]
    CheckpointIo { path: PathBuf, source: io::Error },

    #[error("not a simulation checkpoint (bad magic bytes)")]
    CheckpointMagic,

    #[error("checkpoint format version {found} is not supported (expected {expected})")]
    CheckpointVersion { found: u32, expected: u32 },

    #[error("checkpoint payload is corrupted (digest {found}, expected {expected})")]
    CheckpointDigest { found: String, expected: String },

    #[error("checkpoint payload could not be decoded: {0}")]
    CheckpointEncoding(#[from] bincode::Error),

    #[error("checkpoint is inconsistent: {0}")]
    CheckpointInconsistent(String),

    #[error(transparent)]
    Environment(#[from] nucovid_run::EnvError),
}

pub type SimResult<T> = Result<T, SimError>;
