//! Event-driven stochastic compartment model for linked populations.
//!
//! Each infection samples its complete course (symptom path, detection,
//! hospital outcome and the contacts it makes) the moment it happens, and
//! the resulting transitions are replayed from a single time-ordered queue.
//! The whole engine state, generator included, can be checkpointed and
//! resumed without changing the trajectory.

pub mod checkpoint;
pub mod contacts;
pub mod draws;
pub mod error;
pub mod event;
pub mod node;
pub mod output;
pub mod parameters;
pub mod runner;
mod sampler;
pub mod simulation;
pub mod time_series;

pub use contacts::ContactMatrix;
pub use error::{SimError, SimResult};
pub use event::{Event, EventKind, EventQueue};
pub use node::{Compartment, DiseaseParameters, Node};
pub use output::DailySummary;
pub use parameters::Parameters;
pub use simulation::{SeedSchedule, Simulation};
