//! Simulation of the acquisition chain of a scintillation detector:
//! scintillator, photomultiplier, cable, pile-up and digitizer.
pub mod cable;
pub mod config;
pub mod digitizer;
pub mod error;
pub mod particle;
pub mod pileup;
pub mod pmt;
pub mod pulse;
pub mod scintillator;
pub mod simulation;
pub mod tables;

pub use config::Config;
pub use error::{SimulationError, SimulationResult};
pub use particle::{ParticleSelection, ParticleType};
pub use simulation::{RunSummary, Simulation, SimulationOutput};
pub use tables::{CoefficientTable, DecayModel, EnergySpectrum, Tables};
