pub mod cli;
pub mod communication;
pub mod config;
pub mod control_system;
pub mod error;
pub mod global_variables;
pub mod monitoring;
pub mod simulation_engine;

pub use config::SimulationConfig;
pub use error::{SimError, SimResult};
pub use simulation_engine::simulation::{Simulation, SimulationReport};
