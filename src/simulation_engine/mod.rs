// simulation_engine/mod.rs
pub mod grid;
pub mod intersections;
pub mod lanes;
pub mod simulation;
pub mod vehicles;
