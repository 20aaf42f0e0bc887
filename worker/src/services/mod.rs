//! Service implementations

pub mod simulated_engine;

pub use simulated_engine::SimulatedEngine;
