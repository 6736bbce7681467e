//! Application Layer - Execution engine and loop controller

pub mod controller;
pub mod executor;

pub use controller::{
    ControllerConfig, ControllerError, CycleOutcome, LoopController, LoopPhase,
};
pub use executor::{ExecutionEngine, ExecutionError, ExecutionReport, RetryPolicy};
