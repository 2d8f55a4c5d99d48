pub mod diagnostics;
mod enhanced;
mod heuristic;
mod model;
mod rebalancer;
mod solution;
mod solver;
mod tolerance;
mod types;

pub use enhanced::{optimize_enhanced, CombinablePair};
pub use heuristic::run_heuristic;
pub use model::{build_model, BudgetModel, ModelEntry, ModelError};
pub use rebalancer::{
    rebalance, rebalance_with_config, validate_request, EngineConfig, ValidationError,
};
pub use solution::process_solution;
pub use solver::{solve_model, SolverError, SolverOutcome, DEFAULT_SOLVER_TIMEOUT};
pub use tolerance::annotate_tolerance;
pub use types::{
    Allocation, AllocationAction, Holding, HoldingToSell, Objectives, OptimizationMetrics,
    OptimizationRequest, OptimizationResult, PhaseReport, SolverStatus, Strategy,
    TargetInstrument, ToleranceMetrics, DEFAULT_ALLOWED_DEVIATION, DEFAULT_TOLERANCE_BAND,
};

#[cfg(test)]
#[path = "../tests.rs"]
mod tests;
