mod core;

pub use core::diagnostics::{format_result_summary, infeasibility_diagnostic, replay_budget_bound};
pub use core::{
    annotate_tolerance, build_model, optimize_enhanced, process_solution, rebalance,
    rebalance_with_config, run_heuristic, solve_model, validate_request, Allocation,
    AllocationAction, BudgetModel, CombinablePair, EngineConfig, Holding, HoldingToSell,
    ModelEntry, ModelError, Objectives, OptimizationMetrics, OptimizationRequest,
    OptimizationResult, PhaseReport, SolverError, SolverOutcome, SolverStatus, Strategy,
    TargetInstrument, ToleranceMetrics, ValidationError, DEFAULT_ALLOWED_DEVIATION,
    DEFAULT_SOLVER_TIMEOUT, DEFAULT_TOLERANCE_BAND,
};
