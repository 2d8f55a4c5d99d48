use std::fmt;
use std::time::{Duration, Instant};

use super::diagnostics::infeasibility_diagnostic;
use super::heuristic::run_heuristic;
use super::model::{build_model, BudgetModel, ModelError, BUDGET_EPS};
use super::solution::{process_solution, result_from_shares};
use super::solver::{solve_model, SolverOutcome, DEFAULT_SOLVER_TIMEOUT};
use super::tolerance::annotate_tolerance;
use super::types::{OptimizationRequest, OptimizationResult, SolverStatus, Strategy};

/// Tunables for one optimization run. All caps and thresholds live here so
/// worst-case latency is bounded by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub solver_timeout: Duration,
    /// Percent of the budget the solver may leave unused before the
    /// heuristic is forced as a replacement candidate.
    pub fallback_threshold: f64,
    pub default_strategy: Strategy,
    /// Widened per-instrument deviation for the enhanced initial pass,
    /// in percentage points.
    pub enhanced_initial_deviation: f64,
    /// Unused-percentage above which phase 3 recomputes deviations.
    pub dynamic_adjustment_trigger: f64,
    pub max_rebalance_iterations: usize,
    /// Per-iteration unused-percentage improvement below which the
    /// rebalancing loop is considered converged.
    pub convergence_points: f64,
    pub min_dynamic_deviation: f64,
    pub max_dynamic_deviation: f64,
}

impl EngineConfig {
    pub const fn new() -> Self {
        Self {
            solver_timeout: DEFAULT_SOLVER_TIMEOUT,
            fallback_threshold: 8.0,
            default_strategy: Strategy::MinimizeLeftover,
            enhanced_initial_deviation: 30.0,
            dynamic_adjustment_trigger: 5.0,
            max_rebalance_iterations: 10,
            convergence_points: 1.0,
            min_dynamic_deviation: 5.0,
            max_dynamic_deviation: 60.0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The only error the public entry points return: the request itself is
/// malformed and no model can be built from it.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTargets,
    NonPositivePrice { name: String, price: f64 },
    NegativePercentage { name: String, percentage: f64 },
    NegativeCash { extra_cash: f64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTargets => write!(f, "request has no target instruments"),
            Self::NonPositivePrice { name, price } => {
                write!(f, "instrument '{name}' has non-positive price {price}")
            }
            Self::NegativePercentage { name, percentage } => {
                write!(f, "target '{name}' has negative percentage {percentage}")
            }
            Self::NegativeCash { extra_cash } => {
                write!(f, "extra cash {extra_cash} is negative")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ModelError> for ValidationError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NonPositivePrice { name, price } => {
                Self::NonPositivePrice { name, price }
            }
            ModelError::NegativePercentage { name, percentage } => {
                Self::NegativePercentage { name, percentage }
            }
        }
    }
}

/// Reject malformed requests before any model is built. Everything past
/// this point returns a result object rather than an error.
pub fn validate_request(request: &OptimizationRequest) -> Result<(), ValidationError> {
    if request.target_etfs.is_empty() {
        return Err(ValidationError::EmptyTargets);
    }
    if request.extra_cash < 0.0 || !request.extra_cash.is_finite() {
        return Err(ValidationError::NegativeCash {
            extra_cash: request.extra_cash,
        });
    }
    for holding in &request.current_holdings {
        if holding.price_per_unit <= 0.0 || !holding.price_per_unit.is_finite() {
            return Err(ValidationError::NonPositivePrice {
                name: holding.name.clone(),
                price: holding.price_per_unit,
            });
        }
    }
    for target in &request.target_etfs {
        if target.price_per_share <= 0.0 || !target.price_per_share.is_finite() {
            return Err(ValidationError::NonPositivePrice {
                name: target.name.clone(),
                price: target.price_per_share,
            });
        }
        if target.target_percentage < 0.0 || !target.target_percentage.is_finite() {
            return Err(ValidationError::NegativePercentage {
                name: target.name.clone(),
                percentage: target.target_percentage,
            });
        }
    }
    Ok(())
}

fn chosen_strategy(request: &OptimizationRequest, config: &EngineConfig) -> Strategy {
    request
        .optimization_strategy
        .unwrap_or(config.default_strategy)
}

/// Build the heuristic result for a solver that was infeasible, timed out
/// or faulted. The infeasible status is surfaced only when the heuristic
/// also deploys nothing and the model carries an impossibility diagnostic;
/// otherwise the heuristic allocation stands.
fn heuristic_fallback(
    model: &BudgetModel,
    request: &OptimizationRequest,
    config: &EngineConfig,
    reason: String,
    diagnostics: Vec<String>,
) -> OptimizationResult {
    let strategy = chosen_strategy(request, config);
    let shares = run_heuristic(model, strategy, request.momentum_scores.as_ref());
    let deployed: f64 = shares
        .iter()
        .zip(&model.entries)
        .map(|(&s, e)| s as f64 * e.price)
        .sum();

    let mut result = if deployed <= 0.0 && !diagnostics.is_empty() {
        process_solution(model, &SolverOutcome::infeasible(), request)
    } else {
        result_from_shares(model, &shares, request, SolverStatus::Heuristic)
    };
    result.fallback_used = true;
    result.fallback_reason = Some(reason);
    result.diagnostics.extend(diagnostics);
    result
}

/// Solve the model, falling back to the heuristic on infeasibility, timeout
/// or fault, and forcing a heuristic replacement when the solver leaves too
/// much budget idle. Never raises past this point.
pub(super) fn solve_or_fallback(
    model: &BudgetModel,
    request: &OptimizationRequest,
    config: &EngineConfig,
) -> OptimizationResult {
    match solve_model(model, config.solver_timeout) {
        Ok(outcome) if outcome.feasible => {
            let solved = process_solution(model, &outcome, request);
            let unused = solved.optimization_metrics.unused_percentage;
            if unused <= config.fallback_threshold {
                return solved;
            }

            let strategy = chosen_strategy(request, config);
            let shares = run_heuristic(model, strategy, request.momentum_scores.as_ref());
            let mut forced =
                result_from_shares(model, &shares, request, SolverStatus::HeuristicForced);
            if forced.optimization_metrics.total_budget_used
                > solved.optimization_metrics.total_budget_used + BUDGET_EPS
            {
                tracing::info!(
                    solver_unused = unused,
                    threshold = config.fallback_threshold,
                    heuristic_unused = forced.optimization_metrics.unused_percentage,
                    "forcing heuristic over under-utilized solver solution"
                );
                forced.fallback_used = true;
                forced.fallback_reason = Some(format!(
                    "solver left {unused:.2}% unused, above the {:.2}% threshold",
                    config.fallback_threshold
                ));
                forced
            } else {
                solved
            }
        }
        Ok(_) => {
            let diagnostics = infeasibility_diagnostic(model);
            tracing::warn!(
                diagnostics = ?diagnostics,
                "solver reported an infeasible model; running heuristic fallback"
            );
            heuristic_fallback(
                model,
                request,
                config,
                "solver reported an infeasible model".to_string(),
                diagnostics,
            )
        }
        Err(err) => {
            tracing::warn!(%err, "solver unavailable; running heuristic fallback");
            heuristic_fallback(model, request, config, err.to_string(), Vec::new())
        }
    }
}

/// Single-solve entry point with default configuration.
pub fn rebalance(request: &OptimizationRequest) -> Result<OptimizationResult, ValidationError> {
    rebalance_with_config(request, &EngineConfig::default())
}

/// Single-solve entry point: validate, model, solve or fall back, annotate.
pub fn rebalance_with_config(
    request: &OptimizationRequest,
    config: &EngineConfig,
) -> Result<OptimizationResult, ValidationError> {
    let started = Instant::now();
    validate_request(request)?;
    let model = build_model(request)?;
    let result = solve_or_fallback(&model, request, config);
    let mut annotated = annotate_tolerance(&result, request.objectives().tolerance_band);
    annotated.optimization_metrics.optimization_time_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(
        status = ?annotated.solver_status,
        unused_percentage = annotated.optimization_metrics.unused_percentage,
        "rebalance complete"
    );
    Ok(annotated)
}
