use std::fmt;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use microlp::{ComparisonOp, OptimizationDirection, Problem};

use super::model::BudgetModel;

/// Default wall-clock budget for one MILP solve.
pub const DEFAULT_SOLVER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum SolverError {
    /// The solve exceeded its wall-clock budget. The worker thread is
    /// abandoned; its lifetime is bounded by the solve itself.
    Timeout { timeout: Duration },
    /// The solver failed internally (unbounded model, panic, numeric fault).
    Fault { detail: String },
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { timeout } => {
                write!(f, "solver exceeded {:.1}s wall-clock budget", timeout.as_secs_f64())
            }
            Self::Fault { detail } => write!(f, "solver fault: {detail}"),
        }
    }
}

impl std::error::Error for SolverError {}

/// Raw solver outcome. Infeasibility is data, not an error: the caller
/// decides whether to fall back or surface it.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    pub feasible: bool,
    /// Final shares per model entry, aligned with `BudgetModel::entries`.
    /// Empty when infeasible.
    pub final_shares: Vec<u64>,
    pub objective_value: f64,
}

impl SolverOutcome {
    pub(super) fn infeasible() -> Self {
        Self {
            feasible: false,
            final_shares: Vec::new(),
            objective_value: 0.0,
        }
    }
}

fn solve_sync(model: &BudgetModel) -> Result<SolverOutcome, SolverError> {
    let mut problem = Problem::new(OptimizationDirection::Maximize);

    // One integer variable per target: final shares to hold. Objective
    // coefficient = price, so the objective is total deployed value.
    let mut vars = Vec::with_capacity(model.entries.len());
    let mut budget_row = Vec::with_capacity(model.entries.len());
    for entry in &model.entries {
        let lo = entry.min_shares.min(i32::MAX as u64) as i32;
        let hi = entry.max_shares.min(i32::MAX as u64) as i32;
        let var = problem.add_integer_var(entry.price, (lo, hi));
        budget_row.push((var, entry.price));
        vars.push(var);
    }
    problem.add_constraint(budget_row.as_slice(), ComparisonOp::Le, model.liquidation_budget);

    match problem.solve() {
        Ok(solution) => {
            let final_shares = model
                .entries
                .iter()
                .zip(&vars)
                .map(|(entry, var)| {
                    let raw = solution[*var].round();
                    (raw.max(0.0) as u64).clamp(entry.min_shares, entry.max_shares)
                })
                .collect();
            Ok(SolverOutcome {
                feasible: true,
                final_shares,
                objective_value: solution.objective(),
            })
        }
        Err(microlp::Error::Infeasible) => Ok(SolverOutcome::infeasible()),
        Err(err) => Err(SolverError::Fault {
            detail: err.to_string(),
        }),
    }
}

/// Solve the model under a hard wall-clock timeout.
///
/// The solve runs on a worker thread and the caller races it against the
/// timeout via `recv_timeout`. On timeout the in-flight solve is abandoned;
/// no cancellation is propagated into the solver. Never retries.
pub fn solve_model(model: &BudgetModel, timeout: Duration) -> Result<SolverOutcome, SolverError> {
    if model.entries.is_empty() {
        return Ok(SolverOutcome {
            feasible: true,
            final_shares: Vec::new(),
            objective_value: 0.0,
        });
    }

    let (tx, rx) = mpsc::channel();
    let worker_model = model.clone();
    thread::spawn(move || {
        // A dropped sender (panic included) surfaces as Disconnected below.
        let _ = tx.send(solve_sync(&worker_model));
    });

    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(SolverError::Timeout { timeout }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(SolverError::Fault {
            detail: "solver worker terminated without a result".to_string(),
        }),
    }
}
