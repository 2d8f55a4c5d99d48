use std::collections::HashMap;

use super::model::BudgetModel;
use super::solver::SolverOutcome;
use super::types::{
    Allocation, AllocationAction, HoldingToSell, OptimizationMetrics, OptimizationRequest,
    OptimizationResult, SolverStatus,
};

fn action_for(current: u64, fin: u64) -> AllocationAction {
    if fin == current {
        AllocationAction::Hold
    } else if current == 0 {
        AllocationAction::Buy
    } else if fin == 0 {
        AllocationAction::Sell
    } else {
        AllocationAction::Rebalance
    }
}

fn current_shares_by_name(request: &OptimizationRequest) -> HashMap<&str, u64> {
    request
        .current_holdings
        .iter()
        .map(|h| (h.name.as_str(), h.shares))
        .collect()
}

/// Build allocation rows from a final-shares vector aligned with the model.
pub(super) fn allocations_from_shares(
    model: &BudgetModel,
    final_shares: &[u64],
    request: &OptimizationRequest,
) -> Vec<Allocation> {
    let current = current_shares_by_name(request);
    model
        .entries
        .iter()
        .zip(final_shares)
        .map(|(entry, &fin)| {
            let cur = current.get(entry.name.as_str()).copied().unwrap_or(0);
            let final_value = fin as f64 * entry.price;
            let actual_percentage = if model.liquidation_budget > 0.0 {
                final_value / model.liquidation_budget * 100.0
            } else {
                0.0
            };
            Allocation {
                name: entry.name.clone(),
                current_shares: cur,
                final_shares: fin,
                shares_to_buy: fin.saturating_sub(cur),
                shares_to_sell: cur.saturating_sub(fin),
                price_per_share: entry.price,
                final_value,
                target_percentage: entry.target_percentage,
                actual_percentage,
                action: action_for(cur, fin),
                deviation: None,
                tolerance_compliant: None,
            }
        })
        .collect()
}

/// Every current holding absent from the target set is fully liquidated.
pub(super) fn holdings_to_sell(request: &OptimizationRequest) -> Vec<HoldingToSell> {
    request
        .current_holdings
        .iter()
        .filter(|h| !request.target_etfs.iter().any(|t| t.name == h.name))
        .map(|h| HoldingToSell {
            name: h.name.clone(),
            shares: h.shares,
            price_per_unit: h.price_per_unit,
            total_value: h.value(),
        })
        .collect()
}

pub(super) fn metrics_for(total_used: f64, liquidation_budget: f64) -> OptimizationMetrics {
    let unused_budget = (liquidation_budget - total_used).max(0.0);
    let unused_percentage = if liquidation_budget > 0.0 {
        unused_budget / liquidation_budget * 100.0
    } else {
        0.0
    };
    OptimizationMetrics {
        total_budget_used: total_used,
        unused_budget,
        unused_percentage,
        optimization_time_ms: 0,
    }
}

/// Assemble a full result from a final-shares vector.
pub(super) fn result_from_shares(
    model: &BudgetModel,
    final_shares: &[u64],
    request: &OptimizationRequest,
    status: SolverStatus,
) -> OptimizationResult {
    let allocations = allocations_from_shares(model, final_shares, request);
    let total_used: f64 = allocations.iter().map(|a| a.final_value).sum();
    OptimizationResult {
        solver_status: status,
        allocations,
        holdings_to_sell: holdings_to_sell(request),
        optimization_metrics: metrics_for(total_used, model.liquidation_budget),
        tolerance_metrics: None,
        fallback_used: false,
        fallback_reason: None,
        cached: false,
        diagnostics: Vec::new(),
        phases: Vec::new(),
    }
}

/// Convert a raw solver outcome into a structured result. Infeasible
/// outcomes become a normal result with empty allocations and the entire
/// budget reported unused; the liquidation list is still derived from the
/// request so operators see what would have been sold.
pub fn process_solution(
    model: &BudgetModel,
    outcome: &SolverOutcome,
    request: &OptimizationRequest,
) -> OptimizationResult {
    if !outcome.feasible {
        return OptimizationResult {
            solver_status: SolverStatus::Infeasible,
            allocations: Vec::new(),
            holdings_to_sell: holdings_to_sell(request),
            optimization_metrics: OptimizationMetrics {
                total_budget_used: 0.0,
                unused_budget: model.liquidation_budget,
                unused_percentage: 100.0,
                optimization_time_ms: 0,
            },
            tolerance_metrics: None,
            fallback_used: false,
            fallback_reason: None,
            cached: false,
            diagnostics: Vec::new(),
            phases: Vec::new(),
        };
    }
    result_from_shares(model, &outcome.final_shares, request, SolverStatus::Optimal)
}
