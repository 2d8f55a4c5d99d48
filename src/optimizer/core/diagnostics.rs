use std::fmt::Write as _;

use super::model::{BudgetModel, BUDGET_EPS};
use super::types::OptimizationResult;

/// Explain why a model admits no feasible integer assignment. Returns one
/// line per impossible bound plus an aggregate line when the forced minimum
/// spend exceeds the budget; empty when nothing is provably impossible.
pub fn infeasibility_diagnostic(model: &BudgetModel) -> Vec<String> {
    let mut lines = Vec::new();

    for entry in &model.entries {
        if entry.min_shares > entry.max_shares {
            lines.push(format!(
                "'{}': share bounds are inverted ({}..{})",
                entry.name, entry.min_shares, entry.max_shares
            ));
        }
        // A strictly positive band that cannot fit a single share step:
        // the instrument's price exceeds the whole tolerance window.
        if entry.target_percentage > 0.0 && entry.min_shares == entry.max_shares {
            let band_width = 2.0 * entry.target_value * entry.allowed_deviation / 100.0;
            if entry.price > band_width && entry.min_shares == 0 {
                lines.push(format!(
                    "'{}': price {:.2} exceeds the {:.2}-wide tolerance window around target value {:.2}; only a zero position fits",
                    entry.name, entry.price, band_width, entry.target_value
                ));
            }
        }
    }

    let min_required = model.min_required_value();
    if min_required > model.liquidation_budget + BUDGET_EPS {
        lines.push(format!(
            "minimum spend forced by lower bounds is {:.2}, above the {:.2} liquidation budget",
            min_required, model.liquidation_budget
        ));
    }

    lines
}

/// Recompute deployed value from the allocation rows and confirm the budget
/// bound. Used by tests and by the orchestrator as a cheap sanity replay.
pub fn replay_budget_bound(result: &OptimizationResult, liquidation_budget: f64) -> bool {
    let deployed: f64 = result
        .allocations
        .iter()
        .map(|a| a.final_shares as f64 * a.price_per_share)
        .sum();
    deployed <= liquidation_budget + BUDGET_EPS
}

/// Human-readable summary for the driver binary. Structured logging stays
/// on `tracing`; this is the operator-facing rendering.
pub fn format_result_summary(result: &OptimizationResult) -> String {
    let mut out = String::new();
    let metrics = &result.optimization_metrics;
    let _ = writeln!(
        out,
        "status={:?} used={:.2} unused={:.2} ({:.2}%) in {}ms",
        result.solver_status,
        metrics.total_budget_used,
        metrics.unused_budget,
        metrics.unused_percentage,
        metrics.optimization_time_ms
    );
    for a in &result.allocations {
        let _ = writeln!(
            out,
            "  {:<12} {:>6} -> {:>6} shares @ {:>10.2}  target {:>6.2}%  actual {:>6.2}%",
            a.name, a.current_shares, a.final_shares, a.price_per_share, a.target_percentage,
            a.actual_percentage
        );
    }
    for h in &result.holdings_to_sell {
        let _ = writeln!(
            out,
            "  sell all   {:<12} {:>6} shares @ {:>10.2} = {:.2}",
            h.name, h.shares, h.price_per_unit, h.total_value
        );
    }
    if let Some(t) = &result.tolerance_metrics {
        let _ = writeln!(
            out,
            "  tolerance: {}/{} compliant ({:.1}%) at band {:.0}pp",
            t.compliant_allocations,
            t.total_allocations,
            t.compliance_rate,
            t.tolerance_band * 100.0
        );
    }
    for phase in &result.phases {
        let _ = writeln!(
            out,
            "  phase {:<22} unused {:.2}% -> {:.2}%  {}",
            phase.phase, phase.unused_before, phase.unused_after, phase.detail
        );
    }
    for line in &result.diagnostics {
        let _ = writeln!(out, "  note: {line}");
    }
    out
}
