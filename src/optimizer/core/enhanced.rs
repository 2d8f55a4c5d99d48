use super::model::build_model;
use super::rebalancer::{solve_or_fallback, validate_request, EngineConfig, ValidationError};
use super::solution::result_from_shares;
use super::tolerance::annotate_tolerance;
use super::types::{
    Holding, OptimizationRequest, OptimizationResult, PhaseReport, SolverStatus, TargetInstrument,
};

/// Price ratios within this distance of an integer count as exact-fill
/// combinable (1 unit of the expensive leg ≈ k units of the cheap leg).
const RATIO_NEAR_INTEGER: f64 = 0.1;

/// Only ratios above this are worth combining.
const RATIO_MIN: f64 = 2.0;

/// Cap on any single top-up pass inside the rebalancing loop.
const MAX_TOPUP_STEPS: usize = 100;

/// A pair of instruments whose price ratio is near-integer: buying `units`
/// shares of the cheap leg spends almost exactly one expensive share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinablePair {
    pub expensive: usize,
    pub cheap: usize,
    pub units: u64,
}

/// Scan every instrument pair for near-integer price ratios.
pub(super) fn analyze_price_ratios(targets: &[TargetInstrument]) -> Vec<CombinablePair> {
    let mut pairs = Vec::new();
    for i in 0..targets.len() {
        for j in 0..targets.len() {
            if i == j || targets[i].target_percentage <= 0.0 || targets[j].target_percentage <= 0.0
            {
                continue;
            }
            let ratio = targets[i].price_per_share / targets[j].price_per_share;
            if ratio <= RATIO_MIN {
                continue;
            }
            let nearest = ratio.round();
            if (ratio - nearest).abs() <= RATIO_NEAR_INTEGER {
                pairs.push(CombinablePair {
                    expensive: i,
                    cheap: j,
                    units: nearest as u64,
                });
            }
        }
    }
    pairs
}

/// Per-instrument deviation for the dynamic adjustment phase: more slack
/// when more budget is idle, when the instrument is expensive relative to
/// the rest of the universe, and when its target weight is small.
pub(super) fn dynamic_deviation(
    unused_percentage: f64,
    price: f64,
    cheapest: f64,
    dearest: f64,
    target_percentage: f64,
    config: &EngineConfig,
) -> f64 {
    let price_position = if dearest > cheapest {
        ((price - cheapest) / (dearest - cheapest)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let size_slack = 1.0 - (target_percentage / 100.0).clamp(0.0, 1.0);
    let raw = unused_percentage * 2.0 * (0.5 + 0.5 * price_position) * (0.5 + 0.5 * size_slack);
    raw.clamp(config.min_dynamic_deviation, config.max_dynamic_deviation)
}

fn with_deviations(request: &OptimizationRequest, deviation: f64) -> OptimizationRequest {
    let mut out = request.clone();
    for target in &mut out.target_etfs {
        let widened = target.deviation().max(deviation);
        target.allowed_deviation = Some(widened);
    }
    out
}

fn shares_of(result: &OptimizationResult, len: usize) -> Vec<u64> {
    if result.allocations.len() == len {
        result.allocations.iter().map(|a| a.final_shares).collect()
    } else {
        vec![0; len]
    }
}

fn unused_pct(result: &OptimizationResult) -> f64 {
    result.optimization_metrics.unused_percentage
}

/// Unused share of the liquidation budget before any solve: the part not
/// already deployed in positively-weighted target instruments. Holdings
/// that fully cover the targets start the pipeline near zero.
fn pre_solve_unused(request: &OptimizationRequest) -> f64 {
    let budget = request.liquidation_budget();
    if budget <= 0.0 {
        return 0.0;
    }
    let held: f64 = request
        .current_holdings
        .iter()
        .filter(|h| {
            request
                .target_etfs
                .iter()
                .any(|t| t.name == h.name && t.target_percentage > 0.0)
        })
        .map(Holding::value)
        .sum();
    ((budget - held) / budget * 100.0).clamp(0.0, 100.0)
}

/// Run one full solve of `request` and keep whichever of `incumbent` and
/// the fresh candidate deploys more budget. Returns (result, replaced).
fn solve_and_keep_better(
    request: &OptimizationRequest,
    config: &EngineConfig,
    incumbent: OptimizationResult,
) -> (OptimizationResult, bool) {
    let Ok(model) = build_model(request) else {
        return (incumbent, false);
    };
    let candidate = solve_or_fallback(&model, request, config);
    if unused_pct(&candidate) < unused_pct(&incumbent) {
        (candidate, true)
    } else {
        (incumbent, false)
    }
}

/// Buy as much of entry `idx` as the unused budget allows, in steps of
/// `step` shares. Pure: returns a fresh result.
fn top_up(
    request: &OptimizationRequest,
    result: &OptimizationResult,
    idx: usize,
    step: u64,
) -> Option<OptimizationResult> {
    let model = build_model(request).ok()?;
    if idx >= model.entries.len() || step == 0 {
        return None;
    }
    let mut shares = shares_of(result, model.entries.len());
    let price = model.entries[idx].price;
    let mut remaining = result.optimization_metrics.unused_budget;
    let mut bought = 0u64;
    for _ in 0..MAX_TOPUP_STEPS {
        let cost = step as f64 * price;
        if cost > remaining {
            break;
        }
        shares[idx] += step;
        remaining -= cost;
        bought += step;
    }
    if bought == 0 {
        return None;
    }
    // A top-up on an empty infeasible result is a heuristic allocation.
    let status = if result.solver_status == SolverStatus::Infeasible {
        SolverStatus::Heuristic
    } else {
        result.solver_status
    };
    let mut fresh = result_from_shares(&model, &shares, request, status);
    fresh.fallback_used = result.fallback_used;
    fresh.fallback_reason = result.fallback_reason.clone();
    fresh.diagnostics = result.diagnostics.clone();
    Some(fresh)
}

/// Index of the cheapest positively-weighted target.
fn cheapest_target(targets: &[TargetInstrument]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, t) in targets.iter().enumerate() {
        if t.target_percentage > 0.0
            && best.is_none_or(|b| t.price_per_share < targets[b].price_per_share)
        {
            best = Some(i);
        }
    }
    best
}

/// Five-phase iterative optimizer for callers wanting maximal utilization.
///
/// Every phase consumes the previous phase's result and produces a fresh
/// one; the loop never operates on partially-applied state. Iteration
/// counts are hard-capped by `EngineConfig`.
pub fn optimize_enhanced(
    request: &OptimizationRequest,
    config: &EngineConfig,
) -> Result<OptimizationResult, ValidationError> {
    let started = std::time::Instant::now();
    validate_request(request)?;

    let mut phases = Vec::new();

    // Phase 1: initial pass with deliberately widened deviations and a
    // budget-over-fairness objective hint.
    let mut objectives = request.objectives();
    objectives.use_all_budget = true;
    objectives.budget_weight = objectives.budget_weight.max(0.9);
    objectives.fairness_weight = 1.0 - objectives.budget_weight;
    let mut work = with_deviations(request, config.enhanced_initial_deviation);
    work.objectives = Some(objectives);

    let model = build_model(&work)?;
    let mut best = solve_or_fallback(&model, &work, config);
    phases.push(PhaseReport {
        phase: "initial-pass".to_string(),
        unused_before: pre_solve_unused(request),
        unused_after: unused_pct(&best),
        detail: format!(
            "deviation widened to {:.0}pp, budget weight {:.2}",
            config.enhanced_initial_deviation, objectives.budget_weight
        ),
    });

    // Phase 2: price-ratio analysis. Read-only; feeds the loop below.
    let pairs = analyze_price_ratios(&work.target_etfs);
    phases.push(PhaseReport {
        phase: "price-ratio-analysis".to_string(),
        unused_before: unused_pct(&best),
        unused_after: unused_pct(&best),
        detail: format!("{} combinable pair(s) found", pairs.len()),
    });

    // Phase 3: dynamic constraint adjustment when too much budget is idle.
    if unused_pct(&best) > config.dynamic_adjustment_trigger {
        let before = unused_pct(&best);
        let prices: Vec<f64> = work.target_etfs.iter().map(|t| t.price_per_share).collect();
        let cheapest = prices.iter().copied().fold(f64::INFINITY, f64::min);
        let dearest = prices.iter().copied().fold(0.0_f64, f64::max);
        let mut adjusted = work.clone();
        for target in &mut adjusted.target_etfs {
            if target.target_percentage > 0.0 {
                target.allowed_deviation = Some(dynamic_deviation(
                    before,
                    target.price_per_share,
                    cheapest,
                    dearest,
                    target.target_percentage,
                    config,
                ));
            }
        }
        let (kept, replaced) = solve_and_keep_better(&adjusted, config, best);
        best = kept;
        if replaced {
            work = adjusted;
        }
        phases.push(PhaseReport {
            phase: "dynamic-adjustment".to_string(),
            unused_before: before,
            unused_after: unused_pct(&best),
            detail: if replaced {
                "re-solve with per-instrument deviations improved utilization".to_string()
            } else {
                "re-solve did not improve utilization; kept prior result".to_string()
            },
        });
    }

    // Phase 4: iterative rebalancing until convergence or the cap.
    let loop_start = unused_pct(&best);
    let mut relaxed = false;
    for iteration in 0..config.max_rebalance_iterations {
        let before = unused_pct(&best);
        if before <= 0.0 {
            break;
        }

        // Exact-fill combinations first: spend idle cash on the cheap leg
        // of a combinable pair in near-integer units.
        let mut improved: Option<(OptimizationResult, &'static str)> = None;
        for pair in &pairs {
            if let Some(fresh) = top_up(&work, &best, pair.cheap, pair.units) {
                improved = Some((fresh, "price-ratio fill"));
                break;
            }
        }
        // Then plain residual utilization on the cheapest instrument.
        if improved.is_none() {
            if let Some(idx) = cheapest_target(&work.target_etfs) {
                if let Some(fresh) = top_up(&work, &best, idx, 1) {
                    improved = Some((fresh, "residual top-up"));
                }
            }
        }
        // Then widen the bands and re-solve; a final iteration relaxes
        // constraints fully.
        let (next, step) = match improved {
            Some((fresh, step)) => (fresh, step),
            None if !relaxed => {
                relaxed = true;
                let mut full = with_deviations(&work, config.max_dynamic_deviation);
                if let Some(obj) = &mut full.objectives {
                    obj.maximize_utilization = true;
                    obj.budget_weight = 1.0;
                    obj.fairness_weight = 0.0;
                }
                let (kept, replaced) = solve_and_keep_better(&full, config, best.clone());
                if replaced {
                    work = full;
                }
                (kept, "full constraint relaxation")
            }
            None => break,
        };
        best = next;

        let after = unused_pct(&best);
        tracing::debug!(iteration, step, before, after, "rebalancing iteration");
        if before - after < config.convergence_points {
            phases.push(PhaseReport {
                phase: "iterative-rebalancing".to_string(),
                unused_before: loop_start,
                unused_after: after,
                detail: format!("converged after {} iteration(s)", iteration + 1),
            });
            break;
        }
    }
    if phases.iter().all(|p| p.phase != "iterative-rebalancing") {
        phases.push(PhaseReport {
            phase: "iterative-rebalancing".to_string(),
            unused_before: loop_start,
            unused_after: unused_pct(&best),
            detail: if unused_pct(&best) <= 0.0 {
                "budget fully deployed".to_string()
            } else {
                format!(
                    "no further improvement within the {}-iteration cap",
                    config.max_rebalance_iterations
                )
            },
        });
    }

    // Phase 5: final tolerance validation on the converged result.
    let band = request.objectives().tolerance_band;
    let mut annotated = annotate_tolerance(&best, band);
    phases.push(PhaseReport {
        phase: "final-validation".to_string(),
        unused_before: unused_pct(&best),
        unused_after: unused_pct(&annotated),
        detail: format!(
            "compliance {:.1}%",
            annotated
                .tolerance_metrics
                .map(|t| t.compliance_rate)
                .unwrap_or(100.0)
        ),
    });

    annotated.phases = phases;
    annotated.optimization_metrics.optimization_time_ms = started.elapsed().as_millis() as u64;
    Ok(annotated)
}
