use std::time::Duration;

use super::model::{build_model, ModelError};
use super::rebalancer::{
    rebalance, rebalance_with_config, validate_request, EngineConfig, ValidationError,
};
use super::enhanced::optimize_enhanced;
use super::heuristic::run_heuristic;
use super::solution::process_solution;
use super::solver::solve_model;
use super::tolerance::annotate_tolerance;
use super::types::{AllocationAction, SolverStatus, Strategy};

use fixtures::*;

// ─── Model builder ───────────────────────────────────────────────────────────

#[test]
fn test_liquidation_budget_is_cash_plus_holdings() {
    let req = request(
        vec![holding("A", 10, 100.0), holding("B", 2, 25.0)],
        vec![target("A", 100.0, 100.0)],
        50.0,
    );
    assert_eq!(req.liquidation_budget(), 1100.0);

    let model = build_model(&req).unwrap();
    assert_eq!(model.liquidation_budget, 1100.0);
}

#[test]
fn test_model_share_bounds_follow_tolerance_band() {
    // Budget 1000, target 60% @ 300, dev 5 → value 600, band [570, 630],
    // integer bounds [1, 2].
    let req = request(vec![], vec![target("X", 60.0, 300.0)], 1000.0);
    let model = build_model(&req).unwrap();
    let entry = &model.entries[0];
    assert_eq!(entry.target_value, 600.0);
    assert_eq!(entry.min_shares, 1);
    assert_eq!(entry.max_shares, 2);
}

#[test]
fn test_model_pins_zero_percentage_targets() {
    let req = request(
        vec![holding("V", 20, 50.0)],
        vec![target("V", 0.0, 50.0), target("W", 100.0, 50.0)],
        0.0,
    );
    let model = build_model(&req).unwrap();
    assert_eq!(model.entries[0].min_shares, 0);
    assert_eq!(model.entries[0].max_shares, 0);
}

#[test]
fn test_model_rejects_bad_targets() {
    let req = request(vec![], vec![target("X", 50.0, 0.0)], 100.0);
    assert!(matches!(
        build_model(&req),
        Err(ModelError::NonPositivePrice { .. })
    ));

    let req = request(vec![], vec![target("X", -5.0, 10.0)], 100.0);
    assert!(matches!(
        build_model(&req),
        Err(ModelError::NegativePercentage { .. })
    ));
}

// ─── Validation ──────────────────────────────────────────────────────────────

#[test]
fn test_validation_rejects_malformed_requests() {
    let empty = request(vec![], vec![], 100.0);
    assert_eq!(validate_request(&empty), Err(ValidationError::EmptyTargets));

    let negative_cash = request(vec![], vec![target("X", 100.0, 10.0)], -1.0);
    assert!(matches!(
        validate_request(&negative_cash),
        Err(ValidationError::NegativeCash { .. })
    ));

    let bad_holding = request(
        vec![holding("H", 1, 0.0)],
        vec![target("X", 100.0, 10.0)],
        0.0,
    );
    assert!(matches!(
        validate_request(&bad_holding),
        Err(ValidationError::NonPositivePrice { .. })
    ));

    let ok = request(vec![], vec![target("X", 100.0, 10.0)], 0.0);
    assert_eq!(validate_request(&ok), Ok(()));
}

// ─── Solver adapter ──────────────────────────────────────────────────────────

#[test]
fn test_solver_fills_budget_within_bounds() {
    // X: value 600 bounds [1,2] @300; Y: value 400 bounds [7,8] @50.
    // Max deployment is exactly 2×300 + 8×50 = 1000.
    let req = request(
        vec![],
        vec![target("X", 60.0, 300.0), target("Y", 40.0, 50.0)],
        1000.0,
    );
    let model = build_model(&req).unwrap();
    let outcome = solve_model(&model, Duration::from_secs(30)).unwrap();
    assert!(outcome.feasible);
    assert_eq!(outcome.final_shares, vec![2, 8]);
}

#[test]
fn test_solver_reports_infeasible_as_data() {
    // Two full-weight zero-deviation targets force a minimum spend of
    // roughly twice the budget; no integer assignment satisfies the bounds.
    let req = request(
        vec![],
        vec![
            target_dev("A", 100.0, 9.0, 0.0),
            target_dev("B", 100.0, 9.0, 0.0),
        ],
        100.0,
    );
    let model = build_model(&req).unwrap();
    let outcome = solve_model(&model, Duration::from_secs(30)).unwrap();
    assert!(!outcome.feasible);
    assert!(outcome.final_shares.is_empty());

    let result = process_solution(&model, &outcome, &req);
    assert_eq!(result.solver_status, SolverStatus::Infeasible);
    assert!(result.allocations.is_empty());
    assert_eq!(result.optimization_metrics.unused_percentage, 100.0);
}

// ─── Heuristic strategies ────────────────────────────────────────────────────

#[test]
fn test_heuristic_minimize_leftover_spends_remainder() {
    // Floors: A 1 (@100, value 175), B 1. Remainder pass adds one A share;
    // nothing else is affordable afterwards.
    let req = request(
        vec![],
        vec![
            target_dev("A", 50.0, 100.0, 0.0),
            target_dev("B", 50.0, 100.0, 0.0),
        ],
        350.0,
    );
    let model = build_model(&req).unwrap();
    let shares = run_heuristic(&model, Strategy::MinimizeLeftover, None);
    assert_eq!(shares.iter().sum::<u64>(), 3);
    let spent: f64 = shares
        .iter()
        .zip(&model.entries)
        .map(|(&s, e)| s as f64 * e.price)
        .sum();
    assert!(spent <= 350.0);
}

#[test]
fn test_heuristic_maximize_shares_prefers_cheapest() {
    let req = request(
        vec![],
        vec![target("A", 50.0, 90.0), target("B", 50.0, 10.0)],
        200.0,
    );
    let model = build_model(&req).unwrap();
    let shares = run_heuristic(&model, Strategy::MaximizeShares, None);
    // Floors: A 1 (90), B 10 (100); the remaining 10 buys one more B.
    assert_eq!(shares, vec![1, 11]);
}

#[test]
fn test_heuristic_momentum_orders_by_efficiency() {
    let req = request(
        vec![],
        vec![target("A", 50.0, 100.0), target("B", 50.0, 100.0)],
        500.0,
    );
    let model = build_model(&req).unwrap();
    // Strong signal on A: the leftover 100 after floors (2 + 2) goes to A.
    let scores: std::collections::BTreeMap<String, f64> =
        [("A".to_string(), 10.0), ("B".to_string(), 1.0)]
            .into_iter()
            .collect();
    let shares = run_heuristic(&model, Strategy::MomentumWeighted, Some(&scores));
    assert_eq!(shares, vec![3, 2]);
}

#[test]
fn test_heuristic_enhanced_budget_leaves_no_affordable_residue() {
    let req = request(
        vec![],
        vec![target("A", 70.0, 130.0), target("B", 30.0, 20.0)],
        1000.0,
    );
    let model = build_model(&req).unwrap();
    let shares = run_heuristic(&model, Strategy::EnhancedBudget, None);
    let spent: f64 = shares
        .iter()
        .zip(&model.entries)
        .map(|(&s, e)| s as f64 * e.price)
        .sum();
    let cheapest = 20.0;
    assert!(spent <= 1000.0);
    assert!(
        1000.0 - spent < cheapest,
        "unconstrained final fill left an affordable residue: {}",
        1000.0 - spent
    );
}

#[test]
fn test_heuristic_never_buys_zero_weight_targets() {
    let req = request(
        vec![],
        vec![target("A", 0.0, 10.0), target("B", 100.0, 30.0)],
        100.0,
    );
    let model = build_model(&req).unwrap();
    for strategy in [
        Strategy::MinimizeLeftover,
        Strategy::MaximizeShares,
        Strategy::MomentumWeighted,
        Strategy::EnhancedBudget,
    ] {
        let shares = run_heuristic(&model, strategy, None);
        assert_eq!(shares[0], 0, "{strategy:?} bought a zero-weight target");
    }
}

// ─── Orchestration ───────────────────────────────────────────────────────────

#[test]
fn test_scenario_full_position_already_on_target() {
    // Holdings A 10 @ 100, no cash, target A 100% → keep all ten shares.
    let req = request(
        vec![holding("A", 10, 100.0)],
        vec![target("A", 100.0, 100.0)],
        0.0,
    );
    let result = rebalance(&req).unwrap();
    assert_result_invariants(&result, &req);
    assert_eq!(result.solver_status, SolverStatus::Optimal);
    assert_eq!(result.allocations[0].final_shares, 10);
    assert_eq!(result.allocations[0].action, AllocationAction::Hold);
    assert!(result.optimization_metrics.unused_percentage < 1e-9);
}

#[test]
fn test_scenario_fresh_cash_split() {
    let req = request(
        vec![],
        vec![target("X", 60.0, 300.0), target("Y", 40.0, 50.0)],
        1000.0,
    );
    let result = rebalance(&req).unwrap();
    assert_result_invariants(&result, &req);
    let x = result.allocations.iter().find(|a| a.name == "X").unwrap();
    let y = result.allocations.iter().find(|a| a.name == "Y").unwrap();
    assert!((1..=2).contains(&x.final_shares));
    assert!(y.final_shares >= 7);
    assert!(result.optimization_metrics.unused_percentage < 15.0);
}

#[test]
fn test_scenario_non_target_holding_is_liquidated() {
    let req = request(
        vec![holding("Z", 5, 80.0)],
        vec![target("W", 100.0, 40.0)],
        0.0,
    );
    let result = rebalance(&req).unwrap();
    assert_result_invariants(&result, &req);
    assert_eq!(result.holdings_to_sell.len(), 1);
    let z = &result.holdings_to_sell[0];
    assert_eq!((z.name.as_str(), z.shares, z.total_value), ("Z", 5, 400.0));
    assert_eq!(result.allocations[0].final_shares, 10);
}

#[test]
fn test_scenario_zero_weight_target_fully_sold() {
    let req = request(
        vec![holding("V", 20, 50.0)],
        vec![target("V", 0.0, 50.0), target("W", 100.0, 50.0)],
        0.0,
    );
    let result = rebalance(&req).unwrap();
    assert_result_invariants(&result, &req);
    let v = result.allocations.iter().find(|a| a.name == "V").unwrap();
    assert_eq!(v.final_shares, 0);
    assert_eq!(v.shares_to_sell, 20);
    assert_eq!(v.action, AllocationAction::Sell);
    let w = result.allocations.iter().find(|a| a.name == "W").unwrap();
    assert_eq!(w.final_shares, 20);
}

#[test]
fn test_forced_heuristic_replaces_underutilized_solver_solution() {
    // Zero-deviation bounds pin the solver at one share each (200 of 350
    // deployed, 42.9% unused). The heuristic ignores those bounds and gets
    // to 300, so it is forced in above the 8% threshold.
    let req = request(
        vec![],
        vec![
            target_dev("A", 50.0, 100.0, 0.0),
            target_dev("B", 50.0, 100.0, 0.0),
        ],
        350.0,
    );
    let result = rebalance(&req).unwrap();
    assert_result_invariants(&result, &req);
    assert_eq!(result.solver_status, SolverStatus::HeuristicForced);
    assert!(result.fallback_used);
    assert!(result.fallback_reason.is_some());
    assert_eq!(result.optimization_metrics.total_budget_used, 300.0);
}

#[test]
fn test_fallback_guarantee_on_forced_infeasibility() {
    // Overlapping full-weight zero-deviation targets make the model itself
    // infeasible; the call must still return a result, not an error.
    let req = request(
        vec![],
        vec![
            target_dev("A", 100.0, 9.0, 0.0),
            target_dev("B", 100.0, 9.0, 0.0),
        ],
        100.0,
    );
    let result = rebalance(&req).unwrap();
    assert_result_invariants(&result, &req);
    assert!(matches!(
        result.solver_status,
        SolverStatus::Heuristic | SolverStatus::Infeasible
    ));
    assert!(result.fallback_used);
    assert!(!result.diagnostics.is_empty());
}

#[test]
fn test_solver_timeout_routes_to_heuristic() {
    // A one-nanosecond budget cannot cover thread spawn plus a 40-variable
    // solve; the orchestrator must recover through the heuristic.
    let targets: Vec<_> = (0..40)
        .map(|i| target(&format!("T{i}"), 2.5, 10.0 + i as f64))
        .collect();
    let req = request(vec![], targets, 10_000.0);
    let config = EngineConfig {
        solver_timeout: Duration::from_nanos(1),
        ..EngineConfig::default()
    };
    let result = rebalance_with_config(&req, &config).unwrap();
    assert_result_invariants(&result, &req);
    assert_eq!(result.solver_status, SolverStatus::Heuristic);
    assert!(result.fallback_used);
    assert!(result
        .fallback_reason
        .as_deref()
        .unwrap()
        .contains("wall-clock"));
}

// ─── Tolerance annotation ────────────────────────────────────────────────────

#[test]
fn test_tolerance_annotation_marks_deviations() {
    let req = request(
        vec![],
        vec![target("X", 60.0, 300.0), target("Y", 40.0, 50.0)],
        1000.0,
    );
    let result = rebalance(&req).unwrap();
    let metrics = result.tolerance_metrics.unwrap();
    assert_eq!(metrics.total_allocations, 2);
    for a in &result.allocations {
        let deviation = a.deviation.unwrap();
        assert!((deviation - (a.actual_percentage - a.target_percentage)).abs() < 1e-9);
        assert_eq!(a.tolerance_compliant.unwrap(), deviation.abs() <= 5.0);
    }
}

#[test]
fn test_tolerance_band_widening_is_monotone() {
    let req = request(
        vec![],
        vec![
            target("A", 40.0, 230.0),
            target("B", 35.0, 70.0),
            target("C", 25.0, 13.0),
        ],
        2000.0,
    );
    let result = rebalance(&req).unwrap();
    let mut last_rate = -1.0;
    for band in [0.01, 0.02, 0.05, 0.10, 0.30] {
        let annotated = annotate_tolerance(&result, band);
        let rate = annotated.tolerance_metrics.unwrap().compliance_rate;
        assert!(
            rate >= last_rate,
            "compliance dropped from {last_rate} to {rate} at band {band}"
        );
        last_rate = rate;
    }
}

#[test]
fn test_tolerance_pass_never_touches_shares() {
    let req = request(
        vec![],
        vec![target("A", 50.0, 120.0), target("B", 50.0, 95.0)],
        1500.0,
    );
    let result = rebalance(&req).unwrap();
    let annotated = annotate_tolerance(&result, 0.001);
    let before: Vec<u64> = result.allocations.iter().map(|a| a.final_shares).collect();
    let after: Vec<u64> = annotated.allocations.iter().map(|a| a.final_shares).collect();
    assert_eq!(before, after);
}

#[test]
fn test_widening_allowed_deviation_does_not_hurt_compliance() {
    // Same request solved with progressively wider per-instrument bounds:
    // the solver gains room to land closer to the stated weights.
    let mut last_rate = -1.0;
    for dev in [1.0, 5.0, 15.0] {
        let req = request(
            vec![],
            vec![
                target_dev("X", 60.0, 300.0, dev),
                target_dev("Y", 40.0, 50.0, dev),
            ],
            1000.0,
        );
        let result = rebalance(&req).unwrap();
        let rate = result.tolerance_metrics.unwrap().compliance_rate;
        assert!(rate >= last_rate);
        last_rate = rate;
    }
}

// ─── Enhanced iterative optimizer ────────────────────────────────────────────

#[test]
fn test_enhanced_reports_phases_and_respects_budget() {
    let req = request(
        vec![holding("OLD", 3, 50.0)],
        vec![target("A", 70.0, 130.0), target("B", 30.0, 20.0)],
        1000.0,
    );
    let result = optimize_enhanced(&req, &EngineConfig::default()).unwrap();
    assert_result_invariants(&result, &req);
    let names: Vec<&str> = result.phases.iter().map(|p| p.phase.as_str()).collect();
    assert!(names.contains(&"initial-pass"));
    assert!(names.contains(&"price-ratio-analysis"));
    assert!(names.contains(&"final-validation"));
    assert!(result.tolerance_metrics.is_some());
}

#[test]
fn test_enhanced_never_deploys_less_than_single_solve() {
    let req = request(
        vec![],
        vec![target("A", 80.0, 250.0), target("B", 20.0, 50.0)],
        1000.0,
    );
    let single = rebalance(&req).unwrap();
    let enhanced = optimize_enhanced(&req, &EngineConfig::default()).unwrap();
    assert_result_invariants(&enhanced, &req);
    assert!(
        enhanced.optimization_metrics.unused_percentage
            <= single.optimization_metrics.unused_percentage + 1e-9
    );
}

#[test]
fn test_enhanced_initial_phase_reflects_current_coverage() {
    // Holdings already covering the single target: the pipeline starts
    // with essentially no idle budget, and the report must say so.
    let covered = request(
        vec![holding("A", 10, 100.0)],
        vec![target("A", 100.0, 100.0)],
        0.0,
    );
    let result = optimize_enhanced(&covered, &EngineConfig::default()).unwrap();
    let initial = result
        .phases
        .iter()
        .find(|p| p.phase == "initial-pass")
        .unwrap();
    assert!(initial.unused_before < 1e-9);

    // Pure cash: everything is idle before the first solve.
    let fresh = request(vec![], vec![target("A", 100.0, 100.0)], 1000.0);
    let result = optimize_enhanced(&fresh, &EngineConfig::default()).unwrap();
    let initial = result
        .phases
        .iter()
        .find(|p| p.phase == "initial-pass")
        .unwrap();
    assert_eq!(initial.unused_before, 100.0);
}

#[test]
fn test_enhanced_price_ratio_analysis_flags_near_integer_pairs() {
    use super::enhanced::analyze_price_ratios;
    let targets = vec![
        target("EXP", 50.0, 300.0),
        target("CHEAP", 50.0, 50.0),
        target("ODD", 0.0, 7.0),
    ];
    let pairs = analyze_price_ratios(&targets);
    // 300/50 = 6 exactly; zero-weight ODD is excluded.
    assert_eq!(pairs.len(), 1);
    assert_eq!((pairs[0].expensive, pairs[0].cheap, pairs[0].units), (0, 1, 6));
}

#[test]
fn test_enhanced_dynamic_deviation_clamps_to_range() {
    use super::enhanced::dynamic_deviation;
    let config = EngineConfig::default();
    let tiny = dynamic_deviation(0.0, 10.0, 10.0, 500.0, 80.0, &config);
    assert_eq!(tiny, config.min_dynamic_deviation);
    let huge = dynamic_deviation(95.0, 500.0, 10.0, 500.0, 1.0, &config);
    assert_eq!(huge, config.max_dynamic_deviation);
    // Smaller targets get at least as much slack, all else equal.
    let small_target = dynamic_deviation(20.0, 100.0, 10.0, 500.0, 5.0, &config);
    let large_target = dynamic_deviation(20.0, 100.0, 10.0, 500.0, 60.0, &config);
    assert!(small_target >= large_target);
}


#[derive(Clone)]
pub(crate) struct TestRng {
    state: u64,
}

impl TestRng {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    fn next_f64(&mut self) -> f64 {
        // [0, 1)
        (self.next_u64() as f64) / ((u64::MAX as f64) + 1.0)
    }

    pub(crate) fn in_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    pub(crate) fn pick(&mut self, upper_exclusive: usize) -> usize {
        (self.next_u64() % (upper_exclusive as u64)) as usize
    }

    pub(crate) fn chance(&mut self, numer: u64, denom: u64) -> bool {
        (self.next_u64() % denom) < numer
    }
}
