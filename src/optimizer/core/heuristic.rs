use std::collections::BTreeMap;

use super::model::{BudgetModel, ModelEntry};
use super::types::Strategy;

/// Hard cap on every greedy distribution loop. Prices are positive, so each
/// pass either spends cash or stops; the cap guarantees termination anyway.
pub(super) const MAX_GREEDY_ITERS: usize = 100;

/// Slack on the bounded-expansion weight check, in percentage points.
const EXPANSION_SLACK_POINTS: f64 = 10.0;

/// Mutable fill state threaded through the greedy passes. Never escapes
/// this module; the caller only sees the final share vector.
struct FillState {
    shares: Vec<u64>,
    remaining: f64,
}

impl FillState {
    fn buy_one(&mut self, idx: usize, price: f64) {
        self.shares[idx] += 1;
        self.remaining -= price;
    }
}

fn buyable(entry: &ModelEntry, remaining: f64) -> bool {
    entry.target_percentage > 0.0 && entry.price <= remaining
}

/// Start every strategy from per-target floor shares: the largest integer
/// position that stays at or under the target value.
fn floor_fill(model: &BudgetModel) -> FillState {
    let mut shares = Vec::with_capacity(model.entries.len());
    let mut spent = 0.0;
    for entry in &model.entries {
        let floor = if entry.target_percentage > 0.0 {
            entry.floor_shares()
        } else {
            0
        };
        spent += floor as f64 * entry.price;
        shares.push(floor);
    }
    // Stated weights summing above 100 can make the floors themselves
    // overshoot the budget. Trim the most overweight entries until the
    // fill is affordable again.
    while spent > model.liquidation_budget {
        let mut worst: Option<usize> = None;
        for (i, entry) in model.entries.iter().enumerate() {
            if shares[i] == 0 {
                continue;
            }
            let overshoot = shares[i] as f64 * entry.price - entry.target_value;
            if worst.is_none_or(|w| {
                overshoot > shares[w] as f64 * model.entries[w].price - model.entries[w].target_value
            }) {
                worst = Some(i);
            }
        }
        let Some(idx) = worst else { break };
        shares[idx] -= 1;
        spent -= model.entries[idx].price;
    }

    FillState {
        shares,
        remaining: model.liquidation_budget - spent,
    }
}

/// One extra share each to the instruments closest to their own target,
/// largest fractional remainder first.
fn remainder_pass(model: &BudgetModel, fill: &mut FillState) {
    let mut order: Vec<usize> = (0..model.entries.len())
        .filter(|&i| model.entries[i].target_percentage > 0.0)
        .collect();
    order.sort_by(|&a, &b| {
        model.entries[b]
            .fractional_remainder()
            .total_cmp(&model.entries[a].fractional_remainder())
    });
    for idx in order {
        if buyable(&model.entries[idx], fill.remaining) {
            fill.buy_one(idx, model.entries[idx].price);
        }
    }
}

/// Repeatedly buy the cheapest affordable instrument until nothing fits.
fn cheapest_loop(model: &BudgetModel, fill: &mut FillState) {
    for _ in 0..MAX_GREEDY_ITERS {
        let mut best: Option<usize> = None;
        for (i, entry) in model.entries.iter().enumerate() {
            if buyable(entry, fill.remaining)
                && best.is_none_or(|b| entry.price < model.entries[b].price)
            {
                best = Some(i);
            }
        }
        let Some(idx) = best else { break };
        fill.buy_one(idx, model.entries[idx].price);
    }
}

/// Like `cheapest_loop`, but ordered by efficiency (signal / price). A
/// missing signal defaults to 1.0, which degrades to cheapest-first.
fn efficiency_loop(model: &BudgetModel, fill: &mut FillState, scores: &BTreeMap<String, f64>) {
    let efficiency: Vec<f64> = model
        .entries
        .iter()
        .map(|e| scores.get(&e.name).copied().unwrap_or(1.0) / e.price)
        .collect();
    for _ in 0..MAX_GREEDY_ITERS {
        let mut best: Option<usize> = None;
        for (i, entry) in model.entries.iter().enumerate() {
            if buyable(entry, fill.remaining) && best.is_none_or(|b| efficiency[i] > efficiency[b])
            {
                best = Some(i);
            }
        }
        let Some(idx) = best else { break };
        fill.buy_one(idx, model.entries[idx].price);
    }
}

/// Bounded expansion: keep buying the cheapest instrument whose post-buy
/// weight stays within target + 10 points.
fn bounded_expansion(model: &BudgetModel, fill: &mut FillState) {
    if model.liquidation_budget <= 0.0 {
        return;
    }
    for _ in 0..MAX_GREEDY_ITERS {
        let mut best: Option<usize> = None;
        for (i, entry) in model.entries.iter().enumerate() {
            if !buyable(entry, fill.remaining) {
                continue;
            }
            let weight_after =
                (fill.shares[i] + 1) as f64 * entry.price / model.liquidation_budget * 100.0;
            if weight_after > entry.target_percentage + EXPANSION_SLACK_POINTS {
                continue;
            }
            if best.is_none_or(|b| entry.price < model.entries[b].price) {
                best = Some(i);
            }
        }
        let Some(idx) = best else { break };
        fill.buy_one(idx, model.entries[idx].price);
    }
}

/// Produce final shares for every model entry without the solver.
///
/// Pure with respect to its inputs: the model is read-only and the chosen
/// strategy is an explicit tagged variant, selected once by the caller.
pub fn run_heuristic(
    model: &BudgetModel,
    strategy: Strategy,
    momentum_scores: Option<&BTreeMap<String, f64>>,
) -> Vec<u64> {
    let mut fill = floor_fill(model);
    match strategy {
        Strategy::MinimizeLeftover => {
            remainder_pass(model, &mut fill);
            cheapest_loop(model, &mut fill);
        }
        Strategy::MaximizeShares => {
            cheapest_loop(model, &mut fill);
        }
        Strategy::MomentumWeighted => {
            static EMPTY: BTreeMap<String, f64> = BTreeMap::new();
            efficiency_loop(model, &mut fill, momentum_scores.unwrap_or(&EMPTY));
        }
        Strategy::EnhancedBudget => {
            remainder_pass(model, &mut fill);
            bounded_expansion(model, &mut fill);
            // Final unconstrained fill: any remaining cash into whatever
            // still fits, so no sub-share-price residue survives when a
            // cheap instrument exists.
            cheapest_loop(model, &mut fill);
        }
    }
    tracing::debug!(
        strategy = strategy.as_str(),
        remaining = fill.remaining,
        "heuristic fill complete"
    );
    fill.shares
}
