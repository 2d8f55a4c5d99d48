use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default per-instrument allowed deviation, in percentage points.
pub const DEFAULT_ALLOWED_DEVIATION: f64 = 5.0;

/// Default tolerance band as a fraction (0.05 = ±5 percentage points).
pub const DEFAULT_TOLERANCE_BAND: f64 = 0.05;

/// A currently-owned position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub name: String,
    pub shares: u64,
    pub price_per_unit: f64,
}

impl Holding {
    pub fn value(&self) -> f64 {
        self.shares as f64 * self.price_per_unit
    }
}

/// A desired allocation target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInstrument {
    pub name: String,
    pub target_percentage: f64,
    pub price_per_share: f64,
    /// Percentage points around the target weight; `None` means the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_deviation: Option<f64>,
}

impl TargetInstrument {
    pub fn deviation(&self) -> f64 {
        self.allowed_deviation.unwrap_or(DEFAULT_ALLOWED_DEVIATION)
    }
}

/// Advisory weighting hints consumed by the iterative optimizer.
/// None of these are hard constraints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Objectives {
    pub use_all_budget: bool,
    pub budget_weight: f64,
    pub fairness_weight: f64,
    pub maximize_utilization: bool,
    pub utilization_deviation: f64,
    pub tolerance_band: f64,
}

impl Default for Objectives {
    fn default() -> Self {
        Self {
            use_all_budget: true,
            budget_weight: 0.7,
            fairness_weight: 0.3,
            maximize_utilization: false,
            utilization_deviation: 0.05,
            tolerance_band: DEFAULT_TOLERANCE_BAND,
        }
    }
}

/// Heuristic allocation strategy. Selected once at orchestration entry;
/// each variant maps to one distribution algorithm in `heuristic.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    MinimizeLeftover,
    MaximizeShares,
    MomentumWeighted,
    EnhancedBudget,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::MinimizeLeftover
    }
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MinimizeLeftover => "minimize-leftover",
            Self::MaximizeShares => "maximize-shares",
            Self::MomentumWeighted => "momentum-weighted",
            Self::EnhancedBudget => "enhanced-budget",
        }
    }
}

/// One optimization call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRequest {
    #[serde(default)]
    pub current_holdings: Vec<Holding>,
    pub target_etfs: Vec<TargetInstrument>,
    #[serde(default)]
    pub extra_cash: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Objectives>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_strategy: Option<Strategy>,
    /// Externally supplied efficiency signal for the momentum-weighted
    /// strategy, keyed by instrument name. Missing entries default to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum_scores: Option<BTreeMap<String, f64>>,
}

impl OptimizationRequest {
    /// extra cash + full liquidation value of every current holding.
    pub fn liquidation_budget(&self) -> f64 {
        self.extra_cash + self.current_holdings.iter().map(Holding::value).sum::<f64>()
    }

    pub fn strategy(&self) -> Strategy {
        self.optimization_strategy.unwrap_or_default()
    }

    pub fn objectives(&self) -> Objectives {
        self.objectives.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverStatus {
    Optimal,
    Heuristic,
    HeuristicForced,
    Infeasible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AllocationAction {
    Buy,
    Sell,
    Rebalance,
    Hold,
}

/// Result row for one target instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub name: String,
    pub current_shares: u64,
    pub final_shares: u64,
    pub shares_to_buy: u64,
    pub shares_to_sell: u64,
    pub price_per_share: f64,
    pub final_value: f64,
    pub target_percentage: f64,
    pub actual_percentage: f64,
    pub action: AllocationAction,
    /// actual − target, in percentage points. Set by the tolerance pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_compliant: Option<bool>,
}

/// A held instrument absent from the target set; always fully liquidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingToSell {
    pub name: String,
    pub shares: u64,
    pub price_per_unit: f64,
    pub total_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationMetrics {
    pub total_budget_used: f64,
    pub unused_budget: f64,
    pub unused_percentage: f64,
    pub optimization_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleranceMetrics {
    pub tolerance_band: f64,
    pub compliance_rate: f64,
    pub compliant_allocations: usize,
    pub total_allocations: usize,
}

/// One phase of the enhanced iterative optimizer, reported for
/// inspectability. Phases never mutate each other's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: String,
    pub unused_before: f64,
    pub unused_after: f64,
    pub detail: String,
}

/// Full response for one optimization call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub solver_status: SolverStatus,
    pub allocations: Vec<Allocation>,
    pub holdings_to_sell: Vec<HoldingToSell>,
    pub optimization_metrics: OptimizationMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_metrics: Option<ToleranceMetrics>,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default)]
    pub cached: bool,
    /// Structured audit trail (infeasibility analysis, fallback causes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseReport>,
}
