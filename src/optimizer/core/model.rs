use std::fmt;

use super::types::OptimizationRequest;

/// Absolute cash slack allowed on the budget bound, covering float rounding
/// of integer share values.
pub(super) const BUDGET_EPS: f64 = 1e-6;

/// How far Σ targetPercentage may drift from 100 before we warn operators.
const WEIGHT_SUM_WARN_POINTS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    NonPositivePrice { name: String, price: f64 },
    NegativePercentage { name: String, percentage: f64 },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositivePrice { name, price } => {
                write!(f, "target '{name}' has non-positive price {price}")
            }
            Self::NegativePercentage { name, percentage } => {
                write!(f, "target '{name}' has negative percentage {percentage}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// One decision row: the integer number of final shares to hold in a target
/// instrument, bounded by the instrument's tolerance band.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntry {
    pub name: String,
    pub price: f64,
    pub target_percentage: f64,
    pub allowed_deviation: f64,
    /// liquidation_budget × targetPercentage / 100
    pub target_value: f64,
    pub min_shares: u64,
    pub max_shares: u64,
}

impl ModelEntry {
    /// Exact (fractional) share count that would hit the target value.
    pub fn ideal_shares(&self) -> f64 {
        self.target_value / self.price
    }

    /// Integer floor of the ideal share count.
    pub fn floor_shares(&self) -> u64 {
        self.ideal_shares().floor().max(0.0) as u64
    }

    /// Fractional remainder above the floor, in [0, 1).
    pub fn fractional_remainder(&self) -> f64 {
        let ideal = self.ideal_shares();
        (ideal - ideal.floor()).clamp(0.0, 1.0)
    }
}

/// Solvable integer-programming model for one request: one final-shares
/// variable per entry, a single budget row, and per-entry bound pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetModel {
    pub liquidation_budget: f64,
    pub entries: Vec<ModelEntry>,
}

impl BudgetModel {
    /// Minimum cash the bound pairs force to be deployed. If this exceeds
    /// the budget the model is infeasible by construction.
    pub fn min_required_value(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.min_shares as f64 * e.price)
            .sum()
    }
}

/// Clean-slate model construction: every current holding is conceptually
/// liquidated and the whole budget redeployed over the targets.
pub fn build_model(request: &OptimizationRequest) -> Result<BudgetModel, ModelError> {
    let liquidation_budget = request.liquidation_budget();

    let weight_sum: f64 = request.target_etfs.iter().map(|t| t.target_percentage).sum();
    if (weight_sum - 100.0).abs() > WEIGHT_SUM_WARN_POINTS {
        tracing::warn!(
            weight_sum,
            targets = request.target_etfs.len(),
            "target percentages do not sum to 100; proceeding with stated weights"
        );
    }

    let mut entries = Vec::with_capacity(request.target_etfs.len());
    for target in &request.target_etfs {
        if target.price_per_share <= 0.0 || !target.price_per_share.is_finite() {
            return Err(ModelError::NonPositivePrice {
                name: target.name.clone(),
                price: target.price_per_share,
            });
        }
        if target.target_percentage < 0.0 || !target.target_percentage.is_finite() {
            return Err(ModelError::NegativePercentage {
                name: target.name.clone(),
                percentage: target.target_percentage,
            });
        }

        let target_value = liquidation_budget * target.target_percentage / 100.0;
        let deviation = target.deviation().max(0.0);

        // Zero-weight targets are pinned to zero shares: forced full sale.
        let (min_shares, max_shares) = if target.target_percentage == 0.0 {
            (0, 0)
        } else {
            let lo = target_value * (1.0 - deviation / 100.0);
            let hi = target_value * (1.0 + deviation / 100.0);
            let min_shares = (lo.max(0.0) / target.price_per_share).floor() as u64;
            let max_shares = (hi.max(0.0) / target.price_per_share).floor() as u64;
            (min_shares, max_shares.max(min_shares))
        };

        entries.push(ModelEntry {
            name: target.name.clone(),
            price: target.price_per_share,
            target_percentage: target.target_percentage,
            allowed_deviation: deviation,
            target_value,
            min_shares,
            max_shares,
        });
    }

    Ok(BudgetModel {
        liquidation_budget,
        entries,
    })
}
