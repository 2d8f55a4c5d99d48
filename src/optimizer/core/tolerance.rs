use super::types::{OptimizationResult, ToleranceMetrics};

/// Annotate a result with per-allocation deviation and compliance plus the
/// aggregate compliance rate. Pure: share counts are never touched; the
/// caller receives a fresh result value.
///
/// `band` is a fraction: 0.05 means an allocation may sit up to 5
/// percentage points away from its stated target weight.
pub fn annotate_tolerance(result: &OptimizationResult, band: f64) -> OptimizationResult {
    let band_points = band * 100.0;
    let mut annotated = result.clone();

    let mut total = 0usize;
    let mut compliant = 0usize;
    for allocation in &mut annotated.allocations {
        if allocation.target_percentage <= 0.0 {
            allocation.deviation = None;
            allocation.tolerance_compliant = None;
            continue;
        }
        let deviation = allocation.actual_percentage - allocation.target_percentage;
        let within = deviation.abs() <= band_points;
        allocation.deviation = Some(deviation);
        allocation.tolerance_compliant = Some(within);
        total += 1;
        if within {
            compliant += 1;
        }
    }

    let compliance_rate = if total > 0 {
        compliant as f64 / total as f64 * 100.0
    } else {
        100.0
    };
    annotated.tolerance_metrics = Some(ToleranceMetrics {
        tolerance_band: band,
        compliance_rate,
        compliant_allocations: compliant,
        total_allocations: total,
    });
    annotated
}
