use std::error::Error;
use std::fs;
use std::time::Duration;

use etf_rebalancer::optimizer::{EngineConfig, OptimizationRequest, Strategy};
use etf_rebalancer::{optimizer, Engine};

fn parse_strategy() -> Option<Strategy> {
    match std::env::var("STRATEGY")
        .ok()
        .map(|raw| raw.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("minimize-leftover") => Some(Strategy::MinimizeLeftover),
        Some("maximize-shares") => Some(Strategy::MaximizeShares),
        Some("momentum-weighted") => Some(Strategy::MomentumWeighted),
        Some("enhanced-budget") => Some(Strategy::EnhancedBudget),
        _ => None,
    }
}

fn parse_solver_timeout() -> Option<Duration> {
    std::env::var("SOLVER_TIMEOUT_SECS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn parse_fallback_threshold() -> Option<f64> {
    std::env::var("FALLBACK_THRESHOLD")
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
}

fn parse_enhanced() -> bool {
    std::env::var("ENHANCED")
        .ok()
        .map(|raw| matches!(raw.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn request_path() -> Option<String> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("REQUEST_FILE").ok())
}

fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(path) = request_path() else {
        eprintln!("usage: etf-rebalancer <request.json>  (or set REQUEST_FILE)");
        std::process::exit(2);
    };

    let raw = fs::read_to_string(&path)?;
    let mut request: OptimizationRequest = serde_json::from_str(&raw)?;
    if request.optimization_strategy.is_none() {
        request.optimization_strategy = parse_strategy();
    }

    let mut config = EngineConfig::default();
    if let Some(timeout) = parse_solver_timeout() {
        config.solver_timeout = timeout;
    }
    if let Some(threshold) = parse_fallback_threshold() {
        config.fallback_threshold = threshold;
    }

    let enhanced = parse_enhanced();
    let engine = Engine::with_default_cache(config);
    let result = if enhanced {
        engine.optimize_enhanced(&request)?
    } else {
        engine.optimize(&request)?
    };

    tracing::info!(
        status = ?result.solver_status,
        enhanced,
        targets = request.target_etfs.len(),
        holdings = request.current_holdings.len(),
        unused_percentage = result.optimization_metrics.unused_percentage,
        elapsed_ms = result.optimization_metrics.optimization_time_ms,
        "optimization complete"
    );

    eprint!("{}", optimizer::format_result_summary(&result));
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
