//! Memoization of optimizer output for identical requests.
//!
//! The cache is an injected abstraction so tests can substitute an
//! in-memory or no-op implementation. Any internal cache fault degrades to
//! a miss; the computation always proceeds.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::optimizer::{
    optimize_enhanced, rebalance_with_config, EngineConfig, OptimizationRequest,
    OptimizationResult, ValidationError,
};

/// Stable key over everything that determines a result: holdings, targets,
/// extra cash, the chosen strategy, and which pipeline computes it. The
/// single-solve and iterative pipelines produce different results for the
/// same request, so `enhanced` is part of the key. Hashing the canonical
/// JSON form keeps the key independent of in-memory layout.
pub fn request_cache_key(request: &OptimizationRequest, enhanced: bool) -> u64 {
    let mut hasher = DefaultHasher::new();
    // Serialization of these types cannot fail; fall back to a debug
    // rendering if it ever does, which still yields a usable key.
    let canonical = serde_json::to_string(request)
        .unwrap_or_else(|_| format!("{request:?}"));
    canonical.hash(&mut hasher);
    request.strategy().as_str().hash(&mut hasher);
    enhanced.hash(&mut hasher);
    hasher.finish()
}

pub trait ResultCache: Send + Sync {
    fn get(&self, key: u64) -> Option<OptimizationResult>;
    fn put(&self, key: u64, result: &OptimizationResult);
}

/// TTL-bounded in-memory cache. Entries are written whole on pipeline exit
/// and never partially updated; expired entries are dropped on read.
pub struct InMemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<u64, (Instant, OptimizationResult)>>,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl ResultCache for InMemoryCache {
    fn get(&self, key: u64) -> Option<OptimizationResult> {
        // A poisoned lock is a cache fault: treat as a miss.
        let mut entries = self.entries.lock().ok()?;
        match entries.get(&key) {
            Some((written, result)) if written.elapsed() < self.ttl => Some(result.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: u64, result: &OptimizationResult) {
        if let Ok(mut entries) = self.entries.lock() {
            // Expired entries whose keys never recur would otherwise stay
            // in the map for the lifetime of the engine.
            entries.retain(|_, (written, _)| written.elapsed() < self.ttl);
            entries.insert(key, (Instant::now(), result.clone()));
        }
    }
}

/// Cache that never hits; for tests and one-shot callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl ResultCache for NoopCache {
    fn get(&self, _key: u64) -> Option<OptimizationResult> {
        None
    }

    fn put(&self, _key: u64, _result: &OptimizationResult) {}
}

/// Top-level entry point: read-through on entry, write-through on exit of
/// the full pipeline. A hit returns the prior result tagged `cached`.
pub struct Engine {
    config: EngineConfig,
    cache: Box<dyn ResultCache>,
}

impl Engine {
    pub fn new(config: EngineConfig, cache: Box<dyn ResultCache>) -> Self {
        Self { config, cache }
    }

    pub fn with_default_cache(config: EngineConfig) -> Self {
        Self::new(config, Box::new(InMemoryCache::new(Duration::from_secs(300))))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn optimize(
        &self,
        request: &OptimizationRequest,
    ) -> Result<OptimizationResult, ValidationError> {
        self.run(request, false, |req, config| rebalance_with_config(req, config))
    }

    pub fn optimize_enhanced(
        &self,
        request: &OptimizationRequest,
    ) -> Result<OptimizationResult, ValidationError> {
        self.run(request, true, |req, config| optimize_enhanced(req, config))
    }

    fn run<F>(
        &self,
        request: &OptimizationRequest,
        enhanced: bool,
        compute: F,
    ) -> Result<OptimizationResult, ValidationError>
    where
        F: Fn(&OptimizationRequest, &EngineConfig) -> Result<OptimizationResult, ValidationError>,
    {
        let key = request_cache_key(request, enhanced);
        if let Some(mut hit) = self.cache.get(key) {
            tracing::debug!(key, "cache hit");
            hit.cached = true;
            return Ok(hit);
        }
        let result = compute(request, &self.config)?;
        self.cache.put(key, &result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{Holding, TargetInstrument};

    fn request(extra_cash: f64) -> OptimizationRequest {
        OptimizationRequest {
            current_holdings: vec![Holding {
                name: "VWCE".to_string(),
                shares: 3,
                price_per_unit: 100.0,
            }],
            target_etfs: vec![TargetInstrument {
                name: "VWCE".to_string(),
                target_percentage: 100.0,
                price_per_share: 100.0,
                allowed_deviation: None,
            }],
            extra_cash,
            objectives: None,
            optimization_strategy: None,
            momentum_scores: None,
        }
    }

    #[test]
    fn test_key_is_stable_and_input_sensitive() {
        let a = request_cache_key(&request(0.0), false);
        let b = request_cache_key(&request(0.0), false);
        let c = request_cache_key(&request(50.0), false);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_separates_pipelines() {
        let single = request_cache_key(&request(10.0), false);
        let enhanced = request_cache_key(&request(10.0), true);
        assert_ne!(single, enhanced);
    }

    #[test]
    fn test_pipelines_do_not_share_cache_entries() {
        let engine = Engine::with_default_cache(EngineConfig::default());
        let req = request(10.0);
        let plain = engine.optimize(&req).unwrap();
        assert!(!plain.cached);
        assert!(plain.phases.is_empty());

        // The iterative pipeline must run its own computation, not serve
        // the single-solve entry for the same request.
        let enhanced = engine.optimize_enhanced(&req).unwrap();
        assert!(!enhanced.cached);
        assert!(!enhanced.phases.is_empty());

        // Each pipeline still hits its own entry on repeat.
        assert!(engine.optimize(&req).unwrap().cached);
        assert!(engine.optimize_enhanced(&req).unwrap().cached);
    }

    #[test]
    fn test_second_call_is_cached_and_identical() {
        let engine = Engine::with_default_cache(EngineConfig::default());
        let first = engine.optimize(&request(10.0)).unwrap();
        let second = engine.optimize(&request(10.0)).unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.allocations, second.allocations);
        assert_eq!(
            first.optimization_metrics.total_budget_used,
            second.optimization_metrics.total_budget_used
        );
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = InMemoryCache::new(Duration::from_millis(0));
        let engine = Engine::new(EngineConfig::default(), Box::new(cache));
        let first = engine.optimize(&request(10.0)).unwrap();
        let second = engine.optimize(&request(10.0)).unwrap();
        assert!(!first.cached);
        assert!(!second.cached);
    }

    #[test]
    fn test_put_sweeps_expired_entries_under_other_keys() {
        let cache = InMemoryCache::new(Duration::from_millis(0));
        let result = crate::optimizer::rebalance(&request(10.0)).unwrap();
        cache.put(1, &result);
        cache.put(2, &result);
        let entries = cache.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key(&2));
    }

    #[test]
    fn test_noop_cache_never_hits() {
        let engine = Engine::new(EngineConfig::default(), Box::new(NoopCache));
        let first = engine.optimize(&request(10.0)).unwrap();
        let second = engine.optimize(&request(10.0)).unwrap();
        assert!(!first.cached && !second.cached);
    }
}
