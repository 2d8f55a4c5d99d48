//! Integer portfolio rebalancing toward a target allocation.
//!
//! Given current holdings, a cash injection and a set of target ETFs with
//! percentage weights and per-unit prices, the optimizer computes integer
//! share counts per target, a full-liquidation list for every non-target
//! position, and the residual unused cash, while staying inside each
//! instrument's deviation tolerance and maximizing deployed capital.
//!
//! Entry points, least to most machinery:
//! - [`optimizer::rebalance`] — one MILP solve with heuristic fallback.
//! - [`optimizer::optimize_enhanced`] — the five-phase iterative pipeline.
//! - [`cache::Engine`] — either of the above behind a result cache.

pub mod cache;
pub mod optimizer;

pub use cache::{Engine, InMemoryCache, NoopCache, ResultCache};
pub use optimizer::{
    EngineConfig, OptimizationRequest, OptimizationResult, SolverStatus, Strategy,
    ValidationError,
};
