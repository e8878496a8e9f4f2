//! The reconciliation core: discovers remote project state, diffs it
//! against a desired manifest, resolves dependencies, plans and optimizes
//! the resulting operations, and executes them against a
//! [`reconciler_client::ControlPlaneClient`] with retries, a circuit
//! breaker and a token-bucket rate limiter.

pub mod cache;
pub mod cancellation;
pub mod dependency;
pub mod diff;
pub mod discovery;
pub mod dry_run;
pub mod executor;
pub mod optimizer;
pub mod planner;
pub mod rate_limiter;
pub mod retry;

pub use cache::{CacheStats, StateCache};
pub use cancellation::{sleep_or_cancel, CancellationToken};
pub use dependency::DependencyResolver;
pub use diff::DiffEngine;
pub use discovery::StateDiscovery;
pub use dry_run::{DryRunConfig, DryRunMode, DryRunReport, DryRunSimulator};
pub use executor::{Executor, ExecutorConfig};
pub use optimizer::PlanOptimizer;
pub use planner::{Planner, PlannerConfig};
pub use rate_limiter::RateLimiter;
pub use retry::{
    CircuitBreaker, CircuitState, ManualDecision, ManualInterventionHook, RetryManager, RetryPolicy,
};
