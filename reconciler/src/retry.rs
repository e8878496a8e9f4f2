//! Exponential backoff retries and a per-`(OperationType, ResourceKind)`
//! circuit breaker (§4.7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use reconciler_common::errors::{CircuitOpen, ManualAbort};
use reconciler_common::{OperationType, ReconcileError, ResourceKind};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cancellation::sleep_or_cancel;

/// Exponential backoff with `±(jitterFraction * delay)` jitter around
/// `min(max, base * multiplier^attempt)`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_op_type(OperationType::Update)
    }
}

impl RetryPolicy {
    /// The per-`OperationType` policy table from §4.7: creates get the most
    /// attempts and the steepest backoff (a failed create is cheapest to
    /// retry), deletes back off fast and give up soonest.
    pub fn for_op_type(op_type: OperationType) -> Self {
        match op_type {
            OperationType::Create => Self {
                max_attempts: 5,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
                jitter_fraction: 0.1,
            },
            OperationType::Update | OperationType::NoChange => Self {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                multiplier: 1.5,
                jitter_fraction: 0.1,
            },
            OperationType::Delete => Self {
                max_attempts: 2,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(15),
                multiplier: 2.0,
                jitter_fraction: 0.1,
            },
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(32) as i32);
        let base = (self.base_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let jitter = base * self.jitter_fraction;
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Trips open after `failure_threshold` consecutive failures for a given
/// `(OperationType, ResourceKind)` pair, then allows one trial call through
/// as `HalfOpen` after `reset_timeout` has elapsed.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    breakers: Mutex<HashMap<(OperationType, ResourceKind), Breaker>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Checks whether a call for this key is currently permitted, flipping
    /// `Open` to `HalfOpen` if the reset timeout has elapsed.
    pub fn check(&self, op_type: OperationType, kind: ResourceKind) -> Result<(), ReconcileError> {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry((op_type, kind)).or_insert_with(Breaker::new);
        match breaker.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    breaker.state = CircuitState::HalfOpen;
                    debug!(?op_type, ?kind, "circuit half-open, allowing trial call");
                    Ok(())
                } else {
                    CircuitOpen { op_type, kind }.fail()
                }
            }
        }
    }

    pub fn record_success(&self, op_type: OperationType, kind: ResourceKind) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry((op_type, kind)).or_insert_with(Breaker::new);
        breaker.consecutive_failures = 0;
        if breaker.state != CircuitState::Closed {
            debug!(?op_type, ?kind, "circuit closed after a successful call");
        }
        breaker.state = CircuitState::Closed;
        breaker.opened_at = None;
    }

    pub fn record_failure(&self, op_type: OperationType, kind: ResourceKind) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry((op_type, kind)).or_insert_with(Breaker::new);
        breaker.consecutive_failures += 1;
        if breaker.state == CircuitState::HalfOpen
            || breaker.consecutive_failures >= self.failure_threshold
        {
            if breaker.state != CircuitState::Open {
                warn!(?op_type, ?kind, failures = breaker.consecutive_failures, "circuit opened");
            }
            breaker.state = CircuitState::Open;
            breaker.opened_at = Some(Instant::now());
        }
    }

    pub fn state_of(&self, op_type: OperationType, kind: ResourceKind) -> CircuitState {
        self.breakers
            .lock()
            .get(&(op_type, kind))
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }
}

/// What to do about an error classified as needing manual intervention
/// (quota exceeded, payment required, maintenance, a busy cluster).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManualDecision {
    /// Retry as if the error were transient.
    Retry,
    /// Give up on this operation but don't fail the whole run.
    Skip,
    /// Fail the operation with `ManualAbort`.
    Abort,
    /// Pretend the operation succeeded.
    Ignore,
}

/// Consulted whenever an error looks like it needs a human, rather than a
/// plain retry, to resolve (§4.7).
#[async_trait]
pub trait ManualInterventionHook: Send + Sync {
    async fn decide(&self, op_type: OperationType, kind: ResourceKind, error: &ReconcileError) -> ManualDecision;
}

/// Drives retries of a fallible async operation per §4.7: checks the
/// circuit breaker before each attempt, retries transient failures with
/// backoff scaled by `op_type`'s policy, consults the manual-intervention
/// hook for quota/billing/maintenance-shaped errors, and gives up
/// immediately on fatal errors.
pub struct RetryManager {
    circuit_breaker: Arc<CircuitBreaker>,
    manual_hook: Option<Arc<dyn ManualInterventionHook>>,
}

impl RetryManager {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            circuit_breaker,
            manual_hook: None,
        }
    }

    pub fn with_manual_hook(mut self, hook: Arc<dyn ManualInterventionHook>) -> Self {
        self.manual_hook = Some(hook);
        self
    }

    /// Runs `f` until it succeeds, the attempt budget is exhausted, or a
    /// fatal/non-transient error is returned. `op_type`/`kind` identify the
    /// circuit breaker bucket this call belongs to and select the retry
    /// policy. `cancel` makes the backoff sleep itself interruptible so a
    /// cancelled caller doesn't block on a long backoff window.
    pub async fn run<F, Fut, T>(
        &self,
        op_type: OperationType,
        kind: ResourceKind,
        cancel: &mut watch::Receiver<bool>,
        mut f: F,
    ) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ReconcileError>>,
        T: Default,
    {
        let policy = RetryPolicy::for_op_type(op_type);
        let mut attempt = 0;
        loop {
            self.circuit_breaker.check(op_type, kind)?;

            match f().await {
                Ok(value) => {
                    self.circuit_breaker.record_success(op_type, kind);
                    return Ok(value);
                }
                Err(err) if err.is_fatal() => {
                    self.circuit_breaker.record_failure(op_type, kind);
                    return Err(err);
                }
                Err(err) if err.looks_manual() => {
                    let decision = match &self.manual_hook {
                        Some(hook) => hook.decide(op_type, kind, &err).await,
                        None => ManualDecision::Abort,
                    };
                    match decision {
                        ManualDecision::Retry if attempt + 1 < policy.max_attempts => {
                            self.circuit_breaker.record_failure(op_type, kind);
                            let delay = policy.delay_for_attempt(attempt);
                            warn!(?op_type, ?kind, attempt, ?delay, error = %err, "retrying after manual-intervention decision");
                            sleep_or_cancel(delay, cancel).await?;
                            attempt += 1;
                        }
                        ManualDecision::Retry | ManualDecision::Skip => {
                            self.circuit_breaker.record_failure(op_type, kind);
                            return Ok(T::default());
                        }
                        ManualDecision::Ignore => {
                            self.circuit_breaker.record_success(op_type, kind);
                            return Ok(T::default());
                        }
                        ManualDecision::Abort => {
                            self.circuit_breaker.record_failure(op_type, kind);
                            return ManualAbort {
                                reason: err.to_string(),
                            }
                            .fail();
                        }
                    }
                }
                Err(err) if err.looks_transient() && attempt + 1 < policy.max_attempts => {
                    self.circuit_breaker.record_failure(op_type, kind);
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(?op_type, ?kind, attempt, ?delay, error = %err, "retrying after transient error");
                    sleep_or_cancel(delay, cancel).await?;
                    attempt += 1;
                }
                Err(err) => {
                    self.circuit_breaker.record_failure(op_type, kind);
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use reconciler_common::{RemoteError, RemoteErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let key = (OperationType::Create, ResourceKind::Cluster);
        for _ in 0..3 {
            breaker.record_failure(key.0, key.1);
        }
        assert_eq!(breaker.state_of(key.0, key.1), CircuitState::Open);
        assert!(breaker.check(key.0, key.1).is_err());
    }

    #[test]
    fn breaker_half_opens_after_reset_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        let key = (OperationType::Update, ResourceKind::DatabaseUser);
        breaker.record_failure(key.0, key.1);
        assert!(breaker.check(key.0, key.1).is_ok());
        assert_eq!(breaker.state_of(key.0, key.1), CircuitState::HalfOpen);
    }

    #[test]
    fn delay_for_attempt_respects_the_configured_ceiling() {
        let policy = RetryPolicy::for_op_type(OperationType::Create);
        for attempt in 0..10 {
            assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn delete_policy_backs_off_fewer_times_than_create() {
        let create = RetryPolicy::for_op_type(OperationType::Create);
        let delete = RetryPolicy::for_op_type(OperationType::Delete);
        assert!(delete.max_attempts < create.max_attempts);
    }

    #[tokio::test]
    async fn retry_manager_retries_transient_errors_then_succeeds() {
        // Update's policy has the shortest base delay of the three that
        // allow more than one retry, keeping this test's real sleeping time
        // down to a couple of seconds.
        let manager = RetryManager::new(Arc::new(CircuitBreaker::new(10, Duration::from_secs(60))));
        let (_token, mut cancel) = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result = manager
            .run(OperationType::Update, ResourceKind::Cluster, &mut cancel, || {
                let attempts = &attempts;
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ReconcileError::from_remote(
                            RemoteError::transient("flaky"),
                            ResourceKind::Cluster,
                        ))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_manager_gives_up_immediately_on_fatal_errors() {
        let manager = RetryManager::new(Arc::new(CircuitBreaker::new(10, Duration::from_secs(60))));
        let (_token, mut cancel) = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result = manager
            .run(
                OperationType::Delete,
                ResourceKind::NetworkAccess,
                &mut cancel,
                || {
                    let attempts = &attempts;
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(ReconcileError::from_remote(
                            RemoteError::new(RemoteErrorKind::Unauthorized, "nope"),
                            ResourceKind::NetworkAccess,
                        ))
                    }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_manager_aborts_manual_errors_without_a_hook() {
        let manager = RetryManager::new(Arc::new(CircuitBreaker::new(10, Duration::from_secs(60))));
        let (_token, mut cancel) = CancellationToken::new();
        let result = manager
            .run(OperationType::Create, ResourceKind::Cluster, &mut cancel, || async {
                Err::<(), _>(ReconcileError::from_remote(
                    RemoteError::new(RemoteErrorKind::Internal, "quota exceeded for this project"),
                    ResourceKind::Cluster,
                ))
            })
            .await;
        assert!(matches!(result, Err(ReconcileError::ManualAbort { .. })));
    }

    struct AlwaysRetryOnceHook;

    #[async_trait]
    impl ManualInterventionHook for AlwaysRetryOnceHook {
        async fn decide(&self, _: OperationType, _: ResourceKind, _: &ReconcileError) -> ManualDecision {
            ManualDecision::Retry
        }
    }

    #[tokio::test]
    async fn retry_manager_honors_a_retry_decision_from_the_manual_hook() {
        let manager = RetryManager::new(Arc::new(CircuitBreaker::new(10, Duration::from_secs(60))))
            .with_manual_hook(Arc::new(AlwaysRetryOnceHook));
        let (_token, mut cancel) = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result = manager
            .run(OperationType::Create, ResourceKind::Cluster, &mut cancel, || {
                let attempts = &attempts;
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ReconcileError::from_remote(
                            RemoteError::new(RemoteErrorKind::Internal, "cluster busy, try later"),
                            ResourceKind::Cluster,
                        ))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
