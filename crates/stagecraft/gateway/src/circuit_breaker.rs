//! Circuit breaker per endpoint class.
//!
//! Stops hammering a failing control-plane endpoint. After
//! `failure_threshold` consecutive transient failures the breaker opens and
//! refuses calls locally until `cool_down` has elapsed. It then admits a
//! single probe; the probe's outcome decides between closing and reopening.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::request::EndpointClass;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,

    /// Calls are refused without reaching the network.
    Open,

    /// One trial call is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Ticket returned by [`CircuitBreaker::try_acquire`].
///
/// Only the `Probe` admission may close a half-open breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    Probe,
}

/// An [`Admission`] bound to its breaker.
///
/// Dropping a permit without recording an outcome releases it, so a call
/// future abandoned mid-send cannot keep a half-open probe slot forever.
#[must_use = "dropping a permit releases the admission"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Option<Admission>,
}

impl Permit<'_> {
    pub fn admission(&self) -> Option<Admission> {
        self.admission
    }

    pub fn success(mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record_success(admission);
        }
    }

    pub fn failure(mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record_failure(admission);
        }
    }

    /// Give the admission back without a verdict.
    pub fn release(self) {}
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.release(admission);
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    last_transition: DateTime<Utc>,
}

pub struct CircuitBreaker {
    endpoint_class: EndpointClass,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        endpoint_class: EndpointClass,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoint_class,
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                probe_in_flight: false,
                last_transition: Utc::now(),
            }),
        }
    }

    pub fn endpoint_class(&self) -> &EndpointClass {
        &self.endpoint_class
    }

    /// Current state, after applying any due cool-down transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.check_cool_down(&mut inner);
        inner.state
    }

    /// Ask permission to send a call. `None` means the circuit refuses it.
    pub fn try_acquire(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();
        self.check_cool_down(&mut inner);

        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    debug!(endpoint_class = %self.endpoint_class, "Admitting half-open probe");
                    Some(Admission::Probe)
                }
            }
        }
    }

    /// Like [`try_acquire`](Self::try_acquire), but the admission is handed
    /// back automatically if the permit is dropped without a verdict.
    pub fn try_permit(&self) -> Option<Permit<'_>> {
        self.try_acquire().map(|admission| Permit {
            breaker: self,
            admission: Some(admission),
        })
    }

    /// Record a call that reached the remote and was not a transient failure.
    pub fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if admission == Admission::Probe => {
                info!(
                    endpoint_class = %self.endpoint_class,
                    "Circuit breaker closing after successful probe"
                );
                self.transition_to(&mut inner, CircuitState::Closed);
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                // Straggler admitted before the circuit opened
                debug!(
                    endpoint_class = %self.endpoint_class,
                    state = %inner.state,
                    "Ignoring success from stale admission"
                );
            }
        }
    }

    /// Record a transient failure.
    pub fn record_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        endpoint_class = %self.endpoint_class,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opening due to failures"
                    );
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if admission == Admission::Probe => {
                warn!(
                    endpoint_class = %self.endpoint_class,
                    "Circuit breaker re-opening after failed probe"
                );
                self.transition_to(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Give back an admission whose call produced no verdict (e.g. 401).
    pub fn release(&self, admission: Admission) {
        if admission == Admission::Probe {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.probe_in_flight = false;
            }
        }
    }

    /// Force the circuit to a specific state.
    pub fn force_state(&self, new_state: CircuitState) {
        let mut inner = self.inner.lock();
        info!(
            endpoint_class = %self.endpoint_class,
            old_state = %inner.state,
            new_state = %new_state,
            "Circuit breaker state forced"
        );
        self.transition_to(&mut inner, new_state);
    }

    pub fn reset(&self) {
        self.force_state(CircuitState::Closed);
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.inner.lock();
        self.check_cool_down(&mut inner);
        CircuitSnapshot {
            endpoint_class: self.endpoint_class.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at_wall,
            last_transition: inner.last_transition,
        }
    }

    fn check_cool_down(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let Some(opened_at) = inner.opened_at else {
            return;
        };

        if self.clock.now().saturating_duration_since(opened_at) >= self.config.cool_down() {
            info!(
                endpoint_class = %self.endpoint_class,
                "Circuit breaker transitioning to half-open after cool-down"
            );
            self.transition_to(inner, CircuitState::HalfOpen);
        }
    }

    fn transition_to(&self, inner: &mut BreakerInner, new_state: CircuitState) {
        inner.state = new_state;
        inner.last_transition = Utc::now();
        inner.probe_in_flight = false;

        match new_state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.opened_at_wall = None;
            }
            CircuitState::Open => {
                inner.opened_at = Some(self.clock.now());
                inner.opened_at_wall = Some(Utc::now());
            }
            CircuitState::HalfOpen => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint_class", &self.endpoint_class)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub endpoint_class: EndpointClass,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_transition: DateTime<Utc>,
}

/// Lazily created breakers keyed by endpoint class.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: DashMap<EndpointClass, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, endpoint_class: &EndpointClass) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(endpoint_class) {
            return breaker.clone();
        }
        self.breakers
            .entry(endpoint_class.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    endpoint_class.clone(),
                    self.config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, endpoint_class: &EndpointClass) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(endpoint_class).map(|b| b.clone())
    }

    /// Snapshots of every breaker created so far, sorted by endpoint class.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.endpoint_class.cmp(&b.endpoint_class));
        snapshots
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            EndpointClass::new("create", "lakehouse"),
            CircuitBreakerConfig {
                failure_threshold: 3,
                cool_down_secs: 60,
            },
            clock,
        )
    }

    #[test]
    fn test_circuit_breaker_closed_to_open() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock);

        for _ in 0..2 {
            let admission = breaker.try_acquire().unwrap();
            breaker.record_failure(admission);
            assert_eq!(breaker.state(), CircuitState::Closed);
        }

        let admission = breaker.try_acquire().unwrap();
        breaker.record_failure(admission);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock);

        breaker.record_failure(Admission::Normal);
        breaker.record_failure(Admission::Normal);
        breaker.record_success(Admission::Normal);
        breaker.record_failure(Admission::Normal);
        breaker.record_failure(Admission::Normal);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 2);
    }

    #[test]
    fn test_cool_down_moves_to_half_open_with_single_probe() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());
        breaker.force_state(CircuitState::Open);

        clock.advance(Duration::from_secs(59));
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert_eq!(breaker.try_acquire(), Some(Admission::Probe));
        // Concurrent caller while the probe is outstanding
        assert_eq!(breaker.try_acquire(), None);

        breaker.record_success(Admission::Probe);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.try_acquire(), Some(Admission::Normal));
    }

    #[test]
    fn test_failed_probe_reopens_and_restarts_timer() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());
        breaker.force_state(CircuitState::Open);
        clock.advance(Duration::from_secs(60));

        let probe = breaker.try_acquire().unwrap();
        breaker.record_failure(probe);
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(30));
        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(30));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_released_probe_can_be_retaken() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock);
        breaker.force_state(CircuitState::HalfOpen);

        let probe = breaker.try_acquire().unwrap();
        breaker.release(probe);
        assert_eq!(breaker.try_acquire(), Some(Admission::Probe));
    }

    #[test]
    fn test_dropped_permit_frees_probe_slot() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock);
        breaker.force_state(CircuitState::HalfOpen);

        let probe = breaker.try_permit().unwrap();
        assert_eq!(probe.admission(), Some(Admission::Probe));
        assert!(breaker.try_permit().is_none());
        drop(probe);

        let probe = breaker.try_permit().unwrap();
        probe.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stale_success_does_not_close_half_open() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock);
        breaker.force_state(CircuitState::HalfOpen);

        breaker.record_success(Admission::Normal);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_registry_partitions_by_endpoint_class() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), Arc::new(ManualClock::new()));
        let lakehouse = registry.get_or_create(&EndpointClass::new("create", "lakehouse"));
        let notebook = registry.get_or_create(&EndpointClass::new("create", "notebook"));

        lakehouse.force_state(CircuitState::Open);

        assert_eq!(notebook.state(), CircuitState::Closed);
        assert!(Arc::ptr_eq(
            &lakehouse,
            &registry.get_or_create(&EndpointClass::new("create", "lakehouse"))
        ));
        assert_eq!(registry.snapshots().len(), 2);
    }
}
