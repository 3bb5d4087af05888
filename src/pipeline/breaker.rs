//! Circuit breaker guarding an unreliable downstream dependency.
//!
//! # State machine
//!
//! ```text
//! Closed --[F consecutive failures]--> Open
//! Open --[cooldown D elapsed]--> HalfOpen (one probe admitted)
//! HalfOpen --[probe success]--> Closed (counter reset)
//! HalfOpen --[probe failure]--> Open (cooldown restarts)
//! ```
//!
//! One breaker per protected dependency, independently addressable.
//! Transitions are atomic under a single mutex; while half-open exactly
//! one probe is admitted even if many callers are waiting. Rejections are
//! surfaced as [`Error::CircuitOpen`], which callers treat as fail-fast:
//! it never consumes a retry attempt.

use crate::config::BreakerConfig;
use crate::error::{Error, Result};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// One probe call is in flight; everyone else fails fast.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Count-based circuit breaker for one protected dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker from configuration.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_timing(name, config.failure_threshold, config.cooldown())
    }

    /// Create a breaker with explicit threshold and cooldown.
    pub fn with_timing(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Name of the protected dependency.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Guard one call to the protected dependency.
    ///
    /// Admission, success and failure accounting all happen here; callers
    /// only see the operation's result or [`Error::CircuitOpen`].
    pub fn call<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        self.admit()?;
        match op() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Current state. Open → HalfOpen advancement happens on admission,
    /// not observation.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Time remaining until an open circuit admits a probe.
    ///
    /// `None` when the circuit is not open (or already due for a probe).
    pub fn time_until_probe(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                self.cooldown.checked_sub(opened_at.elapsed())
            }
            _ => None,
        }
    }

    /// Admit a call or fail fast.
    fn admit(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let due = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.cooldown);
                if due {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(dependency = %self.name, "Circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(self.rejection())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.rejection())
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.probe_in_flight = false;
                inner.opened_at = None;
                info!(dependency = %self.name, "Circuit closed after successful probe");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                debug!(
                    dependency = %self.name,
                    failures = inner.consecutive_failures,
                    threshold = self.failure_threshold,
                    "Failure recorded"
                );
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        dependency = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit OPENED"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                warn!(dependency = %self.name, "Probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    fn rejection(&self) -> Error {
        Error::CircuitOpen {
            dependency: self.name.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
