use crate::BreakerConfig;
use parking_lot::Mutex as SyncMutex;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

/// The state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Attempts flow through.
    Closed,
    /// Attempts are rejected immediately.
    Open,
    /// A single probe attempt is let through to test whether the broker
    /// recovered.
    HalfOpen,
}

/// Tracks the health of the broker across all publish attempts sharing this
/// instance, and stops admitting attempts once the broker is judged unhealthy.
///
/// ```text
/// Closed --(threshold consecutive failures)--> Open
/// Open   --(timeout elapsed, on next allow)--> HalfOpen
/// HalfOpen --(probe succeeded)--> Closed
/// HalfOpen --(probe failed)-----> Open
/// ```
///
/// All transitions happen under a single lock, so the breaker may be shared
/// freely between concurrent attempts. Every transition is published on a
/// [`watch`] channel, see [`subscribe`](CircuitBreaker::subscribe).
pub struct CircuitBreaker {
    name: Arc<str>,
    config: BreakerConfig,
    inner: SyncMutex<Inner>,
    transitions: watch::Sender<CircuitState>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    counting_since: Instant,
}

impl CircuitBreaker {
    /// Creates a new, closed [`CircuitBreaker`].
    pub fn new(name: impl AsRef<str>, config: BreakerConfig) -> Self {
        let (transitions, _) = watch::channel(CircuitState::Closed);

        Self {
            name: Arc::from(name.as_ref()),
            config,
            inner: SyncMutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                counting_since: Instant::now(),
            }),
            transitions,
        }
    }

    /// Reports the name of this breaker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the current state without triggering any time-based transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.transitions.subscribe()
    }
}

impl CircuitBreaker {
    /// Reports whether an attempt may proceed. Returns `false` while
    /// [open](CircuitState::Open), and while a half-open probe is already in
    /// flight.
    ///
    /// Once the open timeout has elapsed, the first call moves the breaker to
    /// [half-open](CircuitState::HalfOpen) and admits exactly that caller as
    /// the probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                self.maybe_reset_counts(&mut inner, now);
                true
            }

            CircuitState::Open => {
                let timed_out = inner
                    .opened_at
                    .is_none_or(|opened_at| now.duration_since(opened_at) >= self.config.timeout());

                if !timed_out {
                    return false;
                }

                inner.probe_in_flight = true;
                self.transition(&mut inner, CircuitState::HalfOpen);

                true
            }

            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return false;
                }

                inner.probe_in_flight = true;

                true
            }
        }
    }

    /// Records a successful attempt.
    pub fn report_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
                inner.probe_in_flight = false;
                inner.counting_since = Instant::now();
                self.transition(&mut inner, CircuitState::Closed);
            }
            // A late report of an attempt admitted before the breaker opened
            CircuitState::Open => {}
        }
    }

    /// Records a failed attempt.
    pub fn report_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                self.maybe_reset_counts(&mut inner, now);
                inner.consecutive_failures += 1;

                if inner.consecutive_failures >= self.config.threshold() {
                    warn!(
                        alert = true,
                        breaker = self.name.as_ref(),
                        failures = inner.consecutive_failures,
                        "Opening the circuit breaker after consecutive publishing failures",
                    );
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    alert = true,
                    breaker = self.name.as_ref(),
                    "Re-opening the circuit breaker after a failed probe",
                );
                inner.probe_in_flight = false;
                inner.opened_at = Some(now);
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Clears the failure counter once per configured interval while closed.
    fn maybe_reset_counts(&self, inner: &mut Inner, now: Instant) {
        if let Some(interval) = self.config.interval() {
            if now.duration_since(inner.counting_since) >= interval {
                inner.consecutive_failures = 0;
                inner.counting_since = now;
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;

        info!(
            breaker = self.name.as_ref(),
            from = %from,
            to = %to,
            "Circuit breaker changed state",
        );

        self.transitions.send_replace(to);
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}
