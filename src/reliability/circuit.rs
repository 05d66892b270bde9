#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Trips after `threshold` consecutive failures; after `cooldown_ms` one trial call
/// is let through (half-open) and its result closes or re-opens the circuit.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failures: u32,
    pub threshold: u32,
    pub cooldown_ms: i64,
    opened_at: i64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown_ms: i64) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            threshold: threshold.max(1),
            cooldown_ms,
            opened_at: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self, now: i64) {
        self.failures = self.failures.saturating_add(1);
        if self.state == CircuitState::HalfOpen || self.failures >= self.threshold {
            self.state = CircuitState::Open;
            self.opened_at = now;
        }
    }

    /// Whether a call may go through at `now`. Moves Open -> HalfOpen once the
    /// cooldown has elapsed.
    pub fn allow(&mut self, now: i64) -> bool {
        if self.state == CircuitState::Open && now.saturating_sub(self.opened_at) >= self.cooldown_ms {
            self.state = CircuitState::HalfOpen;
        }
        matches!(self.state, CircuitState::Closed | CircuitState::HalfOpen)
    }
}
