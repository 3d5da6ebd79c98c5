//! Per-provider runtime health: the primary failure circuit and the
//! independent count-tokens sub-breaker, tracked separately so a provider
//! that can't serve native token counting can still serve messages (§4.7).

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Active,
    Unavailable,
}

/// Tracks consecutive failures against `unhealthy_threshold` and, once
/// tripped, the `Instant` at which the provider becomes a candidate again.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    state: HealthState,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Active,
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }
}

impl ProviderHealth {
    pub fn is_active(&self) -> bool {
        self.state == HealthState::Active
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown_until
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = HealthState::Active;
        self.cooldown_until = None;
    }

    /// Returns `Some(deadline)` the instant this failure trips the breaker,
    /// so the caller can push it onto the recovery queue; `None` if the
    /// provider is still under `unhealthy_threshold`.
    pub fn record_failure(
        &mut self,
        unhealthy_threshold: u32,
        cooldown: Duration,
    ) -> Option<Instant> {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= unhealthy_threshold && self.state == HealthState::Active {
            self.state = HealthState::Unavailable;
            let deadline = Instant::now() + cooldown;
            self.cooldown_until = Some(deadline);
            return Some(deadline);
        }
        None
    }

    /// Called by the background recovery loop once `cooldown_until` has
    /// passed. A no-op if the provider already recovered (e.g. a manual
    /// success landed first).
    pub fn recover_if_due(&mut self, due: Instant) {
        if self.state == HealthState::Unavailable && self.cooldown_until == Some(due) {
            self.state = HealthState::Active;
            self.consecutive_failures = 0;
            self.cooldown_until = None;
        }
    }
}

/// The count-tokens sub-breaker (§4.7): independent of the primary health
/// circuit, and sticky-false rather than cooldown-and-retry — once a
/// provider fails to support native counting it stays off until its own
/// cooldown elapses, after which a single retry is allowed.
#[derive(Debug, Clone)]
pub struct CountTokensHealth {
    available: bool,
    cooldown_until: Option<Instant>,
}

impl Default for CountTokensHealth {
    fn default() -> Self {
        Self {
            available: true,
            cooldown_until: None,
        }
    }
}

impl CountTokensHealth {
    /// Whether the native counter should be attempted right now. Once a
    /// cooldown set by [`Self::mark_failed`] has elapsed, this flips back to
    /// `true` so the next request gets one retry.
    pub fn is_available(&mut self) -> bool {
        if !self.available {
            if let Some(until) = self.cooldown_until {
                if Instant::now() >= until {
                    self.available = true;
                    self.cooldown_until = None;
                }
            }
        }
        self.available
    }

    pub fn mark_success(&mut self) {
        self.available = true;
        self.cooldown_until = None;
    }

    pub fn mark_failed(&mut self, cooldown: Duration) {
        self.available = false;
        self.cooldown_until = Some(Instant::now() + cooldown);
    }
}
