//! Reconnection state machine.
//!
//! ```text
//! Idle → Connecting → Open
//!            ↓
//!         Failed → WaitingBackoff → Connecting   (loop)
//!            ↓
//!         GaveUp   (after max_attempts consecutive failures)
//! ```
//!
//! The controller only decides; the connection task sleeps and dials. A
//! successful open clears the attempt counter, and the give-up decision is
//! handed out exactly once until [`ReconnectController::reset`] is called.

use std::time::Duration;

use crate::models::ConnectionOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Idle,
    Connecting,
    Open,
    WaitingBackoff { attempt: u32 },
    GaveUp,
}

/// Delay policy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            BackoffStrategy::Fixed(delay) => delay,
            BackoffStrategy::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                std::cmp::min(initial.saturating_mul(factor), max)
            },
        }
    }
}

/// What the connection task should do after a failed or lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Sleep `delay`, then dial again.
    Retry { attempt: u32, delay: Duration },
    /// The cap was just reached; surface "reload required" and stop.
    GiveUp { attempts: u32 },
    /// Reconnection is off, or the give-up was already signalled.
    Stop,
}

#[derive(Debug, Clone)]
pub struct ReconnectController {
    state: ReconnectState,
    attempts: u32,
    max_attempts: Option<u32>,
    strategy: BackoffStrategy,
    enabled: bool,
}

impl ReconnectController {
    pub fn new(strategy: BackoffStrategy, max_attempts: Option<u32>, enabled: bool) -> Self {
        Self {
            state: ReconnectState::Idle,
            attempts: 0,
            max_attempts,
            strategy,
            enabled,
        }
    }

    pub fn from_options(options: &ConnectionOptions) -> Self {
        let initial = Duration::from_millis(options.reconnect_delay_ms);
        let strategy = if options.exponential_backoff {
            BackoffStrategy::Exponential {
                initial,
                max: Duration::from_millis(options.max_reconnect_delay_ms),
            }
        } else {
            BackoffStrategy::Fixed(initial)
        };
        Self::new(strategy, options.max_reconnect_attempts, options.auto_reconnect)
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Consecutive failures since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn has_given_up(&self) -> bool {
        self.state == ReconnectState::GaveUp
    }

    /// A dial is starting. Ignored once the controller has given up.
    pub fn begin_attempt(&mut self) {
        if self.state != ReconnectState::GaveUp {
            self.state = ReconnectState::Connecting;
        }
    }

    /// The transport opened: clear the counter and any pending backoff.
    pub fn on_open(&mut self) {
        self.attempts = 0;
        self.state = ReconnectState::Open;
    }

    /// A dial failed or an open connection dropped abnormally.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.state == ReconnectState::GaveUp || !self.enabled {
            return ReconnectDecision::Stop;
        }

        self.attempts = self.attempts.saturating_add(1);
        if let Some(max) = self.max_attempts {
            if self.attempts > max {
                self.state = ReconnectState::GaveUp;
                return ReconnectDecision::GiveUp {
                    attempts: self.attempts - 1,
                };
            }
        }

        self.state = ReconnectState::WaitingBackoff {
            attempt: self.attempts,
        };
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.strategy.delay_for(self.attempts),
        }
    }

    /// Manual (re)connect or explicit close: forget every failure.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.state = ReconnectState::Idle;
    }
}
