//! Heartbeat monitor.
//!
//! Tracks the ping/pong exchange of one connection. The connection task asks
//! [`HeartbeatMonitor::next_ping_at`] when to send the next ping, records it
//! with [`HeartbeatMonitor::on_ping_sent`] and reports pongs with
//! [`HeartbeatMonitor::on_pong`]. The monitor owns no timer itself, so closing
//! the connection leaves nothing behind.

use std::time::Duration;
use tokio::time::Instant;

use crate::models::OpenHandshake;

/// Result of feeding a pong (or a deadline check) into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// Pong arrived within the timeout.
    Healthy { round_trip: Duration },
    /// Pong arrived late, or never arrived before the deadline.
    Violation { elapsed: Duration, timeout: Duration },
    /// Nothing was outstanding.
    Idle,
}

impl HeartbeatStatus {
    pub fn is_violation(&self) -> bool {
        matches!(self, HeartbeatStatus::Violation { .. })
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    negotiated: bool,
    last_ping_sent: Option<Instant>,
    awaiting_pong: bool,
    overdue_reported: bool,
    last_heartbeat: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Monitor using pre-negotiation defaults.
    pub fn new(default_interval: Duration, default_timeout: Duration) -> Self {
        Self {
            interval: default_interval,
            timeout: default_timeout,
            negotiated: false,
            last_ping_sent: None,
            awaiting_pong: false,
            overdue_reported: false,
            last_heartbeat: None,
        }
    }

    /// Apply the values announced by the server's `open` packet.
    /// Zero values are ignored and keep the current setting.
    pub fn configure(&mut self, handshake: &OpenHandshake) {
        if handshake.ping_interval_ms > 0 {
            self.interval = handshake.ping_interval();
        }
        if handshake.ping_timeout_ms > 0 {
            self.timeout = handshake.ping_timeout();
        }
        self.negotiated = true;
        log::debug!(
            "[courier-link] Heartbeat negotiated: interval={:?} timeout={:?}",
            self.interval,
            self.timeout
        );
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    /// When the next ping is due. The first ping goes out one interval after
    /// `opened_at`.
    pub fn next_ping_at(&self, opened_at: Instant) -> Instant {
        self.last_ping_sent.unwrap_or(opened_at) + self.interval
    }

    /// Deadline for the outstanding ping, if any and not yet reported.
    pub fn pong_deadline(&self) -> Option<Instant> {
        match (self.awaiting_pong, self.overdue_reported, self.last_ping_sent) {
            (true, false, Some(sent)) => Some(sent + self.timeout),
            _ => None,
        }
    }

    pub fn on_ping_sent(&mut self, now: Instant) {
        self.last_ping_sent = Some(now);
        self.awaiting_pong = true;
        self.overdue_reported = false;
    }

    /// Record a pong and judge the round trip against the timeout.
    pub fn on_pong(&mut self, now: Instant) -> HeartbeatStatus {
        self.last_heartbeat = Some(now);
        let Some(sent) = self.last_ping_sent else {
            return HeartbeatStatus::Idle;
        };
        if !self.awaiting_pong {
            return HeartbeatStatus::Idle;
        }
        self.awaiting_pong = false;

        let elapsed = now.saturating_duration_since(sent);
        if elapsed > self.timeout {
            // Already reported as overdue; the late pong closes the episode.
            if self.overdue_reported {
                return HeartbeatStatus::Idle;
            }
            HeartbeatStatus::Violation {
                elapsed,
                timeout: self.timeout,
            }
        } else {
            HeartbeatStatus::Healthy { round_trip: elapsed }
        }
    }

    /// Report an outstanding ping whose deadline has passed. Fires at most
    /// once per ping.
    pub fn check_overdue(&mut self, now: Instant) -> HeartbeatStatus {
        match self.pong_deadline() {
            Some(deadline) if now >= deadline => {
                self.overdue_reported = true;
                let elapsed = self
                    .last_ping_sent
                    .map(|sent| now.saturating_duration_since(sent))
                    .unwrap_or_default();
                HeartbeatStatus::Violation {
                    elapsed,
                    timeout: self.timeout,
                }
            },
            _ => HeartbeatStatus::Idle,
        }
    }

    /// Forget all in-flight state (connection closed or replaced).
    pub fn reset(&mut self) {
        self.last_ping_sent = None;
        self.awaiting_pong = false;
        self.overdue_reported = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(Duration::from_secs(25), Duration::from_secs(20))
    }

    #[test]
    fn test_configure_from_handshake() {
        let mut hb = monitor();
        hb.configure(&OpenHandshake {
            sid: None,
            ping_interval_ms: 1000,
            ping_timeout_ms: 400,
        });
        assert!(hb.is_negotiated());
        assert_eq!(hb.interval(), Duration::from_millis(1000));
        assert_eq!(hb.timeout(), Duration::from_millis(400));
    }

    #[test]
    fn test_zero_values_keep_defaults() {
        let mut hb = monitor();
        hb.configure(&OpenHandshake {
            sid: None,
            ping_interval_ms: 0,
            ping_timeout_ms: 0,
        });
        assert_eq!(hb.interval(), Duration::from_secs(25));
        assert_eq!(hb.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_pong_within_timeout_is_healthy() {
        let mut hb = monitor();
        let t0 = Instant::now();
        hb.on_ping_sent(t0);
        let status = hb.on_pong(t0 + Duration::from_millis(40));
        assert_eq!(
            status,
            HeartbeatStatus::Healthy {
                round_trip: Duration::from_millis(40)
            }
        );
        assert_eq!(hb.pong_deadline(), None);
    }

    #[test]
    fn test_late_pong_is_violation() {
        let mut hb = monitor();
        let t0 = Instant::now();
        hb.on_ping_sent(t0);
        let status = hb.on_pong(t0 + Duration::from_secs(21));
        assert!(status.is_violation());
    }

    #[test]
    fn test_overdue_reported_once() {
        let mut hb = monitor();
        let t0 = Instant::now();
        hb.on_ping_sent(t0);
        assert_eq!(hb.check_overdue(t0 + Duration::from_secs(5)), HeartbeatStatus::Idle);
        assert!(hb.check_overdue(t0 + Duration::from_secs(20)).is_violation());
        assert_eq!(hb.check_overdue(t0 + Duration::from_secs(30)), HeartbeatStatus::Idle);
        // The late pong does not produce a second report.
        assert_eq!(hb.on_pong(t0 + Duration::from_secs(31)), HeartbeatStatus::Idle);
    }

    #[test]
    fn test_unsolicited_pong_is_idle() {
        let mut hb = monitor();
        assert_eq!(hb.on_pong(Instant::now()), HeartbeatStatus::Idle);
    }

    #[test]
    fn test_next_ping_schedule() {
        let mut hb = monitor();
        let opened = Instant::now();
        assert_eq!(hb.next_ping_at(opened), opened + Duration::from_secs(25));
        let sent = opened + Duration::from_secs(25);
        hb.on_ping_sent(sent);
        assert_eq!(hb.next_ping_at(opened), sent + Duration::from_secs(25));
        hb.reset();
        assert_eq!(hb.next_ping_at(opened), opened + Duration::from_secs(25));
    }
}
