use std::time::{Duration, Instant};

/// Action the session loop should take on a heartbeat tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatAction {
    Idle,
    SendHeartbeat,
    /// Peer silent for 1.2x the interval; send a TestRequest with this TestReqID
    SendTestRequest(String),
    /// Still silent one interval after the TestRequest
    Disconnect,
}

/// Heartbeat bookkeeping for one connection
///
/// Pure state machine over caller-supplied `Instant`s; the session loop calls `poll`
/// on a timer and reports traffic with `on_inbound` / `on_outbound`.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    last_inbound: Instant,
    last_outbound: Instant,
    test_request_sent: Option<Instant>,
    test_request_counter: u64,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_inbound: now,
            last_outbound: now,
            test_request_sent: None,
            test_request_counter: 0,
        }
    }

    /// How often the session loop should poll
    pub fn poll_period(&self) -> Duration {
        (self.interval / 10).clamp(Duration::from_millis(10), Duration::from_secs(1))
    }

    /// Any inbound message counts as proof of life
    pub fn on_inbound(&mut self, now: Instant) {
        self.last_inbound = now;
        self.test_request_sent = None;
    }

    pub fn on_outbound(&mut self, now: Instant) {
        self.last_outbound = now;
    }

    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(sent_at) = self.test_request_sent {
            if now.saturating_duration_since(sent_at) >= self.interval {
                return HeartbeatAction::Disconnect;
            }
        } else if now.saturating_duration_since(self.last_inbound) >= self.silence_limit() {
            self.test_request_counter += 1;
            self.test_request_sent = Some(now);
            return HeartbeatAction::SendTestRequest(format!("TEST_{}", self.test_request_counter));
        }

        if now.saturating_duration_since(self.last_outbound) >= self.interval {
            return HeartbeatAction::SendHeartbeat;
        }

        HeartbeatAction::Idle
    }

    fn silence_limit(&self) -> Duration {
        self.interval.mul_f64(1.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECS: fn(u64) -> Duration = Duration::from_secs;

    #[test]
    fn test_heartbeat_after_outbound_idle() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECS(30), start);

        assert_eq!(hb.poll(start + SECS(10)), HeartbeatAction::Idle);
        hb.on_inbound(start + SECS(29));
        assert_eq!(hb.poll(start + SECS(30)), HeartbeatAction::SendHeartbeat);

        hb.on_outbound(start + SECS(30));
        assert_eq!(hb.poll(start + SECS(31)), HeartbeatAction::Idle);
    }

    #[test]
    fn test_silence_sends_test_request_then_disconnects() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECS(10), start);
        hb.on_outbound(start + SECS(11));

        assert_eq!(hb.poll(start + SECS(11)), HeartbeatAction::Idle);
        assert_eq!(
            hb.poll(start + SECS(12)),
            HeartbeatAction::SendTestRequest("TEST_1".to_string())
        );
        // TestRequest is outstanding; no second one
        hb.on_outbound(start + SECS(12));
        assert_eq!(hb.poll(start + SECS(15)), HeartbeatAction::Idle);
        assert_eq!(hb.poll(start + SECS(22)), HeartbeatAction::Disconnect);
    }

    #[test]
    fn test_inbound_clears_pending_test_request() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECS(10), start);

        assert!(matches!(
            hb.poll(start + SECS(12)),
            HeartbeatAction::SendTestRequest(_)
        ));
        hb.on_inbound(start + SECS(13));
        hb.on_outbound(start + SECS(13));

        assert_eq!(hb.poll(start + SECS(20)), HeartbeatAction::Idle);
        assert_eq!(hb.poll(start + SECS(23)), HeartbeatAction::SendHeartbeat);
    }

    #[test]
    fn test_poll_period_bounds() {
        let now = Instant::now();
        assert_eq!(HeartbeatMonitor::new(SECS(30), now).poll_period(), SECS(1));
        assert_eq!(
            HeartbeatMonitor::new(Duration::from_millis(50), now).poll_period(),
            Duration::from_millis(10)
        );
    }
}
