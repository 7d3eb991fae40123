//! MQTT session supervision.
//!
//! The session lifecycle is an explicit state machine instead of a blocking
//! retry loop: `poll` never blocks, so the runtime keeps servicing inbound
//! messages and the availability timer while the broker is unreachable. The
//! supervisor owns pacing and ordering only; runtimes execute the emitted
//! [`LinkAction`]s against the real client.

use crate::topics::TOPIC_HA_STATUS;

/// Fixed delay between connection attempts. No jitter, no cap.
pub const RETRY_DELAY_MS: u64 = 5_000;
/// Minimum spacing between availability publishes.
pub const AVAILABILITY_INTERVAL_MS: u64 = 10_000;
/// Receive buffer applied to the session.
pub const RECEIVE_BUFFER_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting out the retry window; a new attempt is due at `next_attempt_ms`.
    Disconnected { next_attempt_ms: u64 },
    /// An attempt is in flight, outcome pending.
    Connecting,
    Connected,
}

/// Side effects requested from the runtime, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Connect,
    SetReceiveBufferSize(usize),
    Subscribe(&'static str),
    PublishDiscovery,
    PublishAvailability,
}

#[derive(Debug)]
pub struct LinkSupervisor {
    state: LinkState,
    last_availability_ms: u64,
    attempts: u32,
}

impl Default for LinkSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSupervisor {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected { next_attempt_ms: 0 },
            last_availability_ms: 0,
            attempts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected)
    }

    /// Connection attempts issued so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Emits `Connect` once per retry window while disconnected.
    pub fn poll(&mut self, now_ms: u64) -> Vec<LinkAction> {
        match self.state {
            LinkState::Disconnected { next_attempt_ms } if now_ms >= next_attempt_ms => {
                self.state = LinkState::Connecting;
                self.attempts = self.attempts.saturating_add(1);
                vec![LinkAction::Connect]
            }
            _ => Vec::new(),
        }
    }

    /// Session established. The bring-up sequence is receive buffer, then
    /// status subscription, then discovery publish, on every (re)connect.
    /// Tolerates session events arriving without a preceding `poll`.
    pub fn connect_succeeded(&mut self) -> Vec<LinkAction> {
        self.state = LinkState::Connected;
        vec![
            LinkAction::SetReceiveBufferSize(RECEIVE_BUFFER_BYTES),
            LinkAction::Subscribe(TOPIC_HA_STATUS),
            LinkAction::PublishDiscovery,
        ]
    }

    /// Attempt rejected or session setup failed; the next attempt is due a
    /// full retry window from now. The runtime logs the client's status code.
    pub fn connect_failed(&mut self, now_ms: u64) {
        self.state = LinkState::Disconnected {
            next_attempt_ms: now_ms + RETRY_DELAY_MS,
        };
    }

    /// An established session dropped; retry immediately.
    pub fn connection_lost(&mut self, now_ms: u64) {
        self.state = LinkState::Disconnected {
            next_attempt_ms: now_ms,
        };
    }

    /// Periodic work. Emits the availability publish when connected and the
    /// interval has elapsed; the timestamp only advances when the publish is
    /// emitted, and publish failures are not tracked.
    pub fn tick(&mut self, now_ms: u64) -> Vec<LinkAction> {
        if !self.is_connected() {
            return Vec::new();
        }

        if now_ms.saturating_sub(self.last_availability_ms) >= AVAILABILITY_INTERVAL_MS {
            self.last_availability_ms = now_ms;
            vec![LinkAction::PublishAvailability]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bring_up_sequence() -> Vec<LinkAction> {
        vec![
            LinkAction::SetReceiveBufferSize(RECEIVE_BUFFER_BYTES),
            LinkAction::Subscribe(TOPIC_HA_STATUS),
            LinkAction::PublishDiscovery,
        ]
    }

    #[test]
    fn first_attempt_is_due_immediately() {
        let mut link = LinkSupervisor::new();

        assert_eq!(link.poll(0), vec![LinkAction::Connect]);
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.attempts(), 1);
    }

    #[test]
    fn no_second_attempt_while_one_is_in_flight() {
        let mut link = LinkSupervisor::new();

        let _ = link.poll(0);
        assert!(link.poll(1).is_empty());
        assert!(link.poll(60_000).is_empty());
    }

    #[test]
    fn failed_attempt_waits_a_full_retry_window() {
        let mut link = LinkSupervisor::new();

        let _ = link.poll(0);
        link.connect_failed(0);

        assert!(link.poll(4_999).is_empty());
        assert_eq!(link.poll(5_000), vec![LinkAction::Connect]);
    }

    #[test]
    fn successful_attempt_runs_bring_up_in_order() {
        let mut link = LinkSupervisor::new();

        let _ = link.poll(0);
        assert_eq!(link.connect_succeeded(), bring_up_sequence());
        assert!(link.is_connected());
    }

    #[test]
    fn two_rejections_then_success_spans_two_retry_windows() {
        let mut link = LinkSupervisor::new();

        assert_eq!(link.poll(0), vec![LinkAction::Connect]);
        link.connect_failed(0);

        assert!(link.poll(2_500).is_empty());
        assert_eq!(link.poll(5_000), vec![LinkAction::Connect]);
        link.connect_failed(5_000);

        assert!(link.poll(9_999).is_empty());
        assert_eq!(link.poll(10_000), vec![LinkAction::Connect]);
        assert_eq!(link.attempts(), 3);

        // The accepting attempt subscribes and publishes discovery exactly once.
        assert_eq!(link.connect_succeeded(), bring_up_sequence());
        assert!(link.poll(10_001).is_empty());
    }

    #[test]
    fn retries_keep_coming_indefinitely() {
        let mut link = LinkSupervisor::new();

        for round in 0..100u64 {
            let now = round * RETRY_DELAY_MS;
            assert_eq!(link.poll(now), vec![LinkAction::Connect], "round {round}");
            link.connect_failed(now);
        }
        assert_eq!(link.attempts(), 100);
    }

    #[test]
    fn availability_respects_the_ten_second_gate() {
        let mut link = LinkSupervisor::new();
        let _ = link.poll(0);
        let _ = link.connect_succeeded();

        assert!(link.tick(0).is_empty());
        assert!(link.tick(9_999).is_empty());
        assert_eq!(link.tick(10_000), vec![LinkAction::PublishAvailability]);

        // Never more frequently than the interval.
        assert!(link.tick(10_001).is_empty());
        assert!(link.tick(19_999).is_empty());
        assert_eq!(link.tick(20_000), vec![LinkAction::PublishAvailability]);
    }

    #[test]
    fn no_availability_while_disconnected() {
        let mut link = LinkSupervisor::new();

        assert!(link.tick(60_000).is_empty());

        let _ = link.poll(60_000);
        let _ = link.connect_succeeded();
        link.connection_lost(61_000);

        assert!(link.tick(120_000).is_empty());
    }

    #[test]
    fn lost_session_retries_without_waiting() {
        let mut link = LinkSupervisor::new();
        let _ = link.poll(0);
        let _ = link.connect_succeeded();

        link.connection_lost(30_000);
        assert_eq!(link.poll(30_000), vec![LinkAction::Connect]);
    }

    #[test]
    fn reconnect_republishes_discovery() {
        let mut link = LinkSupervisor::new();
        let _ = link.poll(0);
        assert_eq!(link.connect_succeeded(), bring_up_sequence());

        link.connection_lost(30_000);
        let _ = link.poll(30_000);
        assert_eq!(link.connect_succeeded(), bring_up_sequence());
    }
}
