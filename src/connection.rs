//! Connection State Machine
//!
//! Pure state machine for the session connection lifecycle. The engine run
//! loop feeds it socket events and timer expirations; it answers with a
//! directive (stay down, retry after the fixed delay, give up, or demand
//! an entitlement). All socket and timer work stays in the run loop, which
//! keeps every transition unit-testable.
//!
//! # Reconnect Policy
//!
//! - Close codes 1000 and 1001 are clean: no reconnect.
//! - Any other close, and a connect timeout, consumes one attempt from a
//!   fixed budget with a fixed delay between attempts.
//! - Eligibility (entitlement, or joined via link) is checked before the
//!   budget: an ineligible client never reconnects regardless of attempts
//!   remaining.
//! - A user-initiated connect resets the budget; opening a socket resets
//!   it too.

/// Lifecycle states of the session connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none wanted
    Idle,
    /// Socket dialing or handshake in flight
    Connecting,
    /// Socket open, session joined
    Connected,
    /// Local close requested, awaiting the close handshake
    Disconnecting,
    /// Connection ended; may be retried
    Disconnected,
    /// Connection failed in a way the engine will not retry by itself
    Errored,
}

/// What the run loop should do after a close or timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDirective {
    /// Stay disconnected; surface the disconnect to the host
    Stay,
    /// Schedule a reconnect after the fixed delay
    Retry {
        /// Which attempt this will be, 1-based
        attempt: u32,
    },
    /// Budget exhausted; stay down and tell the host
    GiveUp,
    /// Ineligible to reconnect; the user must act
    EntitlementRequired,
}

/// Tracks connection state and the reconnect budget.
#[derive(Debug)]
pub struct ConnectionController {
    state: ConnectionState,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    silent: bool,
}

impl ConnectionController {
    /// Create a controller in the idle state
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Idle,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            silent: false,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the session is currently connected
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether failure events should be suppressed toward the host
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Attempts consumed since the budget was last reset
    pub fn attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Enter Connecting for a user- or engine-initiated connect.
    ///
    /// A non-silent connect is a deliberate user action and resets the
    /// reconnect budget; silent connects (automatic retries, background
    /// resumes) spend from the existing budget.
    pub fn begin_connect(&mut self, silent: bool) {
        if !silent {
            self.reconnect_attempts = 0;
        }
        self.silent = silent;
        self.state = ConnectionState::Connecting;
    }

    /// Enter Connecting for a scheduled automatic reconnect.
    ///
    /// Preserves the consumed attempts and the session's silent intent:
    /// the retry itself is invisible either way, and whether a terminal
    /// give-up surfaces to the host is decided by how the session was
    /// started, not by the redial.
    pub fn begin_reconnect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// The socket opened
    pub fn on_open(&mut self) {
        self.reconnect_attempts = 0;
        self.state = ConnectionState::Connected;
    }

    /// A local disconnect was requested
    pub fn begin_disconnect(&mut self) {
        self.state = ConnectionState::Disconnecting;
    }

    /// The local disconnect completed
    pub fn finish_disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.reconnect_attempts = 0;
    }

    /// The connect handshake exceeded its deadline.
    ///
    /// Treated exactly like an abnormal close: it consumes one attempt
    /// and retries under the same gate.
    pub fn on_timeout(&mut self, eligible: bool) -> CloseDirective {
        self.state = ConnectionState::Disconnected;
        self.retry_gate(eligible)
    }

    /// The socket closed with the given close code
    pub fn on_close(&mut self, code: u16, eligible: bool) -> CloseDirective {
        let local_close = self.state == ConnectionState::Disconnecting;
        self.state = ConnectionState::Disconnected;
        if local_close || code == 1000 || code == 1001 {
            self.reconnect_attempts = 0;
            return CloseDirective::Stay;
        }
        self.retry_gate(eligible)
    }

    /// The transport failed outside of the close handshake
    pub fn on_transport_error(&mut self) {
        self.state = ConnectionState::Errored;
    }

    fn retry_gate(&mut self, eligible: bool) -> CloseDirective {
        if !eligible {
            return CloseDirective::EntitlementRequired;
        }
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            return CloseDirective::GiveUp;
        }
        self.reconnect_attempts += 1;
        CloseDirective::Retry {
            attempt: self.reconnect_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_close_never_retries() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        conn.on_open();
        assert_eq!(conn.on_close(1000, true), CloseDirective::Stay);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.begin_connect(false);
        conn.on_open();
        assert_eq!(conn.on_close(1001, true), CloseDirective::Stay);
    }

    #[test]
    fn test_abnormal_close_retries_up_to_budget() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        assert_eq!(conn.on_close(1006, true), CloseDirective::Retry { attempt: 1 });
        conn.begin_connect(true);
        assert_eq!(conn.on_close(1006, true), CloseDirective::Retry { attempt: 2 });
        conn.begin_connect(true);
        assert_eq!(conn.on_close(1006, true), CloseDirective::Retry { attempt: 3 });
        conn.begin_connect(true);
        assert_eq!(conn.on_close(1006, true), CloseDirective::GiveUp);
    }

    #[test]
    fn test_eligibility_checked_before_budget() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        assert_eq!(conn.on_close(1006, false), CloseDirective::EntitlementRequired);
        // No attempt consumed for an ineligible client
        assert_eq!(conn.attempts(), 0);
    }

    #[test]
    fn test_successful_open_resets_budget() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        assert_eq!(conn.on_close(1006, true), CloseDirective::Retry { attempt: 1 });
        conn.begin_connect(true);
        conn.on_open();
        assert_eq!(conn.attempts(), 0);
        assert_eq!(conn.on_close(1006, true), CloseDirective::Retry { attempt: 1 });
    }

    #[test]
    fn test_user_connect_resets_budget_silent_does_not() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        conn.on_close(1006, true);
        conn.begin_connect(true);
        assert_eq!(conn.attempts(), 1);
        conn.on_close(1006, true);
        conn.begin_connect(false);
        assert_eq!(conn.attempts(), 0);
    }

    #[test]
    fn test_reconnect_enters_connecting_and_keeps_budget() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        assert_eq!(conn.on_close(1006, true), CloseDirective::Retry { attempt: 1 });

        conn.begin_reconnect();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.attempts(), 1);
        // The session was started non-silently and stays that way
        assert!(!conn.is_silent());
        assert_eq!(conn.on_close(1006, true), CloseDirective::Retry { attempt: 2 });
    }

    #[test]
    fn test_timeout_consumes_an_attempt() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        assert_eq!(conn.on_timeout(true), CloseDirective::Retry { attempt: 1 });
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_local_disconnect_is_clean_even_with_abnormal_code() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        conn.on_open();
        conn.begin_disconnect();
        assert_eq!(conn.on_close(1006, true), CloseDirective::Stay);
    }

    #[test]
    fn test_transport_error_enters_errored() {
        let mut conn = ConnectionController::new(3);
        conn.begin_connect(false);
        conn.on_transport_error();
        assert_eq!(conn.state(), ConnectionState::Errored);
    }
}
