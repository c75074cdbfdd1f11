//! Connection lifecycle state machine
//!
//! Pure bookkeeping for the connection manager: the lifecycle state, the
//! consecutive-failure counter and the deferred-reconnect flag. All I/O lives
//! in the connection module; keeping the transitions here makes the
//! idempotency and backoff rules testable without a socket.

use std::time::Duration;

use super::backoff::ReconnectPolicy;

/// Lifecycle state of the single logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No connection has been requested yet (or the manager was shut down)
    Idle,
    /// A connection attempt is in flight
    Connecting,
    /// The socket is open and messages flow
    Open,
    /// The socket dropped; a reconnect may be pending
    Closed,
}

/// Outcome of planning the next reconnection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectPlan {
    /// Arm a timer for the given attempt number
    Schedule { attempt: u32, delay: Duration },
    /// Page is hidden; retry once visibility returns
    Deferred,
    /// Attempt ceiling reached; only an explicit connect() resumes
    Exhausted,
}

/// Connection state, attempt counter and deferral flag
#[derive(Debug)]
pub(crate) struct ConnCore {
    state: ConnState,
    attempt: u32,
    deferred: bool,
}

impl ConnCore {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnState::Idle,
            attempt: 0,
            deferred: false,
        }
    }

    pub(crate) fn state(&self) -> ConnState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Transition into `Connecting` unless an attempt is already in flight
    /// or the connection is open. Returns whether a new attempt may start;
    /// this is what makes `connect()` idempotent and keeps the live-socket
    /// count at one.
    pub(crate) fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnState::Connecting | ConnState::Open => false,
            ConnState::Idle | ConnState::Closed => {
                self.state = ConnState::Connecting;
                true
            }
        }
    }

    /// Record a successful handshake; resets the attempt counter.
    pub(crate) fn mark_open(&mut self) {
        self.state = ConnState::Open;
        self.attempt = 0;
        self.deferred = false;
    }

    /// Record a disconnect (failed handshake or dropped socket).
    pub(crate) fn mark_closed(&mut self) {
        self.state = ConnState::Closed;
    }

    /// Return to `Idle` after an explicit shutdown. The attempt counter is
    /// left alone; only a successful open resets it.
    pub(crate) fn reset(&mut self) {
        self.state = ConnState::Idle;
        self.deferred = false;
    }

    /// Decide what to do after a disconnect
    ///
    /// Increments the attempt counter before the delay elapses, so a
    /// `connect()` issued during the wait is judged against the updated
    /// count. A hidden page defers without consuming an attempt.
    pub(crate) fn plan_reconnect(&mut self, visible: bool, policy: &ReconnectPolicy) -> ReconnectPlan {
        if self.attempt >= policy.max_attempts {
            return ReconnectPlan::Exhausted;
        }
        if !visible {
            self.deferred = true;
            return ReconnectPlan::Deferred;
        }
        self.attempt += 1;
        ReconnectPlan::Schedule {
            attempt: self.attempt,
            delay: policy.delay_for(self.attempt),
        }
    }

    /// Consume a pending deferral, if the connection is still down
    pub(crate) fn take_deferred(&mut self) -> bool {
        if self.deferred && self.state == ConnState::Closed {
            self.deferred = false;
            true
        } else {
            false
        }
    }
}
