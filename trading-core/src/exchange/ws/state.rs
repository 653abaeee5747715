// exchange/ws/state.rs
// Connection state machine, reconnect backoff and the outage buffer.
// Kept free of I/O so the transitions can be driven directly in tests.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::messages::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    ReconnectScheduled,
    Fatal,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::ReconnectScheduled => "reconnect_scheduled",
            ConnectionState::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// `min(base * 2^attempt, cap)`
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    pub seq: u64,
    pub event: StreamEvent,
}

/// Bounded FIFO; a full buffer evicts its oldest entry
#[derive(Debug)]
pub struct MessageBuffer {
    capacity: usize,
    queue: VecDeque<BufferedMessage>,
    next_seq: u64,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Returns the evicted entry, if any
    pub fn push(&mut self, event: StreamEvent) -> Option<BufferedMessage> {
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(BufferedMessage {
            seq: self.next_seq,
            event,
        });
        self.next_seq += 1;
        evicted
    }

    /// Empties the buffer in arrival order
    pub fn drain(&mut self) -> Vec<BufferedMessage> {
        self.queue.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// What to do after a failed handshake or a lost connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Reconnect { delay: Duration, attempt: u32 },
    Fatal { attempts: u32 },
}

/// Connection lifecycle without the socket
#[derive(Debug)]
pub struct SupervisorCore {
    state: ConnectionState,
    attempts: u32,
    policy: BackoffPolicy,
    buffer: MessageBuffer,
}

impl SupervisorCore {
    pub fn new(policy: BackoffPolicy, buffer_capacity: usize) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            policy,
            buffer: MessageBuffer::new(buffer_capacity),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Idle or Fatal → Connecting. A connect after Fatal starts a fresh
    /// attempt budget. Returns false if a connection is already underway.
    pub fn start(&mut self) -> bool {
        match self.state {
            ConnectionState::Idle | ConnectionState::Fatal => {
                if self.state == ConnectionState::Fatal {
                    self.attempts = 0;
                }
                self.state = ConnectionState::Connecting;
                true
            }
            _ => false,
        }
    }

    /// ReconnectScheduled → Connecting
    pub fn reconnect_due(&mut self) -> bool {
        if self.state == ConnectionState::ReconnectScheduled {
            self.state = ConnectionState::Connecting;
            true
        } else {
            false
        }
    }

    /// Transport handshake succeeded; subscriptions are being replayed
    pub fn handshake_succeeded(&mut self) {
        self.attempts = 0;
    }

    /// → Open; returns what was buffered, oldest first
    pub fn open(&mut self) -> Vec<StreamEvent> {
        self.state = ConnectionState::Open;
        self.buffer.drain().into_iter().map(|m| m.event).collect()
    }

    pub fn begin_closing(&mut self) {
        if self.state != ConnectionState::Idle {
            self.state = ConnectionState::Closing;
        }
    }

    /// Handshake failure or involuntary close
    pub fn fail(&mut self) -> FailureOutcome {
        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::Fatal;
            self.buffer.clear();
            return FailureOutcome::Fatal {
                attempts: self.attempts,
            };
        }

        let delay = backoff_delay(self.policy.base, self.policy.cap, self.attempts);
        self.attempts += 1;
        self.state = ConnectionState::ReconnectScheduled;
        FailureOutcome::Reconnect {
            delay,
            attempt: self.attempts,
        }
    }

    /// Deliberate disconnect
    pub fn stop(&mut self) {
        self.state = ConnectionState::Idle;
        self.attempts = 0;
        self.buffer.clear();
    }

    /// Routes a validated event: delivered now when Open, buffered otherwise.
    /// An event buffered past capacity evicts the oldest one.
    pub fn accept(&mut self, event: StreamEvent) -> Option<StreamEvent> {
        if self.state == ConnectionState::Open {
            Some(event)
        } else {
            if let Some(evicted) = self.buffer.push(event) {
                debug!(
                    seq = evicted.seq,
                    channel = evicted.event.channel(),
                    "Buffer full, evicted oldest message"
                );
            }
            None
        }
    }
}
