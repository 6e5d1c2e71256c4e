use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::EndpointError;

/// Handle identifying one connection for the lifetime of an [`Endpoint`](crate::Endpoint)
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connection. Only moves forward; terminal states are final.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Failed { reason: String },
    Closed { code: u16, reason: String },
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Closed { .. })
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Failed { .. } => write!(f, "Failed"),
            Self::Closed { .. } => write!(f, "Closed"),
        }
    }
}

/// Result of [`Connection::wait_for_message`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Unconsumed messages are queued on the record
    Ready,
    /// The connection reached a terminal status with nothing left to consume
    Closed(ConnectionStatus),
    /// The timeout elapsed with nothing to report
    TimedOut,
}

/// Everything guarded by the record's mutex
struct RecordState {
    status: ConnectionStatus,
    messages: Vec<String>,
    processed: bool,
    received: u64,
    server: Option<String>,
}

/// State of one connection, shared between the transport task and the foreground.
///
/// The transport side only appends and transitions status; the foreground side
/// waits, reads, and clears the processed-flag. Every mutation of the flag and
/// the message sequence happens under `state`, and every mutation that a waiter
/// could care about notifies `signal` while still holding it.
pub struct Connection {
    id: ConnectionId,
    uri: String,
    state: Mutex<RecordState>,
    signal: Condvar,
    in_flight: AtomicBool,
}

impl Connection {
    pub fn new(id: ConnectionId, uri: impl Into<String>) -> Self {
        Self {
            id,
            uri: uri.into(),
            state: Mutex::new(RecordState {
                status: ConnectionStatus::Connecting,
                messages: Vec::new(),
                processed: false,
                received: 0,
                server: None,
            }),
            signal: Condvar::new(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status.clone()
    }

    /// Value of the `Server` header from the handshake response, if any
    pub fn server(&self) -> Option<String> {
        self.state.lock().server.clone()
    }

    /// Connecting -> Open. Returns false if the record already moved past Connecting.
    pub fn mark_open(&self, server: Option<String>) -> bool {
        let mut state = self.state.lock();
        if state.status != ConnectionStatus::Connecting {
            return false;
        }
        state.status = ConnectionStatus::Open;
        state.server = server;
        true
    }

    /// Store an inbound payload verbatim and wake any waiter.
    pub fn append_message(&self, payload: impl Into<String>) {
        let mut state = self.state.lock();
        state.messages.push(payload.into());
        state.received += 1;
        state.processed = true;
        self.signal.notify_all();
    }

    /// Transition to `Closed`. No-op if the status is already terminal.
    pub fn mark_closed(&self, code: u16, reason: impl Into<String>) -> bool {
        self.terminate(ConnectionStatus::Closed {
            code,
            reason: reason.into(),
        })
    }

    /// Transition to `Failed`. No-op if the status is already terminal.
    pub fn mark_failed(&self, reason: impl Into<String>) -> bool {
        self.terminate(ConnectionStatus::Failed {
            reason: reason.into(),
        })
    }

    fn terminate(&self, status: ConnectionStatus) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        // A terminal transition must release waiters even though no message arrived.
        self.signal.notify_all();
        true
    }

    /// Block until a message is pending, the connection terminates, or `timeout` elapses.
    ///
    /// `None` waits without a deadline. The flag check and the block happen under the
    /// same lock, so a message appended before the call is never missed.
    pub fn wait_for_message(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::ready_outcome(&state) {
                return outcome;
            }
            match deadline {
                None => self.signal.wait(&mut state),
                Some(deadline) => {
                    if self.signal.wait_until(&mut state, deadline).timed_out() {
                        return Self::ready_outcome(&state).unwrap_or(WaitOutcome::TimedOut);
                    }
                }
            }
        }
    }

    fn ready_outcome(state: &RecordState) -> Option<WaitOutcome> {
        if state.processed {
            Some(WaitOutcome::Ready)
        } else if state.status.is_terminal() {
            Some(WaitOutcome::Closed(state.status.clone()))
        } else {
            None
        }
    }

    /// Reset the processed-flag after handling a notification.
    pub fn clear_processed(&self) {
        self.state.lock().processed = false;
    }

    /// Mark the current history length and clear the processed-flag under one
    /// lock. Messages appended afterwards are exactly `messages_since(mark)`.
    pub fn snapshot_and_clear(&self) -> usize {
        let mut state = self.state.lock();
        state.processed = false;
        state.messages.len()
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().processed
    }

    /// Take every queued message and clear the processed-flag in one step.
    pub fn take_messages(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.processed = false;
        std::mem::take(&mut state.messages)
    }

    /// Full retained message sequence
    pub fn messages(&self) -> Vec<String> {
        self.state.lock().messages.clone()
    }

    /// Messages appended after the sequence had `start` entries
    pub fn messages_since(&self, start: usize) -> Vec<String> {
        let state = self.state.lock();
        state.messages.get(start..).map(<[String]>::to_vec).unwrap_or_default()
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Total messages received over the connection's life, including drained ones
    pub fn received_count(&self) -> u64 {
        self.state.lock().received
    }

    /// Claim the single outstanding-request slot for this handle.
    pub fn begin_request(&self) -> Result<RequestGuard<'_>, EndpointError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EndpointError::RequestInFlight(self.id))?;
        Ok(RequestGuard { connection: self })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        writeln!(f, "> URI: {}", self.uri)?;
        writeln!(f, "> Status: {}", state.status)?;
        writeln!(
            f,
            "> Remote Server: {}",
            state.server.as_deref().unwrap_or("N/A")
        )?;
        match &state.status {
            ConnectionStatus::Failed { reason } => writeln!(f, "> Error reason: {reason}")?,
            ConnectionStatus::Closed { code, reason } if reason.is_empty() => {
                writeln!(f, "> Close code: {code}")?
            }
            ConnectionStatus::Closed { code, reason } => {
                writeln!(f, "> Close code: {code} ({reason})")?
            }
            _ => writeln!(f, "> Error reason: N/A")?,
        }
        write!(f, "> Messages Processed: ({})", state.received)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("status", &self.status())
            .finish()
    }
}

/// Held while a request or stream is outstanding; frees the slot on drop.
#[must_use = "the request slot is released as soon as the guard is dropped"]
pub struct RequestGuard<'a> {
    connection: &'a Connection,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.connection.in_flight.store(false, Ordering::Release);
    }
}
