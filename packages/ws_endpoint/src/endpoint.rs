use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::{debug, info};

use crate::adapter::{self, GOING_AWAY, Outgoing};
use crate::connection::{Connection, ConnectionId};
use crate::error::EndpointError;

/// Upper bound on how long shutdown waits for close handshakes
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Normal closure, the default for [`Endpoint::close`]
pub const NORMAL_CLOSURE: u16 = 1000;

/// Registry entry: the record plus the channel into its transport task
struct ManagedConnection {
    record: Arc<Connection>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    task: Option<JoinHandle<()>>,
}

/// Owner of every connection in a session and of the run-loop thread that drives them.
///
/// All methods are meant to be called from ordinary (non-async) threads; `send`
/// blocks until the transport has written the frame.
pub struct Endpoint {
    connections: RwLock<HashMap<ConnectionId, ManagedConnection>>,
    next_id: AtomicU64,
    runtime: Option<Runtime>,
}

impl Endpoint {
    /// Start the transport run-loop on a dedicated background thread.
    pub fn new() -> Result<Self, EndpointError> {
        // Another crate in the process may already have picked a provider.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ws-endpoint")
            .enable_all()
            .build()
            .map_err(|e| EndpointError::Transport(format!("failed to start run-loop: {e}")))?;

        Ok(Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            runtime: Some(runtime),
        })
    }

    /// Begin connecting to `address` and return its handle without waiting for the handshake.
    ///
    /// A malformed address is rejected before a handle is allocated. A handshake that
    /// fails later leaves the record under its handle with status `Failed`.
    pub fn connect(&self, address: &str) -> Result<ConnectionId, EndpointError> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| EndpointError::Transport("endpoint is shut down".into()))?;
        let address = address.trim();
        let request = client_request(address)?;

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = Arc::new(Connection::new(id, address));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        info!("Connection {} created for {}", id, address);

        // Register before spawning so the handle resolves even if the task finishes first.
        let mut connections = self.connections.write();
        connections.insert(
            id,
            ManagedConnection {
                record: record.clone(),
                outgoing: outgoing_tx,
                task: None,
            },
        );
        let task = runtime.spawn(adapter::run_connection(record, request, outgoing_rx));
        if let Some(managed) = connections.get_mut(&id) {
            managed.task = Some(task);
        }

        Ok(id)
    }

    /// Look up the record for a handle
    pub fn get_record(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .get(&id)
            .map(|managed| managed.record.clone())
    }

    /// Write a text frame on an open connection.
    ///
    /// Outgoing payloads are not added to the record's message sequence.
    pub fn send(&self, id: ConnectionId, payload: &str) -> Result<(), EndpointError> {
        let (record, outgoing) = {
            let connections = self.connections.read();
            let managed = connections
                .get(&id)
                .ok_or(EndpointError::UnknownHandle(id))?;
            (managed.record.clone(), managed.outgoing.clone())
        };

        let status = record.status();
        if !status.is_open() {
            return Err(EndpointError::NotConnected { id, status });
        }

        let (tx, rx) = oneshot::channel();
        outgoing
            .send(Outgoing::Text {
                payload: payload.to_string(),
                respond_to: tx,
            })
            .map_err(|_| EndpointError::NotConnected {
                id,
                status: record.status(),
            })?;

        debug!("Queued {} bytes on connection {}", payload.len(), id);
        rx.blocking_recv()
            .map_err(|_| EndpointError::NotConnected {
                id,
                status: record.status(),
            })?
    }

    /// Ask the connection to shut down gracefully. Already-terminal connections are left alone.
    pub fn close(&self, id: ConnectionId, code: u16, reason: &str) -> Result<(), EndpointError> {
        let connections = self.connections.read();
        let managed = connections
            .get(&id)
            .ok_or(EndpointError::UnknownHandle(id))?;

        if managed.record.status().is_terminal() {
            debug!("Connection {} already closed", id);
            return Ok(());
        }

        // If the task already exited the record is terminal, which is what close wants anyway.
        let _ = managed.outgoing.send(Outgoing::Close {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Close every live connection and stop the run-loop thread. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        let mut tasks = Vec::new();
        for managed in self.connections.write().values_mut() {
            if !managed.record.status().is_terminal() {
                let _ = managed.outgoing.send(Outgoing::Close {
                    code: GOING_AWAY,
                    reason: "going away".to_string(),
                });
            }
            if let Some(task) = managed.task.take() {
                tasks.push(task);
            }
        }

        info!("Shutting down endpoint ({} connections)", tasks.len());
        runtime.block_on(async {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, join_all(tasks)).await;
        });
        runtime.shutdown_timeout(Duration::from_millis(100));
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Validate an address and build the handshake request for it.
fn client_request(address: &str) -> Result<Request, EndpointError> {
    let uri: Uri = address
        .parse()
        .map_err(|e| EndpointError::ConnectFailure(format!("malformed address '{address}': {e}")))?;

    match uri.scheme_str() {
        Some("ws") | Some("wss") => {}
        _ => {
            return Err(EndpointError::ConnectFailure(format!(
                "unsupported address '{address}': expected ws:// or wss://"
            )));
        }
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(EndpointError::ConnectFailure(format!(
            "address '{address}' has no host"
        )));
    }

    uri.into_client_request()
        .map_err(|e| EndpointError::ConnectFailure(format!("invalid address '{address}': {e}")))
}
